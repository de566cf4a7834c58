//! IO modules - external system interfaces
//!
//! - `reader` - TCP link monitor for the RFID tag scanner
//! - `egress_channel` - Typed channel for outbound events
//! - `mqtt_egress` - MQTT publisher for egress events
//! - `control` - Administrative HTTP surface

pub mod control;
pub mod egress_channel;
pub mod mqtt_egress;
pub mod reader;

// Re-export commonly used types
pub use control::{start_control_server, ControlContext};
pub use egress_channel::{create_egress_channel, AssociationPayload, EgressMessage, EgressSender};
pub use mqtt_egress::MqttPublisher;
pub use reader::{LinkState, ReaderCommand, ReaderMonitor};
