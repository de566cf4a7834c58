//! Domain types - core business data model
//!
//! - `types` - Tag identifiers, classification kinds, engine events, and
//!   association outcomes

pub mod types;

pub use types::{AssociationEvent, EngineEvent, TagId, TagKind};
