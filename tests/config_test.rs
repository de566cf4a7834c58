//! Integration tests for configuration loading

use rfid_gateway::infra::{Config, LogLevel};
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

#[test]
fn test_load_config_from_file() {
    let mut temp_file = NamedTempFile::new().unwrap();

    let config_content = r#"
[site]
id = "warehouse-7"

[reader]
host = "10.0.0.50"
port = 5085
reconnect_delay_ms = 2000
auto_start = true

[association]
timeout_secs = 8
pallet_id_len = 20
operator_id_len = 10
flush_on_link_loss = true

[log]
level = "detailed"

[mqtt]
host = "broker.local"
port = 1884

[mqtt_egress]
associations_topic = "warehouse/associations"
metrics_publish_interval_secs = 15

[control]
port = 9090

[metrics]
interval_secs = 30
"#;

    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.site_id(), "warehouse-7");
    assert_eq!(config.reader_addr(), "10.0.0.50:5085");
    assert_eq!(config.reader_reconnect_delay(), Duration::from_millis(2000));
    assert!(config.reader_auto_start());
    assert_eq!(config.association_timeout(), Duration::from_secs(8));
    assert_eq!(config.pallet_id_len(), 20);
    assert_eq!(config.operator_id_len(), 10);
    assert!(config.flush_on_link_loss());
    assert_eq!(config.log_level(), LogLevel::Detailed);
    assert_eq!(config.mqtt_host(), "broker.local");
    assert_eq!(config.mqtt_port(), 1884);
    assert_eq!(config.mqtt_egress_associations_topic(), "warehouse/associations");
    assert_eq!(config.mqtt_egress_metrics_interval_secs(), 15);
    assert_eq!(config.control_port(), 9090);
    assert_eq!(config.metrics_interval_secs(), 30);
}

#[test]
fn test_minimal_config_uses_section_defaults() {
    let mut temp_file = NamedTempFile::new().unwrap();

    // Only the reader section is required
    let config_content = r#"
[reader]
host = "192.168.1.20"
"#;

    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.reader_addr(), "192.168.1.20:5084");
    assert!(!config.reader_auto_start());
    assert_eq!(config.association_timeout(), Duration::from_secs(5));
    assert_eq!(config.pallet_id_len(), 16);
    assert_eq!(config.operator_id_len(), 12);
    assert!(!config.flush_on_link_loss());
    assert_eq!(config.log_level(), LogLevel::Basic);
    assert_eq!(config.site_id(), "rfid-gateway");
    assert_eq!(config.mqtt_egress_associations_topic(), "rfid/associations");
    assert!(config.mqtt_egress_enabled());
}

#[test]
fn test_missing_reader_section_is_an_error() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"[site]\nid = \"x\"\n").unwrap();
    temp_file.flush().unwrap();

    assert!(Config::from_file(temp_file.path()).is_err());
}

#[test]
fn test_load_from_missing_path_falls_back() {
    let config = Config::load_from_path("no/such/file.toml");
    assert_eq!(config.config_file(), "default");
    assert_eq!(config.pallet_id_len(), 16);
}
