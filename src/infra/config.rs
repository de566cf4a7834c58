//! Configuration loading from TOML files
//!
//! Config file is selected via the --config command line argument
//! (default: config/dev.toml). A missing or malformed file logs a warning
//! and falls back to built-in defaults.

use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Log verbosity surface carried in the config file.
/// `RUST_LOG` always overrides whatever is configured here.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    None,
    Basic,
    Detailed,
}

impl LogLevel {
    /// Default tracing filter directive for this level
    pub fn filter_directive(&self) -> &'static str {
        match self {
            LogLevel::None => "off",
            LogLevel::Basic => "info",
            LogLevel::Detailed => "debug",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Unique site identifier stamped onto outbound payloads
    #[serde(default = "default_site_id")]
    pub id: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: default_site_id() }
    }
}

fn default_site_id() -> String {
    "rfid-gateway".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReaderConfig {
    pub host: String,
    #[serde(default = "default_reader_port")]
    pub port: u16,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Connect as soon as the gateway starts instead of waiting for a
    /// control start command
    #[serde(default)]
    pub auto_start: bool,
}

fn default_reader_port() -> u16 {
    5084
}

fn default_reconnect_delay_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssociationConfig {
    /// Seconds an unpaired pallet waits before it is reported incomplete
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_pallet_id_len")]
    pub pallet_id_len: usize,
    #[serde(default = "default_operator_id_len")]
    pub operator_id_len: usize,
    /// Flush all pending pallets as incomplete when the reader link drops
    #[serde(default)]
    pub flush_on_link_loss: bool,
}

impl Default for AssociationConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            pallet_id_len: default_pallet_id_len(),
            operator_id_len: default_operator_id_len(),
            flush_on_link_loss: false,
        }
    }
}

fn default_timeout_secs() -> u64 {
    5
}

fn default_pallet_id_len() -> usize {
    16
}

fn default_operator_id_len() -> usize {
    12
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: LogLevel,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: default_log_level() }
    }
}

fn default_log_level() -> LogLevel {
    LogLevel::Basic
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            username: None,
            password: None,
        }
    }
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self { bind_address: default_broker_bind_address(), port: default_mqtt_port() }
    }
}

fn default_broker_bind_address() -> String {
    "0.0.0.0".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttEgressConfig {
    #[serde(default = "default_mqtt_egress_enabled")]
    pub enabled: bool,
    /// Topic for association events (QoS 1)
    #[serde(default = "default_associations_topic")]
    pub associations_topic: String,
    /// Topic for periodic metrics snapshots (QoS 0)
    #[serde(default = "default_metrics_topic")]
    pub metrics_topic: String,
    #[serde(default = "default_metrics_publish_interval")]
    pub metrics_publish_interval_secs: u64,
}

impl Default for MqttEgressConfig {
    fn default() -> Self {
        Self {
            enabled: default_mqtt_egress_enabled(),
            associations_topic: default_associations_topic(),
            metrics_topic: default_metrics_topic(),
            metrics_publish_interval_secs: default_metrics_publish_interval(),
        }
    }
}

fn default_mqtt_egress_enabled() -> bool {
    true
}

fn default_associations_topic() -> String {
    "rfid/associations".to_string()
}

fn default_metrics_topic() -> String {
    "rfid/metrics".to_string()
}

fn default_metrics_publish_interval() -> u64 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct ControlConfig {
    #[serde(default = "default_control_port")]
    pub port: u16,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self { port: default_control_port() }
    }
}

fn default_control_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval_secs")]
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval_secs() }
    }
}

fn default_metrics_interval_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    pub reader: ReaderConfig,
    #[serde(default)]
    pub association: AssociationConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub mqtt_egress: MqttEgressConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    reader_host: String,
    reader_port: u16,
    reader_reconnect_delay: Duration,
    reader_auto_start: bool,
    association_timeout: Duration,
    pallet_id_len: usize,
    operator_id_len: usize,
    flush_on_link_loss: bool,
    log_level: LogLevel,
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    broker_bind_address: String,
    broker_port: u16,
    mqtt_egress_enabled: bool,
    mqtt_egress_associations_topic: String,
    mqtt_egress_metrics_topic: String,
    mqtt_egress_metrics_interval_secs: u64,
    control_port: u16,
    metrics_interval_secs: u64,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            site_id: default_site_id(),
            reader_host: "172.16.100.197".to_string(),
            reader_port: default_reader_port(),
            reader_reconnect_delay: Duration::from_millis(default_reconnect_delay_ms()),
            reader_auto_start: false,
            association_timeout: Duration::from_secs(default_timeout_secs()),
            pallet_id_len: default_pallet_id_len(),
            operator_id_len: default_operator_id_len(),
            flush_on_link_loss: false,
            log_level: default_log_level(),
            mqtt_host: default_mqtt_host(),
            mqtt_port: default_mqtt_port(),
            mqtt_username: None,
            mqtt_password: None,
            broker_bind_address: default_broker_bind_address(),
            broker_port: default_mqtt_port(),
            mqtt_egress_enabled: true,
            mqtt_egress_associations_topic: default_associations_topic(),
            mqtt_egress_metrics_topic: default_metrics_topic(),
            mqtt_egress_metrics_interval_secs: default_metrics_publish_interval(),
            control_port: default_control_port(),
            metrics_interval_secs: default_metrics_interval_secs(),
            config_file: "default".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self {
            site_id: toml_config.site.id,
            reader_host: toml_config.reader.host,
            reader_port: toml_config.reader.port,
            reader_reconnect_delay: Duration::from_millis(toml_config.reader.reconnect_delay_ms),
            reader_auto_start: toml_config.reader.auto_start,
            association_timeout: Duration::from_secs(toml_config.association.timeout_secs),
            pallet_id_len: toml_config.association.pallet_id_len,
            operator_id_len: toml_config.association.operator_id_len,
            flush_on_link_loss: toml_config.association.flush_on_link_loss,
            log_level: toml_config.log.level,
            mqtt_host: toml_config.mqtt.host,
            mqtt_port: toml_config.mqtt.port,
            mqtt_username: toml_config.mqtt.username,
            mqtt_password: toml_config.mqtt.password,
            broker_bind_address: toml_config.broker.bind_address,
            broker_port: toml_config.broker.port,
            mqtt_egress_enabled: toml_config.mqtt_egress.enabled,
            mqtt_egress_associations_topic: toml_config.mqtt_egress.associations_topic,
            mqtt_egress_metrics_topic: toml_config.mqtt_egress.metrics_topic,
            mqtt_egress_metrics_interval_secs: toml_config
                .mqtt_egress
                .metrics_publish_interval_secs,
            control_port: toml_config.control.port,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            config_file: path.display().to_string(),
        })
    }

    /// Load configuration from a path - falls back to defaults on failure
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {}. Using defaults.", e);
                Self::default()
            }
        }
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn reader_host(&self) -> &str {
        &self.reader_host
    }

    pub fn reader_port(&self) -> u16 {
        self.reader_port
    }

    /// Full reader address in host:port form
    pub fn reader_addr(&self) -> String {
        format!("{}:{}", self.reader_host, self.reader_port)
    }

    pub fn reader_reconnect_delay(&self) -> Duration {
        self.reader_reconnect_delay
    }

    pub fn reader_auto_start(&self) -> bool {
        self.reader_auto_start
    }

    pub fn association_timeout(&self) -> Duration {
        self.association_timeout
    }

    pub fn pallet_id_len(&self) -> usize {
        self.pallet_id_len
    }

    pub fn operator_id_len(&self) -> usize {
        self.operator_id_len
    }

    pub fn flush_on_link_loss(&self) -> bool {
        self.flush_on_link_loss
    }

    pub fn log_level(&self) -> LogLevel {
        self.log_level
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    pub fn broker_bind_address(&self) -> &str {
        &self.broker_bind_address
    }

    pub fn broker_port(&self) -> u16 {
        self.broker_port
    }

    pub fn mqtt_egress_enabled(&self) -> bool {
        self.mqtt_egress_enabled
    }

    pub fn mqtt_egress_associations_topic(&self) -> &str {
        &self.mqtt_egress_associations_topic
    }

    pub fn mqtt_egress_metrics_topic(&self) -> &str {
        &self.mqtt_egress_metrics_topic
    }

    pub fn mqtt_egress_metrics_interval_secs(&self) -> u64 {
        self.mqtt_egress_metrics_interval_secs
    }

    pub fn control_port(&self) -> u16 {
        self.control_port
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to shorten the pairing window
    #[cfg(test)]
    pub fn with_association_timeout(mut self, timeout: Duration) -> Self {
        self.association_timeout = timeout;
        self
    }

    /// Builder method for tests to set the link-loss flush policy
    #[cfg(test)]
    pub fn with_flush_on_link_loss(mut self, flush: bool) -> Self {
        self.flush_on_link_loss = flush;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.association_timeout(), Duration::from_secs(5));
        assert_eq!(config.pallet_id_len(), 16);
        assert_eq!(config.operator_id_len(), 12);
        assert!(!config.flush_on_link_loss());
        assert_eq!(config.reader_port(), 5084);
        assert!(!config.reader_auto_start());
        assert_eq!(config.log_level(), LogLevel::Basic);
        assert_eq!(config.mqtt_egress_associations_topic(), "rfid/associations");
        assert_eq!(config.control_port(), 8080);
    }

    #[test]
    fn test_reader_addr() {
        let config = Config::default();
        assert_eq!(config.reader_addr(), "172.16.100.197:5084");
    }

    #[test]
    fn test_log_level_filter_directive() {
        assert_eq!(LogLevel::None.filter_directive(), "off");
        assert_eq!(LogLevel::Basic.filter_directive(), "info");
        assert_eq!(LogLevel::Detailed.filter_directive(), "debug");
    }

    #[test]
    fn test_load_from_path_fallback() {
        let config = Config::load_from_path("does/not/exist.toml");
        assert_eq!(config.config_file(), "default");
        assert_eq!(config.association_timeout(), Duration::from_secs(5));
    }
}
