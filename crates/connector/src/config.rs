//! Connector options and their TOML file form.
//!
//! [`ConnectorOptions`] is the resolved, immutable set a connector is built
//! from.  [`ConnectorConfig`] is what a config file holds: every field is
//! optional and falls back to the defaults of the chosen
//! [`ServiceFamily`].  Resolution builds a fresh value each time; there is
//! no shared default object to mutate.

use std::time::Duration;

use malos_transport::{ConnectBackoff, ConnectionDescriptor};
use serde::{Deserialize, Serialize};

use crate::error::{ConnectorError, Result};
use crate::family::ServiceFamily;
use crate::manager::DEFAULT_EVENT_CAPACITY;
use crate::schema::{SchemaBinding, SchemaSource};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_millis(5000);

/// Everything needed to build a [`ServiceAdapter`](crate::ServiceAdapter).
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectorOptions {
    pub host: String,
    /// Base (config) port; the other channels sit at +1, +2, +3.
    pub port: u16,
    /// `None` disables keepalive.
    pub keepalive_interval: Option<Duration>,
    pub schema: SchemaBinding,
    /// Retry policy for the ZeroMQ transport's connects.
    pub connect_backoff: ConnectBackoff,
    pub event_capacity: usize,
}

impl ConnectorOptions {
    /// Documented defaults for one service family.
    pub fn for_family(family: ServiceFamily) -> Self {
        Self {
            host: DEFAULT_HOST.into(),
            port: family.base_port(),
            keepalive_interval: Some(DEFAULT_KEEPALIVE_INTERVAL),
            schema: family.schema_binding(),
            connect_backoff: ConnectBackoff::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    pub fn descriptor(&self) -> Result<ConnectionDescriptor> {
        Ok(ConnectionDescriptor::new(self.host.clone(), self.port)?)
    }

    /// Reject values that could only fail later.
    pub fn validate(&self) -> Result<()> {
        self.descriptor()?;
        if self.schema.config_message.trim().is_empty() {
            return Err(ConnectorError::Config("config message name is empty".into()));
        }
        if self.schema.data_message.trim().is_empty() {
            return Err(ConnectorError::Config("data message name is empty".into()));
        }
        if self.event_capacity == 0 {
            return Err(ConnectorError::Config("event capacity must be positive".into()));
        }
        Ok(())
    }
}

impl Default for ConnectorOptions {
    fn default() -> Self {
        Self::for_family(ServiceFamily::default())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// File form
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectorConfig {
    #[serde(default)]
    pub family: ServiceFamily,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    /// `0` disables keepalive.
    #[serde(default)]
    pub keepalive_interval_ms: Option<u64>,
    #[serde(default)]
    pub event_capacity: Option<usize>,
    #[serde(default)]
    pub schema: SchemaConfig,
    #[serde(default)]
    pub connect: ConnectConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaConfig {
    #[serde(default)]
    pub source: Option<SchemaSource>,
    #[serde(default)]
    pub config_message: Option<String>,
    #[serde(default)]
    pub data_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectConfig {
    #[serde(default = "d_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "d_max_delay_ms")]
    pub max_delay_ms: u64,
    /// `0` retries forever.
    #[serde(default)]
    pub max_attempts: u32,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: d_initial_delay_ms(),
            max_delay_ms: d_max_delay_ms(),
            max_attempts: 0,
        }
    }
}

fn d_initial_delay_ms() -> u64 {
    100
}

fn d_max_delay_ms() -> u64 {
    5_000
}

impl From<&ConnectConfig> for ConnectBackoff {
    fn from(cfg: &ConnectConfig) -> Self {
        ConnectBackoff {
            initial_delay: Duration::from_millis(cfg.initial_delay_ms),
            max_delay: Duration::from_millis(cfg.max_delay_ms),
            max_attempts: cfg.max_attempts,
            ..ConnectBackoff::default()
        }
    }
}

impl ConnectorConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| ConnectorError::Config(e.to_string()))
    }

    /// Merge onto the family defaults.
    pub fn resolve(&self) -> ConnectorOptions {
        let defaults = ConnectorOptions::for_family(self.family);
        ConnectorOptions {
            host: self.host.clone().unwrap_or(defaults.host),
            port: self.port.unwrap_or(defaults.port),
            keepalive_interval: match self.keepalive_interval_ms {
                Some(0) => None,
                Some(ms) => Some(Duration::from_millis(ms)),
                None => defaults.keepalive_interval,
            },
            schema: SchemaBinding {
                source: self.schema.source.clone().unwrap_or(defaults.schema.source),
                config_message: self
                    .schema
                    .config_message
                    .clone()
                    .unwrap_or(defaults.schema.config_message),
                data_message: self
                    .schema
                    .data_message
                    .clone()
                    .unwrap_or(defaults.schema.data_message),
            },
            connect_backoff: ConnectBackoff::from(&self.connect),
            event_capacity: self.event_capacity.unwrap_or(defaults.event_capacity),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_resolves_to_imu_defaults() {
        let options = ConnectorConfig::from_toml_str("").unwrap().resolve();
        assert_eq!(options, ConnectorOptions::default());
        assert_eq!(options.host, "127.0.0.1");
        assert_eq!(options.port, 20013);
        assert_eq!(options.keepalive_interval, Some(Duration::from_millis(5000)));
        assert_eq!(options.schema.data_message, "matrix_malos.Imu");
        assert_eq!(options.schema.source, SchemaSource::Bundled);
    }

    #[test]
    fn family_picks_port_and_data_message() {
        let options = ConnectorConfig::from_toml_str(r#"family = "pressure""#)
            .unwrap()
            .resolve();
        assert_eq!(options.port, 20025);
        assert_eq!(options.schema.data_message, "matrix_malos.Pressure");
        assert_eq!(options.schema.config_message, "matrix_malos.DriverConfig");
    }

    #[test]
    fn explicit_values_override_family_defaults() {
        let raw = r#"
family = "humidity"
host = "10.0.0.12"
port = 30000
keepalive_interval_ms = 250
event_capacity = 16

[schema]
data_message = "lab.Sample"
source = { kind = "proto_file", path = "/opt/lab.proto" }

[connect]
max_attempts = 3
"#;
        let options = ConnectorConfig::from_toml_str(raw).unwrap().resolve();
        assert_eq!(options.host, "10.0.0.12");
        assert_eq!(options.port, 30000);
        assert_eq!(options.keepalive_interval, Some(Duration::from_millis(250)));
        assert_eq!(options.event_capacity, 16);
        assert_eq!(options.schema.data_message, "lab.Sample");
        assert_eq!(options.schema.config_message, "matrix_malos.DriverConfig");
        assert_eq!(
            options.schema.source,
            SchemaSource::ProtoFile {
                path: "/opt/lab.proto".into(),
                includes: vec![],
            }
        );
        assert_eq!(options.connect_backoff.max_attempts, 3);
        assert_eq!(options.connect_backoff.initial_delay, Duration::from_millis(100));
    }

    #[test]
    fn zero_keepalive_disables_it() {
        let options = ConnectorConfig::from_toml_str("keepalive_interval_ms = 0")
            .unwrap()
            .resolve();
        assert_eq!(options.keepalive_interval, None);
    }

    #[test]
    fn resolving_twice_does_not_leak_between_instances() {
        let mut config = ConnectorConfig::default();
        let first = config.resolve();
        config.host = Some("192.168.1.20".into());
        let second = config.resolve();

        assert_eq!(first.host, "127.0.0.1");
        assert_eq!(second.host, "192.168.1.20");
        assert_eq!(ConnectorOptions::default().host, "127.0.0.1");
    }

    #[test]
    fn unknown_family_is_config_error() {
        let err = ConnectorConfig::from_toml_str(r#"family = "lidar""#).unwrap_err();
        assert!(matches!(err, ConnectorError::Config(_)));
    }

    #[test]
    fn validate_rejects_bad_options() {
        let mut options = ConnectorOptions::default();
        assert!(options.validate().is_ok());

        options.port = u16::MAX;
        assert!(matches!(options.validate(), Err(ConnectorError::Transport(_))));

        let mut options = ConnectorOptions::default();
        options.schema.data_message = " ".into();
        assert!(matches!(options.validate(), Err(ConnectorError::Config(_))));

        let mut options = ConnectorOptions::default();
        options.event_capacity = 0;
        assert!(matches!(options.validate(), Err(ConnectorError::Config(_))));
    }
}
