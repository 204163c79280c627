//! Well-known MALOS sensor services and the driver configuration message.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::schema::{SchemaBinding, SchemaSource};

/// Configuration message shared by every MALOS driver.
pub const DRIVER_CONFIG_MESSAGE: &str = "matrix_malos.DriverConfig";

/// A sensor service family.  Each listens on its own well-known base port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceFamily {
    #[default]
    Imu,
    Humidity,
    Pressure,
    Uv,
}

impl ServiceFamily {
    pub const ALL: [ServiceFamily; 4] = [
        ServiceFamily::Imu,
        ServiceFamily::Humidity,
        ServiceFamily::Pressure,
        ServiceFamily::Uv,
    ];

    /// Base (config) port of the service.
    pub const fn base_port(self) -> u16 {
        match self {
            ServiceFamily::Imu => 20013,
            ServiceFamily::Humidity => 20017,
            ServiceFamily::Pressure => 20025,
            ServiceFamily::Uv => 20029,
        }
    }

    /// Fully-qualified name of the data message the service publishes.
    pub const fn data_message(self) -> &'static str {
        match self {
            ServiceFamily::Imu => "matrix_malos.Imu",
            ServiceFamily::Humidity => "matrix_malos.Humidity",
            ServiceFamily::Pressure => "matrix_malos.Pressure",
            ServiceFamily::Uv => "matrix_malos.UV",
        }
    }

    pub const fn config_message(self) -> &'static str {
        DRIVER_CONFIG_MESSAGE
    }

    /// Bundled schema with this family's message types.
    pub fn schema_binding(self) -> SchemaBinding {
        SchemaBinding {
            source: SchemaSource::Bundled,
            config_message: self.config_message().into(),
            data_message: self.data_message().into(),
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            ServiceFamily::Imu => "imu",
            ServiceFamily::Humidity => "humidity",
            ServiceFamily::Pressure => "pressure",
            ServiceFamily::Uv => "uv",
        }
    }
}

impl fmt::Display for ServiceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        ServiceFamily::ALL
            .into_iter()
            .find(|f| f.as_str() == wanted)
            .ok_or_else(|| format!("unknown service family `{s}` (expected imu, humidity, pressure or uv)"))
    }
}

/// `matrix_malos.DriverConfig`, as sent on a service's config channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Seconds between two data updates.
    pub delay_between_updates: f32,
    /// Seconds without a keepalive after which the driver goes quiet.
    /// Keep it above the keepalive interval.
    pub timeout_after_last_ping: f32,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            delay_between_updates: 1.0,
            timeout_after_last_ping: 6.0,
        }
    }
}
