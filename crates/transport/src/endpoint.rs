//! Base-address arithmetic: one host/port pair, four channel endpoints.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::TransportError;

/// Which way messages flow on a channel, from the connector's side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Outbound only.
    Publisher,
    /// Inbound only.
    Subscriber,
}

/// The four channel roles of a MALOS service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelRole {
    Config,
    Ping,
    Error,
    Update,
}

impl ChannelRole {
    /// All roles, ordered by port offset.
    pub const ALL: [ChannelRole; 4] = [
        ChannelRole::Config,
        ChannelRole::Ping,
        ChannelRole::Error,
        ChannelRole::Update,
    ];

    /// Offset from the base port.  Fixed by the service; never reassigned.
    pub const fn offset(self) -> u16 {
        match self {
            ChannelRole::Config => 0,
            ChannelRole::Ping => 1,
            ChannelRole::Error => 2,
            ChannelRole::Update => 3,
        }
    }

    pub const fn direction(self) -> Direction {
        match self {
            ChannelRole::Config | ChannelRole::Ping => Direction::Publisher,
            ChannelRole::Error | ChannelRole::Update => Direction::Subscriber,
        }
    }

    /// Dense index, handy for per-role tables.
    pub const fn index(self) -> usize {
        self.offset() as usize
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            ChannelRole::Config => "config",
            ChannelRole::Ping => "ping",
            ChannelRole::Error => "error",
            ChannelRole::Update => "update",
        }
    }
}

impl fmt::Display for ChannelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Host and base port of one remote service.  Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionDescriptor {
    host: String,
    base_port: u16,
}

impl ConnectionDescriptor {
    /// Validate and build a descriptor.
    ///
    /// The whole `base_port..=base_port + 3` range must be addressable.
    pub fn new(host: impl Into<String>, base_port: u16) -> Result<Self, TransportError> {
        let host = host.into();
        if host.trim().is_empty() {
            return Err(TransportError::InvalidAddress("host is empty".into()));
        }
        if base_port == 0 {
            return Err(TransportError::InvalidAddress("base port must be non-zero".into()));
        }
        if base_port.checked_add(ChannelRole::Update.offset()).is_none() {
            return Err(TransportError::InvalidAddress(format!(
                "base port {base_port} leaves no room for the update channel"
            )));
        }
        Ok(Self { host, base_port })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn base_port(&self) -> u16 {
        self.base_port
    }

    /// Endpoint for one role.
    pub fn endpoint(&self, role: ChannelRole) -> Endpoint {
        Endpoint {
            host: self.host.clone(),
            // Range checked in `new`.
            port: self.base_port + role.offset(),
            role,
        }
    }

    /// All four endpoints, ordered by port offset.
    pub fn endpoints(&self) -> [Endpoint; 4] {
        ChannelRole::ALL.map(|role| self.endpoint(role))
    }
}

impl fmt::Display for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.base_port)
    }
}

/// One channel's remote address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub role: ChannelRole,
}

impl Endpoint {
    /// `host:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// ZeroMQ TCP connect string.
    pub fn zmq_url(&self) -> String {
        format!("tcp://{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}:{})", self.role, self.host, self.port)
    }
}
