//! `malos-connector`: client-side connector for MALOS sensor services.
//!
//! A MALOS service (IMU, humidity, pressure, UV, ...) talks over four
//! channels derived from one base port.  This crate opens those channels,
//! keeps the service alive with periodic empty pings, and translates
//! between protobuf payloads and Rust values.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  ServiceAdapter            (one schema: config + data types) │
//! │    encode_config / decode_data / send_config                 │
//! │                                                              │
//! │   ┌──────────────────────────────────────────────────────┐   │
//! │   │  ChannelManager                                      │   │
//! │   │    config  PUSH  base+0   ◄── send_config            │   │
//! │   │    ping    PUSH  base+1   ◄── keepalive task         │   │
//! │   │    error   SUB   base+2   ──► ServiceEvent::Error    │   │
//! │   │    update  SUB   base+3   ──► ServiceEvent::Data     │   │
//! │   └──────────────────────────────────────────────────────┘   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Lifecycle
//!
//! 1. Resolve the schema and both message types (fails fast, nothing opened)
//! 2. Open config, error and update channels (non-blocking)
//! 3. If a keepalive interval is set: open ping, send one ping, then one per period
//! 4. Owner subscribes to events, sends config, decodes data
//! 5. `close()` or drop: keepalive and every channel torn down together
//!
//! The connector never reconnects on its own.  Channel faults arrive as
//! [`ServiceEvent::Error`]; rebuilding the adapter is the owner's call.

pub mod adapter;
pub mod builder;
pub mod config;
pub mod error;
pub mod event;
pub mod family;
mod keepalive;
pub mod manager;
pub mod schema;

// ── Re-exports for ergonomic imports ─────────────────────────────────

pub use adapter::{AdapterState, ServiceAdapter};
pub use builder::ServiceAdapterBuilder;
pub use config::{ConnectorConfig, ConnectorOptions, DEFAULT_HOST, DEFAULT_KEEPALIVE_INTERVAL};
pub use error::{ConnectorError, Result};
pub use event::{FaultOrigin, ServiceEvent, ServiceFault};
pub use family::{DriverConfig, ServiceFamily, DRIVER_CONFIG_MESSAGE};
pub use manager::{ChannelManager, ChannelState, CONFIG_QUEUE_CAPACITY, DEFAULT_EVENT_CAPACITY};
pub use schema::{MessageCodec, MessageSchema, SchemaBinding, SchemaSource};

// Re-export transport types so callers rarely need malos-transport directly.
pub use malos_transport::{
    ChannelRole, ConnectBackoff, ConnectionDescriptor, Endpoint, MemoryTransport, Transport,
    ZmqTransport,
};
