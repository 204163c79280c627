//! `malos-transport`: addressing and message transport for MALOS services.
//!
//! A MALOS driver exposes itself on four consecutive TCP ports derived from
//! a single base port:
//!
//! ```text
//!   base + 0   config   (we PUSH driver configuration)
//!   base + 1   ping     (we PUSH empty keepalives)
//!   base + 2   error    (we SUB, service publishes fault text)
//!   base + 3   update   (we SUB, service publishes serialized readings)
//! ```
//!
//! The offset contract is the wire-compatibility surface with existing
//! services and must never change.
//!
//! This crate owns the contract ([`ConnectionDescriptor`], [`ChannelRole`],
//! [`Endpoint`]) and the seam the connector talks through ([`Transport`],
//! [`Publisher`], [`Subscriber`]).  Two implementations ship here:
//!
//! - [`ZmqTransport`]: ZeroMQ PUSH/SUB sockets over TCP, the real thing.
//! - [`MemoryTransport`]: in-process fan-out for tests and simulations.

pub mod backoff;
pub mod endpoint;
pub mod memory;
pub mod zmq;

use async_trait::async_trait;
use bytes::Bytes;

// ── Re-exports for ergonomic imports ─────────────────────────────────

pub use backoff::{ConnectAttempts, ConnectBackoff};
pub use endpoint::{ChannelRole, ConnectionDescriptor, Direction, Endpoint};
pub use memory::MemoryTransport;
pub use zmq::ZmqTransport;

/// Topic filter used by every subscriber channel: receive everything.
pub const MATCH_ALL_TOPIC: &str = "";

/// Opens channels to a remote service.
///
/// Implementations decide how long a connect may take (including any
/// retry policy of their own); callers only see the final outcome.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open an outbound-only channel to `endpoint`.
    async fn connect_publisher(
        &self,
        endpoint: &Endpoint,
    ) -> Result<Box<dyn Publisher>, TransportError>;

    /// Open an inbound-only channel to `endpoint`, filtered by `topic`.
    async fn connect_subscriber(
        &self,
        endpoint: &Endpoint,
        topic: &str,
    ) -> Result<Box<dyn Subscriber>, TransportError>;
}

/// Outbound half of a channel.  Each call transmits one whole message.
#[async_trait]
pub trait Publisher: Send {
    async fn send(&mut self, payload: Bytes) -> Result<(), TransportError>;
}

/// Inbound half of a channel.
#[async_trait]
pub trait Subscriber: Send {
    /// Next whole message, in the order the remote published them.
    /// `Ok(None)` means the remote end went away.
    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError>;
}

/// Errors surfaced by a [`Transport`].
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("connect {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    #[error("connect {endpoint}: gave up after {attempts} attempts")]
    ConnectExhausted { endpoint: String, attempts: u32 },

    #[error("send: {0}")]
    Send(String),

    #[error("recv: {0}")]
    Recv(String),
}
