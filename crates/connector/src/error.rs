//! Connector error taxonomy.

use malos_transport::TransportError;

/// Top-level connector error.
///
/// Construction-time variants ([`SchemaLoad`](Self::SchemaLoad),
/// [`TypeResolution`](Self::TypeResolution), [`Config`](Self::Config)) abort
/// construction.  [`Encoding`](Self::Encoding) and
/// [`Decoding`](Self::Decoding) come back from the call that caused them.
/// Faults reported by the remote service never show up here; they arrive
/// as [`ServiceEvent::Error`](crate::ServiceEvent::Error).
#[derive(thiserror::Error, Debug)]
pub enum ConnectorError {
    #[error("schema load: {0}")]
    SchemaLoad(String),

    #[error("type resolution: message type `{name}` not found in schema")]
    TypeResolution { name: String },

    #[error("encoding {message}: {reason}")]
    Encoding { message: String, reason: String },

    #[error("decoding {message}: {reason}")]
    Decoding { message: String, reason: String },

    #[error("config: {0}")]
    Config(String),

    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    #[error("connector closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, ConnectorError>;
