//! Builder pattern for constructing a [`ServiceAdapter`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use malos_transport::{ConnectBackoff, Transport};

use crate::adapter::ServiceAdapter;
use crate::config::ConnectorOptions;
use crate::error::Result;
use crate::family::ServiceFamily;
use crate::schema::SchemaSource;

/// Fluent builder for [`ServiceAdapter`].
///
/// # Example
///
/// ```rust,no_run
/// # use malos_connector::{ServiceAdapterBuilder, ServiceFamily};
/// # async fn demo() {
/// let adapter = ServiceAdapterBuilder::new(ServiceFamily::Imu)
///     .host("192.168.1.42")
///     .keepalive_interval(Some(std::time::Duration::from_secs(2)))
///     .build()
///     .unwrap();
/// # }
/// ```
pub struct ServiceAdapterBuilder {
    options: ConnectorOptions,
    transport: Option<Arc<dyn Transport>>,
}

impl ServiceAdapterBuilder {
    pub fn new(family: ServiceFamily) -> Self {
        Self::from_options(ConnectorOptions::for_family(family))
    }

    /// Start from fully resolved options, e.g. from a config file.
    pub fn from_options(options: ConnectorOptions) -> Self {
        Self {
            options,
            transport: None,
        }
    }

    // ── Addressing ───────────────────────────────────────────────────

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.options.host = host.into();
        self
    }

    /// Base (config) port of the service.
    pub fn port(mut self, port: u16) -> Self {
        self.options.port = port;
        self
    }

    // ── Schema ───────────────────────────────────────────────────────

    pub fn schema_source(mut self, source: SchemaSource) -> Self {
        self.options.schema.source = source;
        self
    }

    /// Shorthand for a `.proto` file whose directory is the include root.
    pub fn proto_file(self, path: impl Into<PathBuf>) -> Self {
        self.schema_source(SchemaSource::ProtoFile {
            path: path.into(),
            includes: Vec::new(),
        })
    }

    pub fn config_message(mut self, name: impl Into<String>) -> Self {
        self.options.schema.config_message = name.into();
        self
    }

    pub fn data_message(mut self, name: impl Into<String>) -> Self {
        self.options.schema.data_message = name.into();
        self
    }

    // ── Behavior ─────────────────────────────────────────────────────

    /// Keepalive period (default 5s).  `None` or zero disables it.
    pub fn keepalive_interval(mut self, interval: Option<Duration>) -> Self {
        self.options.keepalive_interval = interval.filter(|d| !d.is_zero());
        self
    }

    /// Retry policy for transport connects.  Ignored with a custom transport.
    pub fn connect_backoff(mut self, backoff: ConnectBackoff) -> Self {
        self.options.connect_backoff = backoff;
        self
    }

    /// Capacity of the event broadcast channel (default 256).
    pub fn event_capacity(mut self, n: usize) -> Self {
        self.options.event_capacity = n;
        self
    }

    /// Use a transport other than ZeroMQ.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn options(&self) -> &ConnectorOptions {
        &self.options
    }

    /// Resolve the schema, open the channels and start the keepalive.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn build(self) -> Result<ServiceAdapter> {
        match self.transport {
            Some(transport) => ServiceAdapter::connect_with(self.options, transport),
            None => ServiceAdapter::connect(self.options),
        }
    }
}
