//! Typed service adapter: a [`ChannelManager`] bound to one schema.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use malos_transport::{ChannelRole, ConnectionDescriptor, Endpoint, Transport, ZmqTransport};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::builder::ServiceAdapterBuilder;
use crate::config::ConnectorOptions;
use crate::error::{ConnectorError, Result};
use crate::event::ServiceEvent;
use crate::family::ServiceFamily;
use crate::manager::{ChannelManager, ChannelState};
use crate::schema::MessageCodec;

/// Lifecycle of an adapter.  There is no observable "constructing" state:
/// construction either returns a ready adapter or an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Ready,
    Closed,
}

/// Connector for one sensor service: encodes driver configuration,
/// decodes published data, and keeps the service alive.
///
/// ```rust,no_run
/// # use malos_connector::{DriverConfig, ServiceAdapter, ServiceEvent, ServiceFamily};
/// # async fn demo() -> Result<(), malos_connector::ConnectorError> {
/// let adapter = ServiceAdapter::builder(ServiceFamily::Pressure)
///     .host("192.168.1.42")
///     .build()?;
/// let mut events = adapter.subscribe()?;
/// adapter.send_config(&DriverConfig::default())?;
///
/// while let Ok(event) = events.recv().await {
///     if let ServiceEvent::Data(payload) = event {
///         let reading: serde_json::Value = adapter.decode_data(&payload)?;
///         println!("{reading}");
///     }
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ServiceAdapter {
    manager: ChannelManager,
    config_codec: MessageCodec,
    data_codec: MessageCodec,
}

impl ServiceAdapter {
    /// Start a builder seeded with the family's defaults.
    pub fn builder(family: ServiceFamily) -> ServiceAdapterBuilder {
        ServiceAdapterBuilder::new(family)
    }

    /// Connect over ZeroMQ.
    pub fn connect(options: ConnectorOptions) -> Result<Self> {
        let transport = Arc::new(ZmqTransport::new(options.connect_backoff.clone()));
        Self::connect_with(options, transport)
    }

    /// Connect over the given transport.
    ///
    /// The schema and both message types are resolved before any channel
    /// is opened, so a failed construction leaves nothing behind.
    pub fn connect_with(options: ConnectorOptions, transport: Arc<dyn Transport>) -> Result<Self> {
        options.validate()?;
        let descriptor = options.descriptor()?;
        let (config_codec, data_codec) = options.schema.resolve()?;

        let mut manager = ChannelManager::open(descriptor, transport, options.event_capacity);
        manager.set_keepalive_interval(options.keepalive_interval)?;

        tracing::info!(
            service = %manager.descriptor(),
            config_message = config_codec.full_name(),
            data_message = data_codec.full_name(),
            "service adapter ready"
        );

        Ok(Self {
            manager,
            config_codec,
            data_codec,
        })
    }

    pub fn state(&self) -> AdapterState {
        if self.manager.is_closed() {
            AdapterState::Closed
        } else {
            AdapterState::Ready
        }
    }

    /// Encode a configuration value for the service.
    pub fn encode_config<T: Serialize + ?Sized>(&self, config: &T) -> Result<Bytes> {
        self.ensure_ready()?;
        self.config_codec.encode(config)
    }

    /// Decode a payload from a [`ServiceEvent::Data`] event.
    pub fn decode_data<T: DeserializeOwned>(&self, payload: &[u8]) -> Result<T> {
        self.ensure_ready()?;
        self.data_codec.decode(payload)
    }

    /// Encode `config` and queue it on the config channel.
    pub fn send_config<T: Serialize + ?Sized>(&self, config: &T) -> Result<()> {
        let payload = self.encode_config(config)?;
        self.manager.send_config(payload)
    }

    /// Queue an already-encoded payload on the config channel.
    pub fn send_config_bytes(&self, payload: impl Into<Bytes>) -> Result<()> {
        self.manager.send_config(payload)
    }

    /// Register for events.  Fails with [`ConnectorError::Closed`] after
    /// [`close`](Self::close).
    pub fn subscribe(&self) -> Result<broadcast::Receiver<ServiceEvent>> {
        self.manager.subscribe()
    }

    /// See [`ChannelManager::set_keepalive_interval`].
    pub fn set_keepalive_interval(&mut self, interval: Option<Duration>) -> Result<()> {
        self.manager.set_keepalive_interval(interval)
    }

    pub fn stop_keepalive(&mut self) {
        self.manager.stop_keepalive();
    }

    pub fn keepalive_interval(&self) -> Option<Duration> {
        self.manager.keepalive_interval()
    }

    pub fn descriptor(&self) -> &ConnectionDescriptor {
        self.manager.descriptor()
    }

    pub fn endpoints(&self) -> [Endpoint; 4] {
        self.manager.endpoints()
    }

    pub fn channel_state(&self, role: ChannelRole) -> ChannelState {
        self.manager.channel_state(role)
    }

    pub fn config_message(&self) -> &str {
        self.config_codec.full_name()
    }

    pub fn data_message(&self) -> &str {
        self.data_codec.full_name()
    }

    /// Tear down keepalive and all channels.  Every later call fails with
    /// [`ConnectorError::Closed`].
    pub fn close(&mut self) {
        self.manager.close();
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.state() {
            AdapterState::Ready => Ok(()),
            AdapterState::Closed => Err(ConnectorError::Closed),
        }
    }
}
