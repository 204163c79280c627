//! Channel manager: owns the four channels of one MALOS service and its
//! keepalive loop.
//!
//! Each channel is served by its own task.  Publisher tasks drain a
//! bounded queue that callers fill with `try_send`, so `send_config` and
//! keepalive activation never block the caller; payloads queued before the
//! transport finishes connecting are delivered once it does.  Subscriber
//! tasks turn inbound payloads into [`ServiceEvent`]s on a broadcast
//! channel.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use malos_transport::{
    ChannelRole, ConnectionDescriptor, Endpoint, Transport, MATCH_ALL_TOPIC,
};
use parking_lot::RwLock;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{ConnectorError, Result};
use crate::event::{ServiceEvent, ServiceFault};
use crate::keepalive::{KeepaliveTask, PING_QUEUE_CAPACITY};

/// Default capacity of the event broadcast channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Config payloads that may wait for the config channel to connect.
pub const CONFIG_QUEUE_CAPACITY: usize = 16;

/// Transport-level state of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connected,
}

/// Per-role connection state, shared with the channel tasks.
#[derive(Debug)]
struct ChannelStates {
    inner: RwLock<[ChannelState; 4]>,
}

impl ChannelStates {
    fn new() -> Self {
        Self {
            inner: RwLock::new([ChannelState::Disconnected; 4]),
        }
    }

    fn get(&self, role: ChannelRole) -> ChannelState {
        self.inner.read()[role.index()]
    }

    fn set(&self, role: ChannelRole, state: ChannelState) {
        self.inner.write()[role.index()] = state;
    }

    fn reset(&self) {
        *self.inner.write() = [ChannelState::Disconnected; 4];
    }
}

/// Everything a channel task needs besides its queue.
#[derive(Clone)]
struct ChannelContext {
    transport: Arc<dyn Transport>,
    events: broadcast::Sender<ServiceEvent>,
    states: Arc<ChannelStates>,
    shutdown: CancellationToken,
}

impl ChannelContext {
    fn mark(&self, role: ChannelRole, state: ChannelState) {
        // A task racing teardown must not report itself connected.
        if state == ChannelState::Connected && self.shutdown.is_cancelled() {
            return;
        }
        self.states.set(role, state);
    }

    fn fault(&self, role: ChannelRole, message: impl Into<String>) {
        let fault = ServiceFault::channel(role, message);
        tracing::warn!(role = %role, message = %fault.message, "channel fault");
        // No subscribers is fine: the event is simply dropped.
        let _ = self.events.send(ServiceEvent::Error(fault));
    }
}

/// Owns the config, ping, error and update channels of one remote service.
///
/// Must be created inside a Tokio runtime.  Teardown is all-or-nothing:
/// [`close`](Self::close) (or drop) stops the keepalive and every channel,
/// and every event receiver then observes the end of the stream.
pub struct ChannelManager {
    descriptor: ConnectionDescriptor,
    transport: Arc<dyn Transport>,
    states: Arc<ChannelStates>,
    shutdown: CancellationToken,
    /// `None` once closed.
    events: Option<broadcast::Sender<ServiceEvent>>,
    config_tx: mpsc::Sender<Bytes>,
    ping_tx: Option<mpsc::Sender<Bytes>>,
    keepalive: Option<KeepaliveTask>,
    tasks: Vec<JoinHandle<()>>,
}

impl ChannelManager {
    /// Open the config, error and update channels of the service at
    /// `descriptor`.  Returns immediately; connects complete in the
    /// background and failures surface as [`ServiceEvent::Error`].
    ///
    /// The ping channel opens on first keepalive activation.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn open(
        descriptor: ConnectionDescriptor,
        transport: Arc<dyn Transport>,
        event_capacity: usize,
    ) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        let ctx = ChannelContext {
            transport: transport.clone(),
            events: events.clone(),
            states: Arc::new(ChannelStates::new()),
            shutdown: CancellationToken::new(),
        };

        tracing::info!(service = %descriptor, "opening service channels");

        let mut tasks = Vec::with_capacity(4);

        tasks.push(spawn_subscriber(
            ctx.clone(),
            descriptor.endpoint(ChannelRole::Error),
            |payload| ServiceEvent::Error(ServiceFault::remote(&payload)),
        ));

        let (config_tx, config_rx) = mpsc::channel(CONFIG_QUEUE_CAPACITY);
        tasks.push(spawn_publisher(
            ctx.clone(),
            descriptor.endpoint(ChannelRole::Config),
            config_rx,
        ));

        tasks.push(spawn_subscriber(
            ctx.clone(),
            descriptor.endpoint(ChannelRole::Update),
            ServiceEvent::Data,
        ));

        Self {
            descriptor,
            transport,
            states: ctx.states,
            shutdown: ctx.shutdown,
            events: Some(events),
            config_tx,
            ping_tx: None,
            keepalive: None,
            tasks,
        }
    }

    /// Register for events.  Only events raised after this call are seen;
    /// the receiver reports `Closed` once the manager is closed.
    pub fn subscribe(&self) -> Result<broadcast::Receiver<ServiceEvent>> {
        self.events
            .as_ref()
            .map(broadcast::Sender::subscribe)
            .ok_or(ConnectorError::Closed)
    }

    pub fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    pub fn endpoints(&self) -> [Endpoint; 4] {
        self.descriptor.endpoints()
    }

    pub fn channel_state(&self, role: ChannelRole) -> ChannelState {
        self.states.get(role)
    }

    pub fn is_closed(&self) -> bool {
        self.events.is_none()
    }

    /// Queue a pre-encoded payload on the config channel.
    ///
    /// Best effort, at most once: delivery failures are reported later as
    /// [`ServiceEvent::Error`], never here.  At most
    /// [`CONFIG_QUEUE_CAPACITY`] payloads wait for the channel to connect;
    /// further ones are dropped and reported the same way.
    pub fn send_config(&self, payload: impl Into<Bytes>) -> Result<()> {
        let ctx = self.context()?;
        let payload = payload.into();
        tracing::debug!(bytes = payload.len(), "queueing driver config");
        match self.config_tx.try_send(payload) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                ctx.fault(ChannelRole::Config, "config queue full, payload dropped");
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!("config channel is down, payload dropped");
            }
        }
        Ok(())
    }

    /// Start or replace the keepalive loop.
    ///
    /// `None` or a zero period leaves the current keepalive untouched.
    /// The first activation opens the ping channel and sends one empty
    /// payload straight away; every activation cancels the previous loop
    /// before installing the new one.  A ping channel that has gone down is
    /// reopened and primed again.
    pub fn set_keepalive_interval(&mut self, interval: Option<Duration>) -> Result<()> {
        self.ensure_open()?;
        let Some(period) = interval.filter(|p| !p.is_zero()) else {
            tracing::debug!("keepalive interval unset, leaving keepalive as is");
            return Ok(());
        };

        let ping_tx = match self.ping_tx.clone().filter(|tx| !tx.is_closed()) {
            Some(tx) => tx,
            None => self.open_ping_channel()?,
        };

        // Cancel first so two loops never overlap.
        if let Some(previous) = self.keepalive.take() {
            tracing::debug!(previous_ms = previous.period().as_millis() as u64, "replacing keepalive");
            drop(previous);
        }

        self.keepalive = Some(KeepaliveTask::spawn(
            period,
            ping_tx,
            self.shutdown.child_token(),
        ));
        tracing::info!(interval_ms = period.as_millis() as u64, "keepalive active");
        Ok(())
    }

    /// Stop sending keepalives.  The ping channel stays open.
    pub fn stop_keepalive(&mut self) {
        if self.keepalive.take().is_some() {
            tracing::info!("keepalive stopped");
        }
    }

    /// Period of the running keepalive loop, if one is running.
    pub fn keepalive_interval(&self) -> Option<Duration> {
        self.keepalive
            .as_ref()
            .filter(|k| k.is_running())
            .map(KeepaliveTask::period)
    }

    /// Stop the keepalive and tear down every channel.  Idempotent.
    pub fn close(&mut self) {
        // Dropping the last sender ends every receiver's stream once the
        // aborted tasks release their clones.
        if self.events.take().is_none() {
            return;
        }
        self.keepalive = None;
        self.ping_tx = None;
        self.shutdown.cancel();
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.states.reset();
        tracing::info!(service = %self.descriptor, "service channels closed");
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(ConnectorError::Closed);
        }
        Ok(())
    }

    /// Context for a new channel task.
    fn context(&self) -> Result<ChannelContext> {
        let events = self.events.clone().ok_or(ConnectorError::Closed)?;
        Ok(ChannelContext {
            transport: self.transport.clone(),
            events,
            states: self.states.clone(),
            shutdown: self.shutdown.clone(),
        })
    }

    fn open_ping_channel(&mut self) -> Result<mpsc::Sender<Bytes>> {
        let ctx = self.context()?;
        if self.ping_tx.is_some() {
            tracing::debug!("ping channel went down, reopening");
        }
        let (ping_tx, ping_rx) = mpsc::channel(PING_QUEUE_CAPACITY);
        self.tasks.push(spawn_publisher(
            ctx,
            self.descriptor.endpoint(ChannelRole::Ping),
            ping_rx,
        ));
        // Prime the service without waiting for the first tick.
        let _ = ping_tx.try_send(Bytes::new());
        self.ping_tx = Some(ping_tx.clone());
        Ok(ping_tx)
    }
}

impl Drop for ChannelManager {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ChannelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelManager")
            .field("descriptor", &self.descriptor)
            .field("keepalive", &self.keepalive_interval())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Connect a publisher and forward queued payloads to it.
fn spawn_publisher(
    ctx: ChannelContext,
    endpoint: Endpoint,
    mut rx: mpsc::Receiver<Bytes>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let role = endpoint.role;
        let connect = tokio::select! {
            r = ctx.transport.connect_publisher(&endpoint) => r,
            _ = ctx.shutdown.cancelled() => return,
        };
        let mut publisher = match connect {
            Ok(p) => p,
            Err(e) => {
                ctx.fault(role, e.to_string());
                return;
            }
        };
        ctx.mark(role, ChannelState::Connected);
        tracing::debug!(endpoint = %endpoint, "publisher connected");

        loop {
            let payload = tokio::select! {
                p = rx.recv() => p,
                _ = ctx.shutdown.cancelled() => break,
            };
            let Some(payload) = payload else { break };
            if let Err(e) = publisher.send(payload).await {
                ctx.fault(role, e.to_string());
            }
        }

        ctx.mark(role, ChannelState::Disconnected);
    })
}

/// Connect a subscriber and raise one event per inbound payload.
fn spawn_subscriber(
    ctx: ChannelContext,
    endpoint: Endpoint,
    into_event: fn(Bytes) -> ServiceEvent,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let role = endpoint.role;
        let connect = tokio::select! {
            r = ctx.transport.connect_subscriber(&endpoint, MATCH_ALL_TOPIC) => r,
            _ = ctx.shutdown.cancelled() => return,
        };
        let mut subscriber = match connect {
            Ok(s) => s,
            Err(e) => {
                ctx.fault(role, e.to_string());
                return;
            }
        };
        ctx.mark(role, ChannelState::Connected);
        tracing::debug!(endpoint = %endpoint, "subscriber connected");

        loop {
            let received = tokio::select! {
                r = subscriber.recv() => r,
                _ = ctx.shutdown.cancelled() => break,
            };
            match received {
                Ok(Some(payload)) => {
                    tracing::trace!(role = %role, bytes = payload.len(), "payload received");
                    let _ = ctx.events.send(into_event(payload));
                }
                Ok(None) => {
                    ctx.fault(role, "closed by remote");
                    break;
                }
                Err(e) => {
                    ctx.fault(role, e.to_string());
                    break;
                }
            }
        }

        ctx.mark(role, ChannelState::Disconnected);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use malos_transport::MemoryTransport;

    fn open(transport: &MemoryTransport) -> ChannelManager {
        ChannelManager::open(
            ConnectionDescriptor::new("127.0.0.1", 20013).unwrap(),
            Arc::new(transport.clone()),
            DEFAULT_EVENT_CAPACITY,
        )
    }

    #[tokio::test]
    async fn open_connects_three_channels_and_defers_ping() {
        let transport = MemoryTransport::new();
        let manager = open(&transport);
        let [config, ping, error, update] = manager.endpoints();

        transport.wait_subscribers(&update, 1).await;
        transport.wait_subscribers(&error, 1).await;
        transport.wait_until(|t| t.connect_attempts(&config) == 1).await;

        assert_eq!(transport.connect_attempts(&ping), 0);
        assert_eq!(manager.channel_state(ChannelRole::Ping), ChannelState::Disconnected);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_rejects_sends() {
        let transport = MemoryTransport::new();
        let mut manager = open(&transport);
        manager.close();
        manager.close();

        assert!(manager.is_closed());
        assert!(matches!(manager.send_config(Bytes::new()), Err(ConnectorError::Closed)));
        assert!(matches!(manager.subscribe(), Err(ConnectorError::Closed)));
        assert!(matches!(
            manager.set_keepalive_interval(Some(Duration::from_secs(1))),
            Err(ConnectorError::Closed)
        ));
        for role in ChannelRole::ALL {
            assert_eq!(manager.channel_state(role), ChannelState::Disconnected);
        }
    }

    #[tokio::test]
    async fn zero_interval_never_opens_ping() {
        let transport = MemoryTransport::new();
        let mut manager = open(&transport);
        manager.set_keepalive_interval(Some(Duration::ZERO)).unwrap();
        manager.set_keepalive_interval(None).unwrap();

        assert_eq!(manager.keepalive_interval(), None);
        tokio::task::yield_now().await;
        assert_eq!(transport.connect_attempts(&manager.descriptor().endpoint(ChannelRole::Ping)), 0);
    }
}
