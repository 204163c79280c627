//! In-process transport.
//!
//! Plays the remote service's side of every channel: it records what the
//! connector sends, fans out what the test publishes, and can refuse
//! connections or drop subscribers to simulate faults.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use crate::endpoint::Endpoint;
use crate::{Publisher, Subscriber, Transport, TransportError};

/// Cloneable handle; all clones share one simulated network.
#[derive(Clone)]
pub struct MemoryTransport {
    hub: Arc<Hub>,
}

struct Hub {
    state: Mutex<HubState>,
    /// Bumped on every observable change so waiters can re-check.
    version: watch::Sender<u64>,
}

#[derive(Default)]
struct HubState {
    sent: HashMap<String, Vec<Bytes>>,
    subscribers: HashMap<String, Vec<SubscriberSlot>>,
    refused: HashSet<String>,
    connects: HashMap<String, usize>,
}

struct SubscriberSlot {
    topic: Bytes,
    tx: mpsc::UnboundedSender<Bytes>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            hub: Arc::new(Hub {
                state: Mutex::new(HubState::default()),
                version,
            }),
        }
    }

    fn bump(&self) {
        self.hub.version.send_modify(|v| *v += 1);
    }

    /// Make future connects to `endpoint` fail.
    pub fn refuse(&self, endpoint: &Endpoint) {
        self.hub.state.lock().refused.insert(endpoint.address());
    }

    /// Undo [`refuse`](Self::refuse).
    pub fn accept(&self, endpoint: &Endpoint) {
        self.hub.state.lock().refused.remove(&endpoint.address());
    }

    /// Publish one message to every subscriber of `endpoint` whose topic
    /// prefixes it.  Returns how many subscribers received it.
    pub fn publish(&self, endpoint: &Endpoint, payload: impl Into<Bytes>) -> usize {
        let payload = payload.into();
        let mut state = self.hub.state.lock();
        let Some(slots) = state.subscribers.get_mut(&endpoint.address()) else {
            return 0;
        };
        slots.retain(|slot| !slot.tx.is_closed());

        let mut delivered = 0;
        for slot in slots.iter() {
            if payload.starts_with(&slot.topic) && slot.tx.send(payload.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Close every subscriber of `endpoint`, as if the service went away.
    pub fn drop_subscribers(&self, endpoint: &Endpoint) {
        self.hub.state.lock().subscribers.remove(&endpoint.address());
        self.bump();
    }

    /// Everything published to `endpoint` so far, in order.
    pub fn sent(&self, endpoint: &Endpoint) -> Vec<Bytes> {
        self.hub
            .state
            .lock()
            .sent
            .get(&endpoint.address())
            .cloned()
            .unwrap_or_default()
    }

    pub fn sent_count(&self, endpoint: &Endpoint) -> usize {
        self.hub
            .state
            .lock()
            .sent
            .get(&endpoint.address())
            .map_or(0, Vec::len)
    }

    /// Live subscribers on `endpoint`.
    pub fn subscriber_count(&self, endpoint: &Endpoint) -> usize {
        self.hub
            .state
            .lock()
            .subscribers
            .get(&endpoint.address())
            .map_or(0, |slots| slots.iter().filter(|s| !s.tx.is_closed()).count())
    }

    /// Connect attempts made against `endpoint`, successful or not.
    pub fn connect_attempts(&self, endpoint: &Endpoint) -> usize {
        self.hub
            .state
            .lock()
            .connects
            .get(&endpoint.address())
            .copied()
            .unwrap_or(0)
    }

    /// Resolve once `ready` holds.  Re-checked after every send, connect
    /// and subscriber change.
    pub async fn wait_until(&self, mut ready: impl FnMut(&Self) -> bool) {
        let mut changes = self.hub.version.subscribe();
        loop {
            if ready(self) {
                return;
            }
            if changes.changed().await.is_err() {
                return;
            }
        }
    }

    /// Resolve once at least `n` payloads were sent to `endpoint`.
    pub async fn wait_sent(&self, endpoint: &Endpoint, n: usize) {
        self.wait_until(|t| t.sent_count(endpoint) >= n).await
    }

    /// Resolve once at least `n` subscribers are connected to `endpoint`.
    pub async fn wait_subscribers(&self, endpoint: &Endpoint, n: usize) {
        self.wait_until(|t| t.subscriber_count(endpoint) >= n).await
    }

    fn record_connect(&self, endpoint: &Endpoint) -> Result<(), TransportError> {
        let address = endpoint.address();
        let refused = {
            let mut state = self.hub.state.lock();
            *state.connects.entry(address.clone()).or_default() += 1;
            state.refused.contains(&address)
        };
        self.bump();
        if refused {
            return Err(TransportError::Connect {
                endpoint: address,
                reason: "connection refused".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect_publisher(
        &self,
        endpoint: &Endpoint,
    ) -> Result<Box<dyn Publisher>, TransportError> {
        self.record_connect(endpoint)?;
        Ok(Box::new(MemoryPublisher {
            transport: self.clone(),
            address: endpoint.address(),
        }))
    }

    async fn connect_subscriber(
        &self,
        endpoint: &Endpoint,
        topic: &str,
    ) -> Result<Box<dyn Subscriber>, TransportError> {
        self.record_connect(endpoint)?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.hub
            .state
            .lock()
            .subscribers
            .entry(endpoint.address())
            .or_default()
            .push(SubscriberSlot {
                topic: Bytes::copy_from_slice(topic.as_bytes()),
                tx,
            });
        self.bump();
        Ok(Box::new(MemorySubscriber { rx }))
    }
}

struct MemoryPublisher {
    transport: MemoryTransport,
    address: String,
}

#[async_trait]
impl Publisher for MemoryPublisher {
    async fn send(&mut self, payload: Bytes) -> Result<(), TransportError> {
        self.transport
            .hub
            .state
            .lock()
            .sent
            .entry(self.address.clone())
            .or_default()
            .push(payload);
        self.transport.bump();
        Ok(())
    }
}

struct MemorySubscriber {
    rx: mpsc::UnboundedReceiver<Bytes>,
}

#[async_trait]
impl Subscriber for MemorySubscriber {
    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError> {
        Ok(self.rx.recv().await)
    }
}
