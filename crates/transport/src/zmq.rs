//! ZeroMQ transport: PUSH sockets for publishers, SUB sockets for subscribers.

use async_trait::async_trait;
use bytes::Bytes;
use zeromq::{PushSocket, Socket, SocketRecv, SocketSend, SubSocket, ZmqMessage};

use crate::backoff::ConnectBackoff;
use crate::endpoint::Endpoint;
use crate::{Publisher, Subscriber, Transport, TransportError};

/// Connects channels with ZeroMQ over TCP.
#[derive(Debug, Clone, Default)]
pub struct ZmqTransport {
    backoff: ConnectBackoff,
}

impl ZmqTransport {
    pub fn new(backoff: ConnectBackoff) -> Self {
        Self { backoff }
    }

    pub fn backoff(&self) -> &ConnectBackoff {
        &self.backoff
    }

    /// Connect a fresh socket, retrying per the back-off policy.
    async fn connect_socket<S: Socket>(&self, endpoint: &Endpoint) -> Result<S, TransportError> {
        let url = endpoint.zmq_url();
        let mut attempts = self.backoff.start(endpoint);

        loop {
            let mut socket = S::new();
            match socket.connect(&url).await {
                Ok(()) => {
                    tracing::debug!(
                        url = %url,
                        role = %endpoint.role,
                        failures = attempts.failures(),
                        "zmq socket connected"
                    );
                    return Ok(socket);
                }
                Err(e) => {
                    let delay = attempts.failed(e.to_string())?;
                    tracing::debug!(
                        url = %url,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        attempt = attempts.failures() + 1,
                        "zmq connect failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[async_trait]
impl Transport for ZmqTransport {
    async fn connect_publisher(
        &self,
        endpoint: &Endpoint,
    ) -> Result<Box<dyn Publisher>, TransportError> {
        let socket: PushSocket = self.connect_socket(endpoint).await?;
        Ok(Box::new(ZmqPublisher { socket }))
    }

    async fn connect_subscriber(
        &self,
        endpoint: &Endpoint,
        topic: &str,
    ) -> Result<Box<dyn Subscriber>, TransportError> {
        let mut socket: SubSocket = self.connect_socket(endpoint).await?;
        socket
            .subscribe(topic)
            .await
            .map_err(|e| TransportError::Connect {
                endpoint: endpoint.address(),
                reason: format!("subscribe: {e}"),
            })?;
        Ok(Box::new(ZmqSubscriber {
            socket,
            address: endpoint.address(),
        }))
    }
}

struct ZmqPublisher {
    socket: PushSocket,
}

#[async_trait]
impl Publisher for ZmqPublisher {
    async fn send(&mut self, payload: Bytes) -> Result<(), TransportError> {
        self.socket
            .send(ZmqMessage::from(payload))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }
}

struct ZmqSubscriber {
    socket: SubSocket,
    address: String,
}

#[async_trait]
impl Subscriber for ZmqSubscriber {
    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError> {
        let message = self
            .socket
            .recv()
            .await
            .map_err(|e| TransportError::Recv(e.to_string()))?;

        // MALOS publishes single-frame messages.
        let mut frames = message.into_vec();
        if frames.len() > 1 {
            tracing::debug!(
                address = %self.address,
                frames = frames.len(),
                "multipart message, keeping first frame"
            );
        }
        if frames.is_empty() {
            return Ok(Some(Bytes::new()));
        }
        Ok(Some(frames.swap_remove(0)))
    }
}
