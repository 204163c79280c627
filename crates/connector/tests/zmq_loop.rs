//! Integration test: binds an in-process fake MALOS service over real
//! ZeroMQ sockets, connects a [`ServiceAdapter`] to it, and checks every
//! channel end to end:
//! - driver config arrives on base+0 and decodes to what was sent
//! - the priming keepalive arrives on base+1 as an empty message
//! - text published on base+2 becomes an error event
//! - a protobuf published on base+3 becomes a data event that decodes

use std::net::TcpListener;
use std::time::Duration;

use malos_connector::{
    DriverConfig, FaultOrigin, MessageSchema, SchemaSource, ServiceAdapter, ServiceEvent,
    ServiceFamily,
};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::time::timeout;
use zeromq::{PubSocket, PullSocket, Socket, SocketRecv, SocketSend, ZmqMessage};

const WAIT: Duration = Duration::from_secs(10);

/// Find four consecutive free TCP ports on loopback.
fn free_base_port() -> u16 {
    for _ in 0..50 {
        let probe = TcpListener::bind("127.0.0.1:0").unwrap();
        let base = probe.local_addr().unwrap().port();
        drop(probe);
        if base > u16::MAX - 3 {
            continue;
        }
        let all_free = (0..4).all(|offset| TcpListener::bind(("127.0.0.1", base + offset)).is_ok());
        if all_free {
            return base;
        }
    }
    panic!("no four consecutive free ports found");
}

/// The service side: PULL on config and ping, PUB on error and update.
struct FakeService {
    config: PullSocket,
    ping: PullSocket,
    error: PubSocket,
    update: PubSocket,
}

impl FakeService {
    async fn bind(base: u16) -> Self {
        let url = |offset: u16| format!("tcp://127.0.0.1:{}", base + offset);

        let mut config = PullSocket::new();
        config.bind(&url(0)).await.unwrap();
        let mut ping = PullSocket::new();
        ping.bind(&url(1)).await.unwrap();
        let mut error = PubSocket::new();
        error.bind(&url(2)).await.unwrap();
        let mut update = PubSocket::new();
        update.bind(&url(3)).await.unwrap();

        Self {
            config,
            ping,
            error,
            update,
        }
    }
}

async fn recv_payload(socket: &mut PullSocket) -> Vec<u8> {
    let message = timeout(WAIT, socket.recv())
        .await
        .expect("message within timeout")
        .unwrap();
    message.get(0).map(|frame| frame.to_vec()).unwrap_or_default()
}

/// PUB drops messages until the subscription has propagated, so keep
/// publishing until the adapter reports something matching.
async fn publish_until<F>(
    socket: &mut PubSocket,
    payload: Vec<u8>,
    events: &mut broadcast::Receiver<ServiceEvent>,
    mut matches: F,
) -> ServiceEvent
where
    F: FnMut(&ServiceEvent) -> bool,
{
    let found = timeout(WAIT, async {
        loop {
            socket.send(ZmqMessage::from(payload.clone())).await.unwrap();
            if let Ok(Ok(event)) = timeout(Duration::from_millis(100), events.recv()).await {
                if matches(&event) {
                    return event;
                }
            }
        }
    })
    .await;
    found.expect("event within timeout")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn adapter_round_trip_over_zeromq() {
    let base = free_base_port();
    let mut service = FakeService::bind(base).await;

    let adapter = ServiceAdapter::builder(ServiceFamily::Imu)
        .port(base)
        .keepalive_interval(Some(Duration::from_secs(30)))
        .build()
        .expect("adapter builds");
    let mut events = adapter.subscribe().unwrap();

    // ── ping: primed straight away ──────────────────────────────────────
    let ping = recv_payload(&mut service.ping).await;
    assert!(ping.is_empty());

    // ── config ──────────────────────────────────────────────────────────
    let sent = DriverConfig {
        delay_between_updates: 0.05,
        timeout_after_last_ping: 6.0,
    };
    adapter.send_config(&sent).unwrap();
    let raw = recv_payload(&mut service.config).await;
    let codec = MessageSchema::load(&SchemaSource::Bundled)
        .unwrap()
        .resolve("matrix_malos.DriverConfig")
        .unwrap();
    let received: DriverConfig = codec.decode(&raw).unwrap();
    assert_eq!(received, sent);

    // ── error ───────────────────────────────────────────────────────────
    let event = publish_until(
        &mut service.error,
        b"imu not calibrated".to_vec(),
        &mut events,
        |e| matches!(e, ServiceEvent::Error(f) if f.origin == FaultOrigin::Remote),
    )
    .await;
    let ServiceEvent::Error(fault) = event else { unreachable!() };
    assert_eq!(fault.message, "imu not calibrated");

    // ── update ──────────────────────────────────────────────────────────
    let reading = MessageSchema::load(&SchemaSource::Bundled)
        .unwrap()
        .resolve("matrix_malos.Imu")
        .unwrap()
        .encode(&json!({ "yaw": 90.0, "pitch": -1.5, "roll": 0.25 }))
        .unwrap();
    let event = publish_until(&mut service.update, reading.to_vec(), &mut events, |e| {
        matches!(e, ServiceEvent::Data(_))
    })
    .await;
    let ServiceEvent::Data(payload) = event else { unreachable!() };
    let decoded: Value = adapter.decode_data(&payload).unwrap();
    assert_eq!(decoded["yaw"], json!(90.0));
    assert_eq!(decoded["pitch"], json!(-1.5));
    assert_eq!(decoded["roll"], json!(0.25));
}
