//! `malos stream`: configure a service and print its data.

use std::io::Write;

use anyhow::Context;
use chrono::Utc;
use malos_connector::{
    ConnectorConfig, DriverConfig, ServiceAdapter, ServiceAdapterBuilder, ServiceEvent,
};
use tokio::sync::broadcast::error::RecvError;

use super::StreamArgs;

pub async fn run(mut config: ConnectorConfig, args: StreamArgs) -> anyhow::Result<()> {
    args.target.apply(&mut config);
    if let Some(ms) = args.keepalive_ms {
        config.keepalive_interval_ms = Some(ms);
    }
    let family = config.family;
    let options = config.resolve();

    let mut adapter = ServiceAdapterBuilder::from_options(options)
        .build()
        .with_context(|| format!("connecting to {family} service"))?;
    let mut events = adapter.subscribe().context("subscribing to events")?;

    let driver = DriverConfig {
        delay_between_updates: args.update_delay,
        timeout_after_last_ping: args.ping_timeout,
    };
    adapter.send_config(&driver).context("sending driver config")?;
    tracing::info!(
        family = %family,
        service = %adapter.descriptor(),
        delay_between_updates = driver.delay_between_updates,
        timeout_after_last_ping = driver.timeout_after_last_ping,
        "streaming"
    );

    let mut received: u64 = 0;
    let stdout = std::io::stdout();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        if args.count.is_some_and(|limit| received >= limit) {
            break;
        }
        let event = tokio::select! {
            e = events.recv() => e,
            _ = &mut ctrl_c => {
                tracing::info!("interrupted");
                break;
            }
        };

        match event {
            Ok(ServiceEvent::Data(payload)) => {
                let line = render(&adapter, family.as_str(), &payload);
                let mut out = stdout.lock();
                writeln!(out, "{line}").context("writing to stdout")?;
                out.flush().context("writing to stdout")?;
                received += 1;
            }
            Ok(ServiceEvent::Error(fault)) => {
                tracing::warn!(origin = ?fault.origin, "{fault}");
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "output too slow, dropped messages");
            }
            Err(RecvError::Closed) => break,
        }
    }

    adapter.close();
    tracing::info!(received, "stream finished");
    Ok(())
}

/// One JSON line per message.  Undecodable payloads are reported inline
/// rather than ending the stream.
fn render(adapter: &ServiceAdapter, family: &str, payload: &[u8]) -> serde_json::Value {
    let received_at = Utc::now().to_rfc3339();
    match adapter.decode_data::<serde_json::Value>(payload) {
        Ok(data) => serde_json::json!({
            "received_at": received_at,
            "family": family,
            "data": data,
        }),
        Err(e) => {
            tracing::warn!(bytes = payload.len(), error = %e, "undecodable payload");
            serde_json::json!({
                "received_at": received_at,
                "family": family,
                "error": e.to_string(),
            })
        }
    }
}
