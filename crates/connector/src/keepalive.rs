//! Periodic keepalive task.

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Pings that may wait for the ping channel.  While it is not connected,
/// ticks coalesce into the one pending ping instead of piling up.
pub(crate) const PING_QUEUE_CAPACITY: usize = 1;

/// Owned handle to a running keepalive loop.
///
/// The loop offers one empty payload to the ping channel queue every
/// `period`, starting one period after spawn.  It ends when dropped or
/// when the ping channel goes away; the ping channel itself stays open.
pub(crate) struct KeepaliveTask {
    period: Duration,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl KeepaliveTask {
    pub(crate) fn spawn(
        period: Duration,
        ping_tx: mpsc::Sender<Bytes>,
        cancel: CancellationToken,
    ) -> Self {
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => match ping_tx.try_send(Bytes::new()) {
                        Ok(()) => tracing::trace!("keepalive ping queued"),
                        Err(TrySendError::Full(_)) => {
                            tracing::trace!("previous ping still pending, tick skipped");
                        }
                        Err(TrySendError::Closed(_)) => {
                            tracing::debug!("ping channel gone, stopping keepalive");
                            break;
                        }
                    },
                }
            }
        });

        Self {
            period,
            cancel,
            handle,
        }
    }

    pub(crate) fn period(&self) -> Duration {
        self.period
    }

    pub(crate) fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for KeepaliveTask {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn ticks_once_per_period_after_first_period() {
        let (tx, mut rx) = mpsc::channel(PING_QUEUE_CAPACITY);
        let task = KeepaliveTask::spawn(Duration::from_millis(500), tx, CancellationToken::new());

        let pings = Arc::new(AtomicUsize::new(0));
        let drain = {
            let pings = pings.clone();
            tokio::spawn(async move {
                while let Some(payload) = rx.recv().await {
                    assert!(payload.is_empty());
                    pings.fetch_add(1, Ordering::SeqCst);
                }
            })
        };

        tokio::time::sleep(Duration::from_millis(499)).await;
        assert_eq!(pings.load(Ordering::SeqCst), 0, "no ping before the first period");

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert_eq!(pings.load(Ordering::SeqCst), 3);
        assert_eq!(task.period(), Duration::from_millis(500));

        drop(task);
        drain.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn undelivered_ticks_coalesce() {
        let (tx, mut rx) = mpsc::channel(PING_QUEUE_CAPACITY);
        let task = KeepaliveTask::spawn(Duration::from_millis(100), tx, CancellationToken::new());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err(), "only one ping may wait");
        assert!(task.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn loop_ends_when_ping_channel_goes_away() {
        let (tx, rx) = mpsc::channel(PING_QUEUE_CAPACITY);
        let task = KeepaliveTask::spawn(Duration::from_millis(100), tx, CancellationToken::new());
        drop(rx);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!task.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn drop_stops_the_loop() {
        let (tx, mut rx) = mpsc::channel(PING_QUEUE_CAPACITY);
        let task = KeepaliveTask::spawn(Duration::from_millis(100), tx, CancellationToken::new());
        drop(task);

        tokio::time::sleep(Duration::from_secs(1)).await;
        // Sender dropped with the task: channel reports disconnected, never a ping.
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }
}
