//! Heartbeat loop — keeps a claimed job's lease alive while it runs.

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::queue::JobQueue;

/// Spawns a heartbeat loop that refreshes the job's last_heartbeat column
/// every `interval_ms` milliseconds. Returns a `watch::Sender` — drop it to
/// stop the heartbeat.
pub fn spawn_heartbeat(queue: JobQueue, row_id: i64, interval_ms: u64) -> watch::Sender<()> {
    let (stop_tx, mut stop_rx) = watch::channel(());

    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_millis(interval_ms.max(100)));
        interval.tick().await; // first tick is immediate; skip it
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match queue.heartbeat(row_id).await {
                        Ok(()) => debug!(row_id, "heartbeat sent"),
                        Err(e) => warn!(row_id, "heartbeat failed: {}", e),
                    }
                }
                _ = stop_rx.changed() => {
                    debug!(row_id, "heartbeat stopped");
                    break;
                }
            }
        }
    });

    stop_tx
}
