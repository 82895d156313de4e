use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};

use crate::server::VDateIMServer;

/// 清理间隔：超时越短检查越频繁 / Cleanup cadence; shorter timeouts are checked more often
pub fn cleanup_interval_ms(timeout_ms: u64) -> u64 {
    if timeout_ms <= 1000 {
        (timeout_ms / 2).max(1)
    } else if timeout_ms <= 10000 {
        1000
    } else {
        5000
    }
}

pub fn spawn_cleanup_task(
    server: Arc<VDateIMServer>,
    timeout_ms: u64,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let cleanup_interval_ms = cleanup_interval_ms(timeout_ms);
        tracing::info!(
            "⏰ Cleanup interval set to {}ms for timeout {}ms",
            cleanup_interval_ms,
            timeout_ms
        );
        let mut cleanup_interval = interval(Duration::from_millis(cleanup_interval_ms));
        loop {
            tokio::select! {
                _ = cleanup_interval.tick() => {
                    let closed = server.cleanup_timeout_connections(timeout_ms).await;
                    if closed > 0 {
                        tracing::debug!(closed, "idle connections closed");
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() { break; }
                }
            }
        }
    })
}
