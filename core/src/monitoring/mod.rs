//! Coalescer counters and their periodic emission.

pub mod recorder;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub use recorder::MetricsRecorder;
pub use types::MetricsSnapshot;

/// Background task that logs a metrics summary every `interval` until
/// `cancel` fires.
pub(crate) async fn monitor_task(
    name: String,
    metrics: Arc<MetricsRecorder>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Monitor task for '{}' cancelled", name);
                break;
            }
            _ = ticker.tick() => {
                info!("{} metrics: {}", name, metrics.snapshot());
            }
        }
    }
}
