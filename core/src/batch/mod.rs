//! Admission, scheduling and dispatch of coalesced lookups.
//!
//! [`Engine`] is the state shared between callers admitting requests and the
//! worker tasks draining them. Its behavior is split by concern:
//!
//! - [`overflow`]: admission and the four overflow strategies.
//! - [`scheduler`]: timer and size triggers, and the worker loop.
//! - [`dispatcher`]: turning one drained batch into resolved requests.

pub(crate) mod dispatcher;
pub(crate) mod overflow;
pub mod queue;
pub mod request;
pub(crate) mod scheduler;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore, SemaphorePermit};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::CoalescerConfig;
use crate::errors::LoadError;
use crate::monitoring::MetricsRecorder;
use crate::source::BatchSource;

use self::queue::AdmissionQueue;
use self::request::PendingRequest;
use self::scheduler::DrainTrigger;

/// A pending request for the key and value types of source `S`.
pub type Request<S> = PendingRequest<<S as BatchSource>::Key, <S as BatchSource>::Value>;

/// State shared by the coalescer facade, its workers and its degrade tasks.
pub(crate) struct Engine<S: BatchSource> {
    pub(crate) config: CoalescerConfig,
    pub(crate) source: Arc<S>,
    pub(crate) queue: AdmissionQueue<S::Key, S::Value>,
    pub(crate) metrics: Arc<MetricsRecorder>,
    /// One permit per worker; held for every bulk or single lookup.
    permits: Semaphore,
    triggers: mpsc::Sender<DrainTrigger>,
    /// Degrade lookups running outside the worker loop.
    pub(crate) tracker: TaskTracker,
    /// Stops the timer, the monitor and idle workers.
    pub(crate) stop: CancellationToken,
    /// Abandons in-flight lookups once the shutdown grace period is over.
    pub(crate) teardown: CancellationToken,
}

impl<S: BatchSource> Engine<S> {
    pub(crate) fn new(
        config: CoalescerConfig,
        source: Arc<S>,
    ) -> (Self, mpsc::Receiver<DrainTrigger>) {
        let metrics = Arc::new(MetricsRecorder::new());
        // A full trigger channel already guarantees upcoming drains.
        let (triggers, trigger_rx) = mpsc::channel(config.worker_count.saturating_mul(2));
        let engine = Self {
            queue: AdmissionQueue::new(config.queue_capacity, metrics.clone()),
            permits: Semaphore::new(config.worker_count),
            source,
            metrics,
            triggers,
            tracker: TaskTracker::new(),
            stop: CancellationToken::new(),
            teardown: CancellationToken::new(),
            config,
        };
        (engine, trigger_rx)
    }

    pub(crate) fn name(&self) -> &str {
        &self.config.name
    }

    pub(crate) fn closed_error(&self) -> LoadError {
        LoadError::Closed(self.config.name.clone())
    }

    /// Wait for a free worker slot. Fails once the coalescer is torn down.
    pub(crate) async fn acquire_worker(&self) -> Result<SemaphorePermit<'_>, LoadError> {
        tokio::select! {
            _ = self.teardown.cancelled() => Err(self.closed_error()),
            permit = self.permits.acquire() => permit.map_err(|_| self.closed_error()),
        }
    }
}
