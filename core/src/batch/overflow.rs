use std::sync::Arc;

use tracing::{error, warn};

use super::queue::Rejected;
use super::request::LoadResult;
use super::scheduler::DrainTrigger;
use super::{Engine, Request};
use crate::config::OverflowStrategy;
use crate::errors::LoadError;
use crate::source::BatchSource;

impl<S: BatchSource> Engine<S> {
    /// Put `req` into the queue, applying the overflow strategy when full.
    ///
    /// Only the Block strategy suspends the caller; every other path returns
    /// as soon as the request is queued, rejected or handed to a degrade task.
    pub(crate) async fn admit(self: &Arc<Self>, req: Request<S>) {
        match self.queue.try_enqueue(req) {
            Ok(len) => self.after_enqueue(len),
            Err(Rejected::Full(req)) => self.handle_overflow(req).await,
            Err(Rejected::Closed(req)) => req.fail(self.closed_error()),
        }
    }

    fn after_enqueue(&self, len: usize) {
        if len >= self.config.max_batch_size {
            self.request_drain(DrainTrigger::Size);
        }
    }

    async fn handle_overflow(self: &Arc<Self>, req: Request<S>) {
        match self.config.overflow_strategy {
            OverflowStrategy::Block => self.block(req).await,
            OverflowStrategy::Degrade => self.degrade(req),
            OverflowStrategy::FailFast => self.fail_fast(req),
            OverflowStrategy::DropOldest => self.drop_oldest(req),
        }
    }

    async fn block(self: &Arc<Self>, req: Request<S>) {
        self.metrics.record_block();
        warn!(
            "{}: queue full, waiting for space - key: {:?}, queue size: {}",
            self.name(),
            req.key(),
            self.queue.len()
        );

        let deadline = req.enqueued_at() + self.config.timeout();
        match self.queue.enqueue_blocking(req, deadline).await {
            Ok(len) => self.after_enqueue(len),
            Err(Rejected::Full(req)) => {
                error!(
                    "{}: timed out waiting for queue space, degrading - key: {:?}",
                    self.name(),
                    req.key()
                );
                self.degrade(req);
            }
            Err(Rejected::Closed(req)) => req.fail(self.closed_error()),
        }
    }

    /// Serve `req` with a single lookup on a background task.
    fn degrade(self: &Arc<Self>, req: Request<S>) {
        self.metrics.record_degrade();
        warn!(
            "{}: serving request with a single lookup - key: {:?}, queue size: {}",
            self.name(),
            req.key(),
            self.queue.len()
        );

        let engine = Arc::clone(self);
        self.tracker.spawn(async move {
            let outcome = tokio::select! {
                _ = engine.teardown.cancelled() => Err(engine.closed_error()),
                outcome = engine.single_lookup(req.key()) => outcome,
            };
            if let Err(e) = &outcome {
                error!("{}: degraded lookup failed - key: {:?}: {}", engine.name(), req.key(), e);
            }
            req.resolve(outcome);
        });
    }

    fn fail_fast(&self, req: Request<S>) {
        self.metrics.record_fail();
        error!(
            "{}: queue full, rejecting request - key: {:?}, queue size: {}",
            self.name(),
            req.key(),
            self.queue.len()
        );
        req.fail(LoadError::QueueFull {
            capacity: self.queue.capacity(),
        });
    }

    fn drop_oldest(self: &Arc<Self>, req: Request<S>) {
        warn!(
            "{}: queue full, dropping oldest request - key: {:?}",
            self.name(),
            req.key()
        );
        if let Some(oldest) = self.queue.drop_oldest() {
            self.metrics.record_drop();
            oldest.fail(LoadError::Dropped);
        }

        match self.queue.try_enqueue(req) {
            Ok(len) => self.after_enqueue(len),
            // Another caller took the freed slot.
            Err(Rejected::Full(req)) => self.degrade(req),
            Err(Rejected::Closed(req)) => req.fail(self.closed_error()),
        }
    }

    /// Single-key lookup holding a worker slot for its duration.
    pub(crate) async fn single_lookup(&self, key: &S::Key) -> LoadResult<S::Value> {
        let _permit = self.acquire_worker().await?;
        self.source.single_fetch(key).await.map_err(LoadError::from)
    }
}
