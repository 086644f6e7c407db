use std::collections::{HashMap, HashSet};

use tokio::time::Instant;
use tracing::{debug, error, warn};

use super::request::PendingRequest;
use super::scheduler::DrainTrigger;
use super::{Engine, Request};
use crate::errors::LoadError;
use crate::source::{BatchSource, LoadKey};

impl<S: BatchSource> Engine<S> {
    /// Drain one batch and resolve every request in it.
    ///
    /// Holds a worker slot for the whole dispatch, including retry-on-null
    /// single lookups.
    pub(crate) async fn drain_and_dispatch(&self, trigger: DrainTrigger) {
        let Ok(_permit) = self.acquire_worker().await else {
            return;
        };

        let batch = self.queue.drain_up_to(self.config.max_batch_size);
        if batch.is_empty() {
            return;
        }
        debug!(
            "{}: {:?} trigger drained {} requests",
            self.name(),
            trigger,
            batch.len()
        );

        // Keep draining a burst without waiting for the next tick.
        if self.queue.len() >= self.config.max_batch_size {
            self.request_drain(DrainTrigger::Size);
        }

        self.dispatch(batch).await;
    }

    /// Dispatch everything still queued, batch by batch. Used by shutdown
    /// once the workers have stopped. Returns the number of requests served.
    pub(crate) async fn drain_remaining(&self) -> usize {
        let mut served = 0;
        loop {
            let Ok(_permit) = self.acquire_worker().await else {
                break;
            };
            let batch = self.queue.drain_up_to(self.config.max_batch_size);
            if batch.is_empty() {
                break;
            }
            served += batch.len();
            self.dispatch(batch).await;
        }
        served
    }

    /// Resolve a drained batch through one bulk lookup. The caller must hold
    /// a worker slot.
    pub(crate) async fn dispatch(&self, batch: Vec<Request<S>>) {
        self.metrics.record_batch();
        let started = Instant::now();
        let count = batch.len();
        let keys = distinct_keys(&batch);
        debug!(
            "{}: bulk lookup - requests: {}, keys: {:?}",
            self.name(),
            count,
            keys
        );

        match self.source.bulk_fetch(&keys).await {
            Ok(found) => {
                for req in batch {
                    self.resolve_from_bulk(req, &found).await;
                }
            }
            Err(e) => {
                error!("{}: bulk lookup failed - keys: {:?}: {}", self.name(), keys, e);
                // The backing failure wins over expiry, for expired requests too.
                let err = LoadError::Source(e);
                for req in batch {
                    req.fail(err.clone());
                }
                return;
            }
        }

        let cost = started.elapsed();
        debug!(
            "{}: batch resolved - took: {}ms, requests: {}, avg: {:.2}ms",
            self.name(),
            cost.as_millis(),
            count,
            cost.as_secs_f64() * 1000.0 / count as f64
        );
    }

    async fn resolve_from_bulk(&self, req: Request<S>, found: &HashMap<S::Key, S::Value>) {
        let timeout = self.config.timeout();
        if req.is_expired(timeout) {
            let waited = req.elapsed();
            warn!(
                "{}: request expired - key: {:?}, waited: {}ms",
                self.name(),
                req.key(),
                waited.as_millis()
            );
            self.metrics.record_timeout();
            req.fail(LoadError::Timeout { waited });
            return;
        }

        if let Some(value) = found.get(req.key()) {
            req.complete(Some(value.clone()));
            return;
        }

        if self.config.allow_null || !self.config.retry_on_null || req.is_abandoned() {
            req.complete(None);
            return;
        }

        warn!(
            "{}: bulk result missing key, retrying with a single lookup - key: {:?}",
            self.name(),
            req.key()
        );
        match self.source.single_fetch(req.key()).await {
            Ok(value) => req.complete(value),
            Err(e) => {
                error!("{}: single lookup failed - key: {:?}: {}", self.name(), req.key(), e);
                req.fail(e.into());
            }
        }
    }
}

/// Keys of `batch` without duplicates, in first-seen order.
fn distinct_keys<K: LoadKey, V>(batch: &[PendingRequest<K, V>]) -> Vec<K> {
    let mut seen = HashSet::with_capacity(batch.len());
    batch
        .iter()
        .filter(|req| seen.insert(req.key()))
        .map(|req| req.key().clone())
        .collect()
}
