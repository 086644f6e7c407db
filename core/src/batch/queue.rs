use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tokio::time::Instant;

use super::request::PendingRequest;
use crate::monitoring::MetricsRecorder;

/// A request the queue refused to admit, handed back to the caller.
#[derive(Debug)]
pub enum Rejected<K, V> {
    /// The queue is at capacity.
    Full(PendingRequest<K, V>),
    /// The queue no longer accepts requests.
    Closed(PendingRequest<K, V>),
}

impl<K, V> Rejected<K, V> {
    pub fn into_request(self) -> PendingRequest<K, V> {
        match self {
            Rejected::Full(req) | Rejected::Closed(req) => req,
        }
    }
}

struct QueueState<K, V> {
    items: VecDeque<PendingRequest<K, V>>,
    closed: bool,
}

/// Bounded FIFO of admitted requests shared by callers and workers.
///
/// All mutations happen under one short-lived lock that also publishes the
/// queue length to the metrics gauge, so the gauge never drifts from the
/// real length. Callers waiting for space are woken whenever items leave.
pub struct AdmissionQueue<K, V> {
    state: Mutex<QueueState<K, V>>,
    capacity: usize,
    space: Notify,
    metrics: Arc<MetricsRecorder>,
}

impl<K, V> AdmissionQueue<K, V> {
    pub fn new(capacity: usize, metrics: Arc<MetricsRecorder>) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity.min(1024)),
                closed: false,
            }),
            capacity,
            space: Notify::new(),
            metrics,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<K, V>> {
        // A panic while holding the lock cannot leave the deque half-updated.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Admit `req` if there is room. On success returns the queue length
    /// including the new request.
    pub fn try_enqueue(&self, req: PendingRequest<K, V>) -> Result<usize, Rejected<K, V>> {
        let mut state = self.lock();
        if state.closed {
            return Err(Rejected::Closed(req));
        }
        if state.items.len() >= self.capacity {
            return Err(Rejected::Full(req));
        }
        state.items.push_back(req);
        let len = state.items.len();
        self.metrics.set_queue_size(len);
        Ok(len)
    }

    /// Admit `req`, waiting for space until `deadline`.
    ///
    /// Suspends only the calling task. Returns [`Rejected::Full`] if the
    /// deadline passes first and [`Rejected::Closed`] if the queue is closed
    /// while waiting.
    pub async fn enqueue_blocking(
        &self,
        mut req: PendingRequest<K, V>,
        deadline: Instant,
    ) -> Result<usize, Rejected<K, V>> {
        loop {
            // Register interest before checking, so a drain racing with the
            // check still wakes us.
            let notified = self.space.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_enqueue(req) {
                Ok(len) => return Ok(len),
                Err(Rejected::Full(back)) => req = back,
                Err(closed) => return Err(closed),
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(Rejected::Full(req));
            }
        }
    }

    /// Remove up to `n` of the oldest requests, oldest first. Never blocks on
    /// an empty queue.
    pub fn drain_up_to(&self, n: usize) -> Vec<PendingRequest<K, V>> {
        let batch = {
            let mut state = self.lock();
            let take = n.min(state.items.len());
            let batch: Vec<_> = state.items.drain(..take).collect();
            self.metrics.set_queue_size(state.items.len());
            batch
        };
        if !batch.is_empty() {
            self.space.notify_waiters();
        }
        batch
    }

    /// Remove every queued request.
    pub fn drain_all(&self) -> Vec<PendingRequest<K, V>> {
        self.drain_up_to(usize::MAX)
    }

    /// Remove and return the oldest request without admitting a replacement.
    pub fn drop_oldest(&self) -> Option<PendingRequest<K, V>> {
        let oldest = {
            let mut state = self.lock();
            let oldest = state.items.pop_front();
            self.metrics.set_queue_size(state.items.len());
            oldest
        };
        if oldest.is_some() {
            self.space.notify_waiters();
        }
        oldest
    }

    /// Stop admitting requests. Already queued requests stay drainable and
    /// blocked admitters are woken so they can observe the closure.
    pub fn close(&self) {
        self.lock().closed = true;
        self.space.notify_waiters();
    }
}
