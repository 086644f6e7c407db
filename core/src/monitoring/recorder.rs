use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use super::types::MetricsSnapshot;

/// Atomic counters owned by one coalescer.
///
/// Every update is an independent relaxed atomic operation; no lock is taken
/// and no ordering between counters is implied.
#[derive(Debug, Default)]
pub struct MetricsRecorder {
    total_requests: AtomicU64,
    batch_count: AtomicU64,
    degrade_count: AtomicU64,
    block_count: AtomicU64,
    fail_count: AtomicU64,
    drop_count: AtomicU64,
    timeout_count: AtomicU64,
    current_queue_size: AtomicUsize,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            batch_count: self.batch_count.load(Ordering::Relaxed),
            degrade_count: self.degrade_count.load(Ordering::Relaxed),
            block_count: self.block_count.load(Ordering::Relaxed),
            fail_count: self.fail_count.load(Ordering::Relaxed),
            drop_count: self.drop_count.load(Ordering::Relaxed),
            timeout_count: self.timeout_count.load(Ordering::Relaxed),
            current_queue_size: self.current_queue_size.load(Ordering::Relaxed),
        }
    }

    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch(&self) {
        self.batch_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_degrade(&self) {
        self.degrade_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_block(&self) {
        self.block_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fail(&self) {
        self.fail_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_drop(&self) {
        self.drop_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timeout_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Publish the queue length. Only called by the admission queue while it
    /// holds its lock, so the gauge always mirrors the real length.
    pub(crate) fn set_queue_size(&self, len: usize) {
        self.current_queue_size.store(len, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_recorder_is_zeroed() {
        assert_eq!(MetricsRecorder::new().snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn counters_are_independent() {
        let m = MetricsRecorder::new();
        m.record_request();
        m.record_request();
        m.record_batch();
        m.record_degrade();
        m.record_block();
        m.record_fail();
        m.record_drop();
        m.record_timeout();
        m.set_queue_size(7);

        let snap = m.snapshot();
        assert_eq!(snap.total_requests, 2);
        assert_eq!(snap.batch_count, 1);
        assert_eq!(snap.degrade_count, 1);
        assert_eq!(snap.block_count, 1);
        assert_eq!(snap.fail_count, 1);
        assert_eq!(snap.drop_count, 1);
        assert_eq!(snap.timeout_count, 1);
        assert_eq!(snap.current_queue_size, 7);
    }

    #[test]
    fn concurrent_increments() {
        let m = std::sync::Arc::new(MetricsRecorder::new());
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let m = m.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        m.record_request();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(m.snapshot().total_requests, 4000);
    }
}
