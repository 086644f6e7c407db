//! Point-in-time view of a coalescer's counters.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Snapshot of the counters of one coalescer.
///
/// Counters are read independently, so a snapshot taken under load is not a
/// transaction across fields. Fields use `camelCase` serialization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub batch_count: u64,
    pub degrade_count: u64,
    pub block_count: u64,
    pub fail_count: u64,
    pub drop_count: u64,
    pub timeout_count: u64,
    pub current_queue_size: usize,
}

impl MetricsSnapshot {
    /// Average number of requests per batch, 0 when no batch ran yet.
    pub fn avg_batch_size(&self) -> f64 {
        if self.batch_count == 0 {
            return 0.0;
        }
        self.total_requests as f64 / self.batch_count as f64
    }

    /// Percentage of requests served through the degrade path.
    pub fn degrade_rate(&self) -> f64 {
        percent(self.degrade_count, self.total_requests)
    }

    /// Percentage of requests rejected because the queue was full.
    pub fn fail_rate(&self) -> f64 {
        percent(self.fail_count, self.total_requests)
    }
}

fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    part as f64 * 100.0 / total as f64
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "total={}, batches={}, avgBatch={:.2}, degraded={}({:.2}%), blocked={}, \
             failed={}({:.2}%), dropped={}, timedOut={}, queue={}",
            self.total_requests,
            self.batch_count,
            self.avg_batch_size(),
            self.degrade_count,
            self.degrade_rate(),
            self.block_count,
            self.fail_count,
            self.fail_rate(),
            self.drop_count,
            self.timeout_count,
            self.current_queue_size
        )
    }
}
