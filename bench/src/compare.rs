//! Unbatched versus coalesced comparison runs.

use std::sync::Arc;
use std::time::Duration;

use coalesce_core::{
    BatchSource, Coalescer, CoalescerConfig, LoadError, LoadResult, MetricsSnapshot,
};
use futures_util::future::join_all;
use serde::Serialize;
use tokio::time::Instant;
use tracing::info;

use crate::store::{code, Quote, QuoteStore};

/// Outcome of one run of `requests` concurrent lookups.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub mode: &'static str,
    pub requests: usize,
    pub total_ms: u64,
    pub avg_ms: f64,
    pub found: usize,
    pub missing: usize,
    pub failed: usize,
    pub backend_calls: u64,
}

impl RunReport {
    fn new(
        mode: &'static str,
        elapsed: Duration,
        results: &[LoadResult<Quote>],
        backend_calls: u64,
    ) -> Self {
        let requests = results.len();
        let found = results.iter().filter(|r| matches!(r, Ok(Some(_)))).count();
        let missing = results.iter().filter(|r| matches!(r, Ok(None))).count();
        Self {
            mode,
            requests,
            total_ms: elapsed.as_millis() as u64,
            avg_ms: if requests == 0 {
                0.0
            } else {
                elapsed.as_secs_f64() * 1000.0 / requests as f64
            },
            found,
            missing,
            failed: requests - found - missing,
            backend_calls,
        }
    }
}

/// Both runs plus the coalescer counters after the coalesced run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonReport {
    pub unbatched: RunReport,
    pub coalesced: RunReport,
    pub metrics: MetricsSnapshot,
}

/// Look up `keys` codes once with one backend call each, then once through
/// a coalescer built from `config`.
pub async fn run(
    store: Arc<QuoteStore>,
    config: CoalescerConfig,
    keys: u64,
) -> anyhow::Result<ComparisonReport> {
    let codes: Vec<String> = (0..keys).map(code).collect();

    info!("unbatched run - requests: {}", codes.len());
    store.reset_calls();
    let started = Instant::now();
    let results = join_all(codes.iter().map(|c| {
        let store = Arc::clone(&store);
        async move { store.single_fetch(c).await.map_err(LoadError::from) }
    }))
    .await;
    let unbatched = RunReport::new("unbatched", started.elapsed(), &results, store.calls());

    info!("coalesced run - requests: {}", codes.len());
    store.reset_calls();
    let coalescer = Arc::new(Coalescer::with_shared_source(config, Arc::clone(&store))?);
    coalescer.start()?;
    let started = Instant::now();
    let tasks: Vec<_> = codes
        .into_iter()
        .map(|c| {
            let coalescer = Arc::clone(&coalescer);
            tokio::spawn(async move { coalescer.load_sync(c).await })
        })
        .collect();
    let mut results = Vec::with_capacity(tasks.len());
    for task in tasks {
        results.push(task.await?);
    }
    let coalesced = RunReport::new("coalesced", started.elapsed(), &results, store.calls());

    coalescer.shutdown().await;
    Ok(ComparisonReport {
        unbatched,
        coalesced,
        metrics: coalescer.metrics(),
    })
}
