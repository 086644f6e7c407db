//! Simulated quote store with per-call latency.
//!
//! Every call costs a fixed round trip plus random jitter, regardless of how
//! many keys it carries. That is the cost profile coalescing is meant to
//! amortize.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use coalesce_core::{BatchSource, SourceError};
use rand::Rng;
use serde::Serialize;

/// A stored quote.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub code: String,
    pub name: String,
    pub price: f64,
}

/// In-memory store answering codes `000000` up to `size - 1`.
pub struct QuoteStore {
    size: u64,
    round_trip: Duration,
    jitter_ms: u64,
    calls: AtomicU64,
}

impl QuoteStore {
    pub fn new(size: u64, round_trip: Duration, jitter_ms: u64) -> Self {
        Self {
            size,
            round_trip,
            jitter_ms,
            calls: AtomicU64::new(0),
        }
    }

    /// Calls received so far, bulk and single alike.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn reset_calls(&self) {
        self.calls.store(0, Ordering::Relaxed);
    }

    fn quote(&self, code: &str) -> Option<Quote> {
        let n: u64 = code.parse().ok()?;
        (n < self.size).then(|| Quote {
            code: code.to_string(),
            name: format!("Company {n}"),
            price: 10.0 + (n % 1000) as f64 / 100.0,
        })
    }

    async fn round_trip(&self) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let jitter = if self.jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=self.jitter_ms)
        };
        tokio::time::sleep(self.round_trip + Duration::from_millis(jitter)).await;
    }
}

/// Six-digit code for index `n`.
pub fn code(n: u64) -> String {
    format!("{n:06}")
}

#[async_trait::async_trait]
impl BatchSource for QuoteStore {
    type Key = String;
    type Value = Quote;

    async fn bulk_fetch(&self, keys: &[String]) -> Result<HashMap<String, Quote>, SourceError> {
        self.round_trip().await;
        Ok(keys
            .iter()
            .filter_map(|k| self.quote(k).map(|q| (k.clone(), q)))
            .collect())
    }

    async fn single_fetch(&self, key: &String) -> Result<Option<Quote>, SourceError> {
        self.round_trip().await;
        Ok(self.quote(key))
    }
}
