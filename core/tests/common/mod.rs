//! Shared test utilities for coalesce-core integration tests.
//!
//! Provides an in-memory lookup table standing in for a slow backing store,
//! plus a config builder with short intervals.

// Each integration test is compiled as its own crate, so not every test file
// uses every function from this shared module. Suppress dead_code warnings.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use coalesce_core::{BatchSource, CoalescerConfig, SourceError};

/// Value stored for `key` in a [`Table`].
pub fn value_of(key: &str) -> String {
    format!("value-{key}")
}

/// Lookup table that knows every key except the ones it is told to hide.
#[derive(Default)]
pub struct Table {
    /// Keys absent from the table entirely.
    missing: HashSet<String>,
    /// Keys absent from bulk results but found by single lookups.
    bulk_gaps: HashSet<String>,
    bulk_latency: Duration,
    bulk_error: Option<String>,
    bulk_calls: AtomicUsize,
    single_calls: AtomicUsize,
    max_bulk_keys: AtomicUsize,
    seen: Mutex<Vec<String>>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn without(mut self, key: &str) -> Self {
        self.missing.insert(key.to_string());
        self
    }

    pub fn with_bulk_gap(mut self, key: &str) -> Self {
        self.bulk_gaps.insert(key.to_string());
        self
    }

    pub fn with_bulk_latency(mut self, latency: Duration) -> Self {
        self.bulk_latency = latency;
        self
    }

    pub fn failing_bulk(mut self, message: &str) -> Self {
        self.bulk_error = Some(message.to_string());
        self
    }

    pub fn bulk_calls(&self) -> usize {
        self.bulk_calls.load(Ordering::SeqCst)
    }

    pub fn single_calls(&self) -> usize {
        self.single_calls.load(Ordering::SeqCst)
    }

    /// Largest key list received by one bulk lookup.
    pub fn max_bulk_keys(&self) -> usize {
        self.max_bulk_keys.load(Ordering::SeqCst)
    }

    /// Every key passed to a bulk lookup, in call order.
    pub fn seen_keys(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }

    fn lookup(&self, key: &str) -> Option<String> {
        (!self.missing.contains(key)).then(|| value_of(key))
    }
}

#[async_trait::async_trait]
impl BatchSource for Table {
    type Key = String;
    type Value = String;

    async fn bulk_fetch(&self, keys: &[String]) -> Result<HashMap<String, String>, SourceError> {
        self.bulk_calls.fetch_add(1, Ordering::SeqCst);
        self.max_bulk_keys.fetch_max(keys.len(), Ordering::SeqCst);
        self.seen.lock().unwrap().extend(keys.iter().cloned());
        if !self.bulk_latency.is_zero() {
            tokio::time::sleep(self.bulk_latency).await;
        }
        if let Some(message) = &self.bulk_error {
            return Err(SourceError::msg(message.clone()));
        }
        Ok(keys
            .iter()
            .filter(|k| !self.bulk_gaps.contains(*k))
            .filter_map(|k| self.lookup(k).map(|v| (k.clone(), v)))
            .collect())
    }

    async fn single_fetch(&self, key: &String) -> Result<Option<String>, SourceError> {
        self.single_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.lookup(key))
    }
}

/// Config with a short flush interval and the monitor disabled.
pub fn config(name: &str) -> CoalescerConfig {
    CoalescerConfig {
        name: name.to_string(),
        interval_ms: 10,
        max_batch_size: 50,
        queue_capacity: 1000,
        timeout_ms: 2000,
        enable_monitor: false,
        ..Default::default()
    }
}

/// Config whose timer never fires during a test, so only the size trigger
/// and shutdown drain the queue.
pub fn config_without_timer(name: &str) -> CoalescerConfig {
    CoalescerConfig {
        interval_ms: 600_000,
        ..config(name)
    }
}
