//! Error types for the coalescing batch loader.
//!
//! Per-request failures are reported through [`LoadError`], which is `Clone`
//! so a single backing failure can be handed to every request of a batch.
//! Failures raised by the embedding application's lookup source are wrapped
//! in [`SourceError`].

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Outcome error of a single `load` request.
#[derive(Error, Debug, Clone)]
pub enum LoadError {
    /// The coalescer is shutting down or already closed.
    #[error("Coalescer '{0}' is closed")]
    Closed(String),

    /// The coalescer was never started.
    #[error("Coalescer '{0}' has not been started")]
    NotStarted(String),

    /// The coalescer was started outside of a Tokio runtime.
    #[error("Coalescer '{0}' must be started from within a Tokio runtime")]
    NoRuntime(String),

    /// The admission queue was full and the request was rejected.
    #[error("Batch queue is full (capacity: {capacity}), retry later")]
    QueueFull { capacity: usize },

    /// The request waited longer than its deadline.
    #[error("Request timed out after {}ms", .waited.as_millis())]
    Timeout { waited: Duration },

    /// The request was evicted from the queue to make room for a newer one.
    #[error("Request dropped: queue full, oldest request evicted")]
    Dropped,

    /// The backing lookup source failed.
    #[error("Lookup failed: {0}")]
    Source(#[from] SourceError),

    /// The request was discarded before a result was produced.
    #[error("Request abandoned before completion")]
    Abandoned,
}

impl LoadError {
    /// Returns `true` for errors caused by the deadline elapsing.
    pub fn is_timeout(&self) -> bool {
        matches!(self, LoadError::Timeout { .. })
    }
}

/// Error raised by a [`BatchSource`](crate::source::BatchSource).
///
/// Cloning shares the underlying error, so every request of a failed batch
/// observes the same failure.
#[derive(Clone)]
pub struct SourceError(Arc<dyn StdError + Send + Sync>);

impl SourceError {
    /// Wrap an arbitrary error.
    pub fn new<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self(Arc::new(err))
    }

    /// Build an error from a plain message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self(Arc::new(MessageError(message.into())))
    }

    /// Access the wrapped error.
    pub fn inner(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self.0.as_ref()
    }
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SourceError").field(&self.0).finish()
    }
}

impl StdError for SourceError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.0.source()
    }
}

#[derive(Debug)]
struct MessageError(String);

impl fmt::Display for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl StdError for MessageError {}

/// Errors related to loader configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A tunable has a value outside its allowed range.
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// The configuration document could not be parsed.
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// The configuration file could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
