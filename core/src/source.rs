//! Lookup capability consumed by the coalescer.
//!
//! The embedding application decides *where* values come from (a database or
//! a remote service); the coalescer only decides *when* and *how many* keys
//! are looked up at once. Implementations are expected to
//! be slow relative to a single `load` call, which is what makes coalescing
//! worthwhile.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

use crate::errors::SourceError;

/// Key type accepted by a [`BatchSource`].
pub trait LoadKey: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

impl<T> LoadKey for T where T: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

/// Backing lookup source with a bulk and a single-key entry point.
///
/// The source is shared by all workers of a coalescer; the coalescer keeps at
/// most `worker_count` calls in flight but does no further synchronization.
#[async_trait::async_trait]
pub trait BatchSource: Send + Sync + 'static {
    type Key: LoadKey;
    type Value: Clone + Send + Sync + 'static;

    /// Look up many keys at once.
    ///
    /// `keys` contains no duplicates. The returned map may be partial: keys
    /// without a value are simply absent. An `Err` fails every request of the
    /// batch.
    async fn bulk_fetch(
        &self,
        keys: &[Self::Key],
    ) -> Result<HashMap<Self::Key, Self::Value>, SourceError>;

    /// Look up a single key.
    ///
    /// Used when a request bypasses the queue (degrade) and as the fallback
    /// for keys missing from a bulk result when retry-on-null is enabled.
    async fn single_fetch(&self, key: &Self::Key) -> Result<Option<Self::Value>, SourceError>;
}
