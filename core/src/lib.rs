//! Request-coalescing batch loader.
//!
//! Many concurrent callers each ask for one value by key. A [`Coalescer`]
//! queues those requests for a short window and resolves them with a single
//! bulk lookup against a [`BatchSource`], so a burst of point lookups costs
//! one round trip instead of hundreds. Each caller still receives exactly one
//! outcome for its own key.

pub mod batch;
pub mod coalescer;
pub mod config;
pub mod errors;
pub mod monitoring;
pub mod source;

pub use batch::request::{LoadHandle, LoadResult};
pub use coalescer::{Coalescer, LifecycleState};
pub use config::{CoalescerConfig, OverflowStrategy};
pub use errors::{ConfigError, LoadError, SourceError};
pub use monitoring::MetricsSnapshot;
pub use source::{BatchSource, LoadKey};
