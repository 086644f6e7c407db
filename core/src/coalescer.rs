//! Public facade of the batch loader.
//!
//! A [`Coalescer`] accepts single-key loads from any number of tasks, queues
//! them, and lets a small worker pool resolve them in bulk through a
//! [`BatchSource`]. Its lifecycle is `Created → Running → ShuttingDown →
//! Closed`; loads only succeed while `Running`.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::batch::request::{LoadHandle, LoadResult, PendingRequest};
use crate::batch::scheduler::{self, DrainTrigger};
use crate::batch::Engine;
use crate::config::CoalescerConfig;
use crate::errors::{ConfigError, LoadError};
use crate::monitoring::{self, MetricsSnapshot};
use crate::source::BatchSource;

const CREATED: u8 = 0;
const RUNNING: u8 = 1;
const SHUTTING_DOWN: u8 = 2;
const CLOSED: u8 = 3;

/// Lifecycle state of a [`Coalescer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    Running,
    ShuttingDown,
    Closed,
}

impl LifecycleState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            CREATED => LifecycleState::Created,
            RUNNING => LifecycleState::Running,
            SHUTTING_DOWN => LifecycleState::ShuttingDown,
            _ => LifecycleState::Closed,
        }
    }
}

struct BackgroundTasks {
    workers: Vec<JoinHandle<()>>,
    timer: JoinHandle<()>,
    monitor: Option<JoinHandle<()>>,
}

impl BackgroundTasks {
    fn into_handles(self) -> Vec<JoinHandle<()>> {
        let mut handles = self.workers;
        handles.push(self.timer);
        handles.extend(self.monitor);
        handles
    }
}

/// Request-coalescing batch loader.
///
/// ```ignore
/// let loader = Coalescer::new(CoalescerConfig::named("stocks"), StockSource::new())?;
/// loader.start()?;
/// let stock = loader.load_sync("000001".to_string()).await?;
/// loader.shutdown().await;
/// ```
pub struct Coalescer<S: BatchSource> {
    engine: Arc<Engine<S>>,
    state: AtomicU8,
    trigger_rx: Mutex<Option<mpsc::Receiver<DrainTrigger>>>,
    tasks: Mutex<Option<BackgroundTasks>>,
    runtime: OnceLock<Handle>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<S: BatchSource> Coalescer<S> {
    /// Create a stopped coalescer. Fails if `config` is out of range.
    pub fn new(config: CoalescerConfig, source: S) -> Result<Self, ConfigError> {
        Self::with_shared_source(config, Arc::new(source))
    }

    /// Like [`new`](Self::new) for a source that is also used elsewhere.
    pub fn with_shared_source(config: CoalescerConfig, source: Arc<S>) -> Result<Self, ConfigError> {
        config.validate()?;
        let (engine, trigger_rx) = Engine::new(config, source);
        Ok(Self {
            engine: Arc::new(engine),
            state: AtomicU8::new(CREATED),
            trigger_rx: Mutex::new(Some(trigger_rx)),
            tasks: Mutex::new(None),
            runtime: OnceLock::new(),
        })
    }

    pub fn name(&self) -> &str {
        self.engine.name()
    }

    pub fn config(&self) -> &CoalescerConfig {
        &self.engine.config
    }

    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_raw(self.state.load(Ordering::Acquire))
    }

    /// Start the flush timer, the worker pool and, if enabled, the metrics
    /// monitor. Starting a running coalescer is a no-op; starting one that
    /// has been shut down fails with [`LoadError::Closed`]. Outside of a
    /// Tokio runtime it fails with [`LoadError::NoRuntime`] and the coalescer
    /// stays `Created`.
    pub fn start(&self) -> Result<(), LoadError> {
        let runtime = Handle::try_current()
            .map_err(|_| LoadError::NoRuntime(self.name().to_string()))?;
        match self
            .state
            .compare_exchange(CREATED, RUNNING, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {}
            Err(RUNNING) => return Ok(()),
            Err(_) => return Err(self.engine.closed_error()),
        }
        let _ = self.runtime.set(runtime);

        let trigger_rx = lock(&self.trigger_rx)
            .take()
            .ok_or_else(|| self.engine.closed_error())?;
        let engine = &self.engine;
        let config = &engine.config;

        let workers = scheduler::spawn_workers(engine, trigger_rx);
        let timer = scheduler::spawn_timer(engine);
        let monitor = config.enable_monitor.then(|| {
            tokio::spawn(monitoring::monitor_task(
                config.name.clone(),
                engine.metrics.clone(),
                config.monitor_interval(),
                engine.stop.clone(),
            ))
        });
        *lock(&self.tasks) = Some(BackgroundTasks {
            workers,
            timer,
            monitor,
        });

        info!(
            "{} started - interval: {}ms, max batch: {}, queue capacity: {}, overflow: {:?}, timeout: {}ms, workers: {}",
            config.name,
            config.interval_ms,
            config.max_batch_size,
            config.queue_capacity,
            config.overflow_strategy,
            config.timeout_ms,
            config.worker_count
        );
        Ok(())
    }

    fn ensure_running(&self) -> Result<(), LoadError> {
        match self.state() {
            LifecycleState::Running => Ok(()),
            LifecycleState::Created => Err(LoadError::NotStarted(self.name().to_string())),
            LifecycleState::ShuttingDown | LifecycleState::Closed => {
                Err(self.engine.closed_error())
            }
        }
    }

    /// Admit a load for `key` and return its pending handle.
    ///
    /// Returns as soon as the request is admitted. Only the Block overflow
    /// strategy makes this wait, for at most `timeout_ms`, while the queue is
    /// full. Fails immediately when the coalescer is not running.
    pub async fn load(&self, key: S::Key) -> Result<LoadHandle<S::Value>, LoadError> {
        self.ensure_running()?;
        self.engine.metrics.record_request();
        let (req, handle) = PendingRequest::new(key);
        self.engine.admit(req).await;
        Ok(handle)
    }

    /// Load `key` and wait up to `timeout_ms` for its value.
    pub async fn load_sync(&self, key: S::Key) -> LoadResult<S::Value> {
        let timeout = self.engine.config.timeout();
        let handle = self.load(key.clone()).await?;
        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                error!("{}: request failed - key: {:?}: {}", self.name(), key, e);
                Err(e)
            }
            Err(_) => {
                error!(
                    "{}: request timed out - key: {:?}, timeout: {}ms",
                    self.name(),
                    key,
                    timeout.as_millis()
                );
                Err(LoadError::Timeout { waited: timeout })
            }
        }
    }

    /// Thread-blocking [`load_sync`](Self::load_sync) for callers outside the
    /// async runtime.
    ///
    /// # Panics
    ///
    /// Panics when called from within an async execution context.
    pub fn blocking_load(&self, key: S::Key) -> LoadResult<S::Value> {
        let runtime = self
            .runtime
            .get()
            .ok_or_else(|| LoadError::NotStarted(self.name().to_string()))?;
        runtime.block_on(self.load_sync(key))
    }

    /// Point-in-time copy of the counters. Never blocks.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.engine.metrics.snapshot()
    }

    /// Stop admitting requests, serve what is still queued, then stop the
    /// workers.
    ///
    /// Queued requests are resolved normally if that finishes within
    /// `shutdown_grace_ms`; after that, remaining requests are failed with
    /// [`LoadError::Closed`] and in-flight lookups are abandoned. Calling it
    /// again, or concurrently, returns immediately.
    pub async fn shutdown(&self) {
        loop {
            match self.state.load(Ordering::Acquire) {
                CREATED => {
                    if self.transition(CREATED, CLOSED) {
                        self.engine.queue.close();
                        self.engine.stop.cancel();
                        info!("{} closed before it was started", self.name());
                        return;
                    }
                }
                RUNNING => {
                    if self.transition(RUNNING, SHUTTING_DOWN) {
                        break;
                    }
                }
                _ => return,
            }
        }

        let engine = &self.engine;
        let deadline = Instant::now() + engine.config.shutdown_grace();
        info!(
            "{} shutting down - queued requests: {}",
            self.name(),
            engine.queue.len()
        );

        engine.queue.close();
        engine.stop.cancel();

        let mut handles = lock(&self.tasks)
            .take()
            .map(BackgroundTasks::into_handles)
            .unwrap_or_default();
        let mut in_grace = tokio::time::timeout_at(
            deadline,
            futures_util::future::join_all(handles.iter_mut()),
        )
        .await
        .is_ok();

        if in_grace {
            match tokio::time::timeout_at(deadline, engine.drain_remaining()).await {
                Ok(served) if served > 0 => {
                    info!("{}: served {} queued requests during shutdown", self.name(), served);
                }
                Ok(_) => {}
                Err(_) => in_grace = false,
            }
        }

        engine.tracker.close();
        if in_grace {
            in_grace = tokio::time::timeout_at(deadline, engine.tracker.wait())
                .await
                .is_ok();
        }

        if !in_grace {
            engine.teardown.cancel();
            for handle in &handles {
                handle.abort();
            }
            let remaining = engine.queue.drain_all();
            warn!(
                "{}: shutdown grace period elapsed, failing {} queued requests",
                self.name(),
                remaining.len()
            );
            for req in remaining {
                req.fail(engine.closed_error());
            }
        }

        self.state.store(CLOSED, Ordering::Release);
        info!("{} closed - {}", self.name(), self.metrics());
    }

    fn transition(&self, from: u8, to: u8) -> bool {
        self.state
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl<S: BatchSource> Drop for Coalescer<S> {
    fn drop(&mut self) {
        let engine = &self.engine;
        engine.queue.close();
        engine.stop.cancel();
        engine.teardown.cancel();
        if let Some(tasks) = lock(&self.tasks).take() {
            for handle in tasks.into_handles() {
                handle.abort();
            }
        }
    }
}
