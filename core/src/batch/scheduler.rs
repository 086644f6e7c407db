use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, warn};

use super::Engine;
use crate::source::BatchSource;

/// Why a drain was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DrainTrigger {
    /// The periodic flush timer fired.
    Timer,
    /// The queue reached `max_batch_size`.
    Size,
}

impl<S: BatchSource> Engine<S> {
    /// Ask the worker pool for a drain.
    ///
    /// When the trigger channel is full enough drains are already pending,
    /// so the request is dropped.
    pub(crate) fn request_drain(&self, trigger: DrainTrigger) {
        match self.triggers.try_send(trigger) {
            Ok(()) | Err(TrySendError::Full(_)) => {}
            Err(TrySendError::Closed(_)) => {
                debug!("{}: {:?} trigger ignored, workers stopped", self.name(), trigger);
            }
        }
    }
}

/// Spawn the periodic flush timer.
pub(crate) fn spawn_timer<S: BatchSource>(engine: &Arc<Engine<S>>) -> JoinHandle<()> {
    tokio::spawn(timer_task(Arc::clone(engine)))
}

async fn timer_task<S: BatchSource>(engine: Arc<Engine<S>>) {
    let interval = engine.config.interval();
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = engine.stop.cancelled() => {
                debug!("{}: flush timer stopped", engine.name());
                break;
            }
            _ = ticker.tick() => engine.request_drain(DrainTrigger::Timer),
        }
    }
}

/// Spawn `worker_count` workers sharing one trigger receiver.
pub(crate) fn spawn_workers<S: BatchSource>(
    engine: &Arc<Engine<S>>,
    trigger_rx: mpsc::Receiver<DrainTrigger>,
) -> Vec<JoinHandle<()>> {
    let trigger_rx = Arc::new(Mutex::new(trigger_rx));
    (0..engine.config.worker_count)
        .map(|id| tokio::spawn(worker_task(Arc::clone(engine), Arc::clone(&trigger_rx), id)))
        .collect()
}

async fn worker_task<S: BatchSource>(
    engine: Arc<Engine<S>>,
    trigger_rx: Arc<Mutex<mpsc::Receiver<DrainTrigger>>>,
    id: usize,
) {
    loop {
        let trigger = tokio::select! {
            _ = engine.stop.cancelled() => break,
            trigger = next_trigger(&trigger_rx) => match trigger {
                Some(trigger) => trigger,
                None => break,
            },
        };

        let run = AssertUnwindSafe(engine.drain_and_dispatch(trigger)).catch_unwind();
        tokio::select! {
            result = run => {
                if result.is_err() {
                    error!("{}: worker {} panicked while dispatching a batch", engine.name(), id);
                }
            }
            _ = engine.teardown.cancelled() => {
                warn!("{}: worker {} abandoned its in-flight batch", engine.name(), id);
                break;
            }
        }
    }
    debug!("{}: worker {} stopped", engine.name(), id);
}

async fn next_trigger(rx: &Mutex<mpsc::Receiver<DrainTrigger>>) -> Option<DrainTrigger> {
    rx.lock().await.recv().await
}
