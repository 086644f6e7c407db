//! In-memory source and engine builder shared by the batch unit tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use super::scheduler::DrainTrigger;
use super::Engine;
use crate::config::CoalescerConfig;
use crate::errors::SourceError;
use crate::source::BatchSource;

#[derive(Default)]
struct MapSourceInner {
    values: HashMap<String, String>,
    bulk_error: Option<String>,
    single_error: Option<String>,
    bulk_delay: Duration,
    bulk_calls: Mutex<Vec<Vec<String>>>,
    single_calls: Mutex<Vec<String>>,
}

/// String-to-string source recording every call it receives.
#[derive(Clone, Default)]
pub(crate) struct MapSource(Arc<MapSourceInner>);

impl MapSource {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn inner_mut(&mut self) -> &mut MapSourceInner {
        Arc::get_mut(&mut self.0).expect("configure MapSource before sharing it")
    }

    pub(crate) fn with(mut self, key: &str, value: &str) -> Self {
        self.inner_mut()
            .values
            .insert(key.to_string(), value.to_string());
        self
    }

    pub(crate) fn failing_bulk(mut self, message: &str) -> Self {
        self.inner_mut().bulk_error = Some(message.to_string());
        self
    }

    pub(crate) fn failing_single(mut self, message: &str) -> Self {
        self.inner_mut().single_error = Some(message.to_string());
        self
    }

    pub(crate) fn with_bulk_delay(mut self, delay: Duration) -> Self {
        self.inner_mut().bulk_delay = delay;
        self
    }

    pub(crate) fn bulk_calls(&self) -> Vec<Vec<String>> {
        self.0.bulk_calls.lock().unwrap().clone()
    }

    pub(crate) fn single_calls(&self) -> Vec<String> {
        self.0.single_calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl BatchSource for MapSource {
    type Key = String;
    type Value = String;

    async fn bulk_fetch(&self, keys: &[String]) -> Result<HashMap<String, String>, SourceError> {
        self.0.bulk_calls.lock().unwrap().push(keys.to_vec());
        if !self.0.bulk_delay.is_zero() {
            tokio::time::sleep(self.0.bulk_delay).await;
        }
        if let Some(message) = &self.0.bulk_error {
            return Err(SourceError::msg(message.clone()));
        }
        Ok(keys
            .iter()
            .filter_map(|k| self.0.values.get(k).map(|v| (k.clone(), v.clone())))
            .collect())
    }

    async fn single_fetch(&self, key: &String) -> Result<Option<String>, SourceError> {
        self.0.single_calls.lock().unwrap().push(key.clone());
        if let Some(message) = &self.0.single_error {
            return Err(SourceError::msg(message.clone()));
        }
        Ok(self.0.values.get(key).cloned())
    }
}

/// Build an engine without starting any background task.
pub(crate) fn engine(
    config: CoalescerConfig,
    source: MapSource,
) -> (Arc<Engine<MapSource>>, mpsc::Receiver<DrainTrigger>) {
    let (engine, rx) = Engine::new(config, Arc::new(source));
    (Arc::new(engine), rx)
}
