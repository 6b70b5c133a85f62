//! Scripted workers that replay canned results, used by the harness binary
//! and by tests in place of live analysis workers.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{DataMap, Track, Worker, WorkerResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayResponse {
    Ok(WorkerResult),
    Err(String),
}

/// Scenario-file description of a replay worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplaySpec {
    pub name: String,
    pub track: Track,
    /// Responses in call order; the last one repeats
    pub script: Vec<ReplayResponse>,
    #[serde(default)]
    pub delay_ms: u64,
}

impl ReplaySpec {
    pub fn into_worker(self) -> ReplayWorker {
        ReplayWorker::scripted(self.name, self.script).with_delay(Duration::from_millis(self.delay_ms))
    }
}

#[derive(Debug)]
pub struct ReplayWorker {
    name: String,
    script: Vec<ReplayResponse>,
    delay: Duration,
    calls: AtomicUsize,
}

impl ReplayWorker {
    pub fn scripted<S: Into<String>>(name: S, script: Vec<ReplayResponse>) -> Self {
        Self {
            name: name.into(),
            script,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn returning<S: Into<String>>(name: S, result: WorkerResult) -> Self {
        Self::scripted(name, vec![ReplayResponse::Ok(result)])
    }

    pub fn failing<S: Into<String>, M: Into<String>>(name: S, message: M) -> Self {
        Self::scripted(name, vec![ReplayResponse::Err(message.into())])
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn into_arc(self) -> Arc<dyn Worker> {
        Arc::new(self)
    }

    /// Number of invocations so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Worker for ReplayWorker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, _data: Arc<DataMap>) -> Result<WorkerResult> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match self.script.get(call).or_else(|| self.script.last()) {
            Some(ReplayResponse::Ok(result)) => Ok(result.clone()),
            Some(ReplayResponse::Err(message)) => Err(anyhow!("{}", message)),
            None => Err(anyhow!("Worker '{}' has no scripted response", self.name)),
        }
    }
}
