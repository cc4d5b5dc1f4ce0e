//! Delayed job runtime
//!
//! The scheduler hands each step run to a `JobRuntime` that fires it at its
//! due time. Delivery is at-least-once and may be arbitrarily late, never
//! early; the executor's replay guard makes duplicate delivery safe.
//!
//! `TokioJobRuntime` is the default in-process implementation: one spawned
//! task per job, a semaphore bounding concurrent executions, and a linear
//! retry backoff for attempts that fail outright. It is not durable across
//! restarts - the due-step sweeper recovers anything it loses.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::AutomationConfig;
use crate::error::EngineResult;
use crate::executor::StepExecutor;
use crate::store;

/// A delayed job keyed by the step run it fires
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepJob {
    pub step_run_id: i64,
    pub fire_at: NaiveDateTime,
}

/// Submit delayed step jobs for later delivery
#[async_trait]
pub trait JobRuntime: Send + Sync {
    async fn submit(&self, job: StepJob) -> EngineResult<()>;

    /// Stop delivering; pending jobs may be dropped
    async fn shutdown(&self) {}
}

/// In-process job runtime on tokio timers
pub struct TokioJobRuntime {
    executor: Arc<StepExecutor>,
    semaphore: Arc<Semaphore>,
    max_attempts: u32,
    retry_backoff: Duration,
    handles: Arc<RwLock<HashMap<i64, JoinHandle<()>>>>,
}

impl TokioJobRuntime {
    pub fn new(executor: Arc<StepExecutor>, config: &AutomationConfig) -> Self {
        Self {
            executor,
            semaphore: Arc::new(Semaphore::new(config.worker_concurrency.max(1))),
            max_attempts: config.max_attempts.max(1),
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
            handles: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Number of jobs still waiting or executing
    pub async fn active_count(&self) -> usize {
        self.handles.read().await.len()
    }
}

#[async_trait]
impl JobRuntime for TokioJobRuntime {
    async fn submit(&self, job: StepJob) -> EngineResult<()> {
        let executor = self.executor.clone();
        let semaphore = self.semaphore.clone();
        let handles = self.handles.clone();
        let max_attempts = self.max_attempts;
        let backoff = self.retry_backoff;
        let step_run_id = job.step_run_id;

        let handle = tokio::spawn(async move {
            let wait = (job.fire_at - store::utc_now())
                .to_std()
                .unwrap_or(Duration::ZERO);
            tokio::time::sleep(wait).await;

            for attempt in 1..=max_attempts {
                let result = {
                    let _permit = semaphore.acquire().await.ok();
                    executor.execute(step_run_id).await
                };

                match result {
                    Ok(_) => break,
                    Err(err) if err.is_not_found() => {
                        warn!(step_run_id, error = %err, "dropping job for missing record");
                        break;
                    }
                    Err(err) if attempt < max_attempts => {
                        warn!(step_run_id, attempt, error = %err, "step job failed, retrying");
                        tokio::time::sleep(backoff * attempt).await;
                    }
                    Err(err) => {
                        warn!(
                            step_run_id,
                            attempt,
                            error = %err,
                            "step job exhausted its attempts; the sweeper will pick it up"
                        );
                    }
                }
            }

            handles.write().await.remove(&step_run_id);
        });

        self.handles.write().await.insert(step_run_id, handle);
        Ok(())
    }

    async fn shutdown(&self) {
        info!("shutting down job runtime");
        let mut handles = self.handles.write().await;
        for (_, handle) in handles.drain() {
            handle.abort();
        }
    }
}

/// Job runtime that records submissions instead of delivering them
#[derive(Default)]
pub struct RecordingJobRuntime {
    submitted: Mutex<Vec<StepJob>>,
}

impl RecordingJobRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn submitted(&self) -> Vec<StepJob> {
        self.submitted.lock().await.clone()
    }
}

#[async_trait]
impl JobRuntime for RecordingJobRuntime {
    async fn submit(&self, job: StepJob) -> EngineResult<()> {
        self.submitted.lock().await.push(job);
        Ok(())
    }
}
