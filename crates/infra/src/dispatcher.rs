//! Deferred execution: hand tasks to the executor at-or-after their
//! scheduled time.
//!
//! The backend contract is at-least-once delivery; exactly-once *effect* is
//! the executor's idempotency logic, never the dispatcher's. Task-level
//! retries with backoff live here: an [`ExecutionOutcome::Retryable`] is
//! re-attempted a bounded number of times, then given up on with a
//! "max retries exceeded" failure.

use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use syndica_core::TaskId;
use syndica_tasks::{RetryPolicy, TaskStatus};

use crate::executor::{ExecutionOutcome, PublishExecutor};
use crate::store::{StoreError, TaskStore};

/// Upper bound on tasks re-armed in one pass after a worker restart.
const REARM_LIMIT: usize = 10_000;

/// Dispatch backend failure at schedule time.
///
/// Never fatal for the task: the task row is durably recorded before the
/// backend is consulted, so it stays `scheduled` for a manual trigger.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("dispatch backend unavailable: {0}")]
    Unavailable(String),
}

/// The deferred-execution contract: invoke the executor for `task_id`
/// at-or-after `scheduled_at`, at least once, returning a correlation id.
#[async_trait]
pub trait DispatchBackend: Send + Sync {
    async fn schedule(
        &self,
        task_id: TaskId,
        scheduled_at: DateTime<Utc>,
    ) -> Result<String, DispatchError>;
}

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Name used in logs and correlation ids.
    pub name: String,
    /// Task-level retry policy for retryable executor outcomes.
    pub retry: RetryPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            name: "dispatcher".to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

impl DispatcherConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

struct DispatcherInner<S> {
    executor: PublishExecutor<S>,
    config: DispatcherConfig,
    shutdown: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

/// In-process deferred-execution backend on the tokio runtime.
///
/// Each scheduled task gets its own timer task; worker restarts recover
/// pending work through [`TokioDispatcher::rearm_pending`] (redelivery is
/// safe because the executor skips receipted platforms).
pub struct TokioDispatcher<S: TaskStore + 'static> {
    inner: Arc<DispatcherInner<S>>,
}

impl<S: TaskStore + 'static> Clone for TokioDispatcher<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: TaskStore + 'static> TokioDispatcher<S> {
    pub fn new(executor: PublishExecutor<S>, config: DispatcherConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(DispatcherInner {
                executor,
                config,
                shutdown,
                handles: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Re-arm every task still in `scheduled` state (worker restart path).
    ///
    /// Tasks whose instant has already passed fire immediately.
    pub async fn rearm_pending(&self) -> Result<usize, StoreError> {
        let tasks = self
            .inner
            .executor
            .store()
            .list_tasks(Some(TaskStatus::Scheduled), REARM_LIMIT)
            .await?;

        let count = tasks.len();
        for task in tasks {
            let dispatch_ref = self
                .schedule(task.task_id, task.scheduled_at)
                .await
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            self.inner
                .executor
                .store()
                .set_dispatch_ref(task.task_id, Some(dispatch_ref))
                .await?;
        }

        if count > 0 {
            info!(dispatcher = %self.inner.config.name, count, "re-armed pending tasks");
        }
        Ok(count)
    }

    /// Request graceful shutdown and wait for all timer tasks to stop.
    pub async fn shutdown(self) {
        let _ = self.inner.shutdown.send(true);
        let handles: Vec<JoinHandle<()>> = self.inner.handles.lock().unwrap().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        info!(dispatcher = %self.inner.config.name, "dispatcher stopped");
    }
}

#[async_trait]
impl<S: TaskStore + 'static> DispatchBackend for TokioDispatcher<S> {
    async fn schedule(
        &self,
        task_id: TaskId,
        scheduled_at: DateTime<Utc>,
    ) -> Result<String, DispatchError> {
        let dispatch_ref = format!("{}-{}", self.inner.config.name, Uuid::now_v7());
        let inner = self.inner.clone();
        let mut shutdown = self.inner.shutdown.subscribe();

        debug!(
            dispatcher = %self.inner.config.name,
            task_id = %task_id,
            scheduled_at = %scheduled_at,
            "task armed"
        );

        let handle = tokio::spawn(async move {
            let wait = (scheduled_at - Utc::now())
                .to_std()
                .unwrap_or(StdDuration::ZERO);
            tokio::select! {
                () = tokio::time::sleep(wait) => {}
                _ = shutdown.changed() => {
                    debug!(task_id = %task_id, "shutdown before scheduled instant");
                    return;
                }
            }
            run_with_retries(&inner, task_id, &mut shutdown).await;
        });
        self.inner.handles.lock().unwrap().push(handle);

        Ok(dispatch_ref)
    }
}

async fn run_with_retries<S: TaskStore>(
    inner: &DispatcherInner<S>,
    task_id: TaskId,
    shutdown: &mut watch::Receiver<bool>,
) {
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        match inner.executor.run(task_id).await {
            ExecutionOutcome::Finished { status, .. } => {
                debug!(task_id = %task_id, status = %status, "delivery resolved");
                return;
            }
            ExecutionOutcome::Cancelled => {
                debug!(task_id = %task_id, "delivery found task cancelled");
                return;
            }
            ExecutionOutcome::Fatal(err) => {
                error!(task_id = %task_id, error = %err, "fatal execution failure");
                return;
            }
            ExecutionOutcome::Retryable(err) => {
                if !inner.config.retry.should_retry(attempts) {
                    let msg = format!("max retries exceeded: {err}");
                    error!(task_id = %task_id, attempts, "giving up on task");
                    // Best-effort terminal failure; if the store itself is
                    // down, the task stays as-is for a manual trigger.
                    if let Err(e) = inner
                        .executor
                        .store()
                        .update_task_status(task_id, TaskStatus::Failed, Some(msg), None)
                        .await
                    {
                        error!(task_id = %task_id, error = %e, "failed to record retry exhaustion");
                    }
                    return;
                }

                let delay = jittered(
                    inner.config.retry.delay_for_attempt(attempts),
                    inner.config.retry.jitter,
                );
                warn!(
                    task_id = %task_id,
                    attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "execution failed; backing off"
                );
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    _ = shutdown.changed() => {
                        debug!(task_id = %task_id, "shutdown during backoff");
                        return;
                    }
                }
            }
        }
    }
}

/// Spread a backoff delay by ±`jitter` so restarted workers do not retry in
/// lockstep.
fn jittered(delay: StdDuration, jitter: f64) -> StdDuration {
    let range = delay.as_secs_f64() * jitter;
    if range <= 0.0 {
        return delay;
    }
    let offset = rand::thread_rng().gen_range(-range..=range);
    StdDuration::from_secs_f64((delay.as_secs_f64() + offset).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_stays_within_the_band() {
        let delay = StdDuration::from_secs(60);
        for _ in 0..100 {
            let d = jittered(delay, 0.1);
            assert!(d >= StdDuration::from_secs(54));
            assert!(d <= StdDuration::from_secs(66));
        }
    }

    #[test]
    fn zero_jitter_is_deterministic() {
        let delay = StdDuration::from_secs(60);
        assert_eq!(jittered(delay, 0.0), delay);
        assert_eq!(jittered(StdDuration::ZERO, 0.5), StdDuration::ZERO);
    }
}
