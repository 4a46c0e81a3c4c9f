//! Publish executor: the per-task unit of work.
//!
//! Safe to run any number of times for the same task: the receipt table is
//! consulted before every platform publish, so a redelivered or retried
//! task skips the platforms that already went out. Re-running is the normal
//! recovery path after a crash, not a special case.

use std::collections::HashMap;

use tracing::{debug, error, info, warn};

use syndica_core::{Platform, TaskId};
use syndica_publishers::{
    publisher_for, PublishError, Publisher, PublisherSettings,
};
use syndica_tasks::{PlatformOutcome, PublishReport, TaskStatus};

use crate::store::TaskStore;

/// How one executor invocation resolved.
///
/// An explicit result, not an exception path: the dispatcher decides what to
/// do with `Retryable` without relying on unwinding.
#[derive(Debug)]
pub enum ExecutionOutcome {
    /// The task reached a terminal publish status.
    Finished {
        status: TaskStatus,
        report: PublishReport,
    },
    /// The task was cancelled before execution; nothing was transitioned.
    Cancelled,
    /// Unrecoverable (missing task or content). Never retried.
    Fatal(String),
    /// A store failure mid-flight; a redelivery will resume idempotently.
    Retryable(String),
}

/// Executes one task: loads its content, walks its platforms in order,
/// records receipts and aggregates the per-platform outcomes.
pub struct PublishExecutor<S> {
    store: S,
    publishers: HashMap<Platform, Box<dyn Publisher>>,
}

impl<S: TaskStore> PublishExecutor<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            publishers: HashMap::new(),
        }
    }

    /// An executor with the full production publisher set.
    pub fn with_default_publishers(
        store: S,
        settings: &PublisherSettings,
    ) -> Result<Self, PublishError> {
        let mut executor = Self::new(store);
        for platform in Platform::ALL {
            executor.register(publisher_for(platform, settings)?);
        }
        Ok(executor)
    }

    /// Register (or replace) the publisher for its platform.
    pub fn register(&mut self, publisher: Box<dyn Publisher>) {
        self.publishers.insert(publisher.platform(), publisher);
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run the publish loop for `task_id`.
    pub async fn run(&self, task_id: TaskId) -> ExecutionOutcome {
        let task = match self.store.get_task(task_id).await {
            Ok(Some(task)) => task,
            Ok(None) => return ExecutionOutcome::Fatal(format!("task {task_id} not found")),
            Err(e) => return ExecutionOutcome::Retryable(format!("failed to load task: {e}")),
        };

        if task.status == TaskStatus::Cancelled {
            info!(task_id = %task_id, "task was cancelled before execution");
            return ExecutionOutcome::Cancelled;
        }
        if task.is_terminal() {
            // Redelivery of an already-resolved task; replay the stored result.
            info!(task_id = %task_id, status = %task.status, "task already resolved");
            return ExecutionOutcome::Finished {
                status: task.status,
                report: task.report.unwrap_or_default(),
            };
        }

        let bundle = match self.store.get_content(task.content_id).await {
            Ok(Some(bundle)) => bundle,
            Ok(None) => {
                // Content loss is a retention bug, not a transient failure.
                let msg = "content not found".to_string();
                error!(
                    task_id = %task_id,
                    content_id = %task.content_id,
                    "content missing at execution time"
                );
                if let Err(e) = self
                    .store
                    .update_task_status(task_id, TaskStatus::Failed, Some(msg.clone()), None)
                    .await
                {
                    warn!(task_id = %task_id, error = %e, "failed to record fatal status");
                }
                return ExecutionOutcome::Fatal(msg);
            }
            Err(e) => {
                return ExecutionOutcome::Retryable(format!("failed to load content: {e}"))
            }
        };

        // `running` may already be set if a previous delivery crashed
        // mid-loop; that is the resume case, not an error.
        if task.status == TaskStatus::Scheduled {
            if let Err(e) = self
                .store
                .update_task_status(task_id, TaskStatus::Running, None, None)
                .await
            {
                return ExecutionOutcome::Retryable(format!("failed to mark running: {e}"));
            }
        }

        info!(
            task_id = %task_id,
            platforms = task.platforms.len(),
            "publish task started"
        );

        let mut report = PublishReport::new();
        for &platform in &task.platforms {
            match self.store.check_published(task_id, platform).await {
                Ok(Some(receipt)) => {
                    debug!(task_id = %task_id, platform = %platform, "already receipted; skipping");
                    report.push(PlatformOutcome::skipped(
                        platform,
                        receipt.post_id,
                        receipt.post_url,
                    ));
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    return ExecutionOutcome::Retryable(format!("receipt lookup failed: {e}"))
                }
            }

            let Some(content) = bundle.get(platform) else {
                warn!(task_id = %task_id, platform = %platform, "no content for platform");
                report.push(PlatformOutcome::failure(platform, "no content for platform"));
                continue;
            };

            let Some(publisher) = self.publishers.get(&platform) else {
                warn!(task_id = %task_id, platform = %platform, "no publisher registered");
                report.push(PlatformOutcome::failure(platform, "no publisher registered"));
                continue;
            };

            if let Err(reason) = publisher.validate(content) {
                warn!(
                    task_id = %task_id,
                    platform = %platform,
                    reason = %reason,
                    "content validation failed"
                );
                report.push(PlatformOutcome::failure(
                    platform,
                    format!("validation failed: {reason}"),
                ));
                continue;
            }

            match publisher.publish(content).await {
                Ok(success) => {
                    if let Err(e) = self
                        .store
                        .mark_published(
                            task_id,
                            platform,
                            success.post_id.as_deref(),
                            success.post_url.as_deref(),
                        )
                        .await
                    {
                        return ExecutionOutcome::Retryable(format!(
                            "failed to record receipt: {e}"
                        ));
                    }
                    debug!(task_id = %task_id, platform = %platform, "platform publish succeeded");
                    report.push(if success.manual {
                        PlatformOutcome::manual(platform)
                    } else {
                        PlatformOutcome::success(platform, success.post_id, success.post_url)
                    });
                }
                // One platform's failure never aborts the rest of the loop.
                Err(e) => {
                    warn!(
                        task_id = %task_id,
                        platform = %platform,
                        error = %e,
                        "platform publish failed"
                    );
                    report.push(PlatformOutcome::failure(platform, e.to_string()));
                }
            }
        }

        let status = report.aggregate_status();
        match self
            .store
            .update_task_status(task_id, status, None, Some(report.clone()))
            .await
        {
            Ok(()) => {
                info!(
                    task_id = %task_id,
                    status = %status,
                    succeeded = report.succeeded(),
                    failed = report.failed(),
                    "publish task resolved"
                );
                ExecutionOutcome::Finished { status, report }
            }
            Err(e) => ExecutionOutcome::Retryable(format!("failed to record final status: {e}")),
        }
    }
}
