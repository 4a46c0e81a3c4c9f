//! Durable task/content/receipt storage.
//!
//! The store is the single source of truth and the only shared mutable
//! resource in the system: all cross-task and cross-process coordination
//! happens through statuses and receipts, never through in-memory state.

pub mod memory;
pub mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use syndica_core::{ContentBundle, ContentId, Platform, TaskId};
use syndica_tasks::{CancelOutcome, PublishReport, PublishTask, TaskStatus};

pub use memory::InMemoryTaskStore;
pub use sqlite::SqliteTaskStore;

/// Idempotency witness: proof that a (task, platform) pair was published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    pub task_id: TaskId,
    pub platform: Platform,
    pub post_id: Option<String>,
    pub post_url: Option<String>,
    pub published_at: DateTime<Utc>,
}

/// Rows deleted by a retention sweep. Zero everywhere is a normal outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct CleanupCounts {
    pub contents: u64,
    pub tasks: u64,
    pub receipts: u64,
}

impl CleanupCounts {
    pub fn total(&self) -> u64 {
        self.contents + self.tasks + self.receipts
    }
}

/// Store operation error.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Write-once violation (content id or task id already exists).
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// A referenced row does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A status update would regress the task state machine.
    #[error("illegal status transition: {0}")]
    IllegalTransition(String),

    /// Row (de)serialization failed at the storage boundary.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Underlying storage failure (connection, I/O, ...).
    #[error("storage error: {0}")]
    Storage(String),
}

/// Durable store for tasks, content bundles and publish receipts.
///
/// Implementations must keep mutations atomic per row; callers operating on
/// different tasks never block each other.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Store a content bundle, write-once.
    ///
    /// Fails with [`StoreError::DuplicateKey`] if the id exists; the
    /// original payload is left unchanged.
    async fn put_content(
        &self,
        content_id: ContentId,
        bundle: &ContentBundle,
    ) -> Result<(), StoreError>;

    async fn get_content(&self, content_id: ContentId)
        -> Result<Option<ContentBundle>, StoreError>;

    /// Record a new task. The task must be in `scheduled` state and its
    /// content must already be stored.
    async fn create_task(&self, task: &PublishTask) -> Result<(), StoreError>;

    async fn get_task(&self, task_id: TaskId) -> Result<Option<PublishTask>, StoreError>;

    /// Transition a task's status, stamping `started_at` on entering
    /// `running` and `finished_at` on entering a terminal status.
    ///
    /// Rejects transitions the state machine does not allow; a terminal
    /// status is never regressed.
    async fn update_task_status(
        &self,
        task_id: TaskId,
        status: TaskStatus,
        error: Option<String>,
        report: Option<PublishReport>,
    ) -> Result<(), StoreError>;

    /// Attach (or clear) the dispatch-backend correlation id.
    async fn set_dispatch_ref(
        &self,
        task_id: TaskId,
        dispatch_ref: Option<String>,
    ) -> Result<(), StoreError>;

    /// Idempotency read: the receipt for (task, platform), if any.
    async fn check_published(
        &self,
        task_id: TaskId,
        platform: Platform,
    ) -> Result<Option<PublishReceipt>, StoreError>;

    /// Idempotent insert: silently a no-op if a receipt already exists for
    /// this (task, platform) pair.
    async fn mark_published(
        &self,
        task_id: TaskId,
        platform: Platform,
        post_id: Option<&str>,
        post_url: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Cancel a task if it is still `scheduled`; refused once `running` or
    /// terminal (a running task cannot be safely interrupted mid-publish).
    async fn cancel_task(&self, task_id: TaskId) -> Result<CancelOutcome, StoreError>;

    /// List tasks, most-recent-created first.
    async fn list_tasks(
        &self,
        status: Option<TaskStatus>,
        limit: usize,
    ) -> Result<Vec<PublishTask>, StoreError>;

    /// Remove content bundles whose every referencing task is terminal and
    /// older than the retention window, together with those tasks and their
    /// receipts. Content referenced by any `scheduled` or `running` task is
    /// never touched, regardless of age.
    async fn cleanup(&self, retention_window: Duration) -> Result<CleanupCounts, StoreError>;
}

#[async_trait]
impl<S> TaskStore for Arc<S>
where
    S: TaskStore + ?Sized,
{
    async fn put_content(
        &self,
        content_id: ContentId,
        bundle: &ContentBundle,
    ) -> Result<(), StoreError> {
        (**self).put_content(content_id, bundle).await
    }

    async fn get_content(
        &self,
        content_id: ContentId,
    ) -> Result<Option<ContentBundle>, StoreError> {
        (**self).get_content(content_id).await
    }

    async fn create_task(&self, task: &PublishTask) -> Result<(), StoreError> {
        (**self).create_task(task).await
    }

    async fn get_task(&self, task_id: TaskId) -> Result<Option<PublishTask>, StoreError> {
        (**self).get_task(task_id).await
    }

    async fn update_task_status(
        &self,
        task_id: TaskId,
        status: TaskStatus,
        error: Option<String>,
        report: Option<PublishReport>,
    ) -> Result<(), StoreError> {
        (**self)
            .update_task_status(task_id, status, error, report)
            .await
    }

    async fn set_dispatch_ref(
        &self,
        task_id: TaskId,
        dispatch_ref: Option<String>,
    ) -> Result<(), StoreError> {
        (**self).set_dispatch_ref(task_id, dispatch_ref).await
    }

    async fn check_published(
        &self,
        task_id: TaskId,
        platform: Platform,
    ) -> Result<Option<PublishReceipt>, StoreError> {
        (**self).check_published(task_id, platform).await
    }

    async fn mark_published(
        &self,
        task_id: TaskId,
        platform: Platform,
        post_id: Option<&str>,
        post_url: Option<&str>,
    ) -> Result<(), StoreError> {
        (**self)
            .mark_published(task_id, platform, post_id, post_url)
            .await
    }

    async fn cancel_task(&self, task_id: TaskId) -> Result<CancelOutcome, StoreError> {
        (**self).cancel_task(task_id).await
    }

    async fn list_tasks(
        &self,
        status: Option<TaskStatus>,
        limit: usize,
    ) -> Result<Vec<PublishTask>, StoreError> {
        (**self).list_tasks(status, limit).await
    }

    async fn cleanup(&self, retention_window: Duration) -> Result<CleanupCounts, StoreError> {
        (**self).cleanup(retention_window).await
    }
}
