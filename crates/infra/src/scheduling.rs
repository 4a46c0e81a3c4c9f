//! High-level scheduling service: the administrative surface over the store
//! and the dispatch backend.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::{info, warn};

use syndica_core::{ContentBundle, ContentId, DomainError, Platform, TaskId};
use syndica_tasks::{CancelOutcome, PublishTask, TaskStatus};

use crate::dispatcher::DispatchBackend;
use crate::store::{CleanupCounts, StoreError, TaskStore};

/// Scheduling failure.
#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Wires the store and the (optional) dispatch backend together.
///
/// The task row is durably recorded *before* the backend is consulted:
/// scheduling is never lost solely because the dispatch backend is down. A
/// task without a `dispatch_ref` simply waits for a manual trigger or the
/// next worker restart.
pub struct Scheduling<S> {
    store: S,
    backend: Option<Arc<dyn DispatchBackend>>,
}

impl<S: TaskStore> Scheduling<S> {
    pub fn new(store: S, backend: Option<Arc<dyn DispatchBackend>>) -> Self {
        Self { store, backend }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Store a content bundle and schedule its multi-platform publish.
    pub async fn schedule(
        &self,
        bundle: ContentBundle,
        platforms: Vec<Platform>,
        scheduled_at: DateTime<Utc>,
    ) -> Result<PublishTask, ScheduleError> {
        bundle.ensure_non_empty()?;

        let content_id = ContentId::new();
        self.store.put_content(content_id, &bundle).await?;

        let mut task = PublishTask::new(content_id, platforms, scheduled_at)?;
        self.store.create_task(&task).await?;

        info!(
            task_id = %task.task_id,
            content_id = %content_id,
            platforms = task.platforms.len(),
            scheduled_at = %scheduled_at,
            "task recorded"
        );

        match &self.backend {
            Some(backend) => match backend.schedule(task.task_id, scheduled_at).await {
                Ok(dispatch_ref) => {
                    self.store
                        .set_dispatch_ref(task.task_id, Some(dispatch_ref.clone()))
                        .await?;
                    task = task.with_dispatch_ref(dispatch_ref);
                }
                Err(e) => {
                    warn!(
                        task_id = %task.task_id,
                        error = %e,
                        "dispatch backend unavailable; task stays scheduled for a manual trigger"
                    );
                }
            },
            None => {
                warn!(
                    task_id = %task.task_id,
                    "no dispatch backend configured; task awaits a manual trigger"
                );
            }
        }

        Ok(task)
    }

    pub async fn cancel(&self, task_id: TaskId) -> Result<CancelOutcome, StoreError> {
        let outcome = self.store.cancel_task(task_id).await?;
        info!(task_id = %task_id, outcome = %outcome, "cancellation requested");
        Ok(outcome)
    }

    pub async fn list(
        &self,
        status: Option<TaskStatus>,
        limit: usize,
    ) -> Result<Vec<PublishTask>, StoreError> {
        self.store.list_tasks(status, limit).await
    }

    pub async fn cleanup(&self, retention_window: Duration) -> Result<CleanupCounts, StoreError> {
        let counts = self.store.cleanup(retention_window).await?;
        info!(
            contents = counts.contents,
            tasks = counts.tasks,
            receipts = counts.receipts,
            "cleanup finished"
        );
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryTaskStore;

    use async_trait::async_trait;
    use syndica_core::PlatformContent;

    use crate::dispatcher::DispatchError;

    /// Backend that always succeeds with a fixed correlation id.
    struct FixedBackend;

    #[async_trait]
    impl DispatchBackend for FixedBackend {
        async fn schedule(
            &self,
            _task_id: TaskId,
            _scheduled_at: DateTime<Utc>,
        ) -> Result<String, DispatchError> {
            Ok("backend-ref-1".to_string())
        }
    }

    /// Backend that is always down.
    struct DownBackend;

    #[async_trait]
    impl DispatchBackend for DownBackend {
        async fn schedule(
            &self,
            _task_id: TaskId,
            _scheduled_at: DateTime<Utc>,
        ) -> Result<String, DispatchError> {
            Err(DispatchError::Unavailable("connection refused".to_string()))
        }
    }

    fn bundle() -> ContentBundle {
        ContentBundle::new().insert(Platform::Reddit, PlatformContent::new("hello"))
    }

    #[tokio::test]
    async fn schedule_records_content_task_and_dispatch_ref() {
        let store = Arc::new(InMemoryTaskStore::new());
        let backend: Arc<dyn DispatchBackend> = Arc::new(FixedBackend);
        let service = Scheduling::new(store.clone(), Some(backend));

        let task = service
            .schedule(bundle(), vec![Platform::Reddit], Utc::now())
            .await
            .unwrap();

        assert_eq!(task.dispatch_ref.as_deref(), Some("backend-ref-1"));
        let stored = store.get_task(task.task_id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Scheduled);
        assert_eq!(stored.dispatch_ref.as_deref(), Some("backend-ref-1"));
        assert!(store.get_content(task.content_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn backend_outage_still_records_the_task() {
        let store = Arc::new(InMemoryTaskStore::new());
        let backend: Arc<dyn DispatchBackend> = Arc::new(DownBackend);
        let service = Scheduling::new(store.clone(), Some(backend));

        let task = service
            .schedule(bundle(), vec![Platform::Reddit], Utc::now())
            .await
            .unwrap();

        // Durably scheduled, no correlation id.
        assert!(task.dispatch_ref.is_none());
        let stored = store.get_task(task.task_id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Scheduled);
        assert!(stored.dispatch_ref.is_none());
    }

    #[tokio::test]
    async fn no_backend_still_records_the_task() {
        let store = Arc::new(InMemoryTaskStore::new());
        let service = Scheduling::new(store.clone(), None);

        let task = service
            .schedule(bundle(), vec![Platform::Reddit], Utc::now())
            .await
            .unwrap();
        assert!(task.dispatch_ref.is_none());
        assert!(store.get_task(task.task_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn empty_bundle_is_rejected_before_any_write() {
        let store = Arc::new(InMemoryTaskStore::new());
        let service = Scheduling::new(store.clone(), None);

        let err = service
            .schedule(ContentBundle::new(), vec![Platform::Reddit], Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, ScheduleError::Domain(_)));
        assert!(store.list_tasks(None, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_platform_list_is_rejected() {
        let store = Arc::new(InMemoryTaskStore::new());
        let service = Scheduling::new(store, None);

        let err = service
            .schedule(bundle(), vec![], Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, ScheduleError::Domain(_)));
    }
}
