//! In-memory task store for tests and development.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use syndica_core::{ContentBundle, ContentId, Platform, TaskId};
use syndica_tasks::{CancelOutcome, PublishReport, PublishTask, TaskStatus};

use super::{CleanupCounts, PublishReceipt, StoreError, TaskStore};

#[derive(Debug, Default)]
struct State {
    contents: HashMap<ContentId, (ContentBundle, DateTime<Utc>)>,
    tasks: HashMap<TaskId, PublishTask>,
    receipts: HashMap<(TaskId, Platform), PublishReceipt>,
}

/// In-memory implementation of [`TaskStore`].
///
/// One lock guards all three tables so cross-table operations (cleanup)
/// stay atomic; no lock is ever held across an await point.
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    state: RwLock<State>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn put_content(
        &self,
        content_id: ContentId,
        bundle: &ContentBundle,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().unwrap();
        if state.contents.contains_key(&content_id) {
            return Err(StoreError::DuplicateKey(format!("content {content_id}")));
        }
        state
            .contents
            .insert(content_id, (bundle.clone(), Utc::now()));
        Ok(())
    }

    async fn get_content(
        &self,
        content_id: ContentId,
    ) -> Result<Option<ContentBundle>, StoreError> {
        let state = self.state.read().unwrap();
        Ok(state.contents.get(&content_id).map(|(b, _)| b.clone()))
    }

    async fn create_task(&self, task: &PublishTask) -> Result<(), StoreError> {
        let mut state = self.state.write().unwrap();
        if task.status != TaskStatus::Scheduled {
            return Err(StoreError::IllegalTransition(format!(
                "new tasks must be scheduled, got {}",
                task.status
            )));
        }
        if !state.contents.contains_key(&task.content_id) {
            return Err(StoreError::NotFound(format!(
                "content {} for task {}",
                task.content_id, task.task_id
            )));
        }
        if state.tasks.contains_key(&task.task_id) {
            return Err(StoreError::DuplicateKey(format!("task {}", task.task_id)));
        }
        state.tasks.insert(task.task_id, task.clone());
        Ok(())
    }

    async fn get_task(&self, task_id: TaskId) -> Result<Option<PublishTask>, StoreError> {
        let state = self.state.read().unwrap();
        Ok(state.tasks.get(&task_id).cloned())
    }

    async fn update_task_status(
        &self,
        task_id: TaskId,
        status: TaskStatus,
        error: Option<String>,
        report: Option<PublishReport>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().unwrap();
        let task = state
            .tasks
            .get_mut(&task_id)
            .ok_or_else(|| StoreError::NotFound(format!("task {task_id}")))?;

        if status == TaskStatus::Running {
            task.mark_running()
                .map_err(|e| StoreError::IllegalTransition(e.to_string()))?;
            task.error = error;
        } else {
            // A terminal update without a fresh report keeps the stored one.
            let report = report.or_else(|| task.report.take());
            task.finish(status, report, error)
                .map_err(|e| StoreError::IllegalTransition(e.to_string()))?;
        }
        Ok(())
    }

    async fn set_dispatch_ref(
        &self,
        task_id: TaskId,
        dispatch_ref: Option<String>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().unwrap();
        let task = state
            .tasks
            .get_mut(&task_id)
            .ok_or_else(|| StoreError::NotFound(format!("task {task_id}")))?;
        task.dispatch_ref = dispatch_ref;
        Ok(())
    }

    async fn check_published(
        &self,
        task_id: TaskId,
        platform: Platform,
    ) -> Result<Option<PublishReceipt>, StoreError> {
        let state = self.state.read().unwrap();
        Ok(state.receipts.get(&(task_id, platform)).cloned())
    }

    async fn mark_published(
        &self,
        task_id: TaskId,
        platform: Platform,
        post_id: Option<&str>,
        post_url: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().unwrap();
        // Idempotent: the first receipt wins, later inserts are no-ops.
        state
            .receipts
            .entry((task_id, platform))
            .or_insert_with(|| PublishReceipt {
                task_id,
                platform,
                post_id: post_id.map(str::to_string),
                post_url: post_url.map(str::to_string),
                published_at: Utc::now(),
            });
        Ok(())
    }

    async fn cancel_task(&self, task_id: TaskId) -> Result<CancelOutcome, StoreError> {
        let mut state = self.state.write().unwrap();
        let Some(task) = state.tasks.get_mut(&task_id) else {
            return Ok(CancelOutcome::NotFound);
        };

        if !task.is_cancellable() {
            return Ok(CancelOutcome::AlreadyExecuted);
        }

        task.transition_to(TaskStatus::Cancelled)
            .map_err(|e| StoreError::IllegalTransition(e.to_string()))?;
        Ok(CancelOutcome::Cancelled)
    }

    async fn list_tasks(
        &self,
        status: Option<TaskStatus>,
        limit: usize,
    ) -> Result<Vec<PublishTask>, StoreError> {
        let state = self.state.read().unwrap();
        let mut tasks: Vec<PublishTask> = state
            .tasks
            .values()
            .filter(|t| status.is_none_or(|s| t.status == s))
            .cloned()
            .collect();

        // Most recent first; task id (time-ordered) breaks created_at ties.
        tasks.sort_by(|a, b| {
            (b.created_at, b.task_id.as_uuid()).cmp(&(a.created_at, a.task_id.as_uuid()))
        });
        tasks.truncate(limit);
        Ok(tasks)
    }

    async fn cleanup(&self, retention_window: Duration) -> Result<CleanupCounts, StoreError> {
        let cutoff = Utc::now() - retention_window;
        let mut state = self.state.write().unwrap();
        let mut counts = CleanupCounts::default();

        let mut deletable: Vec<ContentId> = Vec::new();
        for (content_id, (_, created_at)) in state.contents.iter() {
            let refs: Vec<&PublishTask> = state
                .tasks
                .values()
                .filter(|t| t.content_id == *content_id)
                .collect();
            let eligible = if refs.is_empty() {
                // Orphaned content (task creation never happened).
                *created_at < cutoff
            } else {
                refs.iter()
                    .all(|t| t.status.is_terminal() && t.created_at < cutoff)
            };
            if eligible {
                deletable.push(*content_id);
            }
        }

        for content_id in deletable {
            let task_ids: Vec<TaskId> = state
                .tasks
                .values()
                .filter(|t| t.content_id == content_id)
                .map(|t| t.task_id)
                .collect();

            for task_id in &task_ids {
                let before = state.receipts.len();
                state.receipts.retain(|(tid, _), _| tid != task_id);
                counts.receipts += (before - state.receipts.len()) as u64;
                state.tasks.remove(task_id);
                counts.tasks += 1;
            }

            state.contents.remove(&content_id);
            counts.contents += 1;
        }

        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syndica_core::PlatformContent;

    fn bundle() -> ContentBundle {
        ContentBundle::new().insert(Platform::Reddit, PlatformContent::new("hello"))
    }

    async fn seeded(store: &InMemoryTaskStore) -> PublishTask {
        let content_id = ContentId::new();
        store.put_content(content_id, &bundle()).await.unwrap();
        let task = PublishTask::new(content_id, vec![Platform::Reddit], Utc::now()).unwrap();
        store.create_task(&task).await.unwrap();
        task
    }

    #[tokio::test]
    async fn content_is_write_once() {
        let store = InMemoryTaskStore::new();
        let content_id = ContentId::new();
        store.put_content(content_id, &bundle()).await.unwrap();

        let second = ContentBundle::new().insert(Platform::X, PlatformContent::new("other"));
        let err = store.put_content(content_id, &second).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey(_)));

        // Original payload untouched.
        let stored = store.get_content(content_id).await.unwrap().unwrap();
        assert_eq!(stored, bundle());
    }

    #[tokio::test]
    async fn create_task_requires_stored_content() {
        let store = InMemoryTaskStore::new();
        let task =
            PublishTask::new(ContentId::new(), vec![Platform::Reddit], Utc::now()).unwrap();
        let err = store.create_task(&task).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn duplicate_task_id_is_rejected() {
        let store = InMemoryTaskStore::new();
        let task = seeded(&store).await;
        let err = store.create_task(&task).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey(_)));
    }

    #[tokio::test]
    async fn status_update_stamps_timestamps() {
        let store = InMemoryTaskStore::new();
        let task = seeded(&store).await;

        store
            .update_task_status(task.task_id, TaskStatus::Running, None, None)
            .await
            .unwrap();
        let running = store.get_task(task.task_id).await.unwrap().unwrap();
        assert!(running.started_at.is_some());
        assert!(running.finished_at.is_none());

        store
            .update_task_status(task.task_id, TaskStatus::Completed, None, None)
            .await
            .unwrap();
        let done = store.get_task(task.task_id).await.unwrap().unwrap();
        assert!(done.finished_at.is_some());
    }

    #[tokio::test]
    async fn terminal_status_is_never_regressed() {
        let store = InMemoryTaskStore::new();
        let task = seeded(&store).await;

        store
            .update_task_status(task.task_id, TaskStatus::Running, None, None)
            .await
            .unwrap();
        store
            .update_task_status(task.task_id, TaskStatus::Failed, None, None)
            .await
            .unwrap();

        let err = store
            .update_task_status(task.task_id, TaskStatus::Running, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::IllegalTransition(_)));
    }

    #[tokio::test]
    async fn receipts_are_idempotent() {
        let store = InMemoryTaskStore::new();
        let task = seeded(&store).await;

        store
            .mark_published(task.task_id, Platform::Reddit, Some("t3_a"), None)
            .await
            .unwrap();
        // Second insert is a silent no-op; the first receipt wins.
        store
            .mark_published(task.task_id, Platform::Reddit, Some("t3_b"), None)
            .await
            .unwrap();

        let receipt = store
            .check_published(task.task_id, Platform::Reddit)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(receipt.post_id.as_deref(), Some("t3_a"));
    }

    #[tokio::test]
    async fn cancel_only_while_scheduled() {
        let store = InMemoryTaskStore::new();
        let task = seeded(&store).await;

        assert_eq!(
            store.cancel_task(task.task_id).await.unwrap(),
            CancelOutcome::Cancelled
        );
        // Cancelling again: the task is already terminal.
        assert_eq!(
            store.cancel_task(task.task_id).await.unwrap(),
            CancelOutcome::AlreadyExecuted
        );

        let running = seeded(&store).await;
        store
            .update_task_status(running.task_id, TaskStatus::Running, None, None)
            .await
            .unwrap();
        assert_eq!(
            store.cancel_task(running.task_id).await.unwrap(),
            CancelOutcome::AlreadyExecuted
        );

        assert_eq!(
            store.cancel_task(TaskId::new()).await.unwrap(),
            CancelOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn list_returns_most_recent_first() {
        let store = InMemoryTaskStore::new();
        let first = seeded(&store).await;
        let second = seeded(&store).await;

        let tasks = store.list_tasks(None, 10).await.unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].task_id, second.task_id);
        assert_eq!(tasks[1].task_id, first.task_id);

        let scheduled = store
            .list_tasks(Some(TaskStatus::Scheduled), 1)
            .await
            .unwrap();
        assert_eq!(scheduled.len(), 1);
    }

    #[tokio::test]
    async fn cleanup_never_touches_scheduled_tasks() {
        let store = InMemoryTaskStore::new();
        let task = seeded(&store).await;

        // A zero-width window makes every row "old enough".
        let counts = store.cleanup(Duration::zero()).await.unwrap();
        assert_eq!(counts, CleanupCounts::default());
        assert!(store.get_task(task.task_id).await.unwrap().is_some());
        assert!(store.get_content(task.content_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn cleanup_reclaims_terminal_rows_past_the_window() {
        let store = InMemoryTaskStore::new();
        let task = seeded(&store).await;

        store
            .update_task_status(task.task_id, TaskStatus::Running, None, None)
            .await
            .unwrap();
        store
            .mark_published(task.task_id, Platform::Reddit, Some("t3_x"), None)
            .await
            .unwrap();
        store
            .update_task_status(task.task_id, TaskStatus::Completed, None, None)
            .await
            .unwrap();

        // Within the window: kept.
        let counts = store.cleanup(Duration::days(7)).await.unwrap();
        assert_eq!(counts.total(), 0);

        // Past the window: content, task and receipt all reclaimed.
        let counts = store.cleanup(Duration::zero()).await.unwrap();
        assert_eq!(counts.contents, 1);
        assert_eq!(counts.tasks, 1);
        assert_eq!(counts.receipts, 1);
        assert!(store.get_task(task.task_id).await.unwrap().is_none());
        assert!(store.get_content(task.content_id).await.unwrap().is_none());
        assert!(store
            .check_published(task.task_id, Platform::Reddit)
            .await
            .unwrap()
            .is_none());
    }
}
