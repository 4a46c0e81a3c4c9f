//! Periodic retention sweeper.
//!
//! Runs the store's cleanup on an interval. The safety invariant lives in
//! the store itself (content referenced by a pending task is never
//! deleted); the sweeper only decides *when* to sweep.

use std::time::Duration as StdDuration;

use chrono::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::store::TaskStore;

/// Sweeper configuration.
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// Name used in logs.
    pub name: String,
    /// How often to sweep.
    pub interval: StdDuration,
    /// Rows referenced only by terminal tasks older than this are removed.
    pub retention_window: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            name: "sweeper".to_string(),
            interval: StdDuration::from_secs(3600),
            retention_window: Duration::days(7),
        }
    }
}

impl SweeperConfig {
    pub fn with_interval(mut self, interval: StdDuration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_retention_window(mut self, window: Duration) -> Self {
        self.retention_window = window;
        self
    }
}

/// Handle to control a running sweeper.
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl SweeperHandle {
    /// Request graceful shutdown and wait for the loop to stop.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.join.await;
    }
}

/// Background retention sweeper.
pub struct Sweeper;

impl Sweeper {
    /// Spawn the sweep loop on the tokio runtime.
    pub fn spawn<S: TaskStore + 'static>(store: S, config: SweeperConfig) -> SweeperHandle {
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let join = tokio::spawn(async move {
            info!(
                sweeper = %config.name,
                interval_secs = config.interval.as_secs(),
                retention_days = config.retention_window.num_days(),
                "retention sweeper started"
            );

            loop {
                tokio::select! {
                    () = tokio::time::sleep(config.interval) => {
                        match store.cleanup(config.retention_window).await {
                            Ok(counts) if counts.total() > 0 => info!(
                                sweeper = %config.name,
                                contents = counts.contents,
                                tasks = counts.tasks,
                                receipts = counts.receipts,
                                "retention sweep reclaimed rows"
                            ),
                            // Deleting nothing is a normal outcome.
                            Ok(_) => debug!(sweeper = %config.name, "nothing to sweep"),
                            Err(e) => error!(sweeper = %config.name, error = %e, "retention sweep failed"),
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }

            info!(sweeper = %config.name, "retention sweeper stopped");
        });

        SweeperHandle { shutdown, join }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryTaskStore;
    use std::sync::Arc;

    use chrono::Utc;
    use syndica_core::{ContentBundle, ContentId, Platform, PlatformContent};
    use syndica_tasks::{PublishTask, TaskStatus};

    #[tokio::test]
    async fn sweeper_reclaims_terminal_rows_on_its_interval() {
        let store = Arc::new(InMemoryTaskStore::new());

        let content_id = ContentId::new();
        let bundle =
            ContentBundle::new().insert(Platform::Reddit, PlatformContent::new("x"));
        store.put_content(content_id, &bundle).await.unwrap();
        let task =
            PublishTask::new(content_id, vec![Platform::Reddit], Utc::now()).unwrap();
        store.create_task(&task).await.unwrap();
        store
            .update_task_status(task.task_id, TaskStatus::Running, None, None)
            .await
            .unwrap();
        store
            .update_task_status(task.task_id, TaskStatus::Completed, None, None)
            .await
            .unwrap();

        let config = SweeperConfig::default()
            .with_interval(StdDuration::from_millis(20))
            .with_retention_window(Duration::zero());
        let handle = Sweeper::spawn(store.clone(), config);

        tokio::time::sleep(StdDuration::from_millis(100)).await;
        handle.shutdown().await;

        assert!(store.get_task(task.task_id).await.unwrap().is_none());
        assert!(store.get_content(content_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sweeper_leaves_scheduled_tasks_alone() {
        let store = Arc::new(InMemoryTaskStore::new());

        let content_id = ContentId::new();
        let bundle =
            ContentBundle::new().insert(Platform::Reddit, PlatformContent::new("x"));
        store.put_content(content_id, &bundle).await.unwrap();
        let task =
            PublishTask::new(content_id, vec![Platform::Reddit], Utc::now()).unwrap();
        store.create_task(&task).await.unwrap();

        let config = SweeperConfig::default()
            .with_interval(StdDuration::from_millis(20))
            .with_retention_window(Duration::zero());
        let handle = Sweeper::spawn(store.clone(), config);

        tokio::time::sleep(StdDuration::from_millis(100)).await;
        handle.shutdown().await;

        assert!(store.get_task(task.task_id).await.unwrap().is_some());
        assert!(store.get_content(content_id).await.unwrap().is_some());
    }
}
