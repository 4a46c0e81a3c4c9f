//! SQLite-backed task store.
//!
//! Uses plain runtime-bound queries (no compile-time schema coupling) and
//! `CREATE TABLE IF NOT EXISTS` initialization on connect. Receipt
//! idempotency and content write-once are enforced by primary keys, and all
//! status updates are guarded by the previously observed status so
//! concurrent writers on the same row cannot regress the state machine.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::debug;

use syndica_core::{ContentBundle, ContentId, Platform, TaskId};
use syndica_tasks::{CancelOutcome, PublishReport, PublishTask, TaskStatus};

use super::{CleanupCounts, PublishReceipt, StoreError, TaskStore};

/// SQLite implementation of [`TaskStore`].
#[derive(Debug, Clone)]
pub struct SqliteTaskStore {
    pool: SqlitePool,
}

impl SqliteTaskStore {
    /// Connect to a database URL (e.g. `sqlite://tasks.db?mode=rwc`) and
    /// initialize the schema.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePool::connect(url)
            .await
            .map_err(|e| StoreError::Storage(format!("connect {url}: {e}")))?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// An in-memory database, for tests and dry runs.
    ///
    /// Pinned to a single connection: each SQLite `:memory:` connection is
    /// its own database.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| StoreError::Storage(format!("connect :memory:: {e}")))?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// The underlying connection pool (administrative access).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS contents (
                content_id TEXT PRIMARY KEY,
                payload    TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                task_id      TEXT PRIMARY KEY,
                dispatch_ref TEXT,
                content_id   TEXT NOT NULL,
                platforms    TEXT NOT NULL,
                scheduled_at TEXT NOT NULL,
                status       TEXT NOT NULL DEFAULT 'scheduled',
                created_at   TEXT NOT NULL,
                started_at   TEXT,
                finished_at  TEXT,
                error        TEXT,
                report       TEXT
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status)
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS idx_tasks_scheduled_at ON tasks(scheduled_at)
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS receipts (
                task_id      TEXT NOT NULL,
                platform     TEXT NOT NULL,
                post_id      TEXT,
                post_url     TEXT,
                published_at TEXT NOT NULL,
                PRIMARY KEY (task_id, platform)
            )
            "#,
        ];

        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Storage(format!("init schema: {e}")))?;
        }
        debug!("sqlite schema initialized");
        Ok(())
    }
}

fn map_sqlx_error(op: &str, key: &str, e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.message().contains("UNIQUE constraint failed") => {
            StoreError::DuplicateKey(key.to_string())
        }
        _ => StoreError::Storage(format!("{op}: {e}")),
    }
}

fn row_to_task(row: &SqliteRow) -> Result<PublishTask, StoreError> {
    let bad_row = |e: &dyn std::fmt::Display| StoreError::Serialization(format!("task row: {e}"));

    let task_id: String = row.try_get("task_id").map_err(|e| bad_row(&e))?;
    let content_id: String = row.try_get("content_id").map_err(|e| bad_row(&e))?;
    let platforms_json: String = row.try_get("platforms").map_err(|e| bad_row(&e))?;
    let status: String = row.try_get("status").map_err(|e| bad_row(&e))?;
    let report_json: Option<String> = row.try_get("report").map_err(|e| bad_row(&e))?;

    let platforms: Vec<Platform> =
        serde_json::from_str(&platforms_json).map_err(|e| bad_row(&e))?;
    let report = report_json
        .as_deref()
        .map(PublishReport::from_json)
        .transpose()
        .map_err(|e| bad_row(&e))?;

    Ok(PublishTask {
        task_id: task_id.parse().map_err(|e| bad_row(&e))?,
        dispatch_ref: row.try_get("dispatch_ref").map_err(|e| bad_row(&e))?,
        content_id: content_id.parse().map_err(|e| bad_row(&e))?,
        platforms,
        scheduled_at: row.try_get("scheduled_at").map_err(|e| bad_row(&e))?,
        status: status.parse().map_err(|e| bad_row(&e))?,
        created_at: row.try_get("created_at").map_err(|e| bad_row(&e))?,
        started_at: row.try_get("started_at").map_err(|e| bad_row(&e))?,
        finished_at: row.try_get("finished_at").map_err(|e| bad_row(&e))?,
        error: row.try_get("error").map_err(|e| bad_row(&e))?,
        report,
    })
}

fn row_to_receipt(row: &SqliteRow) -> Result<PublishReceipt, StoreError> {
    let bad_row =
        |e: &dyn std::fmt::Display| StoreError::Serialization(format!("receipt row: {e}"));

    let task_id: String = row.try_get("task_id").map_err(|e| bad_row(&e))?;
    let platform: String = row.try_get("platform").map_err(|e| bad_row(&e))?;

    Ok(PublishReceipt {
        task_id: task_id.parse().map_err(|e| bad_row(&e))?,
        platform: platform.parse().map_err(|e| bad_row(&e))?,
        post_id: row.try_get("post_id").map_err(|e| bad_row(&e))?,
        post_url: row.try_get("post_url").map_err(|e| bad_row(&e))?,
        published_at: row.try_get("published_at").map_err(|e| bad_row(&e))?,
    })
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn put_content(
        &self,
        content_id: ContentId,
        bundle: &ContentBundle,
    ) -> Result<(), StoreError> {
        let payload = serde_json::to_string(bundle)
            .map_err(|e| StoreError::Serialization(format!("content payload: {e}")))?;

        sqlx::query("INSERT INTO contents (content_id, payload, created_at) VALUES (?1, ?2, ?3)")
            .bind(content_id.to_string())
            .bind(payload)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("put_content", &format!("content {content_id}"), e))?;
        Ok(())
    }

    async fn get_content(
        &self,
        content_id: ContentId,
    ) -> Result<Option<ContentBundle>, StoreError> {
        let row = sqlx::query("SELECT payload FROM contents WHERE content_id = ?1")
            .bind(content_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("get_content: {e}")))?;

        row.map(|row| {
            let payload: String = row
                .try_get("payload")
                .map_err(|e| StoreError::Serialization(format!("content row: {e}")))?;
            serde_json::from_str(&payload)
                .map_err(|e| StoreError::Serialization(format!("content payload: {e}")))
        })
        .transpose()
    }

    async fn create_task(&self, task: &PublishTask) -> Result<(), StoreError> {
        if task.status != TaskStatus::Scheduled {
            return Err(StoreError::IllegalTransition(format!(
                "new tasks must be scheduled, got {}",
                task.status
            )));
        }

        let content_exists =
            sqlx::query("SELECT 1 FROM contents WHERE content_id = ?1")
                .bind(task.content_id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StoreError::Storage(format!("create_task: {e}")))?;
        if content_exists.is_none() {
            return Err(StoreError::NotFound(format!(
                "content {} for task {}",
                task.content_id, task.task_id
            )));
        }

        let platforms = serde_json::to_string(&task.platforms)
            .map_err(|e| StoreError::Serialization(format!("platforms: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO tasks
                (task_id, dispatch_ref, content_id, platforms, scheduled_at,
                 status, created_at, started_at, finished_at, error, report)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, NULL, NULL, NULL)
            "#,
        )
        .bind(task.task_id.to_string())
        .bind(&task.dispatch_ref)
        .bind(task.content_id.to_string())
        .bind(platforms)
        .bind(task.scheduled_at)
        .bind(task.status.as_str())
        .bind(task.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_task", &format!("task {}", task.task_id), e))?;
        Ok(())
    }

    async fn get_task(&self, task_id: TaskId) -> Result<Option<PublishTask>, StoreError> {
        let row = sqlx::query("SELECT * FROM tasks WHERE task_id = ?1")
            .bind(task_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("get_task: {e}")))?;

        row.as_ref().map(row_to_task).transpose()
    }

    async fn update_task_status(
        &self,
        task_id: TaskId,
        status: TaskStatus,
        error: Option<String>,
        report: Option<PublishReport>,
    ) -> Result<(), StoreError> {
        let current = sqlx::query("SELECT status FROM tasks WHERE task_id = ?1")
            .bind(task_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("update_task_status: {e}")))?
            .ok_or_else(|| StoreError::NotFound(format!("task {task_id}")))?;
        let current: TaskStatus = current
            .try_get::<String, _>("status")
            .map_err(|e| StoreError::Serialization(format!("task row: {e}")))?
            .parse()
            .map_err(|e| StoreError::Serialization(format!("task row: {e}")))?;

        if !current.can_transition_to(status) {
            return Err(StoreError::IllegalTransition(format!(
                "{current} -> {status} for task {task_id}"
            )));
        }

        let now = Utc::now();
        let started_at = (status == TaskStatus::Running).then_some(now);
        let finished_at = status.is_terminal().then_some(now);
        let report_json = report
            .map(|r| r.to_json())
            .transpose()
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        // Guarded by the observed status: a concurrent transition makes this
        // a no-op rather than a regression.
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = ?2,
                error = ?3,
                report = COALESCE(?4, report),
                started_at = COALESCE(?5, started_at),
                finished_at = COALESCE(?6, finished_at)
            WHERE task_id = ?1 AND status = ?7
            "#,
        )
        .bind(task_id.to_string())
        .bind(status.as_str())
        .bind(&error)
        .bind(&report_json)
        .bind(started_at)
        .bind(finished_at)
        .bind(current.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("update_task_status: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::IllegalTransition(format!(
                "concurrent status change for task {task_id}"
            )));
        }
        Ok(())
    }

    async fn set_dispatch_ref(
        &self,
        task_id: TaskId,
        dispatch_ref: Option<String>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE tasks SET dispatch_ref = ?2 WHERE task_id = ?1")
            .bind(task_id.to_string())
            .bind(&dispatch_ref)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("set_dispatch_ref: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("task {task_id}")));
        }
        Ok(())
    }

    async fn check_published(
        &self,
        task_id: TaskId,
        platform: Platform,
    ) -> Result<Option<PublishReceipt>, StoreError> {
        let row =
            sqlx::query("SELECT * FROM receipts WHERE task_id = ?1 AND platform = ?2")
                .bind(task_id.to_string())
                .bind(platform.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StoreError::Storage(format!("check_published: {e}")))?;

        row.as_ref().map(row_to_receipt).transpose()
    }

    async fn mark_published(
        &self,
        task_id: TaskId,
        platform: Platform,
        post_id: Option<&str>,
        post_url: Option<&str>,
    ) -> Result<(), StoreError> {
        // The primary key makes this an idempotent no-op on conflict.
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO receipts (task_id, platform, post_id, post_url, published_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(task_id.to_string())
        .bind(platform.as_str())
        .bind(post_id)
        .bind(post_url)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("mark_published: {e}")))?;
        Ok(())
    }

    async fn cancel_task(&self, task_id: TaskId) -> Result<CancelOutcome, StoreError> {
        let row = sqlx::query("SELECT status FROM tasks WHERE task_id = ?1")
            .bind(task_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("cancel_task: {e}")))?;

        let Some(row) = row else {
            return Ok(CancelOutcome::NotFound);
        };
        let status: TaskStatus = row
            .try_get::<String, _>("status")
            .map_err(|e| StoreError::Serialization(format!("task row: {e}")))?
            .parse()
            .map_err(|e| StoreError::Serialization(format!("task row: {e}")))?;

        if status != TaskStatus::Scheduled {
            return Ok(CancelOutcome::AlreadyExecuted);
        }

        // The status guard settles the race against a concurrent pickup.
        let result = sqlx::query(
            r#"
            UPDATE tasks SET status = 'cancelled', finished_at = ?2
            WHERE task_id = ?1 AND status = 'scheduled'
            "#,
        )
        .bind(task_id.to_string())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("cancel_task: {e}")))?;

        if result.rows_affected() == 0 {
            return Ok(CancelOutcome::AlreadyExecuted);
        }
        Ok(CancelOutcome::Cancelled)
    }

    async fn list_tasks(
        &self,
        status: Option<TaskStatus>,
        limit: usize,
    ) -> Result<Vec<PublishTask>, StoreError> {
        let rows = match status {
            Some(status) => {
                sqlx::query(
                    r#"
                    SELECT * FROM tasks WHERE status = ?1
                    ORDER BY created_at DESC, task_id DESC LIMIT ?2
                    "#,
                )
                .bind(status.as_str())
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    "SELECT * FROM tasks ORDER BY created_at DESC, task_id DESC LIMIT ?1",
                )
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(|e| StoreError::Storage(format!("list_tasks: {e}")))?;

        rows.iter().map(row_to_task).collect()
    }

    async fn cleanup(&self, retention_window: Duration) -> Result<CleanupCounts, StoreError> {
        let cutoff = Utc::now() - retention_window;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Storage(format!("cleanup: {e}")))?;

        // Content is reclaimable only when no referencing task is still
        // pending (scheduled/running) or younger than the cutoff.
        let deletable = sqlx::query(
            r#"
            SELECT c.content_id FROM contents c
            WHERE c.created_at < ?1
              AND NOT EXISTS (
                SELECT 1 FROM tasks t
                WHERE t.content_id = c.content_id
                  AND (t.status IN ('scheduled', 'running') OR t.created_at >= ?1)
              )
            "#,
        )
        .bind(cutoff)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| StoreError::Storage(format!("cleanup: {e}")))?;

        let mut counts = CleanupCounts::default();
        for row in &deletable {
            let content_id: String = row
                .try_get("content_id")
                .map_err(|e| StoreError::Serialization(format!("content row: {e}")))?;

            let receipts = sqlx::query(
                r#"
                DELETE FROM receipts WHERE task_id IN
                    (SELECT task_id FROM tasks WHERE content_id = ?1)
                "#,
            )
            .bind(&content_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Storage(format!("cleanup receipts: {e}")))?;
            counts.receipts += receipts.rows_affected();

            let tasks = sqlx::query("DELETE FROM tasks WHERE content_id = ?1")
                .bind(&content_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::Storage(format!("cleanup tasks: {e}")))?;
            counts.tasks += tasks.rows_affected();

            let contents = sqlx::query("DELETE FROM contents WHERE content_id = ?1")
                .bind(&content_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::Storage(format!("cleanup contents: {e}")))?;
            counts.contents += contents.rows_affected();
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::Storage(format!("cleanup: {e}")))?;
        Ok(counts)
    }
}
