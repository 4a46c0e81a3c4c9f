//! The scheduled publish task record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use syndica_core::{ContentId, DomainError, Platform, TaskId};

use crate::outcome::PublishReport;
use crate::status::TaskStatus;

/// One scheduled multi-platform publish request.
///
/// The record is durably stored; the store is the single source of truth for
/// its status. All mutation goes through the transition helpers below so the
/// status machine stays monotonic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishTask {
    pub task_id: TaskId,

    /// Correlation id assigned by the deferred-execution backend; `None`
    /// when the backend was unavailable at schedule time.
    pub dispatch_ref: Option<String>,

    pub content_id: ContentId,

    /// Target platforms, ordered, fixed at creation, never empty.
    pub platforms: Vec<Platform>,

    pub scheduled_at: DateTime<Utc>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,

    pub error: Option<String>,

    /// Structured per-platform outcomes once the task reaches a terminal
    /// publish status.
    pub report: Option<PublishReport>,
}

impl PublishTask {
    /// Create a new task in `scheduled` state.
    pub fn new(
        content_id: ContentId,
        platforms: Vec<Platform>,
        scheduled_at: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        if platforms.is_empty() {
            return Err(DomainError::validation("platforms must not be empty"));
        }

        Ok(Self {
            task_id: TaskId::new(),
            dispatch_ref: None,
            content_id,
            platforms,
            scheduled_at,
            status: TaskStatus::Scheduled,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
            report: None,
        })
    }

    pub fn with_dispatch_ref(mut self, dispatch_ref: impl Into<String>) -> Self {
        self.dispatch_ref = Some(dispatch_ref.into());
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether a cancellation request would be honoured right now.
    pub fn is_cancellable(&self) -> bool {
        self.status == TaskStatus::Scheduled
    }

    /// Validated transition to any status, stamping `started_at` on entering
    /// `running` and `finished_at` on entering a terminal status.
    pub fn transition_to(&mut self, next: TaskStatus) -> Result<(), DomainError> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::invariant(format!(
                "illegal status transition: {} -> {}",
                self.status, next
            )));
        }

        self.status = next;
        let now = Utc::now();
        if next == TaskStatus::Running {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.finished_at = Some(now);
        }
        Ok(())
    }

    /// Mark the task picked up by the executor.
    pub fn mark_running(&mut self) -> Result<(), DomainError> {
        self.transition_to(TaskStatus::Running)
    }

    /// Resolve the task to a terminal publish status with its report.
    pub fn finish(
        &mut self,
        status: TaskStatus,
        report: Option<PublishReport>,
        error: Option<String>,
    ) -> Result<(), DomainError> {
        if !status.is_terminal() {
            return Err(DomainError::invariant(format!(
                "finish requires a terminal status, got {status}"
            )));
        }
        self.transition_to(status)?;
        self.report = report;
        self.error = error;
        Ok(())
    }
}

/// Result of a cancellation request.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    /// The task was still scheduled and is now cancelled.
    Cancelled,
    /// The task already started or finished; cancellation was refused.
    AlreadyExecuted,
    /// No task with that id exists.
    NotFound,
}

impl core::fmt::Display for CancelOutcome {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            CancelOutcome::Cancelled => "cancelled",
            CancelOutcome::AlreadyExecuted => "already_executed",
            CancelOutcome::NotFound => "not_found",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::PlatformOutcome;

    fn test_task(platforms: Vec<Platform>) -> PublishTask {
        PublishTask::new(ContentId::new(), platforms, Utc::now()).unwrap()
    }

    #[test]
    fn new_task_starts_scheduled() {
        let task = test_task(vec![Platform::Reddit, Platform::X]);
        assert_eq!(task.status, TaskStatus::Scheduled);
        assert!(task.started_at.is_none());
        assert!(task.finished_at.is_none());
        assert!(task.dispatch_ref.is_none());
    }

    #[test]
    fn empty_platform_list_is_rejected() {
        let err = PublishTask::new(ContentId::new(), vec![], Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn running_stamps_started_at() {
        let mut task = test_task(vec![Platform::Reddit]);
        task.mark_running().unwrap();
        assert_eq!(task.status, TaskStatus::Running);
        assert!(task.started_at.is_some());
        assert!(task.finished_at.is_none());
    }

    #[test]
    fn finish_stamps_finished_at_and_stores_report() {
        let mut task = test_task(vec![Platform::Reddit]);
        task.mark_running().unwrap();

        let report: PublishReport =
            [PlatformOutcome::success(Platform::Reddit, None, None)]
                .into_iter()
                .collect();
        task.finish(TaskStatus::Completed, Some(report.clone()), None)
            .unwrap();

        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.finished_at.is_some());
        assert_eq!(task.report, Some(report));
    }

    #[test]
    fn finish_rejects_non_terminal_status() {
        let mut task = test_task(vec![Platform::Reddit]);
        task.mark_running().unwrap();
        let err = task.finish(TaskStatus::Running, None, None).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn terminal_task_refuses_further_transitions() {
        let mut task = test_task(vec![Platform::Reddit]);
        task.transition_to(TaskStatus::Cancelled).unwrap();

        let err = task.mark_running().unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
        assert_eq!(task.status, TaskStatus::Cancelled);
    }

    #[test]
    fn cancellable_only_while_scheduled() {
        let mut task = test_task(vec![Platform::Reddit]);
        assert!(task.is_cancellable());
        task.mark_running().unwrap();
        assert!(!task.is_cancellable());
    }
}
