//! Task lifecycle states and the transitions between them.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use syndica_core::DomainError;

/// Task execution status.
///
/// Transitions are monotonic: `scheduled → running → {completed | failed |
/// partial_failure}`, with the single side branch `scheduled → cancelled`.
/// Terminal states are sinks; nothing ever leaves them.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Recorded and waiting for its scheduled instant.
    Scheduled,
    /// The executor has picked the task up.
    Running,
    /// Every platform publish succeeded.
    Completed,
    /// No platform publish succeeded.
    Failed,
    /// At least one platform succeeded and at least one failed.
    PartialFailure,
    /// Cancelled while still scheduled.
    Cancelled,
}

impl TaskStatus {
    /// Canonical storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Scheduled => "scheduled",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::PartialFailure => "partial_failure",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed
                | TaskStatus::Failed
                | TaskStatus::PartialFailure
                | TaskStatus::Cancelled
        )
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        match self {
            TaskStatus::Scheduled => {
                matches!(next, TaskStatus::Running | TaskStatus::Cancelled)
            }
            TaskStatus::Running => matches!(
                next,
                TaskStatus::Completed | TaskStatus::Failed | TaskStatus::PartialFailure
            ),
            // Terminal states are sinks.
            TaskStatus::Completed
            | TaskStatus::Failed
            | TaskStatus::PartialFailure
            | TaskStatus::Cancelled => false,
        }
    }
}

impl core::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scheduled" => Ok(TaskStatus::Scheduled),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "partial_failure" => Ok(TaskStatus::PartialFailure),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(DomainError::validation(format!(
                "unknown task status: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const ALL: [TaskStatus; 6] = [
        TaskStatus::Scheduled,
        TaskStatus::Running,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::PartialFailure,
        TaskStatus::Cancelled,
    ];

    #[test]
    fn scheduled_can_run_or_cancel_only() {
        assert!(TaskStatus::Scheduled.can_transition_to(TaskStatus::Running));
        assert!(TaskStatus::Scheduled.can_transition_to(TaskStatus::Cancelled));
        assert!(!TaskStatus::Scheduled.can_transition_to(TaskStatus::Completed));
        assert!(!TaskStatus::Scheduled.can_transition_to(TaskStatus::Failed));
    }

    #[test]
    fn running_resolves_to_terminal_outcomes_only() {
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Completed));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Failed));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::PartialFailure));
        // A running task cannot be cancelled; a publish may be in flight.
        assert!(!TaskStatus::Running.can_transition_to(TaskStatus::Cancelled));
        assert!(!TaskStatus::Running.can_transition_to(TaskStatus::Scheduled));
    }

    #[test]
    fn as_str_roundtrips() {
        for status in ALL {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
    }

    #[test]
    fn serde_matches_storage_representation() {
        for status in ALL {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
    }

    proptest! {
        /// Terminal states are sinks: no transition out of them is ever legal.
        #[test]
        fn terminal_states_admit_no_transitions(from in 0usize..6, to in 0usize..6) {
            let from = ALL[from];
            let to = ALL[to];
            if from.is_terminal() {
                prop_assert!(!from.can_transition_to(to));
            }
        }

        /// Every legal transition either enters `running` or enters a terminal
        /// state; there is no way back to `scheduled`.
        #[test]
        fn no_transition_reenters_scheduled(from in 0usize..6) {
            let from = ALL[from];
            prop_assert!(!from.can_transition_to(TaskStatus::Scheduled));
        }
    }
}
