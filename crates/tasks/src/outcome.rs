//! Per-platform publish outcomes and task-level aggregation.

use serde::{Deserialize, Serialize};

use syndica_core::{DomainError, Platform};

use crate::status::TaskStatus;

/// The recorded result of one platform attempt within a task execution.
///
/// Every platform in the task yields exactly one outcome per execution;
/// nothing is silently discarded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformOutcome {
    pub platform: Platform,
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// The platform was already receipted by a previous delivery and the
    /// publisher was not invoked again.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub skipped: bool,

    /// Success means "formatted for human action", not an API call.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub manual: bool,
}

impl PlatformOutcome {
    pub fn success(
        platform: Platform,
        post_id: Option<String>,
        post_url: Option<String>,
    ) -> Self {
        Self {
            platform,
            success: true,
            post_id,
            post_url,
            error: None,
            skipped: false,
            manual: false,
        }
    }

    /// A success recorded on a previous delivery, replayed from its receipt.
    pub fn skipped(
        platform: Platform,
        post_id: Option<String>,
        post_url: Option<String>,
    ) -> Self {
        Self {
            skipped: true,
            ..Self::success(platform, post_id, post_url)
        }
    }

    pub fn manual(platform: Platform) -> Self {
        Self {
            manual: true,
            ..Self::success(platform, None, None)
        }
    }

    pub fn failure(platform: Platform, error: impl Into<String>) -> Self {
        Self {
            platform,
            success: false,
            post_id: None,
            post_url: None,
            error: Some(error.into()),
            skipped: false,
            manual: false,
        }
    }
}

/// Ordered per-platform outcomes for one task execution.
///
/// Structured at the type level; serialized to JSON only at the storage
/// boundary via [`PublishReport::to_json`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PublishReport {
    outcomes: Vec<PlatformOutcome>,
}

impl PublishReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, outcome: PlatformOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn outcomes(&self) -> &[PlatformOutcome] {
        &self.outcomes
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.success).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    /// Aggregate the per-platform outcomes into a terminal task status.
    ///
    /// All succeeded → `completed`; none succeeded → `failed`; a mix →
    /// `partial_failure`. A failure here includes missing per-platform
    /// content and validation rejections, not only transport errors.
    pub fn aggregate_status(&self) -> TaskStatus {
        let succeeded = self.succeeded();
        if succeeded == self.outcomes.len() && !self.outcomes.is_empty() {
            TaskStatus::Completed
        } else if succeeded > 0 {
            TaskStatus::PartialFailure
        } else {
            TaskStatus::Failed
        }
    }

    /// Serialize for the storage boundary.
    pub fn to_json(&self) -> Result<String, DomainError> {
        serde_json::to_string(self)
            .map_err(|e| DomainError::validation(format!("report serialization failed: {e}")))
    }

    /// Deserialize from the storage boundary.
    pub fn from_json(s: &str) -> Result<Self, DomainError> {
        serde_json::from_str(s)
            .map_err(|e| DomainError::validation(format!("report deserialization failed: {e}")))
    }
}

impl FromIterator<PlatformOutcome> for PublishReport {
    fn from_iter<I: IntoIterator<Item = PlatformOutcome>>(iter: I) -> Self {
        Self {
            outcomes: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn all_success_aggregates_to_completed() {
        let report: PublishReport = [
            PlatformOutcome::success(Platform::Reddit, Some("abc".into()), None),
            PlatformOutcome::manual(Platform::Douyin),
        ]
        .into_iter()
        .collect();

        assert_eq!(report.aggregate_status(), TaskStatus::Completed);
    }

    #[test]
    fn mixed_outcomes_aggregate_to_partial_failure() {
        let report: PublishReport = [
            PlatformOutcome::success(Platform::Reddit, Some("abc".into()), None),
            PlatformOutcome::failure(Platform::X, "character limit exceeded"),
            PlatformOutcome::failure(Platform::TikTok, "connect timeout"),
        ]
        .into_iter()
        .collect();

        assert_eq!(report.aggregate_status(), TaskStatus::PartialFailure);
        assert_eq!(report.len(), 3);
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.failed(), 2);
    }

    #[test]
    fn all_failed_aggregates_to_failed() {
        let report: PublishReport = [
            PlatformOutcome::failure(Platform::Reddit, "403"),
            PlatformOutcome::failure(Platform::X, "timeout"),
        ]
        .into_iter()
        .collect();

        assert_eq!(report.aggregate_status(), TaskStatus::Failed);
    }

    #[test]
    fn skipped_success_counts_as_success() {
        let report: PublishReport =
            [PlatformOutcome::skipped(Platform::X, Some("99".into()), None)]
                .into_iter()
                .collect();

        assert_eq!(report.aggregate_status(), TaskStatus::Completed);
        assert!(report.outcomes()[0].skipped);
    }

    #[test]
    fn report_roundtrips_through_storage_json() {
        let report: PublishReport = [
            PlatformOutcome::success(
                Platform::Reddit,
                Some("t3_abc".into()),
                Some("https://reddit.com/r/test/t3_abc".into()),
            ),
            PlatformOutcome::failure(Platform::X, "validation failed"),
        ]
        .into_iter()
        .collect();

        let json = report.to_json().unwrap();
        let back = PublishReport::from_json(&json).unwrap();
        assert_eq!(report, back);
    }

    proptest! {
        /// Aggregation depends only on the success flags: completed iff all
        /// succeed, failed iff none succeed, partial otherwise.
        #[test]
        fn aggregation_matches_success_counts(flags in prop::collection::vec(any::<bool>(), 1..8)) {
            let report: PublishReport = flags
                .iter()
                .map(|&ok| {
                    if ok {
                        PlatformOutcome::success(Platform::Reddit, None, None)
                    } else {
                        PlatformOutcome::failure(Platform::Reddit, "boom")
                    }
                })
                .collect();

            let expected = if flags.iter().all(|&f| f) {
                TaskStatus::Completed
            } else if flags.iter().any(|&f| f) {
                TaskStatus::PartialFailure
            } else {
                TaskStatus::Failed
            };

            prop_assert_eq!(report.aggregate_status(), expected);
        }
    }
}
