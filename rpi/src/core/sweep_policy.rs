//! Eligibility rules for removing retained artifact directories.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::core::types::{PipelineRun, ReviewStatus};

/// Why a feature directory was left in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// No run record owns the directory.
    Untracked,
    /// Another process holds the feature lock.
    Locked,
    /// The run has not reached `Completed`.
    Active,
    /// Review object is still open.
    UnderReview,
    /// Finalized less than `retention` ago.
    WithinRetention,
    /// Completed run without a review object, or the lookup failed.
    StatusUnavailable,
    /// Run record exists but could not be parsed.
    RecordUnreadable,
    /// Removal was attempted and failed.
    RemoveFailed,
}

impl SkipReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            SkipReason::Untracked => "no run record",
            SkipReason::Locked => "locked",
            SkipReason::Active => "active",
            SkipReason::UnderReview => "under review",
            SkipReason::WithinRetention => "within retention",
            SkipReason::StatusUnavailable => "status lookup failed",
            SkipReason::RecordUnreadable => "run record unreadable",
            SkipReason::RemoveFailed => "remove failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepDecision {
    Remove,
    Skip(SkipReason),
}

/// Decide whether a feature's artifact directory may be removed.
///
/// `run` is `None` for a directory no run record owns; without a run there is
/// no review to prove it finalized, so it stays. `status` is the review
/// object's state, `None` when it could not be looked up.
pub fn decide(
    run: Option<&PipelineRun>,
    status: Option<ReviewStatus>,
    now: DateTime<Utc>,
    retention: Duration,
) -> SweepDecision {
    let Some(run) = run else {
        return SweepDecision::Skip(SkipReason::Untracked);
    };
    if run.is_active() {
        return SweepDecision::Skip(SkipReason::Active);
    }
    let Some(status) = status else {
        return SweepDecision::Skip(SkipReason::StatusUnavailable);
    };
    match status.finalized_at() {
        None => SweepDecision::Skip(SkipReason::UnderReview),
        Some(at) if now - at < retention => SweepDecision::Skip(SkipReason::WithinRetention),
        Some(_) => SweepDecision::Remove,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Stage, WorkItem};

    fn at(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw)
            .expect("time")
            .with_timezone(&Utc)
    }

    fn run(stage: Stage) -> PipelineRun {
        let mut run = PipelineRun::new(
            "f2",
            WorkItem {
                id: "2".to_string(),
                title: "F2".to_string(),
                url: None,
            },
            None,
            "rpi/f2",
            at("2026-01-01T00:00:00Z"),
        );
        run.current_stage = stage;
        run
    }

    fn retention() -> Duration {
        Duration::days(30)
    }

    #[test]
    fn untracked_directory_is_kept() {
        let now = at("2026-03-01T00:00:00Z");
        assert_eq!(
            decide(None, None, now, retention()),
            SweepDecision::Skip(SkipReason::Untracked)
        );
    }

    #[test]
    fn active_run_is_skipped() {
        let now = at("2026-03-01T00:00:00Z");
        let run = run(Stage::Plan);
        assert_eq!(
            decide(Some(&run), Some(ReviewStatus::Open), now, retention()),
            SweepDecision::Skip(SkipReason::Active)
        );
    }

    #[test]
    fn open_review_is_skipped() {
        let now = at("2026-03-01T00:00:00Z");
        let run = run(Stage::Completed);
        assert_eq!(
            decide(Some(&run), Some(ReviewStatus::Open), now, retention()),
            SweepDecision::Skip(SkipReason::UnderReview)
        );
    }

    #[test]
    fn finalized_review_respects_retention() {
        let run = run(Stage::Completed);
        let merged = ReviewStatus::Merged {
            at: at("2026-02-15T00:00:00Z"),
        };
        assert_eq!(
            decide(Some(&run), Some(merged), at("2026-03-01T00:00:00Z"), retention()),
            SweepDecision::Skip(SkipReason::WithinRetention)
        );
        assert_eq!(
            decide(Some(&run), Some(merged), at("2026-03-20T00:00:00Z"), retention()),
            SweepDecision::Remove
        );
    }

    #[test]
    fn closed_review_counts_as_finalized() {
        let run = run(Stage::Completed);
        let closed = ReviewStatus::Closed {
            at: at("2026-01-01T00:00:00Z"),
        };
        assert_eq!(
            decide(Some(&run), Some(closed), at("2026-03-01T00:00:00Z"), retention()),
            SweepDecision::Remove
        );
    }

    #[test]
    fn unknown_status_is_skipped() {
        let run = run(Stage::Completed);
        assert_eq!(
            decide(Some(&run), None, at("2026-03-01T00:00:00Z"), retention()),
            SweepDecision::Skip(SkipReason::StatusUnavailable)
        );
    }
}
