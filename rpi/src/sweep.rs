//! Cleanup sweeper: removes artifact directories of finalized runs.
//!
//! Independent of the stage controller. It only reads run records, tries the
//! feature locks without waiting, and never writes run state. A feature that
//! cannot be judged safely is skipped and reported; one bad feature never
//! fails the sweep as a whole.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::core::feature_id::is_feature_id;
use crate::core::sweep_policy::{SkipReason, SweepDecision, decide};
use crate::core::types::{CommitStrategy, PipelineRun, ReviewStatus};
use crate::io::artifacts::ArtifactStore;
use crate::io::config::PipelineConfig;
use crate::io::git::{CommitRequest, SourceControl};
use crate::io::init::PipelinePaths;
use crate::io::lock::{LockError, try_lock_feature};
use crate::io::review::ReviewHost;
use crate::io::run_store::RunStore;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub removed: Vec<String>,
    pub skipped: Vec<SkippedFeature>,
    /// Sha of the cleanup commit, when anything was removed.
    pub commit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedFeature {
    pub feature_id: String,
    pub reason: SkipReason,
}

impl SweepReport {
    fn skip(&mut self, feature_id: &str, reason: SkipReason) {
        info!(feature_id, reason = reason.as_str(), "sweep skipped feature");
        self.skipped.push(SkippedFeature {
            feature_id: feature_id.to_string(),
            reason,
        });
    }

    pub fn reason_for(&self, feature_id: &str) -> Option<SkipReason> {
        self.skipped
            .iter()
            .find(|s| s.feature_id == feature_id)
            .map(|s| s.reason)
    }
}

/// Remove artifact directories whose review was finalized more than
/// `retention_days` before `now`, in one cleanup commit.
#[instrument(skip_all, fields(now = %now))]
pub fn sweep<S: SourceControl, R: ReviewHost>(
    paths: &PipelinePaths,
    config: &PipelineConfig,
    scm: &S,
    review: &R,
    now: DateTime<Utc>,
) -> Result<SweepReport> {
    let artifacts = ArtifactStore::new(&paths.root, config.artifact_root.clone());
    let runs = RunStore::new(paths);
    let retention = config.retention();
    let mut report = SweepReport::default();

    for feature_id in artifacts.feature_dirs()? {
        if !is_feature_id(&feature_id) {
            report.skip(&feature_id, SkipReason::Untracked);
            continue;
        }
        // Held for the removal so no stage can start on this feature meanwhile.
        let _lock = match try_lock_feature(&paths.lock_path(&feature_id), &feature_id) {
            Ok(guard) => guard,
            Err(LockError::Locked { .. }) => {
                report.skip(&feature_id, SkipReason::Locked);
                continue;
            }
            Err(err) => {
                warn!(feature_id = %feature_id, err = %err, "lock attempt failed");
                report.skip(&feature_id, SkipReason::RemoveFailed);
                continue;
            }
        };

        let run = match runs.load(&feature_id) {
            Ok(run) => run,
            Err(err) => {
                warn!(feature_id = %feature_id, err = %format!("{err:#}"), "run record unreadable");
                report.skip(&feature_id, SkipReason::RecordUnreadable);
                continue;
            }
        };
        let status = run.as_ref().and_then(|run| lookup_status(review, run));

        match decide(run.as_ref(), status, now, retention) {
            SweepDecision::Skip(reason) => report.skip(&feature_id, reason),
            SweepDecision::Remove => match artifacts.remove_feature(&feature_id) {
                Ok(()) => {
                    info!(feature_id = %feature_id, "removed artifact directory");
                    report.removed.push(feature_id);
                }
                Err(err) => {
                    warn!(feature_id = %feature_id, err = %format!("{err:#}"), "remove failed");
                    report.skip(&feature_id, SkipReason::RemoveFailed);
                }
            },
        }
    }

    if report.removed.is_empty() {
        debug!("nothing to remove");
        return Ok(report);
    }

    let branch = scm.current_branch()?;
    let sha = scm.commit(&CommitRequest {
        message: cleanup_message(&report.removed),
        paths: report
            .removed
            .iter()
            .map(|feature_id| artifacts.relative_dir(feature_id))
            .collect(),
        all: false,
        strategy: CommitStrategy::Append,
        replaces: None,
    })?;
    scm.publish(&branch, false)?;
    info!(sha = %sha, removed = report.removed.len(), "cleanup committed");
    report.commit = Some(sha);
    Ok(report)
}

/// Review status for a completed run, `None` when there is nothing to ask
/// about or the lookup failed.
fn lookup_status<R: ReviewHost>(review: &R, run: &PipelineRun) -> Option<ReviewStatus> {
    if run.is_active() {
        return None;
    }
    let review_ref = run.review.as_ref()?;
    match review.review_status(&review_ref.id) {
        Ok(status) => Some(status),
        Err(err) => {
            warn!(
                feature_id = %run.feature_id,
                review_id = %review_ref.id,
                err = %format!("{err:#}"),
                "review status lookup failed"
            );
            None
        }
    }
}

fn cleanup_message(removed: &[String]) -> String {
    let mut message = format!(
        "[cleanup] remove artifacts of {} finalized run{}\n",
        removed.len(),
        if removed.len() == 1 { "" } else { "s" }
    );
    for feature_id in removed {
        message.push_str(&format!("\n- {feature_id}"));
    }
    message
}
