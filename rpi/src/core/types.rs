//! Shared deterministic types for pipeline core logic.
//!
//! These types define the persisted contract of a pipeline run. They carry no
//! I/O and serialize to stable JSON so run records diff cleanly.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Position of a pipeline run. Ordered: `Research < Plan < Implement < Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Research,
    Plan,
    Implement,
    Completed,
}

impl Stage {
    /// Stages that do work, in execution order.
    pub const WORK: [Stage; 3] = [Stage::Research, Stage::Plan, Stage::Implement];

    pub const fn as_str(self) -> &'static str {
        match self {
            Stage::Research => "research",
            Stage::Plan => "plan",
            Stage::Implement => "implement",
            Stage::Completed => "completed",
        }
    }

    /// Stage entered once `self` succeeds. `None` for `Completed`.
    pub const fn next(self) -> Option<Stage> {
        match self {
            Stage::Research => Some(Stage::Plan),
            Stage::Plan => Some(Stage::Implement),
            Stage::Implement => Some(Stage::Completed),
            Stage::Completed => None,
        }
    }

    /// File name of the artifact this stage leaves behind, if any.
    pub const fn artifact_file(self) -> Option<&'static str> {
        match self {
            Stage::Research => Some("research.md"),
            Stage::Plan => Some("plan.md"),
            Stage::Implement | Stage::Completed => None,
        }
    }

    /// Artifacts that must exist before this stage may start.
    pub const fn upstream(self) -> &'static [Stage] {
        match self {
            Stage::Research => &[],
            Stage::Plan => &[Stage::Research],
            Stage::Implement | Stage::Completed => &[Stage::Research, Stage::Plan],
        }
    }

    pub const fn produces_artifact(self) -> bool {
        self.artifact_file().is_some()
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stage a reviewer may rewind a run to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RerunTarget {
    Research,
    Plan,
}

impl RerunTarget {
    pub const fn stage(self) -> Stage {
        match self {
            RerunTarget::Research => Stage::Research,
            RerunTarget::Plan => Stage::Plan,
        }
    }

    /// Comment command that requests this rerun.
    pub const fn token(self) -> &'static str {
        match self {
            RerunTarget::Research => "reresearch",
            RerunTarget::Plan => "replan",
        }
    }

    /// Match a command token. Case-insensitive; anything else is `None`.
    pub fn from_token(token: &str) -> Option<Self> {
        if token.eq_ignore_ascii_case("reresearch") {
            Some(RerunTarget::Research)
        } else if token.eq_ignore_ascii_case("replan") {
            Some(RerunTarget::Plan)
        } else {
            None
        }
    }
}

/// How a stage's commit lands on the run branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitStrategy {
    /// Replace the prior stage commit(s) and force-update the branch.
    Rewrite,
    /// Add new commits on top, preserving history.
    Append,
}

impl CommitStrategy {
    pub const fn as_str(self) -> &'static str {
        match self {
            CommitStrategy::Rewrite => "rewrite",
            CommitStrategy::Append => "append",
        }
    }
}

impl fmt::Display for CommitStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracked work item a run was started from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Durable output of a Research or Plan stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub stage: Stage,
    /// Repository-relative, `/`-separated path.
    pub path: String,
    /// SHA-256 of the committed content, lowercase hex.
    pub sha256: String,
    pub committed_as: CommitStrategy,
}

/// Commit produced by a completed stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCommit {
    pub stage: Stage,
    pub sha: String,
    pub strategy: CommitStrategy,
    /// Actor whose trigger produced the commit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
}

/// Hosted review object (pull/merge request) recording the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewRef {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// One automation for one feature (`.rpi/runs/<feature_id>.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub feature_id: String,
    pub item: WorkItem,
    /// Actor who initiated the original run; `None` when it was never recorded.
    pub author: Option<String>,
    pub current_stage: Stage,
    /// Insertion order is completion order.
    pub artifacts: Vec<ArtifactRecord>,
    /// Commits backing the current artifacts, in stage order.
    pub commits: Vec<StageCommit>,
    /// Every stage commit still on the branch, oldest first. Reruns keep
    /// these; only a rewrite that resets the branch drops them.
    #[serde(default)]
    pub history: Vec<StageCommit>,
    pub review: Option<ReviewRef>,
    pub branch: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    pub fn new(
        feature_id: impl Into<String>,
        item: WorkItem,
        author: Option<String>,
        branch: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            feature_id: feature_id.into(),
            item,
            author,
            current_stage: Stage::Research,
            artifacts: Vec::new(),
            commits: Vec::new(),
            history: Vec::new(),
            review: None,
            branch: branch.into(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn artifact(&self, stage: Stage) -> Option<&ArtifactRecord> {
        self.artifacts.iter().find(|a| a.stage == stage)
    }

    /// Most recent commit recorded for `stage`.
    pub fn commit_for(&self, stage: Stage) -> Option<&StageCommit> {
        self.commits.iter().rev().find(|c| c.stage == stage)
    }

    pub fn is_active(&self) -> bool {
        self.current_stage != Stage::Completed
    }
}

/// Hosting-side state of a review object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum ReviewStatus {
    Open,
    Merged { at: DateTime<Utc> },
    Closed { at: DateTime<Utc> },
}

impl ReviewStatus {
    /// When the review was merged or closed.
    pub fn finalized_at(&self) -> Option<DateTime<Utc>> {
        match self {
            ReviewStatus::Open => None,
            ReviewStatus::Merged { at } | ReviewStatus::Closed { at } => Some(*at),
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized_at().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_order_forward() {
        assert!(Stage::Research < Stage::Plan);
        assert!(Stage::Plan < Stage::Implement);
        assert!(Stage::Implement < Stage::Completed);
        assert_eq!(Stage::Research.next(), Some(Stage::Plan));
        assert_eq!(Stage::Completed.next(), None);
    }

    #[test]
    fn only_research_and_plan_produce_artifacts() {
        let producing: Vec<Stage> = Stage::WORK
            .into_iter()
            .filter(|s| s.produces_artifact())
            .collect();
        assert_eq!(producing, vec![Stage::Research, Stage::Plan]);
    }

    #[test]
    fn rerun_tokens_are_case_insensitive() {
        assert_eq!(RerunTarget::from_token("RePlan"), Some(RerunTarget::Plan));
        assert_eq!(
            RerunTarget::from_token("reresearch"),
            Some(RerunTarget::Research)
        );
        assert_eq!(RerunTarget::from_token("rebuild"), None);
    }

    #[test]
    fn stage_serializes_lowercase() {
        let json = serde_json::to_string(&Stage::Implement).expect("serialize");
        assert_eq!(json, "\"implement\"");
    }
}
