//! Stage state machine for a single pipeline run.
//!
//! Normal progress is forward-only (`Research -> Plan -> Implement ->
//! Completed`). Reruns rewind to an entry stage and drop every artifact and
//! commit at or after it, so no artifact outlives its upstream dependency.

use chrono::{DateTime, Utc};

use crate::core::feature_id::is_feature_id;
use crate::core::types::{ArtifactRecord, PipelineRun, RerunTarget, Stage, StageCommit};
use crate::errors::PipelineError;

/// Mark `completed` as done and move to the next stage.
///
/// Fails unless `completed` is the run's current stage.
pub fn advance(
    run: &mut PipelineRun,
    completed: Stage,
    now: DateTime<Utc>,
) -> Result<Stage, PipelineError> {
    let next = match completed.next() {
        Some(next) if run.current_stage == completed => next,
        _ => {
            return Err(PipelineError::IllegalTransition {
                from: run.current_stage,
                completed,
            });
        }
    };
    run.current_stage = next;
    run.updated_at = now;
    if next == Stage::Completed {
        run.completed_at = Some(now);
    }
    Ok(next)
}

/// Check that every artifact `stage` consumes is recorded on the run.
pub fn require_inputs(run: &PipelineRun, stage: Stage) -> Result<(), PipelineError> {
    match stage.upstream().iter().find(|up| run.artifact(**up).is_none()) {
        Some(missing) => Err(PipelineError::DependencyViolation {
            feature_id: run.feature_id.clone(),
            stage,
            missing: *missing,
        }),
        None => Ok(()),
    }
}

/// What a rerun discards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewindPlan {
    pub entry: Stage,
    /// Artifact stages whose records (and files) are discarded, in stage order.
    pub invalidated: Vec<Stage>,
    /// Earliest recorded commit at or after `entry`. A rewrite replaces it and
    /// everything after it, subject to [`rewrite_base`].
    pub replaces: Option<String>,
}

pub fn plan_rewind(run: &PipelineRun, target: RerunTarget) -> RewindPlan {
    let entry = target.stage();
    let invalidated = run
        .artifacts
        .iter()
        .map(|a| a.stage)
        .filter(|stage| *stage >= entry)
        .collect();
    let replaces = run
        .commits
        .iter()
        .find(|c| c.stage >= entry)
        .map(|c| c.sha.clone());
    RewindPlan {
        entry,
        invalidated,
        replaces,
    }
}

/// Rewind `run` to `plan.entry`, forgetting artifacts and commits at or after it.
pub fn apply_rewind(run: &mut PipelineRun, plan: &RewindPlan, now: DateTime<Utc>) {
    run.current_stage = plan.entry;
    run.artifacts.retain(|a| a.stage < plan.entry);
    run.commits.retain(|c| c.stage < plan.entry);
    run.completed_at = None;
    run.updated_at = now;
}

/// Record (or replace) the artifact for its stage.
pub fn record_artifact(run: &mut PipelineRun, record: ArtifactRecord) {
    run.artifacts.retain(|a| a.stage != record.stage);
    run.artifacts.push(record);
}

/// Record a stage commit. `replaced` is the commit a rewrite reset the branch
/// to just before; it and everything after it leave the history.
pub fn record_commit(run: &mut PipelineRun, commit: StageCommit, replaced: Option<&str>) {
    if let Some(sha) = replaced
        && let Some(pos) = run.history.iter().position(|c| c.sha == sha)
    {
        run.history.truncate(pos);
    }
    run.history.push(commit.clone());
    run.commits.push(commit);
}

/// Commit a rewrite requested by `actor` resets the branch to just before.
///
/// A rewrite only discards the actor's own commits. Starting from `replaces`,
/// the base moves past the last commit anyone else made; `None` means nothing
/// of the actor's is left to replace and the rerun must append.
pub fn rewrite_base(run: &PipelineRun, replaces: &str, actor: &str) -> Option<String> {
    let start = run.history.iter().position(|c| c.sha == replaces)?;
    let tail = &run.history[start..];
    let first_own = tail
        .iter()
        .rposition(|c| c.actor.as_deref() != Some(actor))
        .map_or(0, |foreign| foreign + 1);
    tail.get(first_own).map(|c| c.sha.clone())
}

/// Check run invariants that serde cannot express.
pub fn validate_invariants(run: &PipelineRun) -> Vec<String> {
    let mut errors = Vec::new();
    let id = run.feature_id.as_str();

    if !is_feature_id(id) {
        errors.push(format!("'{id}': feature_id is not a valid slug"));
    }

    for (index, artifact) in run.artifacts.iter().enumerate() {
        if !artifact.stage.produces_artifact() {
            errors.push(format!(
                "{id}: stage {} cannot own an artifact",
                artifact.stage
            ));
        }
        if run.artifacts[..index]
            .iter()
            .any(|a| a.stage == artifact.stage)
        {
            errors.push(format!("{id}: duplicate {} artifact", artifact.stage));
        }
        if artifact.stage >= run.current_stage {
            errors.push(format!(
                "{id}: {} artifact recorded before the stage completed",
                artifact.stage
            ));
        }
    }

    if !run.artifacts.windows(2).all(|w| w[0].stage < w[1].stage) {
        errors.push(format!("{id}: artifacts are not in completion order"));
    }

    if run.artifact(Stage::Plan).is_some() && run.artifact(Stage::Research).is_none() {
        errors.push(format!("{id}: plan artifact without research artifact"));
    }

    for stage in Stage::WORK {
        if stage < run.current_stage && stage.produces_artifact() && run.artifact(stage).is_none()
        {
            errors.push(format!(
                "{id}: at {} but {stage} artifact is missing",
                run.current_stage
            ));
        }
    }

    if run.commits.iter().any(|c| c.stage == Stage::Implement)
        && (run.artifact(Stage::Research).is_none() || run.artifact(Stage::Plan).is_none())
    {
        errors.push(format!(
            "{id}: implement commit without research and plan artifacts"
        ));
    }

    if !run.commits.windows(2).all(|w| w[0].stage <= w[1].stage) {
        errors.push(format!("{id}: commits are not in stage order"));
    }

    match (run.current_stage == Stage::Completed, run.completed_at) {
        (true, None) => errors.push(format!("{id}: completed run has no completed_at")),
        (false, Some(_)) => errors.push(format!("{id}: active run has completed_at")),
        _ => {}
    }

    if run.current_stage == Stage::Completed && run.review.is_none() {
        errors.push(format!("{id}: completed run has no review object"));
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{CommitStrategy, ReviewRef, WorkItem};

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .expect("time")
            .with_timezone(&Utc)
    }

    fn run() -> PipelineRun {
        PipelineRun::new(
            "f1",
            WorkItem {
                id: "1".to_string(),
                title: "F1".to_string(),
                url: None,
            },
            Some("alice".to_string()),
            "rpi/f1",
            now(),
        )
    }

    fn artifact(stage: Stage) -> ArtifactRecord {
        ArtifactRecord {
            stage,
            path: format!("thoughts/f1/{}", stage.artifact_file().unwrap_or("none")),
            sha256: "00".to_string(),
            committed_as: CommitStrategy::Append,
        }
    }

    fn commit(stage: Stage, sha: &str) -> StageCommit {
        commit_by(stage, sha, "alice")
    }

    fn commit_by(stage: Stage, sha: &str, actor: &str) -> StageCommit {
        StageCommit {
            stage,
            sha: sha.to_string(),
            strategy: CommitStrategy::Append,
            actor: Some(actor.to_string()),
        }
    }

    /// A run that went through every stage.
    fn completed_run() -> PipelineRun {
        let mut run = run();
        for stage in Stage::WORK {
            if stage.produces_artifact() {
                record_artifact(&mut run, artifact(stage));
            }
            record_commit(&mut run, commit(stage, stage.as_str()), None);
            advance(&mut run, stage, now()).expect("advance");
        }
        run.review = Some(ReviewRef {
            id: "42".to_string(),
            url: None,
        });
        run
    }

    #[test]
    fn advance_walks_forward_to_completed() {
        let run = completed_run();
        assert_eq!(run.current_stage, Stage::Completed);
        assert_eq!(run.completed_at, Some(now()));
        assert!(validate_invariants(&run).is_empty());
    }

    #[test]
    fn advance_rejects_skipping_a_stage() {
        let mut run = run();
        let err = advance(&mut run, Stage::Plan, now()).unwrap_err();
        assert_eq!(
            err,
            PipelineError::IllegalTransition {
                from: Stage::Research,
                completed: Stage::Plan
            }
        );
        assert_eq!(run.current_stage, Stage::Research);
    }

    #[test]
    fn advance_past_completed_is_illegal() {
        let mut run = completed_run();
        assert!(advance(&mut run, Stage::Completed, now()).is_err());
    }

    #[test]
    fn implement_requires_both_artifacts() {
        let mut run = run();
        record_artifact(&mut run, artifact(Stage::Research));
        let err = require_inputs(&run, Stage::Implement).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::DependencyViolation {
                missing: Stage::Plan,
                ..
            }
        ));
        assert!(require_inputs(&run, Stage::Plan).is_ok());
        assert!(require_inputs(&run, Stage::Research).is_ok());
    }

    #[test]
    fn replan_keeps_research_and_drops_the_rest() {
        let mut run = completed_run();
        let plan = plan_rewind(&run, RerunTarget::Plan);
        assert_eq!(plan.entry, Stage::Plan);
        assert_eq!(plan.invalidated, vec![Stage::Plan]);
        assert_eq!(plan.replaces.as_deref(), Some("plan"));

        apply_rewind(&mut run, &plan, now());
        assert_eq!(run.current_stage, Stage::Plan);
        assert!(run.artifact(Stage::Research).is_some());
        assert!(run.artifact(Stage::Plan).is_none());
        assert_eq!(run.commits.len(), 1);
        assert_eq!(run.history.len(), 3);
        assert_eq!(run.completed_at, None);
        assert!(validate_invariants(&run).is_empty());
    }

    #[test]
    fn reresearch_drops_everything() {
        let mut run = completed_run();
        let plan = plan_rewind(&run, RerunTarget::Research);
        assert_eq!(plan.invalidated, vec![Stage::Research, Stage::Plan]);
        assert_eq!(plan.replaces.as_deref(), Some("research"));

        apply_rewind(&mut run, &plan, now());
        assert_eq!(run.current_stage, Stage::Research);
        assert!(run.artifacts.is_empty());
        assert!(run.commits.is_empty());
        assert!(validate_invariants(&run).is_empty());
    }

    #[test]
    fn rewrite_base_covers_only_the_actors_own_commits() {
        let mut run = completed_run();
        assert_eq!(rewrite_base(&run, "plan", "alice").as_deref(), Some("plan"));

        // bob appends a new plan and implementation on top.
        let plan = plan_rewind(&run, RerunTarget::Plan);
        apply_rewind(&mut run, &plan, now());
        record_commit(&mut run, commit_by(Stage::Plan, "p2", "bob"), None);
        record_commit(&mut run, commit_by(Stage::Implement, "i2", "bob"), None);
        assert_eq!(rewrite_base(&run, "p2", "alice"), None);
        assert_eq!(rewrite_base(&run, "p2", "bob").as_deref(), Some("p2"));

        // alice appends after bob; her own commits past bob's are replaceable.
        let plan = plan_rewind(&run, RerunTarget::Plan);
        apply_rewind(&mut run, &plan, now());
        record_commit(&mut run, commit(Stage::Plan, "p3"), None);
        record_commit(&mut run, commit(Stage::Implement, "i3"), None);
        assert_eq!(rewrite_base(&run, "research", "alice").as_deref(), Some("p3"));
    }

    #[test]
    fn rewrite_drops_replaced_commits_from_history() {
        let mut run = completed_run();
        let plan = plan_rewind(&run, RerunTarget::Plan);
        apply_rewind(&mut run, &plan, now());
        record_commit(&mut run, commit(Stage::Plan, "p2"), Some("plan"));
        let shas: Vec<&str> = run.history.iter().map(|c| c.sha.as_str()).collect();
        assert_eq!(shas, vec!["research", "p2"]);
    }

    #[test]
    fn unknown_commit_has_no_rewrite_base() {
        let run = completed_run();
        assert_eq!(rewrite_base(&run, "gone", "alice"), None);
    }

    #[test]
    fn replan_on_fresh_run_has_nothing_to_replace() {
        let run = run();
        let plan = plan_rewind(&run, RerunTarget::Plan);
        assert!(plan.invalidated.is_empty());
        assert_eq!(plan.replaces, None);
    }

    #[test]
    fn invariants_flag_orphan_plan() {
        let mut run = run();
        run.current_stage = Stage::Implement;
        run.artifacts.push(artifact(Stage::Plan));
        let errors = validate_invariants(&run);
        assert!(
            errors
                .iter()
                .any(|e| e.contains("plan artifact without research"))
        );
        assert!(errors.iter().any(|e| e.contains("research artifact is missing")));
    }

    #[test]
    fn invariants_flag_implement_commit_without_inputs() {
        let mut run = run();
        run.commits.push(commit(Stage::Implement, "abc"));
        let errors = validate_invariants(&run);
        assert!(errors.iter().any(|e| e.contains("implement commit")));
    }

    #[test]
    fn invariants_flag_completed_without_review() {
        let mut run = completed_run();
        run.review = None;
        let errors = validate_invariants(&run);
        assert!(errors.iter().any(|e| e.contains("no review object")));
    }
}
