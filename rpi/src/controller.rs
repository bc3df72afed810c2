//! Stage controller: drives pipeline runs through Research, Plan and Implement.
//!
//! Every operation holds the feature lock for its whole duration, so at most
//! one stage executes per feature and later triggers queue behind it. A stage
//! only mutates the stored run after its agent call succeeded and its commit
//! landed; on any failure the persisted run keeps its pre-stage state.

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::core::commit_strategy::resolve;
use crate::core::stage::{
    advance, apply_rewind, plan_rewind, record_artifact, record_commit, require_inputs,
    rewrite_base,
};
use crate::core::trigger::{AdHocQuery, NewRun, RerunRequest};
use crate::core::types::{CommitStrategy, PipelineRun, ReviewRef, Stage, StageCommit};
use crate::errors::PipelineError;
use crate::io::agent::{AgentExecutor, AgentMode, AgentRequest};
use crate::io::artifacts::ArtifactStore;
use crate::io::config::PipelineConfig;
use crate::io::git::{CommitRequest, SourceControl};
use crate::io::init::PipelinePaths;
use crate::io::lock::{FeatureLockGuard, lock_feature};
use crate::io::prompt::{PromptEngine, ReviewBodyInput, StagePromptInput};
use crate::io::review::{ReviewHost, ReviewRequest};
use crate::io::run_store::RunStore;

/// Result of driving a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub feature_id: String,
    pub stage: Stage,
    pub review: Option<ReviewRef>,
    /// How this invocation's commits landed.
    pub strategy: CommitStrategy,
}

/// How the stages of one invocation are committed.
#[derive(Debug, Clone, Default)]
struct DriveContext {
    /// Actor whose trigger drives this invocation.
    actor: Option<String>,
    strategy: Option<CommitStrategy>,
    /// Commit replaced by the first stage under `Rewrite`.
    replaces: Option<String>,
    /// Reviewer feedback for the first stage.
    feedback: Option<String>,
    /// Artifacts discarded by a rerun, deleted in the first stage's commit.
    invalidated: Vec<Stage>,
}

impl DriveContext {
    fn by(actor: &str) -> Self {
        Self {
            actor: Some(actor.to_string()),
            ..Self::default()
        }
    }

    fn strategy(&self) -> CommitStrategy {
        self.strategy.unwrap_or(CommitStrategy::Append)
    }
}

pub struct Controller<'a, A, S, R> {
    paths: PipelinePaths,
    config: PipelineConfig,
    runs: RunStore,
    artifacts: ArtifactStore,
    prompts: PromptEngine,
    agent: &'a A,
    scm: &'a S,
    review: &'a R,
}

impl<'a, A, S, R> Controller<'a, A, S, R>
where
    A: AgentExecutor,
    S: SourceControl,
    R: ReviewHost,
{
    pub fn new(
        paths: PipelinePaths,
        config: PipelineConfig,
        agent: &'a A,
        scm: &'a S,
        review: &'a R,
    ) -> Result<Self> {
        Ok(Self {
            runs: RunStore::new(&paths),
            artifacts: ArtifactStore::new(&paths.root, config.artifact_root.clone()),
            prompts: PromptEngine::new()?,
            paths,
            config,
            agent,
            scm,
            review,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn runs(&self) -> &RunStore {
        &self.runs
    }

    pub fn paths(&self) -> &PipelinePaths {
        &self.paths
    }

    pub fn scm(&self) -> &'a S {
        self.scm
    }

    pub fn review_host(&self) -> &'a R {
        self.review
    }

    fn lock(&self, feature_id: &str) -> Result<FeatureLockGuard> {
        let guard = lock_feature(&self.paths.lock_path(feature_id), feature_id)?;
        debug!(feature_id, "feature lock held");
        Ok(guard)
    }

    /// Start a run for a newly labelled work item.
    ///
    /// An active run for the same item is resumed instead; a completed one is
    /// archived and replaced.
    #[instrument(skip_all, fields(feature_id = %request.feature_id))]
    pub fn start_run(&self, request: &NewRun) -> Result<RunOutcome> {
        let _lock = self.lock(&request.feature_id)?;
        let now = Utc::now();

        if let Some(existing) = self.runs.load(&request.feature_id)? {
            if existing.is_active() {
                if existing.item.id != request.item.id {
                    return Err(PipelineError::RunAlreadyActive {
                        feature_id: request.feature_id.clone(),
                    }
                    .into());
                }
                info!(stage = %existing.current_stage, "run already active; resuming");
                self.scm.prepare_branch(&existing.branch)?;
                return self.drive(existing, DriveContext::by(&request.author));
            }
            let archived = self.runs.archive(&existing, now)?;
            info!(path = %archived.display(), "archived completed run");
        }

        let run = PipelineRun::new(
            request.feature_id.clone(),
            request.item.clone(),
            Some(request.author.clone()),
            self.config.branch_for(&request.feature_id),
            now,
        );
        self.scm.prepare_branch(&run.branch)?;
        self.runs.save(&run)?;
        info!(branch = %run.branch, author = %request.author, "run started");
        self.drive(run, DriveContext::by(&request.author))
    }

    /// Continue an active run from its current stage on behalf of `actor`.
    #[instrument(skip_all, fields(feature_id = %feature_id, actor = %actor))]
    pub fn resume(&self, feature_id: &str, actor: &str) -> Result<RunOutcome> {
        let _lock = self.lock(feature_id)?;
        let run = self
            .runs
            .load(feature_id)?
            .ok_or_else(|| anyhow!("no pipeline run for '{feature_id}'"))?;
        if !run.is_active() {
            info!("run already completed; nothing to resume");
            return Ok(outcome(&run, CommitStrategy::Append));
        }
        info!(stage = %run.current_stage, "resuming run");
        self.scm.prepare_branch(&run.branch)?;
        self.drive(run, DriveContext::by(actor))
    }

    /// Rewind the run owning `request.review_id` and redo it from the target stage.
    #[instrument(skip_all, fields(review_id = %request.review_id, target = request.target.token()))]
    pub fn rerun(&self, request: &RerunRequest) -> Result<RunOutcome> {
        let feature_id = self.owning_feature(&request.review_id)?;
        let _lock = self.lock(&feature_id)?;
        // Reload: a queued request must see what the previous one committed.
        let run = self
            .runs
            .load(&feature_id)?
            .ok_or_else(|| PipelineError::UnknownReview {
                review_id: request.review_id.clone(),
            })?;

        match self.review.review_status(&request.review_id) {
            Ok(status) if status.is_finalized() => {
                return Err(PipelineError::ReviewFinalized {
                    feature_id,
                    review_id: request.review_id.clone(),
                }
                .into());
            }
            Ok(_) => {}
            Err(err) => warn!(err = %format!("{err:#}"), "review status lookup failed; continuing"),
        }

        let author = match &run.author {
            Some(author) => Some(author.clone()),
            None => match self.review.review_author(&request.review_id) {
                Ok(author) => Some(author),
                Err(err) => {
                    warn!(err = %format!("{err:#}"), "author lookup failed; appending");
                    None
                }
            },
        };
        let plan = plan_rewind(&run, request.target);
        let (strategy, replaces) = match (
            resolve(&request.actor, author.as_deref()),
            plan.replaces.as_deref(),
        ) {
            (CommitStrategy::Rewrite, Some(first)) => {
                match rewrite_base(&run, first, &request.actor) {
                    Some(base) => (CommitStrategy::Rewrite, Some(base)),
                    None => {
                        info!("another reviewer's commits follow; appending instead");
                        (CommitStrategy::Append, None)
                    }
                }
            }
            (CommitStrategy::Rewrite, None) => (CommitStrategy::Rewrite, None),
            (CommitStrategy::Append, _) => (CommitStrategy::Append, None),
        };
        info!(
            %strategy,
            actor = %request.actor,
            entry = %plan.entry,
            invalidated = ?plan.invalidated,
            "rerun accepted"
        );

        self.scm.prepare_branch(&run.branch)?;
        let mut rewound = run;
        apply_rewind(&mut rewound, &plan, Utc::now());
        self.drive(
            rewound,
            DriveContext {
                actor: Some(request.actor.clone()),
                strategy: Some(strategy),
                replaces,
                feedback: Some(request.feedback.clone()).filter(|f| !f.is_empty()),
                invalidated: plan.invalidated,
            },
        )
    }

    /// Answer a question in read-only mode. Never mutates the run.
    #[instrument(skip_all, fields(review_id = %query.review_id))]
    pub fn answer(&self, query: &AdHocQuery) -> Result<String> {
        let feature_id = self.owning_feature(&query.review_id)?;
        let _lock = self.lock(&feature_id)?;
        let run = self
            .runs
            .load(&feature_id)?
            .ok_or_else(|| PipelineError::UnknownReview {
                review_id: query.review_id.clone(),
            })?;
        self.scm.prepare_branch(&run.branch)?;

        let read = |stage| {
            run.artifact(stage)
                .and_then(|record| self.artifacts.read(record).ok())
        };
        let research = read(Stage::Research);
        let plan = read(Stage::Plan);
        let prompt = self.prompts.render_adhoc(
            &run.item,
            &run.feature_id,
            &query.question,
            research.as_deref(),
            plan.as_deref(),
        )?;
        let answer = self
            .agent
            .run(&AgentRequest {
                feature_id: run.feature_id.clone(),
                stage: None,
                mode: AgentMode::ReadOnly,
                prompt,
                workdir: self.paths.root.clone(),
            })
            .context("answer ad-hoc query")?;
        Ok(answer)
    }

    fn owning_feature(&self, review_id: &str) -> Result<String> {
        self.runs
            .find_by_review(review_id)?
            .map(|run| run.feature_id)
            .ok_or_else(|| {
                PipelineError::UnknownReview {
                    review_id: review_id.to_string(),
                }
                .into()
            })
    }

    /// Execute stages until the run completes or one fails.
    fn drive(&self, mut run: PipelineRun, mut ctx: DriveContext) -> Result<RunOutcome> {
        let strategy = ctx.strategy();
        while run.is_active() {
            let stage = run.current_stage;
            self.execute_stage(&mut run, stage, &ctx)?;
            // Only the entry stage replaces history, consumes feedback and
            // carries the invalidated artifacts.
            ctx.replaces = None;
            ctx.feedback = None;
            ctx.invalidated.clear();
        }
        info!(feature_id = %run.feature_id, "run completed");
        Ok(outcome(&run, strategy))
    }

    #[instrument(skip_all, fields(feature_id = %run.feature_id, %stage))]
    fn execute_stage(&self, run: &mut PipelineRun, stage: Stage, ctx: &DriveContext) -> Result<()> {
        require_inputs(run, stage)?;
        let strategy = ctx.strategy();

        let research = self.read_input(run, Stage::Research)?;
        let plan = self.read_input(run, Stage::Plan)?;
        let artifact_path = stage
            .produces_artifact()
            .then(|| self.artifacts.relative_path(&run.feature_id, stage))
            .transpose()?;
        let prompt = self.prompts.render_stage(&StagePromptInput {
            item: &run.item,
            feature_id: &run.feature_id,
            stage,
            artifact_path: artifact_path.as_deref(),
            research: research.as_ref().map(|(p, c)| (p.as_str(), c.as_str())),
            plan: plan.as_ref().map(|(p, c)| (p.as_str(), c.as_str())),
            feedback: ctx.feedback.as_deref(),
        })?;

        info!("running agent");
        let request = AgentRequest {
            feature_id: run.feature_id.clone(),
            stage: Some(stage),
            mode: match stage {
                Stage::Implement => AgentMode::Write,
                _ => AgentMode::ReadOnly,
            },
            prompt,
            workdir: self.paths.root.clone(),
        };
        let output = self
            .agent
            .run(&request)
            .map_err(|err| PipelineError::AgentFailed {
                stage,
                message: format!("{err:#}"),
            })?;
        if stage.produces_artifact() && output.trim().is_empty() {
            return Err(PipelineError::AgentFailed {
                stage,
                message: "agent produced no content".to_string(),
            }
            .into());
        }

        let mut next = run.clone();
        let touched: Vec<Stage> = stage
            .produces_artifact()
            .then_some(stage)
            .into_iter()
            .chain(ctx.invalidated.iter().copied().filter(|s| *s != stage))
            .collect();
        let mut saved = Vec::with_capacity(touched.len());
        for touched_stage in &touched {
            saved.push((
                *touched_stage,
                self.artifacts.snapshot(&next.feature_id, *touched_stage)?,
            ));
        }

        let committed = self.write_and_commit(&mut next, stage, &output, ctx);
        let sha = match committed {
            Ok(sha) => sha,
            Err(err) => {
                for (touched_stage, previous) in &saved {
                    if let Err(restore_err) = self.artifacts.restore(
                        &next.feature_id,
                        *touched_stage,
                        previous.as_deref(),
                    ) {
                        warn!(
                            stage = %touched_stage,
                            err = %format!("{restore_err:#}"),
                            "failed to restore artifact"
                        );
                    }
                }
                return Err(err);
            }
        };
        record_commit(
            &mut next,
            StageCommit {
                stage,
                sha: sha.clone(),
                strategy,
                actor: ctx.actor.clone(),
            },
            ctx.replaces.as_deref(),
        );
        debug!(sha = %sha, "stage committed");

        let force = strategy == CommitStrategy::Rewrite;
        if stage == Stage::Implement {
            self.scm.publish(&next.branch, force)?;
            let review = self.open_or_update_review(&next, &output)?;
            info!(review_id = %review.id, "review object ready");
            next.review = Some(review);
            advance(&mut next, stage, Utc::now())?;
            self.runs.save(&next)?;
        } else {
            advance(&mut next, stage, Utc::now())?;
            self.runs.save(&next)?;
            self.scm.publish(&next.branch, force)?;
        }

        *run = next;
        info!(next = %run.current_stage, "stage complete");
        Ok(())
    }

    /// Write the stage artifact, delete invalidated ones and commit the lot.
    fn write_and_commit(
        &self,
        next: &mut PipelineRun,
        stage: Stage,
        output: &str,
        ctx: &DriveContext,
    ) -> Result<String> {
        let strategy = ctx.strategy();
        let mut paths = Vec::new();
        if stage.produces_artifact() {
            let record = self
                .artifacts
                .write(&next.feature_id, stage, output, strategy)?;
            paths.push(record.path.clone());
            record_artifact(next, record);
        }
        for invalidated in ctx.invalidated.iter().filter(|s| **s != stage) {
            self.artifacts.remove(&next.feature_id, *invalidated)?;
            paths.push(self.artifacts.relative_path(&next.feature_id, *invalidated)?);
        }

        self.scm.commit(&CommitRequest {
            message: commit_message(next, stage, strategy, ctx.feedback.as_deref()),
            paths,
            all: stage == Stage::Implement,
            strategy,
            replaces: ctx.replaces.clone(),
        })
    }

    /// Path and content of an upstream artifact, if recorded.
    fn read_input(&self, run: &PipelineRun, stage: Stage) -> Result<Option<(String, String)>> {
        run.artifact(stage)
            .map(|record| Ok((record.path.clone(), self.artifacts.read(record)?)))
            .transpose()
    }

    fn open_or_update_review(&self, run: &PipelineRun, summary: &str) -> Result<ReviewRef> {
        let path_of = |stage| {
            run.artifact(stage)
                .map(|a| a.path.clone())
                .ok_or_else(|| PipelineError::DependencyViolation {
                    feature_id: run.feature_id.clone(),
                    stage: Stage::Implement,
                    missing: stage,
                })
        };
        let research_path = path_of(Stage::Research)?;
        let plan_path = path_of(Stage::Plan)?;
        let body = self.prompts.render_review_body(&ReviewBodyInput {
            item: &run.item,
            summary,
            research_path: &research_path,
            plan_path: &plan_path,
        })?;
        self.review.open_or_update_review(&ReviewRequest {
            feature_id: run.feature_id.clone(),
            branch: run.branch.clone(),
            title: run.item.title.clone(),
            body,
            existing: run.review.clone(),
        })
    }
}

fn outcome(run: &PipelineRun, strategy: CommitStrategy) -> RunOutcome {
    RunOutcome {
        feature_id: run.feature_id.clone(),
        stage: run.current_stage,
        review: run.review.clone(),
        strategy,
    }
}

/// `[stage] <title>`, with rerun details in the body.
fn commit_message(
    run: &PipelineRun,
    stage: Stage,
    strategy: CommitStrategy,
    feedback: Option<&str>,
) -> String {
    let mut message = format!("[{stage}] {}", run.item.title);
    if let Some(feedback) = feedback {
        message.push_str(&format!("\n\nRerun ({strategy}) feedback:\n{feedback}"));
    }
    message.push_str(&format!("\n\nFeature: {}", run.feature_id));
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::WorkItem;

    fn run() -> PipelineRun {
        PipelineRun::new(
            "f1",
            WorkItem {
                id: "1".to_string(),
                title: "Add rate limiting".to_string(),
                url: None,
            },
            None,
            "rpi/f1",
            Utc::now(),
        )
    }

    #[test]
    fn commit_message_is_tagged_with_stage() {
        let message = commit_message(&run(), Stage::Plan, CommitStrategy::Append, None);
        assert!(message.starts_with("[plan] Add rate limiting"));
        assert!(message.ends_with("Feature: f1"));
    }

    #[test]
    fn commit_message_carries_rerun_feedback() {
        let message = commit_message(
            &run(),
            Stage::Research,
            CommitStrategy::Rewrite,
            Some("check the cache"),
        );
        assert!(message.contains("Rerun (rewrite) feedback:\ncheck the cache"));
    }
}
