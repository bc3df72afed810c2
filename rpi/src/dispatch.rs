//! Orchestration for `rpi dispatch`: classify one event and act on it.
//!
//! Rerun commands are acknowledged before any work starts. Every failure is
//! reported back on the thread that triggered it, then returned to the caller.
//! Everything posted carries [`NOTICE_MARKER`] so it never re-enters dispatch.

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use crate::controller::{Controller, RunOutcome};
use crate::core::trigger::{Event, Intent, NOTICE_MARKER, classify};
use crate::errors::pipeline_error;
use crate::io::agent::AgentExecutor;
use crate::io::git::SourceControl;
use crate::io::review::{NoticeTarget, ReviewHost};
use crate::sweep::{SweepReport, sweep};

/// What a dispatched event led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Not addressed to the pipeline; nothing happened.
    Ignored,
    Run(RunOutcome),
    Answered { review_id: String },
    Swept(SweepReport),
}

/// Classify `event` and execute the resulting intent.
#[instrument(skip_all)]
pub fn dispatch<A, S, R>(
    controller: &Controller<'_, A, S, R>,
    event: &Event,
    now: DateTime<Utc>,
) -> Result<DispatchOutcome>
where
    A: AgentExecutor,
    S: SourceControl,
    R: ReviewHost,
{
    let rules = controller.config().dispatch_rules();
    let runs = controller.runs();
    let intent = classify(
        event,
        &rules,
        |feature_id| {
            runs.is_active(feature_id).unwrap_or_else(|err| {
                warn!(feature_id, err = %format!("{err:#}"), "run lookup failed; treating as inactive");
                false
            })
        },
        |review_id| {
            runs.find_by_review(review_id)
                .map(|run| run.is_some())
                .unwrap_or_else(|err| {
                    warn!(review_id, err = %format!("{err:#}"), "review lookup failed; ignoring comment");
                    false
                })
        },
    );
    let review = controller.review_host();

    match intent {
        Intent::Unrecognized => {
            debug!("event not addressed to the pipeline");
            Ok(DispatchOutcome::Ignored)
        }
        Intent::NewRun(request) => {
            info!(feature_id = %request.feature_id, item = %request.item.id, "new run");
            let target = NoticeTarget::Item(request.item.id.clone());
            let outcome = reported(review, &target, controller.start_run(&request))?;
            Ok(DispatchOutcome::Run(outcome))
        }
        Intent::Resume { feature_id, actor } => {
            info!(feature_id = %feature_id, actor = %actor, "resume");
            let target = match controller.runs().load(&feature_id) {
                Ok(Some(run)) => Some(NoticeTarget::Item(run.item.id)),
                _ => None,
            };
            let result = controller.resume(&feature_id, &actor);
            let outcome = match target {
                Some(target) => reported(review, &target, result)?,
                None => result?,
            };
            Ok(DispatchOutcome::Run(outcome))
        }
        Intent::Rerun(request) => {
            info!(
                review_id = %request.review_id,
                target = request.target.token(),
                actor = %request.actor,
                "rerun requested"
            );
            if let Some(comment_id) = &request.comment_id
                && let Err(err) = review.acknowledge(
                    &request.review_id,
                    comment_id,
                    &controller.config().ack_reaction,
                )
            {
                warn!(err = %format!("{err:#}"), "acknowledgment failed");
            }
            let target = NoticeTarget::Review(request.review_id.clone());
            let outcome = reported(review, &target, controller.rerun(&request))?;
            notify_quietly(
                review,
                &target,
                &format!(
                    "`{}` finished ({} history); the run is at {}.",
                    request.target.token(),
                    outcome.strategy,
                    outcome.stage
                ),
            );
            Ok(DispatchOutcome::Run(outcome))
        }
        Intent::AdHocQuery(query) => {
            info!(review_id = %query.review_id, actor = %query.actor, "ad-hoc query");
            let target = NoticeTarget::Review(query.review_id.clone());
            let answer = reported(review, &target, controller.answer(&query))?;
            review.notify(&target, &signed(&answer))?;
            Ok(DispatchOutcome::Answered {
                review_id: query.review_id,
            })
        }
        Intent::ScheduledCleanup { time } => {
            info!(%time, "scheduled cleanup");
            // The event's own time only labels the tick; eligibility is judged at `now`.
            let report = sweep(
                controller.paths(),
                controller.config(),
                controller.scm(),
                review,
                now,
            )?;
            Ok(DispatchOutcome::Swept(report))
        }
    }
}

/// Post a failure notice on `target` before handing `result` back.
fn reported<T, R: ReviewHost>(review: &R, target: &NoticeTarget, result: Result<T>) -> Result<T> {
    if let Err(err) = &result {
        notify_quietly(review, target, &failure_notice(err));
    }
    result
}

fn notify_quietly<R: ReviewHost>(review: &R, target: &NoticeTarget, message: &str) {
    if let Err(err) = review.notify(target, &signed(message)) {
        warn!(err = %format!("{err:#}"), "notification failed");
    }
}

fn signed(message: &str) -> String {
    format!("{}\n\n{NOTICE_MARKER}", message.trim_end())
}

fn failure_notice(err: &anyhow::Error) -> String {
    match pipeline_error(err) {
        Some(kind) if kind.is_rejection() => format!("rpi rejected this request: {kind}"),
        Some(kind) => format!("rpi failed: {kind}"),
        None => format!("rpi failed: {err:#}"),
    }
}
