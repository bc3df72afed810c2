//! Classification of inbound trigger events into pipeline intents.
//!
//! Classification is total and side-effect free: every event maps to exactly
//! one [`Intent`], and anything not addressed to the pipeline becomes
//! [`Intent::Unrecognized`]. Downstream code never looks at raw comment text.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::feature_id::feature_id;
use crate::core::types::{RerunTarget, WorkItem};

/// Raw trigger delivered by the hosting platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Event {
    /// A label was applied to a tracked work item.
    Label {
        item_id: String,
        title: String,
        label: String,
        actor: String,
        #[serde(default)]
        url: Option<String>,
    },
    /// A comment was posted on a review object.
    Comment {
        review_id: String,
        comment_id: String,
        body: String,
        actor: String,
    },
    /// The pipeline was mentioned on a review object.
    Mention {
        review_id: String,
        #[serde(default)]
        comment_id: Option<String>,
        body: String,
        actor: String,
    },
    /// Time-based maintenance tick.
    Schedule { time: DateTime<Utc> },
}

/// Qualifying label applied to an item with no active run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRun {
    pub feature_id: String,
    pub item: WorkItem,
    pub author: String,
}

/// Reviewer request to rewind a run to an earlier stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RerunRequest {
    pub review_id: String,
    pub comment_id: Option<String>,
    pub target: RerunTarget,
    pub feedback: String,
    pub actor: String,
}

/// Question addressed to the pipeline that is not a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdHocQuery {
    pub review_id: String,
    pub comment_id: Option<String>,
    pub question: String,
    pub actor: String,
}

/// Closed set of things an event can ask the pipeline to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    NewRun(NewRun),
    /// Qualifying label re-applied while the item's run is still active.
    Resume { feature_id: String, actor: String },
    Rerun(RerunRequest),
    AdHocQuery(AdHocQuery),
    ScheduledCleanup { time: DateTime<Utc> },
    Unrecognized,
}

/// Static classification rules taken from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchRules {
    pub qualifying_label: String,
    /// Handle that addresses a comment to the pipeline (e.g. `@rpi`).
    pub mention: String,
    pub feature_id_max_len: usize,
}

/// Hidden marker closing every comment the pipeline posts. Comments carrying
/// it are never classified, so the pipeline cannot trigger itself.
pub const NOTICE_MARKER: &str = "<!-- rpi:notice -->";

static COMMAND_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^/?(replan|reresearch)\b[\s:,]*(.*)$").expect("command regex is valid")
});

/// Classify `event`.
///
/// `has_active_run` answers whether a feature id already has a run that has
/// not reached `Completed`; `owns_review` whether a review object belongs to a
/// pipeline run. Comments on reviews the pipeline does not own are ignored.
pub fn classify<F, G>(
    event: &Event,
    rules: &DispatchRules,
    has_active_run: F,
    owns_review: G,
) -> Intent
where
    F: Fn(&str) -> bool,
    G: Fn(&str) -> bool,
{
    match event {
        Event::Label {
            item_id,
            title,
            label,
            actor,
            url,
        } => {
            if !label.trim().eq_ignore_ascii_case(rules.qualifying_label.trim()) {
                return Intent::Unrecognized;
            }
            let id = feature_id(title, rules.feature_id_max_len);
            if has_active_run(&id) {
                return Intent::Resume {
                    feature_id: id,
                    actor: actor.clone(),
                };
            }
            Intent::NewRun(NewRun {
                feature_id: id,
                item: WorkItem {
                    id: item_id.clone(),
                    title: title.clone(),
                    url: url.clone(),
                },
                author: actor.clone(),
            })
        }
        Event::Comment { review_id, .. } | Event::Mention { review_id, .. }
            if !owns_review(review_id) =>
        {
            Intent::Unrecognized
        }
        Event::Comment {
            review_id,
            comment_id,
            body,
            actor,
        } => classify_text(
            review_id,
            Some(comment_id.clone()),
            body,
            actor,
            rules,
            false,
        ),
        Event::Mention {
            review_id,
            comment_id,
            body,
            actor,
        } => classify_text(review_id, comment_id.clone(), body, actor, rules, true),
        Event::Schedule { time } => Intent::ScheduledCleanup { time: *time },
    }
}

fn classify_text(
    review_id: &str,
    comment_id: Option<String>,
    body: &str,
    actor: &str,
    rules: &DispatchRules,
    mentioned: bool,
) -> Intent {
    if body.contains(NOTICE_MARKER) {
        return Intent::Unrecognized;
    }
    let (addressed, text) = strip_mention(body.trim(), &rules.mention);

    if let Some((target, feedback)) = parse_command(text) {
        return Intent::Rerun(RerunRequest {
            review_id: review_id.to_string(),
            comment_id,
            target,
            feedback,
            actor: actor.to_string(),
        });
    }

    if mentioned || addressed || mentions(body, &rules.mention) {
        return Intent::AdHocQuery(AdHocQuery {
            review_id: review_id.to_string(),
            comment_id,
            question: text.trim().to_string(),
            actor: actor.to_string(),
        });
    }

    Intent::Unrecognized
}

/// Split `(target, feedback)` off a command comment.
fn parse_command(text: &str) -> Option<(RerunTarget, String)> {
    let caps = COMMAND_RE.captures(text)?;
    let target = RerunTarget::from_token(caps.get(1)?.as_str())?;
    let feedback = caps.get(2).map_or("", |m| m.as_str()).trim().to_string();
    Some((target, feedback))
}

/// Remove a leading mention handle. Returns whether one was present.
fn strip_mention<'a>(text: &'a str, mention: &str) -> (bool, &'a str) {
    let mention = mention.trim();
    if mention.is_empty() || text.len() < mention.len() {
        return (false, text);
    }
    let (head, rest) = text.split_at(mention.len());
    if !head.eq_ignore_ascii_case(mention) {
        return (false, text);
    }
    if rest.chars().next().is_some_and(|c| c.is_alphanumeric() || c == '-' || c == '_') {
        // `@rpi-bot` is a different handle.
        return (false, text);
    }
    (true, rest.trim_start_matches([',', ':']).trim_start())
}

/// Whether `body` mentions the handle anywhere as a standalone token, by the
/// same boundary rule as [`strip_mention`]. `x@rpi.io` is not a mention.
fn mentions(body: &str, mention: &str) -> bool {
    let mention = mention.trim();
    if mention.is_empty() {
        return false;
    }
    let pattern = format!(
        r"(?i)(?:^|[^\w@.-]){}(?:$|[^\w-])",
        regex::escape(mention)
    );
    Regex::new(&pattern).is_ok_and(|re| re.is_match(body))
}
