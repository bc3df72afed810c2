//! Review host adapter (issues, pull requests, reactions).
//!
//! [`GhReviewHost`] shells out to the `gh` CLI, which carries authentication
//! and repository detection.

use std::path::PathBuf;
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::core::types::{ReviewRef, ReviewStatus};

/// Where a user-visible message goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoticeTarget {
    /// The originating work item.
    Item(String),
    /// A review object's thread.
    Review(String),
}

/// Review object to open, or to update when `existing` is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewRequest {
    pub feature_id: String,
    pub branch: String,
    pub title: String,
    pub body: String,
    pub existing: Option<ReviewRef>,
}

pub trait ReviewHost {
    /// React to a comment so the requester sees it was parsed.
    fn acknowledge(&self, review_id: &str, comment_id: &str, reaction: &str) -> Result<()>;

    fn notify(&self, target: &NoticeTarget, message: &str) -> Result<()>;

    fn open_or_update_review(&self, request: &ReviewRequest) -> Result<ReviewRef>;

    fn review_status(&self, review_id: &str) -> Result<ReviewStatus>;

    /// Login of whoever opened the review object.
    fn review_author(&self, review_id: &str) -> Result<String>;
}

/// [`ReviewHost`] backed by the `gh` CLI.
#[derive(Debug, Clone)]
pub struct GhReviewHost {
    workdir: PathBuf,
    base_branch: String,
}

impl GhReviewHost {
    pub fn new(workdir: impl Into<PathBuf>, base_branch: impl Into<String>) -> Self {
        Self {
            workdir: workdir.into(),
            base_branch: base_branch.into(),
        }
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("gh")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn gh {}", args.first().copied().unwrap_or_default()))
    }

    fn run_checked(&self, args: &[&str]) -> Result<String> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("gh {} failed: {}", args[..args.len().min(2)].join(" "), stderr.trim());
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn find_open_review(&self, branch: &str) -> Result<Option<ReviewRef>> {
        let output = self.run(&["pr", "view", branch, "--json", "number,url,state"])?;
        if !output.status.success() {
            return Ok(None);
        }
        let view: PrView = serde_json::from_slice(&output.stdout).context("parse gh pr view")?;
        if view.state != "OPEN" {
            return Ok(None);
        }
        Ok(Some(ReviewRef {
            id: view.number.to_string(),
            url: view.url,
        }))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PrView {
    #[serde(default)]
    number: u64,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    state: String,
    #[serde(default)]
    merged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    author: Option<PrAuthor>,
}

#[derive(Debug, Deserialize)]
struct PrAuthor {
    login: String,
}

impl ReviewHost for GhReviewHost {
    #[instrument(skip_all, fields(review_id, comment_id))]
    fn acknowledge(&self, review_id: &str, comment_id: &str, reaction: &str) -> Result<()> {
        let endpoint = format!("repos/{{owner}}/{{repo}}/issues/comments/{comment_id}/reactions");
        let content = format!("content={reaction}");
        self.run_checked(&["api", "--method", "POST", &endpoint, "-f", &content])?;
        debug!(review_id, reaction, "acknowledged comment");
        Ok(())
    }

    fn notify(&self, target: &NoticeTarget, message: &str) -> Result<()> {
        let (kind, id) = match target {
            NoticeTarget::Item(id) => ("issue", id),
            NoticeTarget::Review(id) => ("pr", id),
        };
        self.run_checked(&[kind, "comment", id, "--body", message])?;
        Ok(())
    }

    #[instrument(skip_all, fields(feature_id = %request.feature_id, branch = %request.branch))]
    fn open_or_update_review(&self, request: &ReviewRequest) -> Result<ReviewRef> {
        let existing = match &request.existing {
            Some(review) => Some(review.clone()),
            None => self.find_open_review(&request.branch)?,
        };
        if let Some(review) = existing {
            self.run_checked(&[
                "pr",
                "edit",
                &review.id,
                "--title",
                &request.title,
                "--body",
                &request.body,
            ])?;
            debug!(review_id = %review.id, "updated review");
            return Ok(review);
        }

        let url = self.run_checked(&[
            "pr",
            "create",
            "--head",
            &request.branch,
            "--base",
            &self.base_branch,
            "--title",
            &request.title,
            "--body",
            &request.body,
        ])?;
        let id = review_id_from_url(&url)
            .with_context(|| format!("unexpected gh pr create output '{url}'"))?;
        debug!(review_id = %id, "opened review");
        Ok(ReviewRef { id, url: Some(url) })
    }

    fn review_status(&self, review_id: &str) -> Result<ReviewStatus> {
        let raw = self.run_checked(&["pr", "view", review_id, "--json", "state,mergedAt,closedAt"])?;
        parse_status(&raw)
    }

    fn review_author(&self, review_id: &str) -> Result<String> {
        let raw = self.run_checked(&["pr", "view", review_id, "--json", "author"])?;
        let view: PrView = serde_json::from_str(&raw).context("parse gh pr view")?;
        view.author
            .map(|a| a.login)
            .filter(|login| !login.is_empty())
            .ok_or_else(|| anyhow!("review {review_id} has no author"))
    }
}

/// Trailing number of a `.../pull/<n>` URL.
fn review_id_from_url(url: &str) -> Option<String> {
    let last = url.lines().last()?.trim().trim_end_matches('/');
    let (_, id) = last.rsplit_once('/')?;
    (!id.is_empty() && id.chars().all(|c| c.is_ascii_digit())).then(|| id.to_string())
}

fn parse_status(raw: &str) -> Result<ReviewStatus> {
    let view: PrView = serde_json::from_str(raw).context("parse gh pr view")?;
    match view.state.as_str() {
        "OPEN" => Ok(ReviewStatus::Open),
        "MERGED" => view
            .merged_at
            .or(view.closed_at)
            .map(|at| ReviewStatus::Merged { at })
            .ok_or_else(|| anyhow!("merged review without mergedAt")),
        "CLOSED" => view
            .closed_at
            .map(|at| ReviewStatus::Closed { at })
            .ok_or_else(|| anyhow!("closed review without closedAt")),
        other => Err(anyhow!("unknown review state '{other}'")),
    }
}
