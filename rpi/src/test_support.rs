//! Test-only collaborators and workspace builders.
//!
//! None of these spawn processes: the agent replays a script, source control
//! records commit requests, and the review host records what it was told.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use tempfile::TempDir;

use crate::controller::Controller;
use crate::core::trigger::Event;
use crate::core::types::{ReviewRef, ReviewStatus};
use crate::io::agent::{AgentExecutor, AgentRequest};
use crate::io::config::{PipelineConfig, write_config};
use crate::io::git::{CommitRequest, SourceControl};
use crate::io::init::{InitOptions, PipelinePaths, init_workspace};
use crate::io::review::{NoticeTarget, ReviewHost, ReviewRequest};
use crate::io::run_store::RunStore;

/// One scripted agent response.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Output(String),
    Fail(String),
}

/// Agent that replays a queue of replies and records every request.
#[derive(Debug, Default)]
pub struct ScriptedAgent {
    replies: Mutex<VecDeque<ScriptedReply>>,
    requests: Mutex<Vec<AgentRequest>>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedAgent {
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            ..Self::default()
        }
    }

    /// Replies that all succeed with the given outputs.
    pub fn outputs(outputs: &[&str]) -> Self {
        Self::new(
            outputs
                .iter()
                .map(|output| ScriptedReply::Output((*output).to_string()))
                .collect(),
        )
    }

    /// Hold each invocation for `delay`, so overlapping calls would be visible.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push(&self, reply: ScriptedReply) {
        self.replies.lock().expect("replies lock").push_back(reply);
    }

    pub fn requests(&self) -> Vec<AgentRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    /// Highest number of invocations observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().expect("replies lock").len()
    }
}

impl AgentExecutor for ScriptedAgent {
    fn run(&self, request: &AgentRequest) -> Result<String> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        let reply = self.replies.lock().expect("replies lock").pop_front();
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        match reply {
            Some(ScriptedReply::Output(output)) => Ok(output),
            Some(ScriptedReply::Fail(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("scripted agent has no reply left")),
        }
    }
}

/// Source control that records requests and hands out synthetic shas.
#[derive(Debug)]
pub struct RecordingScm {
    commits: Mutex<Vec<CommitRequest>>,
    publishes: Mutex<Vec<(String, bool)>>,
    branch: Mutex<String>,
    fail_next_commit: AtomicBool,
}

impl Default for RecordingScm {
    fn default() -> Self {
        Self {
            commits: Mutex::new(Vec::new()),
            publishes: Mutex::new(Vec::new()),
            branch: Mutex::new("main".to_string()),
            fail_next_commit: AtomicBool::new(false),
        }
    }
}

impl RecordingScm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commits(&self) -> Vec<CommitRequest> {
        self.commits.lock().expect("commits lock").clone()
    }

    pub fn publishes(&self) -> Vec<(String, bool)> {
        self.publishes.lock().expect("publishes lock").clone()
    }

    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Sha the `n`-th recorded commit (1-based) was given.
    pub fn sha(n: usize) -> String {
        format!("{n:040x}")
    }
}

impl SourceControl for RecordingScm {
    fn prepare_branch(&self, branch: &str) -> Result<()> {
        *self.branch.lock().expect("branch lock") = branch.to_string();
        Ok(())
    }

    fn current_branch(&self) -> Result<String> {
        Ok(self.branch.lock().expect("branch lock").clone())
    }

    fn commit(&self, request: &CommitRequest) -> Result<String> {
        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(anyhow!("scripted commit failure"));
        }
        let mut commits = self.commits.lock().expect("commits lock");
        commits.push(request.clone());
        Ok(Self::sha(commits.len()))
    }

    fn publish(&self, branch: &str, force: bool) -> Result<()> {
        self.publishes
            .lock()
            .expect("publishes lock")
            .push((branch.to_string(), force));
        Ok(())
    }
}

/// Review host that records calls and answers lookups from configuration.
#[derive(Debug)]
pub struct FakeReviewHost {
    acks: Mutex<Vec<(String, String, String)>>,
    notices: Mutex<Vec<(NoticeTarget, String)>>,
    upserts: Mutex<Vec<ReviewRequest>>,
    /// `None` makes the lookup fail.
    status: Mutex<Option<ReviewStatus>>,
    /// `None` makes the lookup fail.
    author: Mutex<Option<String>>,
}

impl Default for FakeReviewHost {
    fn default() -> Self {
        Self {
            acks: Mutex::new(Vec::new()),
            notices: Mutex::new(Vec::new()),
            upserts: Mutex::new(Vec::new()),
            status: Mutex::new(Some(ReviewStatus::Open)),
            author: Mutex::new(None),
        }
    }
}

impl FakeReviewHost {
    pub const REVIEW_ID: &'static str = "42";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_status(&self, status: Option<ReviewStatus>) {
        *self.status.lock().expect("status lock") = status;
    }

    pub fn set_author(&self, author: Option<&str>) {
        *self.author.lock().expect("author lock") = author.map(str::to_string);
    }

    pub fn acks(&self) -> Vec<(String, String, String)> {
        self.acks.lock().expect("acks lock").clone()
    }

    pub fn notices(&self) -> Vec<(NoticeTarget, String)> {
        self.notices.lock().expect("notices lock").clone()
    }

    pub fn upserts(&self) -> Vec<ReviewRequest> {
        self.upserts.lock().expect("upserts lock").clone()
    }
}

impl ReviewHost for FakeReviewHost {
    fn acknowledge(&self, review_id: &str, comment_id: &str, reaction: &str) -> Result<()> {
        self.acks.lock().expect("acks lock").push((
            review_id.to_string(),
            comment_id.to_string(),
            reaction.to_string(),
        ));
        Ok(())
    }

    fn notify(&self, target: &NoticeTarget, message: &str) -> Result<()> {
        self.notices
            .lock()
            .expect("notices lock")
            .push((target.clone(), message.to_string()));
        Ok(())
    }

    fn open_or_update_review(&self, request: &ReviewRequest) -> Result<ReviewRef> {
        self.upserts
            .lock()
            .expect("upserts lock")
            .push(request.clone());
        Ok(request.existing.clone().unwrap_or_else(|| ReviewRef {
            id: Self::REVIEW_ID.to_string(),
            url: Some(format!("https://example.test/pull/{}", Self::REVIEW_ID)),
        }))
    }

    fn review_status(&self, review_id: &str) -> Result<ReviewStatus> {
        self.status
            .lock()
            .expect("status lock")
            .ok_or_else(|| anyhow!("status of review {review_id} unavailable"))
    }

    fn review_author(&self, review_id: &str) -> Result<String> {
        self.author
            .lock()
            .expect("author lock")
            .clone()
            .ok_or_else(|| anyhow!("author of review {review_id} unavailable"))
    }
}

/// Initialized `.rpi/` workspace in a temporary directory.
pub struct TestWorkspace {
    _temp: TempDir,
    paths: PipelinePaths,
    config: PipelineConfig,
}

impl TestWorkspace {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir()?;
        let paths = init_workspace(temp.path(), &InitOptions::default())?;
        let mut config = PipelineConfig::default();
        config.git.push = false;
        write_config(&paths.config_path, &config)?;
        Ok(Self {
            _temp: temp,
            paths,
            config,
        })
    }

    pub fn root(&self) -> &Path {
        &self.paths.root
    }

    pub fn paths(&self) -> &PipelinePaths {
        &self.paths
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn runs(&self) -> RunStore {
        RunStore::new(&self.paths)
    }

    /// Absolute path of a repository-relative artifact path.
    pub fn artifact(&self, relative: &str) -> std::path::PathBuf {
        self.paths.root.join(relative)
    }

    pub fn controller<'a, A, S, R>(
        &self,
        agent: &'a A,
        scm: &'a S,
        review: &'a R,
    ) -> Result<Controller<'a, A, S, R>>
    where
        A: AgentExecutor,
        S: SourceControl,
        R: ReviewHost,
    {
        Controller::new(self.paths.clone(), self.config.clone(), agent, scm, review)
    }
}

/// Qualifying label event for an item.
pub fn label_event(item_id: &str, title: &str, actor: &str) -> Event {
    Event::Label {
        item_id: item_id.to_string(),
        title: title.to_string(),
        label: PipelineConfig::default().qualifying_label,
        actor: actor.to_string(),
        url: None,
    }
}

/// Review comment event.
pub fn comment_event(review_id: &str, comment_id: &str, body: &str, actor: &str) -> Event {
    Event::Comment {
        review_id: review_id.to_string(),
        comment_id: comment_id.to_string(),
        body: body.to_string(),
        actor: actor.to_string(),
    }
}

pub fn schedule_event(time: DateTime<Utc>) -> Event {
    Event::Schedule { time }
}
