//! Source-control adapter.
//!
//! The controller only talks to [`SourceControl`]; [`GitSourceControl`] is the
//! default implementation on top of a small wrapper around `git` subprocess
//! calls.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use super::atomic::write_atomic;
use super::config::GitConfig;
use crate::core::types::CommitStrategy;

/// A stage commit (or sweep commit) to record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRequest {
    pub message: String,
    /// Repository-relative paths to stage. Missing files are staged as deletions.
    pub paths: Vec<String>,
    /// Stage every change in the working tree instead of `paths`.
    pub all: bool,
    pub strategy: CommitStrategy,
    /// Under `Rewrite`, the earliest commit being replaced: the branch is
    /// reset to its parent before committing.
    pub replaces: Option<String>,
}

/// Operations the controller and sweeper need from version control.
pub trait SourceControl {
    /// Check out `branch`, creating it from the base branch if needed.
    fn prepare_branch(&self, branch: &str) -> Result<()>;

    fn current_branch(&self) -> Result<String>;

    /// Record a commit and return its sha.
    fn commit(&self, request: &CommitRequest) -> Result<String>;

    /// Push `branch`. `force` publishes rewritten history.
    fn publish(&self, branch: &str, force: bool) -> Result<()>;
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Return the current branch name (errors on detached HEAD).
    pub fn current_branch(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        let name = out.trim().to_string();
        if name == "HEAD" {
            warn!("detached HEAD detected");
            return Err(anyhow!("detached HEAD (refuse to run)"));
        }
        Ok(name)
    }

    pub fn rev_parse(&self, rev: &str) -> Result<String> {
        Ok(self.run_capture(&["rev-parse", "--verify", rev])?.trim().to_string())
    }

    /// Check whether a local branch exists.
    pub fn branch_exists(&self, branch: &str) -> Result<bool> {
        let status = self
            .run(&[
                "show-ref",
                "--verify",
                "--quiet",
                &format!("refs/heads/{branch}"),
            ])?
            .status;
        Ok(status.success())
    }

    pub fn checkout(&self, branch: &str) -> Result<()> {
        self.run_checked(&["checkout", branch])?;
        Ok(())
    }

    pub fn checkout_new_branch(&self, branch: &str, start: &str) -> Result<()> {
        self.run_checked(&["checkout", "-b", branch, start])?;
        Ok(())
    }

    pub fn reset_hard(&self, rev: &str) -> Result<()> {
        self.run_checked(&["reset", "--hard", rev])?;
        Ok(())
    }

    /// Stage all changes (respects .gitignore).
    pub fn add_all(&self) -> Result<()> {
        self.run_checked(&["add", "-A"])?;
        Ok(())
    }

    /// Stage `paths`, recording missing ones as deletions.
    pub fn add_paths(&self, paths: &[String]) -> Result<()> {
        for path in paths {
            if self.workdir.join(path).exists() {
                self.run_checked(&["add", "-A", "--", path])?;
            } else {
                self.run_checked(&["rm", "-r", "-q", "--cached", "--ignore-unmatch", "--", path])?;
            }
        }
        Ok(())
    }

    /// Commit whatever is staged, even if nothing is.
    pub fn commit_allow_empty(&self, message: &str) -> Result<()> {
        self.run_checked(&["commit", "--allow-empty", "-m", message])?;
        Ok(())
    }

    pub fn push(&self, remote: &str, branch: &str, force: bool) -> Result<()> {
        let mut args = vec!["push"];
        if force {
            args.push("--force-with-lease");
        }
        args.extend(["-u", remote, branch]);
        self.run_checked(&args)?;
        Ok(())
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

/// [`SourceControl`] backed by the `git` CLI.
#[derive(Debug, Clone)]
pub struct GitSourceControl {
    git: Git,
    config: GitConfig,
}

impl GitSourceControl {
    pub fn new(workdir: impl Into<PathBuf>, config: GitConfig) -> Self {
        Self {
            git: Git::new(workdir),
            config,
        }
    }

    /// Snapshot the current contents of `paths` (`None` = absent).
    fn snapshot(&self, paths: &[String]) -> Result<BTreeMap<String, Option<Vec<u8>>>> {
        let mut saved = BTreeMap::new();
        for path in paths {
            let absolute = self.git.workdir().join(path);
            let contents = if absolute.is_file() {
                Some(fs::read(&absolute).with_context(|| format!("read {}", absolute.display()))?)
            } else {
                None
            };
            saved.insert(path.clone(), contents);
        }
        Ok(saved)
    }

    fn restore(&self, saved: &BTreeMap<String, Option<Vec<u8>>>) -> Result<()> {
        for (path, contents) in saved {
            let absolute = self.git.workdir().join(path);
            match contents {
                Some(bytes) => write_atomic(&absolute, bytes)?,
                None if absolute.is_dir() => fs::remove_dir_all(&absolute)
                    .with_context(|| format!("remove {}", absolute.display()))?,
                None if absolute.exists() => fs::remove_file(&absolute)
                    .with_context(|| format!("remove {}", absolute.display()))?,
                None => {}
            }
        }
        Ok(())
    }
}

impl SourceControl for GitSourceControl {
    #[instrument(skip_all, fields(branch))]
    fn prepare_branch(&self, branch: &str) -> Result<()> {
        if self.git.current_branch()? == branch {
            return Ok(());
        }
        if self.git.branch_exists(branch)? {
            debug!(branch, "checking out existing run branch");
            self.git.checkout(branch)
        } else {
            debug!(branch, base = %self.config.base_branch, "creating run branch");
            self.git
                .checkout_new_branch(branch, &self.config.base_branch)
        }
    }

    fn current_branch(&self) -> Result<String> {
        self.git.current_branch()
    }

    #[instrument(skip_all, fields(strategy = %request.strategy))]
    fn commit(&self, request: &CommitRequest) -> Result<String> {
        if request.strategy == CommitStrategy::Rewrite
            && let Some(replaced) = &request.replaces
        {
            let saved = self.snapshot(&request.paths)?;
            let parent = self
                .git
                .rev_parse(&format!("{replaced}^"))
                .with_context(|| format!("resolve parent of {replaced}"))?;
            info!(replaced = %replaced, parent = %parent, "rewriting stage history");
            self.git.reset_hard(&parent)?;
            self.restore(&saved)?;
        }

        if request.all {
            self.git.add_all()?;
        } else {
            self.git.add_paths(&request.paths)?;
        }
        self.git.commit_allow_empty(&request.message)?;
        let sha = self.git.rev_parse("HEAD")?;
        debug!(sha = %sha, "committed");
        Ok(sha)
    }

    #[instrument(skip_all, fields(branch, force))]
    fn publish(&self, branch: &str, force: bool) -> Result<()> {
        if !self.config.push {
            debug!("push disabled; not publishing");
            return Ok(());
        }
        self.git.push(&self.config.remote, branch, force)
    }
}
