//! Agent executor abstraction.
//!
//! The [`AgentExecutor`] trait decouples the stage controller from the actual
//! reasoning backend. The default [`CommandAgent`] pipes the prompt into a
//! configured command and treats its stdout as the stage content. Tests use
//! scripted executors that never spawn processes.

use std::path::PathBuf;
use std::process::Command;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use super::atomic::write_atomic;
use super::config::AgentConfig;
use super::process::run_command_with_timeout;
use crate::core::types::Stage;

/// What the agent is allowed to touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentMode {
    /// May read the repository; output is returned, never applied.
    ReadOnly,
    /// May edit the working tree (Implement).
    Write,
}

/// One agent invocation.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub feature_id: String,
    /// `None` for ad-hoc queries.
    pub stage: Option<Stage>,
    pub mode: AgentMode,
    pub prompt: String,
    pub workdir: PathBuf,
}

impl AgentRequest {
    /// Short name used in log file names.
    pub fn label(&self) -> &'static str {
        self.stage.map_or("adhoc", Stage::as_str)
    }
}

/// Abstraction over agent backends.
pub trait AgentExecutor {
    /// Run the agent to completion and return its output text.
    ///
    /// Any error (including a timeout) means the invocation produced nothing
    /// usable.
    fn run(&self, request: &AgentRequest) -> Result<String>;
}

/// Agent that spawns the configured command with the prompt on stdin.
#[derive(Debug, Clone)]
pub struct CommandAgent {
    config: AgentConfig,
    logs_dir: PathBuf,
}

impl CommandAgent {
    pub fn new(config: AgentConfig, logs_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            logs_dir: logs_dir.into(),
        }
    }

    fn command(&self, request: &AgentRequest) -> Result<Command> {
        let (program, base_args) = self
            .config
            .command
            .split_first()
            .ok_or_else(|| anyhow!("agent.command is empty"))?;
        let mode_args = match request.mode {
            AgentMode::ReadOnly => &self.config.read_only_args,
            AgentMode::Write => &self.config.write_args,
        };
        let mut cmd = Command::new(program);
        cmd.args(base_args)
            .args(mode_args)
            .current_dir(&request.workdir);
        Ok(cmd)
    }

    fn log_path(&self, request: &AgentRequest) -> PathBuf {
        self.logs_dir.join(&request.feature_id).join(format!(
            "{}-{}.log",
            Utc::now().format("%Y%m%dT%H%M%S%.3fZ"),
            request.label()
        ))
    }
}

impl AgentExecutor for CommandAgent {
    #[instrument(skip_all, fields(feature_id = %request.feature_id, task = request.label()))]
    fn run(&self, request: &AgentRequest) -> Result<String> {
        info!(workdir = %request.workdir.display(), mode = ?request.mode, "starting agent");
        let timeout = self.config.stage_timeout();
        let output = run_command_with_timeout(
            self.command(request)?,
            Some(request.prompt.as_bytes()),
            timeout,
            self.config.output_limit_bytes,
        )
        .context("run agent command")?;

        let log_path = self.log_path(request);
        if let Err(err) = write_atomic(&log_path, output.transcript("agent").as_bytes()) {
            warn!(err = %err, path = %log_path.display(), "failed to write agent transcript");
        }

        if !output.succeeded() {
            if output.timed_out {
                warn!(timeout_secs = timeout.as_secs(), "agent timed out");
                return Err(anyhow!("agent timed out after {}s", timeout.as_secs()));
            }
            warn!(exit_code = ?output.status.code(), "agent failed");
            let stderr = output.stderr_lossy();
            return Err(anyhow!(
                "agent exited with status {:?}: {}",
                output.status.code(),
                stderr.trim()
            ));
        }
        if output.stdout_truncated > 0 {
            return Err(anyhow!(
                "agent output exceeded {} bytes",
                self.config.output_limit_bytes
            ));
        }

        debug!(bytes = output.stdout.len(), "agent completed");
        Ok(output.stdout_lossy())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;

    fn config(script: &str) -> AgentConfig {
        AgentConfig {
            command: vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            read_only_args: Vec::new(),
            write_args: Vec::new(),
            stage_timeout_secs: 5,
            output_limit_bytes: 1024,
        }
    }

    fn request(workdir: &std::path::Path) -> AgentRequest {
        AgentRequest {
            feature_id: "f1".to_string(),
            stage: Some(Stage::Research),
            mode: AgentMode::ReadOnly,
            prompt: "research this".to_string(),
            workdir: workdir.to_path_buf(),
        }
    }

    #[test]
    fn stdout_is_the_stage_content_and_transcript_is_logged() {
        let temp = tempfile::tempdir().expect("tempdir");
        let logs = temp.path().join("logs");
        let agent = CommandAgent::new(config("printf 'got: '; cat"), &logs);

        let content = agent.run(&request(temp.path())).expect("run");
        assert_eq!(content, "got: research this");

        let entries: Vec<_> = fs::read_dir(logs.join("f1"))
            .expect("log dir")
            .map(|e| e.expect("entry").path())
            .collect();
        assert_eq!(entries.len(), 1);
        let name = entries[0].file_name().and_then(|n| n.to_str()).expect("name");
        assert!(name.ends_with("-research.log"));
        let log = fs::read_to_string(&entries[0]).expect("read log");
        assert!(log.starts_with("=== stdout ===\ngot: research this"));
    }

    #[test]
    fn nonzero_exit_is_an_error_with_stderr() {
        let temp = tempfile::tempdir().expect("tempdir");
        let agent = CommandAgent::new(config("echo 'no credits' >&2; exit 1"), temp.path());
        let err = agent.run(&request(temp.path())).unwrap_err();
        assert!(err.to_string().contains("no credits"));
    }

    #[test]
    fn timeout_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut cfg = config("exec sleep 5");
        cfg.stage_timeout_secs = 1;
        let agent = CommandAgent::new(cfg, temp.path());
        let err = agent.run(&request(temp.path())).unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
