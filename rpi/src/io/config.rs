//! Pipeline configuration stored under `.rpi/config.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use super::atomic::write_atomic;
use crate::core::artifact::is_contained_relative;
use crate::core::feature_id::MIN_FEATURE_ID_LEN;
use crate::core::trigger::DispatchRules;

/// Pipeline configuration (TOML).
///
/// Edited by humans; every field has a default so a missing file or key
/// still yields a usable configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Repository-relative directory holding `<feature_id>/{research,plan}.md`.
    pub artifact_root: String,

    /// Label that starts (or resumes) a run when applied to a work item.
    pub qualifying_label: String,

    /// Handle that addresses a comment to the pipeline.
    pub mention: String,

    /// Reaction used to acknowledge a parsed rerun command.
    pub ack_reaction: String,

    /// Days a finalized run's artifacts are kept before the sweeper removes them.
    pub retention_days: u32,

    pub feature_id_max_len: usize,

    pub agent: AgentConfig,

    pub git: GitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Agent command; the prompt is fed on stdin (e.g. `["claude","-p"]`).
    pub command: Vec<String>,

    /// Extra arguments for Research, Plan and ad-hoc queries.
    pub read_only_args: Vec<String>,

    /// Extra arguments for Implement.
    pub write_args: Vec<String>,

    pub stage_timeout_secs: u64,

    /// Truncate captured stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GitConfig {
    pub remote: String,
    pub base_branch: String,
    pub branch_prefix: String,
    /// Push after every stage commit and after a sweep.
    pub push: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            artifact_root: "thoughts/shared/pipeline".to_string(),
            qualifying_label: "rpi".to_string(),
            mention: "@rpi".to_string(),
            ack_reaction: "eyes".to_string(),
            retention_days: 30,
            feature_id_max_len: 60,
            agent: AgentConfig::default(),
            git: GitConfig::default(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: vec!["claude".to_string(), "-p".to_string()],
            read_only_args: vec![
                "--permission-mode".to_string(),
                "plan".to_string(),
            ],
            write_args: vec![
                "--permission-mode".to_string(),
                "acceptEdits".to_string(),
            ],
            stage_timeout_secs: 60 * 60,
            output_limit_bytes: 1_000_000,
        }
    }
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            remote: "origin".to_string(),
            base_branch: "main".to_string(),
            branch_prefix: "rpi/".to_string(),
            push: true,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if !is_contained_relative(&self.artifact_root) {
            return Err(anyhow!(
                "artifact_root must be a relative path inside the repository"
            ));
        }
        if self.qualifying_label.trim().is_empty() {
            return Err(anyhow!("qualifying_label must not be empty"));
        }
        if self.mention.trim().is_empty() {
            return Err(anyhow!("mention must not be empty"));
        }
        if self.feature_id_max_len < MIN_FEATURE_ID_LEN {
            return Err(anyhow!(
                "feature_id_max_len must be >= {MIN_FEATURE_ID_LEN}"
            ));
        }
        if self.agent.command.is_empty() || self.agent.command[0].trim().is_empty() {
            return Err(anyhow!("agent.command must be a non-empty array"));
        }
        if self.agent.stage_timeout_secs == 0 {
            return Err(anyhow!("agent.stage_timeout_secs must be > 0"));
        }
        if self.agent.output_limit_bytes == 0 {
            return Err(anyhow!("agent.output_limit_bytes must be > 0"));
        }
        if self.git.remote.trim().is_empty() || self.git.base_branch.trim().is_empty() {
            return Err(anyhow!("git.remote and git.base_branch must not be empty"));
        }
        Ok(())
    }

    pub fn dispatch_rules(&self) -> DispatchRules {
        DispatchRules {
            qualifying_label: self.qualifying_label.clone(),
            mention: self.mention.clone(),
            feature_id_max_len: self.feature_id_max_len,
        }
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.retention_days))
    }

    pub fn branch_for(&self, feature_id: &str) -> String {
        format!("{}{feature_id}", self.git.branch_prefix)
    }
}

impl AgentConfig {
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `PipelineConfig::default()`.
pub fn load_config(path: &Path) -> Result<PipelineConfig> {
    if !path.exists() {
        let cfg = PipelineConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: PipelineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk.
pub fn write_config(path: &Path, cfg: &PipelineConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, buf.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, PipelineConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        let mut cfg = PipelineConfig::default();
        cfg.retention_days = 7;
        cfg.git.push = false;
        write_config(&path, &cfg).expect("write");
        assert_eq!(load_config(&path).expect("load"), cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "qualifying_label = \"automate\"\n[git]\npush = false\n")
            .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.qualifying_label, "automate");
        assert!(!cfg.git.push);
        assert_eq!(cfg.git.remote, "origin");
        assert_eq!(cfg.agent, AgentConfig::default());
    }

    #[test]
    fn escaping_artifact_root_is_rejected() {
        let cfg = PipelineConfig {
            artifact_root: "../outside".to_string(),
            ..PipelineConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn empty_agent_command_is_rejected() {
        let mut cfg = PipelineConfig::default();
        cfg.agent.command.clear();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("agent.command"));
    }

    #[test]
    fn branch_uses_prefix() {
        assert_eq!(PipelineConfig::default().branch_for("f1"), "rpi/f1");
    }
}
