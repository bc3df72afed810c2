//! Canonical `.rpi/` paths and workspace scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use super::atomic::write_atomic;
use super::config::{PipelineConfig, write_config};

/// All canonical paths within `.rpi/` for a repository root.
#[derive(Debug, Clone)]
pub struct PipelinePaths {
    pub root: PathBuf,
    pub state_dir: PathBuf,
    pub config_path: PathBuf,
    pub gitignore_path: PathBuf,
    pub runs_dir: PathBuf,
    pub archive_dir: PathBuf,
    pub locks_dir: PathBuf,
    pub logs_dir: PathBuf,
}

impl PipelinePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let state_dir = root.join(".rpi");
        let runs_dir = state_dir.join("runs");
        Self {
            root: root.clone(),
            config_path: state_dir.join("config.toml"),
            gitignore_path: state_dir.join(".gitignore"),
            archive_dir: runs_dir.join("archive"),
            runs_dir,
            locks_dir: state_dir.join("locks"),
            logs_dir: state_dir.join("logs"),
            state_dir,
        }
    }

    pub fn lock_path(&self, feature_id: &str) -> PathBuf {
        self.locks_dir.join(format!("{feature_id}.lock"))
    }
}

/// Options for `init_workspace`.
#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    /// Overwrite the existing config and `.gitignore`.
    pub force: bool,
}

/// Create `.rpi/` scaffolding in `root`.
///
/// Fails if `.rpi/config.toml` already exists unless `options.force` is set.
/// Run records are never touched.
pub fn init_workspace(root: &Path, options: &InitOptions) -> Result<PipelinePaths> {
    let paths = PipelinePaths::new(root);
    if paths.state_dir.exists() && !paths.state_dir.is_dir() {
        return Err(anyhow!("rpi init: .rpi exists but is not a directory"));
    }
    if paths.config_path.exists() && !options.force {
        return Err(anyhow!(
            "rpi init: .rpi/config.toml already exists (use --force to overwrite)"
        ));
    }

    for dir in [
        &paths.state_dir,
        &paths.runs_dir,
        &paths.archive_dir,
        &paths.locks_dir,
        &paths.logs_dir,
    ] {
        fs::create_dir_all(dir).with_context(|| format!("create directory {}", dir.display()))?;
    }

    write_atomic(&paths.gitignore_path, STATE_GITIGNORE.as_bytes())?;
    write_config(&paths.config_path, &PipelineConfig::default())?;
    Ok(paths)
}

const STATE_GITIGNORE: &str = "locks/\nlogs/\nruns/\n";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_creates_expected_layout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_workspace(temp.path(), &InitOptions::default()).expect("init");

        assert!(paths.runs_dir.is_dir());
        assert!(paths.archive_dir.is_dir());
        assert!(paths.locks_dir.is_dir());
        assert!(paths.logs_dir.is_dir());
        assert!(paths.config_path.is_file());
        assert_eq!(
            fs::read_to_string(&paths.gitignore_path).expect("read"),
            STATE_GITIGNORE
        );
    }

    #[test]
    fn init_without_force_refuses_existing_config() {
        let temp = tempfile::tempdir().expect("tempdir");
        init_workspace(temp.path(), &InitOptions::default()).expect("init");
        let err = init_workspace(temp.path(), &InitOptions::default()).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn init_with_force_restores_config_and_keeps_runs() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_workspace(temp.path(), &InitOptions::default()).expect("init");
        fs::write(&paths.config_path, "retention_days = 1\n").expect("customize");
        let run = paths.runs_dir.join("f1.json");
        fs::write(&run, "{}").expect("write run");

        init_workspace(temp.path(), &InitOptions { force: true }).expect("re-init");

        let cfg = crate::io::config::load_config(&paths.config_path).expect("load");
        assert_eq!(cfg, PipelineConfig::default());
        assert!(run.is_file());
    }

    #[test]
    fn lock_paths_are_keyed_by_feature() {
        let paths = PipelinePaths::new("/repo");
        assert_eq!(paths.runs_dir, PathBuf::from("/repo/.rpi/runs"));
        assert_eq!(paths.lock_path("f1"), PathBuf::from("/repo/.rpi/locks/f1.lock"));
    }
}
