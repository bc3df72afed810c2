//! Durable pipeline run records (`.rpi/runs/<feature_id>.json`).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use tracing::debug;

use super::atomic::write_json_atomic;
use super::init::PipelinePaths;
use crate::core::feature_id::is_feature_id;
use crate::core::stage::validate_invariants;
use crate::core::types::PipelineRun;

/// One record per feature; replaced completed runs move to `archive/`.
#[derive(Debug, Clone)]
pub struct RunStore {
    runs_dir: PathBuf,
    archive_dir: PathBuf,
}

impl RunStore {
    pub fn new(paths: &PipelinePaths) -> Self {
        Self {
            runs_dir: paths.runs_dir.clone(),
            archive_dir: paths.archive_dir.clone(),
        }
    }

    /// Record path for `feature_id`. Ids that are not slugs never reach the
    /// filesystem.
    fn path(&self, feature_id: &str) -> Result<PathBuf> {
        if !is_feature_id(feature_id) {
            bail!("'{feature_id}' is not a valid feature id");
        }
        Ok(self.runs_dir.join(format!("{feature_id}.json")))
    }

    /// Load the run for `feature_id`. Missing record is `Ok(None)`.
    pub fn load(&self, feature_id: &str) -> Result<Option<PipelineRun>> {
        let path = self.path(feature_id)?;
        if !path.exists() {
            return Ok(None);
        }
        load_record(&path).map(Some)
    }

    /// Persist `run` atomically. Records that break run invariants are refused.
    pub fn save(&self, run: &PipelineRun) -> Result<()> {
        let errors = validate_invariants(run);
        if !errors.is_empty() {
            bail!(
                "refusing to save run '{}':\n- {}",
                run.feature_id,
                errors.join("\n- ")
            );
        }
        let path = self.path(&run.feature_id)?;
        debug!(
            feature_id = %run.feature_id,
            stage = %run.current_stage,
            path = %path.display(),
            "saving run record"
        );
        write_json_atomic(&path, run).with_context(|| format!("write run record {}", path.display()))
    }

    /// True if a run exists for `feature_id` and has not completed.
    pub fn is_active(&self, feature_id: &str) -> Result<bool> {
        Ok(self.load(feature_id)?.is_some_and(|run| run.is_active()))
    }

    /// All current run records, sorted by feature id.
    pub fn list(&self) -> Result<Vec<PipelineRun>> {
        if !self.runs_dir.exists() {
            return Ok(Vec::new());
        }
        let mut runs = Vec::new();
        let entries = fs::read_dir(&self.runs_dir)
            .with_context(|| format!("read directory {}", self.runs_dir.display()))?;
        for entry in entries {
            let path = entry
                .with_context(|| format!("read directory {}", self.runs_dir.display()))?
                .path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
                runs.push(load_record(&path)?);
            }
        }
        runs.sort_by(|a, b| a.feature_id.cmp(&b.feature_id));
        Ok(runs)
    }

    /// Run whose review object is `review_id`.
    pub fn find_by_review(&self, review_id: &str) -> Result<Option<PipelineRun>> {
        Ok(self
            .list()?
            .into_iter()
            .find(|run| run.review.as_ref().is_some_and(|r| r.id == review_id)))
    }

    /// Move the current record for `run.feature_id` into the archive.
    pub fn archive(&self, run: &PipelineRun, now: DateTime<Utc>) -> Result<PathBuf> {
        let target = self.archive_dir.join(format!(
            "{}-{}.json",
            run.feature_id,
            now.format("%Y%m%dT%H%M%SZ")
        ));
        write_json_atomic(&target, run)
            .with_context(|| format!("write archived run {}", target.display()))?;
        let current = self.path(&run.feature_id)?;
        if current.exists() {
            fs::remove_file(&current)
                .with_context(|| format!("remove run record {}", current.display()))?;
        }
        debug!(feature_id = %run.feature_id, path = %target.display(), "archived run record");
        Ok(target)
    }
}

fn load_record(path: &Path) -> Result<PipelineRun> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read run record {}", path.display()))?;
    let run: PipelineRun = serde_json::from_str(&contents)
        .with_context(|| format!("parse run record {}", path.display()))?;
    let errors = validate_invariants(&run);
    if !errors.is_empty() {
        bail!(
            "run record {} violates invariants:\n- {}",
            path.display(),
            errors.join("\n- ")
        );
    }
    Ok(run)
}
