//! Artifact files under `<artifact_root>/<feature_id>/`.
//!
//! Every write replaces the whole file atomically; there are no partial
//! in-place edits. Reads verify the digest recorded in the run so a stage
//! never consumes content other than what its upstream committed.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use super::atomic::write_atomic;
use crate::core::artifact::{artifact_path, content_digest, feature_dir};
use crate::core::types::{ArtifactRecord, CommitStrategy, Stage};
use crate::errors::PipelineError;

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    repo_root: PathBuf,
    artifact_root: String,
}

impl ArtifactStore {
    pub fn new(repo_root: impl Into<PathBuf>, artifact_root: impl Into<String>) -> Self {
        Self {
            repo_root: repo_root.into(),
            artifact_root: artifact_root.into(),
        }
    }

    /// Repository-relative artifact path for `stage`.
    pub fn relative_path(&self, feature_id: &str, stage: Stage) -> Result<String> {
        artifact_path(&self.artifact_root, feature_id, stage)
            .with_context(|| format!("stage {stage} has no artifact"))
    }

    /// Repository-relative directory for `feature_id`.
    pub fn relative_dir(&self, feature_id: &str) -> String {
        feature_dir(&self.artifact_root, feature_id)
    }

    fn absolute(&self, relative: &str) -> PathBuf {
        self.repo_root.join(relative)
    }

    /// Atomically write the stage artifact and describe it for the run record.
    pub fn write(
        &self,
        feature_id: &str,
        stage: Stage,
        content: &str,
        committed_as: CommitStrategy,
    ) -> Result<ArtifactRecord> {
        let path = self.relative_path(feature_id, stage)?;
        let absolute = self.absolute(&path);
        write_atomic(&absolute, content.as_bytes())
            .with_context(|| format!("write {stage} artifact {}", absolute.display()))?;
        let sha256 = content_digest(content);
        debug!(feature_id, %stage, path = %path, sha256 = %sha256, "artifact written");
        Ok(ArtifactRecord {
            stage,
            path,
            sha256,
            committed_as,
        })
    }

    /// Read an artifact and check it still matches its recorded digest.
    pub fn read(&self, record: &ArtifactRecord) -> Result<String> {
        let absolute = self.absolute(&record.path);
        let content = fs::read_to_string(&absolute).map_err(|err| {
            PipelineError::ArtifactUnreadable {
                path: absolute.clone(),
                reason: err.to_string(),
            }
        })?;
        if content_digest(&content) != record.sha256 {
            return Err(PipelineError::ArtifactUnreadable {
                path: absolute,
                reason: "content does not match the recorded digest".to_string(),
            }
            .into());
        }
        Ok(content)
    }

    /// Delete a stage artifact. Returns false if it was already gone.
    pub fn remove(&self, feature_id: &str, stage: Stage) -> Result<bool> {
        let absolute = self.absolute(&self.relative_path(feature_id, stage)?);
        remove_file_if_present(&absolute)
    }

    /// Current on-disk content of a stage artifact, without digest checks.
    pub fn snapshot(&self, feature_id: &str, stage: Stage) -> Result<Option<String>> {
        let absolute = self.absolute(&self.relative_path(feature_id, stage)?);
        match fs::read_to_string(&absolute) {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("read {}", absolute.display())),
        }
    }

    /// Put back what [`ArtifactStore::snapshot`] saw.
    pub fn restore(&self, feature_id: &str, stage: Stage, previous: Option<&str>) -> Result<()> {
        let absolute = self.absolute(&self.relative_path(feature_id, stage)?);
        match previous {
            Some(content) => write_atomic(&absolute, content.as_bytes()),
            None => remove_file_if_present(&absolute).map(|_| ()),
        }
    }

    /// Feature directory names present under the artifact root, sorted.
    pub fn feature_dirs(&self) -> Result<Vec<String>> {
        let root = self.absolute(&self.artifact_root);
        if !root.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        let entries =
            fs::read_dir(&root).with_context(|| format!("read directory {}", root.display()))?;
        for entry in entries {
            let entry = entry.with_context(|| format!("read directory {}", root.display()))?;
            if entry.path().is_dir()
                && let Some(name) = entry.file_name().to_str()
            {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Remove a feature's whole artifact directory.
    pub fn remove_feature(&self, feature_id: &str) -> Result<()> {
        let dir = self.absolute(&self.relative_dir(feature_id));
        fs::remove_dir_all(&dir).with_context(|| format!("remove directory {}", dir.display()))
    }
}

fn remove_file_if_present(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err).with_context(|| format!("remove {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::pipeline_error;

    fn store() -> (tempfile::TempDir, ArtifactStore) {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = ArtifactStore::new(temp.path(), "thoughts/shared/pipeline");
        (temp, store)
    }

    #[test]
    fn write_then_read_verifies_digest() {
        let (temp, store) = store();
        let record = store
            .write("f1", Stage::Research, "# findings\n", CommitStrategy::Append)
            .expect("write");
        assert_eq!(record.path, "thoughts/shared/pipeline/f1/research.md");
        assert!(temp.path().join(&record.path).is_file());
        assert_eq!(store.read(&record).expect("read"), "# findings\n");
    }

    #[test]
    fn tampered_artifact_is_unreadable() {
        let (temp, store) = store();
        let record = store
            .write("f1", Stage::Plan, "plan", CommitStrategy::Append)
            .expect("write");
        fs::write(temp.path().join(&record.path), "edited").expect("tamper");
        let err = store.read(&record).unwrap_err();
        assert!(matches!(
            pipeline_error(&err),
            Some(PipelineError::ArtifactUnreadable { .. })
        ));
    }

    #[test]
    fn missing_artifact_is_unreadable() {
        let (_temp, store) = store();
        let record = ArtifactRecord {
            stage: Stage::Research,
            path: "thoughts/shared/pipeline/f1/research.md".to_string(),
            sha256: content_digest(""),
            committed_as: CommitStrategy::Append,
        };
        assert!(store.read(&record).is_err());
    }

    #[test]
    fn remove_reports_presence() {
        let (_temp, store) = store();
        store
            .write("f1", Stage::Plan, "plan", CommitStrategy::Rewrite)
            .expect("write");
        assert!(store.remove("f1", Stage::Plan).expect("remove"));
        assert!(!store.remove("f1", Stage::Plan).expect("remove again"));
    }

    #[test]
    fn restore_puts_back_snapshot() {
        let (_temp, store) = store();
        let first = store
            .write("f1", Stage::Plan, "v1", CommitStrategy::Append)
            .expect("write");
        let saved = store.snapshot("f1", Stage::Plan).expect("snapshot");
        store
            .write("f1", Stage::Plan, "v2", CommitStrategy::Append)
            .expect("overwrite");

        store
            .restore("f1", Stage::Plan, saved.as_deref())
            .expect("restore");
        assert_eq!(store.read(&first).expect("read"), "v1");

        store.restore("f1", Stage::Plan, None).expect("restore absent");
        assert_eq!(store.snapshot("f1", Stage::Plan).expect("snapshot"), None);
    }

    #[test]
    fn feature_dirs_lists_and_removes() {
        let (temp, store) = store();
        for id in ["f2", "f1"] {
            store
                .write(id, Stage::Research, "r", CommitStrategy::Append)
                .expect("write");
        }
        assert_eq!(store.feature_dirs().expect("dirs"), vec!["f1", "f2"]);

        store.remove_feature("f1").expect("remove");
        assert_eq!(store.feature_dirs().expect("dirs"), vec!["f2"]);
        assert!(!temp.path().join("thoughts/shared/pipeline/f1").exists());
    }
}
