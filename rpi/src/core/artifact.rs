//! Artifact naming and content digests.
//!
//! Paths here are repository-relative and always `/`-separated so they can be
//! stored in run records and linked from review descriptions verbatim.

use std::path::{Component, Path};

use sha2::{Digest, Sha256};

use crate::core::types::Stage;

/// `<artifact_root>/<feature_id>`.
pub fn feature_dir(artifact_root: &str, feature_id: &str) -> String {
    format!("{}/{feature_id}", artifact_root.trim_end_matches('/'))
}

/// `<artifact_root>/<feature_id>/<stage>.md`, or `None` for stages that
/// leave no artifact.
pub fn artifact_path(artifact_root: &str, feature_id: &str, stage: Stage) -> Option<String> {
    let file = stage.artifact_file()?;
    Some(format!("{}/{file}", feature_dir(artifact_root, feature_id)))
}

/// SHA-256 of `content`, lowercase hex.
pub fn content_digest(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// True if `path` is non-empty, relative, and never climbs out of its base.
pub fn is_contained_relative(path: &str) -> bool {
    let path = Path::new(path);
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
}
