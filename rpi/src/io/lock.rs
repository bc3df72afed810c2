//! Per-feature advisory file locks (`.rpi/locks/<feature_id>.lock`).
//!
//! Holding the lock is what "a stage is in progress" means: triggers for the
//! same feature queue behind it and the sweeper skips the feature while it is
//! held. The lock is released when the guard drops.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum LockError {
    #[error("feature '{feature_id}' is locked by another run: {}", path.display())]
    Locked { feature_id: String, path: PathBuf },

    #[error("lock file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Exclusive lock on one feature.
pub struct FeatureLockGuard {
    _file: File,
    feature_id: String,
    path: PathBuf,
}

impl Drop for FeatureLockGuard {
    fn drop(&mut self) {
        debug!(feature_id = %self.feature_id, "releasing feature lock");
    }
}

impl std::fmt::Debug for FeatureLockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureLockGuard")
            .field("feature_id", &self.feature_id)
            .field("path", &self.path)
            .finish()
    }
}

fn open_lock_file(path: &Path) -> Result<File, LockError> {
    let io_err = |source| LockError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(io_err)
}

/// Take the lock without waiting. `LockError::Locked` if someone holds it.
pub fn try_lock_feature(path: &Path, feature_id: &str) -> Result<FeatureLockGuard, LockError> {
    let file = open_lock_file(path)?;
    match file.try_lock_exclusive() {
        Ok(()) => Ok(FeatureLockGuard {
            _file: file,
            feature_id: feature_id.to_string(),
            path: path.to_path_buf(),
        }),
        Err(err) if err.kind() == fs2::lock_contended_error().kind() => Err(LockError::Locked {
            feature_id: feature_id.to_string(),
            path: path.to_path_buf(),
        }),
        Err(source) => Err(LockError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Take the lock, waiting for the current holder to finish.
pub fn lock_feature(path: &Path, feature_id: &str) -> Result<FeatureLockGuard, LockError> {
    match try_lock_feature(path, feature_id) {
        Err(LockError::Locked { .. }) => {}
        other => return other,
    }
    info!(feature_id, "feature busy; queued behind the running request");
    let file = open_lock_file(path)?;
    file.lock_exclusive().map_err(|source| LockError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(feature_id, "feature lock acquired after waiting");
    Ok(FeatureLockGuard {
        _file: file,
        feature_id: feature_id.to_string(),
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn second_try_lock_is_contended() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("locks/f1.lock");

        let guard = try_lock_feature(&path, "f1").expect("first lock");
        let err = try_lock_feature(&path, "f1").unwrap_err();
        assert!(matches!(err, LockError::Locked { .. }));

        drop(guard);
        try_lock_feature(&path, "f1").expect("lock after release");
    }

    #[test]
    fn blocking_lock_waits_for_release() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("f1.lock");
        let guard = try_lock_feature(&path, "f1").expect("first lock");

        let (tx, rx) = mpsc::channel();
        let waiter_path = path.clone();
        let waiter = thread::spawn(move || {
            let _guard = lock_feature(&waiter_path, "f1").expect("queued lock");
            tx.send(()).expect("send");
        });

        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        drop(guard);
        rx.recv_timeout(Duration::from_secs(5))
            .expect("waiter acquires after release");
        waiter.join().expect("join");
    }

    #[test]
    fn different_features_do_not_contend() {
        let temp = tempfile::tempdir().expect("tempdir");
        let _a = try_lock_feature(&temp.path().join("a.lock"), "a").expect("a");
        let _b = try_lock_feature(&temp.path().join("b.lock"), "b").expect("b");
    }
}
