//! Per-task advisory locks that mark a `running` task as owned by a live process.
//!
//! The dispatcher holds `claims/<task-id>.lock` exclusively while the executor runs.
//! The OS drops the lock when the owner exits, so a `running` task whose lock can be
//! taken has no live owner.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs2::FileExt;
use tracing::debug;

use crate::core::types::TaskId;

/// Exclusive claim on one task. Released on drop.
#[derive(Debug)]
pub struct ClaimGuard {
    file: File,
    path: PathBuf,
}

impl ClaimGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            debug!(path = %self.path.display(), err = %err, "claim unlock failed");
        }
    }
}

pub fn claim_path(claims_dir: &Path, task_id: TaskId) -> PathBuf {
    claims_dir.join(format!("{task_id}.lock"))
}

/// Take the claim lock for `task_id` without blocking.
///
/// Returns `Ok(None)` when another process holds it.
pub fn try_acquire(claims_dir: &Path, task_id: TaskId) -> Result<Option<ClaimGuard>> {
    fs::create_dir_all(claims_dir)
        .with_context(|| format!("create claims dir {}", claims_dir.display()))?;
    let path = claim_path(claims_dir, task_id);
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&path)
        .with_context(|| format!("open claim lock {}", path.display()))?;
    match file.try_lock_exclusive() {
        Ok(()) => {
            debug!(task_id, "claim lock acquired");
            Ok(Some(ClaimGuard { file, path }))
        }
        Err(err) if err.kind() == fs2::lock_contended_error().kind() => Ok(None),
        Err(err) => Err(err).with_context(|| format!("lock {}", path.display())),
    }
}

/// True when no live process holds the claim for `task_id`.
pub fn is_orphaned(claims_dir: &Path, task_id: TaskId) -> Result<bool> {
    Ok(try_acquire(claims_dir, task_id)?.is_some())
}
