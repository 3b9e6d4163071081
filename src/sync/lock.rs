//! Artifact-level locking.
//!
//! Writes to a single artifact are totally ordered: the coordinator holds an
//! exclusive advisory lock named by `collection:type:name` for the full
//! read-modify-write cycle, so two concurrent syncs of the same artifact
//! cannot race. Locks are `fs2` advisory file locks — cooperative, so every
//! writer must go through this module.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::{Result, VaultError};
use crate::model::types::ArtifactKey;

// ---------------------------------------------------------------------------
// ArtifactLock
// ---------------------------------------------------------------------------

/// An exclusive lock over one artifact, released on drop.
#[derive(Debug)]
pub struct ArtifactLock {
    file: File,
    name: String,
}

impl ArtifactLock {
    /// Block until the exclusive lock for `collection:type:name` is held.
    pub fn acquire(locks_dir: &Path, collection: &str, key: &ArtifactKey) -> Result<Self> {
        let name = format!("{collection}:{key}");
        let path = lock_path(locks_dir, &name);
        std::fs::create_dir_all(locks_dir)?;

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;
        file.lock_exclusive().map_err(|e| VaultError::Lock {
            name: name.clone(),
            detail: e.to_string(),
        })?;
        Ok(Self { file, name })
    }

    /// Try to take the lock without blocking.
    ///
    /// # Errors
    /// Returns [`VaultError::Lock`] when another holder has it.
    pub fn try_acquire(locks_dir: &Path, collection: &str, key: &ArtifactKey) -> Result<Self> {
        let name = format!("{collection}:{key}");
        let path = lock_path(locks_dir, &name);
        std::fs::create_dir_all(locks_dir)?;

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;
        file.try_lock_exclusive().map_err(|e| VaultError::Lock {
            name: name.clone(),
            detail: e.to_string(),
        })?;
        Ok(Self { file, name })
    }

    /// The `collection:type:name` the lock covers.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for ArtifactLock {
    fn drop(&mut self) {
        // Unlock errors on drop have no recovery path; the OS releases the
        // lock when the descriptor closes anyway.
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

/// Lock file path for a lock name, sanitized for the filesystem.
fn lock_path(locks_dir: &Path, name: &str) -> PathBuf {
    let sanitized: String = name
        .chars()
        .map(|c| if c == ':' || c == '/' || c == '\\' { '_' } else { c })
        .collect();
    locks_dir.join(format!("{sanitized}.lock"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
