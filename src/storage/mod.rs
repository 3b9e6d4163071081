//! On-disk persistence: collection manifest and per-project deployment ledger.
//!
//! Every write in this module is atomic from a reader's perspective:
//! serialize, write to a temporary file in the same directory, fsync, then
//! rename over the destination. A crash mid-write leaves either the prior
//! bytes or the new bytes, never a truncation.

pub mod ledger;
pub mod manifest;

use std::fs;
use std::io::Write;
use std::path::Path;

use crate::error::{Result, VaultError};

/// Atomically replace `path` with `content`.
///
/// 1. Write to `<name>.tmp` in the destination directory (same filesystem).
/// 2. fsync the temporary file.
/// 3. Rename (atomic on POSIX) over the target path.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let dir = path.parent().ok_or_else(|| {
        VaultError::Io(std::io::Error::other(format!(
            "no parent directory for {}",
            path.display()
        )))
    })?;
    fs::create_dir_all(dir)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_owned());
    let tmp_path = dir.join(format!(".{file_name}.tmp"));

    let mut file = fs::File::create(&tmp_path)?;
    file.write_all(content)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Recursively copy a tree (or single file) from `src` to `dst`.
///
/// Used for deploy/overwrite/fork operations where a subtree is replaced
/// wholesale. Intermediate directories are created as needed.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    if src.is_file() {
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(src, dst)?;
        return Ok(());
    }
    fs::create_dir_all(dst)?;
    for entry in walkdir::WalkDir::new(src) {
        let entry = entry.map_err(|e| {
            VaultError::Io(
                e.into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("walk error")),
            )
        })?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .expect("walked path is always under src");
        if rel.as_os_str().is_empty() {
            continue;
        }
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Remove a tree or file if it exists; a missing path is a no-op.
pub fn remove_tree(path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    if path.is_dir() {
        fs::remove_dir_all(path)?;
    } else {
        fs::remove_file(path)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
