//! Content hashing for change detection.
//!
//! Produces a deterministic SHA-256 digest for an artifact tree or a single
//! string. Two trees hash identically iff they have the same set of relative
//! paths with byte-identical contents; file bytes are fed verbatim (no
//! newline or whitespace normalization).
//!
//! # Feed format
//!
//! Files are visited in lexicographic order of their relative path. For each
//! file the hash is fed:
//!
//! ```text
//! <relative path, UTF-8> NUL <length, u64 big-endian> NUL <file bytes>
//! ```
//!
//! The separators keep adjacent entries from running together, so no two
//! distinct trees can produce the same feed.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::error::{Result, VaultError};
use crate::model::types::ContentHash;

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Hash an artifact tree rooted at `root`.
///
/// `root` may be a directory (the common case) or a single file, in which
/// case the file is hashed as a tree of one entry keyed by its file name.
/// Symbolic links are followed only when the link target resolves inside
/// `root`; links escaping the root are an error.
///
/// # Errors
/// Fails loudly on any unreadable file — silently skipping a file would make
/// equal-looking trees hash differently on different machines.
pub fn hash_tree(root: &Path) -> Result<ContentHash> {
    let mut hasher = Sha256::new();

    if root.is_file() {
        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        feed_file(&mut hasher, &name, root)?;
        return Ok(digest_to_hash(hasher));
    }

    for (rel, abs) in collect_files(root)? {
        feed_file(&mut hasher, &rel, &abs)?;
    }
    Ok(digest_to_hash(hasher))
}

/// Hash a single string (content-only variant, used for deployed-file
/// change detection).
#[must_use]
pub fn hash_content(content: &str) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    digest_to_hash(hasher)
}

/// Hash raw bytes.
#[must_use]
pub fn hash_bytes(bytes: &[u8]) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    digest_to_hash(hasher)
}

/// Detect whether a deployed file differs from a recorded collection hash.
///
/// Returns `false` when the file is missing or not a regular file — a
/// missing deployment is not a local modification.
#[must_use]
pub fn detect_change(collection_hash: &ContentHash, deployed_file: &Path) -> bool {
    if !deployed_file.is_file() {
        return false;
    }
    match fs::read(deployed_file) {
        Ok(bytes) => &hash_bytes(&bytes) != collection_hash,
        Err(_) => false,
    }
}

// ---------------------------------------------------------------------------
// Traversal
// ---------------------------------------------------------------------------

/// Collect `(relative_path, absolute_path)` pairs under `root`, sorted
/// lexicographically by relative path.
fn collect_files(root: &Path) -> Result<Vec<(String, PathBuf)>> {
    let canonical_root = root.canonicalize().map_err(VaultError::Io)?;
    let mut files = Vec::new();

    for entry in WalkDir::new(root).follow_links(true).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            VaultError::Io(e.into_io_error().unwrap_or_else(|| {
                std::io::Error::other("walk error without underlying I/O cause")
            }))
        })?;
        let abs = entry.path().to_path_buf();

        // A symlink (file or directory) is followed only when its target
        // stays inside the root.
        if entry.path_is_symlink() {
            let target = abs.canonicalize().map_err(VaultError::Io)?;
            if !target.starts_with(&canonical_root) {
                return Err(VaultError::Integrity {
                    detail: format!(
                        "symlink '{}' escapes the artifact root '{}'",
                        abs.display(),
                        root.display()
                    ),
                });
            }
        }
        if !entry.file_type().is_file() {
            continue;
        }

        let rel = abs
            .strip_prefix(root)
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .map_err(|_| VaultError::Integrity {
                detail: format!("walked path '{}' is outside the root", abs.display()),
            })?;
        files.push((rel, abs));
    }

    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}

fn feed_file(hasher: &mut Sha256, rel: &str, abs: &Path) -> Result<()> {
    let mut file = fs::File::open(abs)?;
    let len = file.metadata()?.len();

    hasher.update(rel.as_bytes());
    hasher.update([0u8]);
    hasher.update(len.to_be_bytes());
    hasher.update([0u8]);

    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(())
}

fn digest_to_hash(hasher: Sha256) -> ContentHash {
    let digest = hex::encode(hasher.finalize());
    ContentHash::new(&digest).expect("a SHA-256 digest is always 64 lowercase hex characters")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
