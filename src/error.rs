//! Error types for skillvault.
//!
//! Defines [`VaultError`], the unified error type for collection and sync
//! operations. Error messages are designed to be self-contained: each variant
//! includes a clear description of what went wrong and actionable guidance on
//! how to fix it.
//!
//! Merge conflicts are deliberately *not* errors — they are ordinary results
//! carried in [`crate::merge::MergeResult`] and resolved later.

use std::fmt;
use std::path::PathBuf;

use crate::model::types::ArtifactKey;

// ---------------------------------------------------------------------------
// VaultError
// ---------------------------------------------------------------------------

/// Unified error type for collection, ledger, and sync operations.
///
/// Each variant maps to one caller-observable error kind. Per-artifact
/// failures during batch operations are aggregated into the batch result
/// instead of being raised through this type.
#[derive(Debug)]
pub enum VaultError {
    /// The requested artifact does not exist.
    ArtifactNotFound {
        /// The `type:name` key that was not found.
        key: ArtifactKey,
    },

    /// A uniqueness constraint was violated.
    ConstraintViolation {
        /// Human-readable description of the constraint.
        detail: String,
    },

    /// A manifest or ledger file could not be parsed.
    Parse {
        /// Path to the malformed file.
        path: PathBuf,
        /// Parser diagnostic.
        detail: String,
    },

    /// On-disk state is internally inconsistent (missing baseline hash,
    /// broken lineage) and could not be reconstructed.
    Integrity {
        /// Description of the inconsistency.
        detail: String,
    },

    /// A snapshot could not be created or restored. Snapshot failure before
    /// a destructive operation is always fatal to that operation.
    Snapshot {
        /// Description of the failure.
        detail: String,
    },

    /// An artifact-level or collection-level lock could not be acquired.
    Lock {
        /// The lock that could not be taken.
        name: String,
        /// Underlying cause.
        detail: String,
    },

    /// The embedded database failed.
    Database(rusqlite::Error),

    /// The upstream fetch collaborator signalled a quota limit.
    RateLimited {
        /// The artifact whose refresh was rate-limited.
        key: ArtifactKey,
    },

    /// The background job queue is full.
    Backpressure {
        /// Configured queue capacity.
        limit: usize,
    },

    /// A cancellation signal was observed. Work committed before the signal
    /// is preserved.
    Cancelled,

    /// An I/O error occurred.
    Io(std::io::Error),
}

impl fmt::Display for VaultError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ArtifactNotFound { key } => {
                write!(
                    f,
                    "artifact '{key}' not found.\n  To fix: list known artifacts and check the type:name spelling."
                )
            }
            Self::ConstraintViolation { detail } => {
                write!(f, "constraint violation: {detail}")
            }
            Self::Parse { path, detail } => {
                write!(
                    f,
                    "failed to parse '{}': {detail}\n  To fix: repair the file or restore it from the latest snapshot.",
                    path.display()
                )
            }
            Self::Integrity { detail } => {
                write!(
                    f,
                    "integrity error: {detail}\n  To fix: run recovery, or restore the collection from a snapshot."
                )
            }
            Self::Snapshot { detail } => {
                write!(
                    f,
                    "snapshot failed: {detail}\n  The operation was aborted before any destructive write."
                )
            }
            Self::Lock { name, detail } => {
                write!(
                    f,
                    "could not acquire lock '{name}': {detail}\n  To fix: wait for the concurrent operation to finish and retry."
                )
            }
            Self::Database(err) => write!(f, "database error: {err}"),
            Self::RateLimited { key } => {
                write!(
                    f,
                    "upstream rate limit reached while refreshing '{key}'; the artifact was skipped."
                )
            }
            Self::Backpressure { limit } => {
                write!(
                    f,
                    "job queue is full ({limit} pending).\n  To fix: wait for running jobs to drain and resubmit."
                )
            }
            Self::Cancelled => {
                write!(
                    f,
                    "operation cancelled; work committed before the signal is preserved."
                )
            }
            Self::Io(err) => {
                write!(
                    f,
                    "I/O error: {err}\n  To fix: check file permissions and disk space."
                )
            }
        }
    }
}

impl std::error::Error for VaultError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Database(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for VaultError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<rusqlite::Error> for VaultError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err)
    }
}

/// Convenience alias used throughout the core modules.
pub type Result<T> = std::result::Result<T, VaultError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
