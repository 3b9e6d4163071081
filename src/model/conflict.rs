//! Structured conflict model.
//!
//! Conflicts produced by the three-way diff are structured and localizable —
//! per file, with the base/local/remote byte content attached — not marker
//! soup. Each descriptor captures the minimal data needed to present the
//! conflict for resolution.
//!
//! # Conflict kinds
//!
//! | Kind | Description |
//! |------|-------------|
//! | [`ConflictKind::Content`] | Both sides changed the same file differently |
//! | [`ConflictKind::Deletion`] | One side changed the file, the other deleted it |
//! | [`ConflictKind::BothModified`] | Both sides modified relative to a shared base |
//! | [`ConflictKind::AddAdd`] | Same path added independently with different content |

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ConflictKind
// ---------------------------------------------------------------------------

/// The kind of divergence that produced a conflict.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Generic content divergence.
    Content,
    /// One side deleted while the other changed.
    Deletion,
    /// Both sides modified a file that exists in the base.
    BothModified,
    /// Both sides independently added the same path with different content.
    AddAdd,
}

impl ConflictKind {
    /// The serialized tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Content => "content",
            Self::Deletion => "deletion",
            Self::BothModified => "both_modified",
            Self::AddAdd => "add_add",
        }
    }
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ResolutionHint
// ---------------------------------------------------------------------------

/// The recommended resolution for a conflict, computed by the diff engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionHint {
    /// Take the local side unchanged.
    UseLocal,
    /// Take the remote side unchanged.
    UseRemote,
    /// Revert to the base.
    UseBase,
    /// Needs a human or agent decision.
    Manual,
}

// ---------------------------------------------------------------------------
// ResolutionStrategy
// ---------------------------------------------------------------------------

/// A caller's chosen way to resolve one conflict.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionStrategy {
    /// Keep the local bytes.
    UseLocal,
    /// Keep the remote bytes.
    UseRemote,
    /// Revert to the base bytes.
    UseBase,
    /// Supply hand-merged content.
    Merge,
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Self::UseLocal => "use-local",
            Self::UseRemote => "use-remote",
            Self::UseBase => "use-base",
            Self::Merge => "merge",
        };
        f.write_str(tag)
    }
}

// ---------------------------------------------------------------------------
// FileConflict
// ---------------------------------------------------------------------------

/// One conflicted file from a three-way diff.
///
/// Byte content is attached per side where the side exists, so a resolver can
/// apply any strategy without re-reading trees that may have been merged over
/// in the meantime.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileConflict {
    /// Path relative to the artifact root.
    pub path: PathBuf,

    /// What kind of divergence this is.
    pub kind: ConflictKind,

    /// Base (common ancestor) content; `None` when the file is absent from
    /// the base (add-add) or the base side is binary and unreadable as text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<Vec<u8>>,

    /// Local side content; `None` when the local side deleted the file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local: Option<Vec<u8>>,

    /// Remote side content; `None` when the remote side deleted the file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<Vec<u8>>,

    /// Whether the merge engine may apply this file without human input.
    pub auto_mergeable: bool,

    /// The diff engine's recommendation.
    pub recommendation: ResolutionHint,

    /// True for binary files; binary conflicts are never auto-merged.
    pub binary: bool,
}

impl FileConflict {
    /// The content of the side a strategy selects, if that side exists.
    #[must_use]
    pub fn side(&self, strategy: ResolutionStrategy) -> Option<&[u8]> {
        match strategy {
            ResolutionStrategy::UseLocal => self.local.as_deref(),
            ResolutionStrategy::UseRemote => self.remote.as_deref(),
            ResolutionStrategy::UseBase => self.base.as_deref(),
            ResolutionStrategy::Merge => None,
        }
    }
}

impl fmt::Display for FileConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.kind)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
