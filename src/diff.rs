//! Two-way and three-way tree diffing.
//!
//! The two-way diff compares a source tree against a target tree and reports
//! added/removed/modified/unchanged files with per-file line counts and a
//! unified diff for text files. The three-way diff classifies each file of a
//! `(base, local, remote)` triple as auto-mergeable or conflicted; it is the
//! decision procedure the merge engine executes.
//!
//! Binary detection: a file is binary when its first 8 KiB contain a NUL
//! byte or when it is not valid UTF-8. Binary files carry no unified diff,
//! and a binary file changed on both sides always conflicts.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use similar::{ChangeTag, TextDiff};

use crate::error::{Result, VaultError};
use crate::model::conflict::{ConflictKind, FileConflict, ResolutionHint};

/// How many leading bytes are sniffed for NUL when detecting binaryness.
const BINARY_SNIFF_LEN: usize = 8 * 1024;

// ---------------------------------------------------------------------------
// FileTree
// ---------------------------------------------------------------------------

/// An in-memory tree: relative path → file bytes, ordered by path.
pub type FileTree = BTreeMap<PathBuf, Vec<u8>>;

/// Read a tree (or a single file) into memory.
///
/// A missing root yields an empty tree, so absent sides of a three-way diff
/// need no special casing. Unreadable files fail loudly.
pub fn read_tree(root: &Path) -> Result<FileTree> {
    let mut tree = FileTree::new();
    if !root.exists() {
        return Ok(tree);
    }
    if root.is_file() {
        let name = root
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("file"));
        tree.insert(name, std::fs::read(root)?);
        return Ok(tree);
    }
    for entry in walkdir::WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            VaultError::Io(
                e.into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("walk error")),
            )
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .expect("walked path is always under root")
            .to_path_buf();
        tree.insert(rel, std::fs::read(entry.path())?);
    }
    Ok(tree)
}

/// Whether content should be treated as binary.
#[must_use]
pub fn is_binary(bytes: &[u8]) -> bool {
    let sniff = &bytes[..bytes.len().min(BINARY_SNIFF_LEN)];
    sniff.contains(&0) || std::str::from_utf8(bytes).is_err()
}

// ---------------------------------------------------------------------------
// Two-way diff
// ---------------------------------------------------------------------------

/// Per-file status in a two-way diff.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    /// Present only in the target.
    Added,
    /// Present only in the source.
    Removed,
    /// Present in both with different bytes.
    Modified,
    /// Present in both with identical bytes.
    Unchanged,
    /// Changed, but binary on at least one side; no line diff available.
    Binary,
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Self::Added => "added",
            Self::Removed => "removed",
            Self::Modified => "modified",
            Self::Unchanged => "unchanged",
            Self::Binary => "binary",
        };
        f.write_str(tag)
    }
}

/// One file's entry in a two-way diff.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDiff {
    /// Path relative to the tree root.
    pub path: PathBuf,
    /// Classification.
    pub status: FileStatus,
    /// Lines added (text files only).
    pub lines_added: usize,
    /// Lines removed (text files only).
    pub lines_removed: usize,
    /// Unified diff, omitted for binary and unchanged files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unified_diff: Option<String>,
}

/// The result of diffing one tree against another.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeDiff {
    /// Files present only in the target.
    pub files_added: Vec<FileDiff>,
    /// Files present only in the source.
    pub files_removed: Vec<FileDiff>,
    /// Files changed between the sides (including binary changes).
    pub files_modified: Vec<FileDiff>,
    /// Files identical on both sides.
    pub files_unchanged: Vec<FileDiff>,
    /// Total lines added across text files.
    pub total_lines_added: usize,
    /// Total lines removed across text files.
    pub total_lines_removed: usize,
}

impl TreeDiff {
    /// Whether the two sides are byte-identical.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.files_added.is_empty()
            && self.files_removed.is_empty()
            && self.files_modified.is_empty()
    }
}

/// Diff `source` against `target`, both already in memory.
#[must_use]
pub fn diff_trees(source: &FileTree, target: &FileTree) -> TreeDiff {
    let mut diff = TreeDiff::default();
    let paths: BTreeSet<&PathBuf> = source.keys().chain(target.keys()).collect();

    for path in paths {
        match (source.get(path), target.get(path)) {
            (None, Some(new)) => {
                let entry = text_entry(path, &[], new, FileStatus::Added);
                diff.total_lines_added += entry.lines_added;
                diff.files_added.push(entry);
            }
            (Some(old), None) => {
                let entry = text_entry(path, old, &[], FileStatus::Removed);
                diff.total_lines_removed += entry.lines_removed;
                diff.files_removed.push(entry);
            }
            (Some(old), Some(new)) if old == new => {
                diff.files_unchanged.push(FileDiff {
                    path: path.clone(),
                    status: FileStatus::Unchanged,
                    lines_added: 0,
                    lines_removed: 0,
                    unified_diff: None,
                });
            }
            (Some(old), Some(new)) => {
                let entry = if is_binary(old) || is_binary(new) {
                    FileDiff {
                        path: path.clone(),
                        status: FileStatus::Binary,
                        lines_added: 0,
                        lines_removed: 0,
                        unified_diff: None,
                    }
                } else {
                    text_entry(path, old, new, FileStatus::Modified)
                };
                diff.total_lines_added += entry.lines_added;
                diff.total_lines_removed += entry.lines_removed;
                diff.files_modified.push(entry);
            }
            (None, None) => unreachable!("path came from one of the two trees"),
        }
    }
    diff
}

/// Diff two directories on disk.
pub fn diff_dirs(source: &Path, target: &Path) -> Result<TreeDiff> {
    Ok(diff_trees(&read_tree(source)?, &read_tree(target)?))
}

fn text_entry(path: &Path, old: &[u8], new: &[u8], status: FileStatus) -> FileDiff {
    if (!old.is_empty() && is_binary(old)) || (!new.is_empty() && is_binary(new)) {
        return FileDiff {
            path: path.to_path_buf(),
            status: FileStatus::Binary,
            lines_added: 0,
            lines_removed: 0,
            unified_diff: None,
        };
    }
    let old_text = String::from_utf8_lossy(old);
    let new_text = String::from_utf8_lossy(new);
    let text_diff = TextDiff::from_lines(old_text.as_ref(), new_text.as_ref());

    let mut lines_added = 0;
    let mut lines_removed = 0;
    for change in text_diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Insert => lines_added += 1,
            ChangeTag::Delete => lines_removed += 1,
            ChangeTag::Equal => {}
        }
    }

    let display = path.to_string_lossy();
    let unified = text_diff
        .unified_diff()
        .context_radius(3)
        .header(&format!("a/{display}"), &format!("b/{display}"))
        .to_string();

    FileDiff {
        path: path.to_path_buf(),
        status,
        lines_added,
        lines_removed,
        unified_diff: (!unified.is_empty()).then_some(unified),
    }
}

// ---------------------------------------------------------------------------
// Three-way diff
// ---------------------------------------------------------------------------

/// What the merge engine should do with an auto-mergeable file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoOutcome {
    /// Apply the local side's bytes.
    TakeLocal,
    /// Apply the remote side's bytes.
    TakeRemote,
    /// Both sides agree; apply either.
    TakeEither,
    /// The surviving decision is a deletion.
    Delete,
}

/// One auto-mergeable file with its winning side.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoMergeFile {
    /// Path relative to the tree root.
    pub path: PathBuf,
    /// Which side wins.
    pub outcome: AutoOutcome,
}

/// The classification of a `(base, local, remote)` triple.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreeWayDiff {
    /// Files safe to apply without human input, with the winning side.
    pub auto_mergeable: Vec<AutoMergeFile>,
    /// Files needing a decision.
    pub conflicts: Vec<FileConflict>,
}

impl ThreeWayDiff {
    /// Paths of the auto-mergeable files.
    #[must_use]
    pub fn auto_paths(&self) -> Vec<&Path> {
        self.auto_mergeable.iter().map(|f| f.path.as_path()).collect()
    }

    /// Whether every file can be applied automatically.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }
}

/// Classify each file that appears in at least one of the three sides.
///
/// Unchanged files (identical on all sides that have them) are not emitted.
#[must_use]
pub fn three_way_diff(base: &FileTree, local: &FileTree, remote: &FileTree) -> ThreeWayDiff {
    let mut result = ThreeWayDiff::default();
    let paths: BTreeSet<&PathBuf> = base
        .keys()
        .chain(local.keys())
        .chain(remote.keys())
        .collect();

    for path in paths {
        classify_file(
            path,
            base.get(path).map(Vec::as_slice),
            local.get(path).map(Vec::as_slice),
            remote.get(path).map(Vec::as_slice),
            &mut result,
        );
    }
    result
}

/// Classify files read directly from three directories.
pub fn three_way_diff_dirs(base: &Path, local: &Path, remote: &Path) -> Result<ThreeWayDiff> {
    Ok(three_way_diff(
        &read_tree(base)?,
        &read_tree(local)?,
        &read_tree(remote)?,
    ))
}

fn classify_file(
    path: &Path,
    base: Option<&[u8]>,
    local: Option<&[u8]>,
    remote: Option<&[u8]>,
    out: &mut ThreeWayDiff,
) {
    let auto = |out: &mut ThreeWayDiff, outcome: AutoOutcome| {
        out.auto_mergeable.push(AutoMergeFile {
            path: path.to_path_buf(),
            outcome,
        });
    };
    let binary = [base, local, remote]
        .iter()
        .flatten()
        .any(|bytes| is_binary(bytes));
    let conflict = |out: &mut ThreeWayDiff, kind: ConflictKind, hint: ResolutionHint| {
        out.conflicts.push(FileConflict {
            path: path.to_path_buf(),
            kind,
            base: base.map(<[u8]>::to_vec),
            local: local.map(<[u8]>::to_vec),
            remote: remote.map(<[u8]>::to_vec),
            auto_mergeable: false,
            recommendation: if binary { ResolutionHint::UseLocal } else { hint },
            binary,
        });
    };

    match (base, local, remote) {
        // --- base present ---
        (Some(b), l, r) => {
            let local_changed = l != Some(b);
            let remote_changed = r != Some(b);
            match (local_changed, remote_changed) {
                // Identical on all sides: not emitted.
                (false, false) => {}

                // Only one side moved: its decision wins, deletion included.
                (false, true) => match r {
                    Some(_) => auto(out, AutoOutcome::TakeRemote),
                    None => auto(out, AutoOutcome::Delete),
                },
                (true, false) => match l {
                    Some(_) => auto(out, AutoOutcome::TakeLocal),
                    None => auto(out, AutoOutcome::Delete),
                },

                (true, true) => match (l, r) {
                    // Both landed on the same content (or both deleted).
                    (Some(lc), Some(rc)) if lc == rc => auto(out, AutoOutcome::TakeEither),
                    (None, None) => auto(out, AutoOutcome::Delete),

                    // Divergent edits.
                    (Some(_), Some(_)) => {
                        conflict(out, ConflictKind::BothModified, ResolutionHint::Manual);
                    }

                    // One side deleted what the other changed.
                    (None, Some(_)) | (Some(_), None) => {
                        conflict(out, ConflictKind::Deletion, ResolutionHint::Manual);
                    }
                },
            }
        }

        // --- base absent: additions ---
        (None, Some(lc), Some(rc)) => {
            if lc == rc {
                auto(out, AutoOutcome::TakeEither);
            } else {
                conflict(out, ConflictKind::AddAdd, ResolutionHint::Manual);
            }
        }
        (None, Some(_), None) => auto(out, AutoOutcome::TakeLocal),
        (None, None, Some(_)) => auto(out, AutoOutcome::TakeRemote),
        (None, None, None) => {}
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
