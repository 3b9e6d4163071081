//! Three-way merge execution.
//!
//! Applies the diff engine's classification to a `(base, local, remote)`
//! directory triple, producing a merged tree in an output directory. Files
//! the classifier can decide are copied atomically; text conflicts are
//! written with Git-style markers; binary conflicts keep the local side and
//! are flagged in the result.
//!
//! All writes go through write-temp + rename, so an interrupted merge never
//! leaves a half-written file.

use std::fmt::Write as _;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::diff::{self, AutoOutcome, FileTree, ThreeWayDiff};
use crate::error::{Result, VaultError};
use crate::model::conflict::{FileConflict, ResolutionStrategy};
use crate::storage::atomic_write;

/// Marker opening the local section of a conflicted file.
pub const MARKER_LOCAL: &str = "<<<<<<< LOCAL (current)";
/// Marker separating the local and remote sections.
pub const MARKER_SEPARATOR: &str = "=======";
/// Marker closing the remote section.
pub const MARKER_REMOTE: &str = ">>>>>>> REMOTE (incoming)";
/// Placeholder text for a side that deleted the file.
pub const DELETED_PLACEHOLDER: &str = "(file deleted)";

// ---------------------------------------------------------------------------
// MergeResult
// ---------------------------------------------------------------------------

/// Per-file counters for one merge.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeStats {
    /// Files considered (changed on at least one side).
    pub total: usize,
    /// Files applied automatically.
    pub auto_merged: usize,
    /// Files left conflicted (markers written).
    pub conflicted: usize,
    /// Binary conflicts (local side kept, no markers).
    pub binary_conflicts: usize,
}

/// The outcome of a tree or file merge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeResult {
    /// True iff no conflicts remain.
    pub success: bool,
    /// Per-file counters.
    pub stats: MergeStats,
    /// Human-readable one-line summary.
    pub summary: String,
    /// The unresolved conflicts, with side content attached.
    pub conflicts: Vec<FileConflict>,
}

impl MergeResult {
    fn from_parts(stats: MergeStats, conflicts: Vec<FileConflict>) -> Self {
        let mut summary = format!(
            "{} file(s): {} auto-merged, {} conflicted",
            stats.total, stats.auto_merged, stats.conflicted
        );
        if stats.binary_conflicts > 0 {
            let _ = write!(summary, " ({} binary)", stats.binary_conflicts);
        }
        Self {
            success: conflicts.is_empty(),
            stats,
            summary,
            conflicts,
        }
    }
}

// ---------------------------------------------------------------------------
// Tree merge
// ---------------------------------------------------------------------------

/// Merge a `(base, local, remote)` directory triple into `output`.
///
/// `output` may be one of the inputs (the common case: merging project edits
/// into the collection subtree in place). The merged tree fully replaces the
/// output tree: files whose surviving decision is a deletion are removed.
pub fn merge_trees(base: &Path, local: &Path, remote: &Path, output: &Path) -> Result<MergeResult> {
    let base_tree = diff::read_tree(base)?;
    let local_tree = diff::read_tree(local)?;
    let remote_tree = diff::read_tree(remote)?;
    let classified = diff::three_way_diff(&base_tree, &local_tree, &remote_tree);

    apply(
        &classified,
        &base_tree,
        &local_tree,
        &remote_tree,
        output,
    )
}

/// Merge a single file triple into `output`.
///
/// Any of the three input paths may be absent, covering deletion and
/// add-add cases without tree walking.
pub fn merge_files(base: &Path, local: &Path, remote: &Path, output: &Path) -> Result<MergeResult> {
    let read_one = |path: &Path, name: &Path| -> Result<FileTree> {
        let mut tree = FileTree::new();
        if path.is_file() {
            tree.insert(name.to_path_buf(), std::fs::read(path)?);
        }
        Ok(tree)
    };

    // All three sides are keyed under the output file name so they line up.
    let name = output
        .file_name()
        .map(std::path::PathBuf::from)
        .ok_or_else(|| VaultError::Io(std::io::Error::other("output path has no file name")))?;

    let base_tree = read_one(base, &name)?;
    let local_tree = read_one(local, &name)?;
    let remote_tree = read_one(remote, &name)?;
    let classified = diff::three_way_diff(&base_tree, &local_tree, &remote_tree);

    let parent = output
        .parent()
        .ok_or_else(|| VaultError::Io(std::io::Error::other("output path has no parent")))?;
    apply(&classified, &base_tree, &local_tree, &remote_tree, parent)
}

fn apply(
    classified: &ThreeWayDiff,
    base: &FileTree,
    local: &FileTree,
    remote: &FileTree,
    output: &Path,
) -> Result<MergeResult> {
    let mut stats = MergeStats {
        total: classified.auto_mergeable.len() + classified.conflicts.len(),
        ..MergeStats::default()
    };

    // Unchanged files are not part of the classification but must survive in
    // the output tree when it is being (re)built.
    for (path, bytes) in base {
        let untouched = local.get(path) == Some(bytes) && remote.get(path) == Some(bytes);
        if untouched && !output.join(path).exists() {
            atomic_write(&output.join(path), bytes)?;
        }
    }

    for auto in &classified.auto_mergeable {
        let target = output.join(&auto.path);
        match auto.outcome {
            AutoOutcome::TakeLocal => {
                let bytes = local.get(&auto.path).ok_or_else(|| missing(&auto.path))?;
                atomic_write(&target, bytes)?;
            }
            AutoOutcome::TakeRemote => {
                let bytes = remote.get(&auto.path).ok_or_else(|| missing(&auto.path))?;
                atomic_write(&target, bytes)?;
            }
            AutoOutcome::TakeEither => {
                let bytes = local
                    .get(&auto.path)
                    .or_else(|| remote.get(&auto.path))
                    .ok_or_else(|| missing(&auto.path))?;
                atomic_write(&target, bytes)?;
            }
            AutoOutcome::Delete => {
                crate::storage::remove_tree(&target)?;
            }
        }
        stats.auto_merged += 1;
    }

    for conflict in &classified.conflicts {
        let target = output.join(&conflict.path);
        if conflict.binary {
            // No marker soup in binary files: keep the local side and flag.
            let bytes = conflict
                .local
                .as_deref()
                .or(conflict.remote.as_deref())
                .ok_or_else(|| missing(&conflict.path))?;
            atomic_write(&target, bytes)?;
            stats.binary_conflicts += 1;
        } else {
            atomic_write(&target, &marker_file(conflict))?;
        }
        stats.conflicted += 1;
    }

    Ok(MergeResult::from_parts(stats, classified.conflicts.clone()))
}

fn missing(path: &Path) -> VaultError {
    VaultError::Integrity {
        detail: format!(
            "classified side for '{}' has no content; the tree changed mid-merge",
            path.display()
        ),
    }
}

/// Render a Git-style conflict-marker file for a text conflict.
///
/// A side that deleted the file is rendered as the literal
/// `(file deleted)` placeholder.
#[must_use]
pub fn marker_file(conflict: &FileConflict) -> Vec<u8> {
    let section = |side: Option<&[u8]>| -> Vec<u8> {
        match side {
            Some(bytes) => {
                let mut out = bytes.to_vec();
                if !out.ends_with(b"\n") && !out.is_empty() {
                    out.push(b'\n');
                }
                out
            }
            None => format!("{DELETED_PLACEHOLDER}\n").into_bytes(),
        }
    };

    let mut out = Vec::new();
    out.extend_from_slice(MARKER_LOCAL.as_bytes());
    out.push(b'\n');
    out.extend_from_slice(&section(conflict.local.as_deref()));
    out.extend_from_slice(MARKER_SEPARATOR.as_bytes());
    out.push(b'\n');
    out.extend_from_slice(&section(conflict.remote.as_deref()));
    out.extend_from_slice(MARKER_REMOTE.as_bytes());
    out.push(b'\n');
    out
}

// ---------------------------------------------------------------------------
// Conflict resolution
// ---------------------------------------------------------------------------

/// Resolve one conflict by writing the chosen content to `output_path`.
///
/// `ResolutionStrategy::Merge` requires caller-provided merged content. The
/// other strategies use the conflict's recorded side and refuse to act when
/// that side is absent — resolving "use remote" against a deleted remote
/// would silently write an empty file otherwise. When the chosen side is a
/// recorded deletion the file is removed instead.
pub fn resolve_conflict(
    conflict: &FileConflict,
    strategy: ResolutionStrategy,
    merged_content: Option<&[u8]>,
    output_path: &Path,
) -> Result<()> {
    match strategy {
        ResolutionStrategy::Merge => {
            let content = merged_content.ok_or_else(|| VaultError::ConstraintViolation {
                detail: format!(
                    "strategy 'merge' for '{}' requires merged content",
                    conflict.path.display()
                ),
            })?;
            atomic_write(output_path, content)
        }
        ResolutionStrategy::UseLocal | ResolutionStrategy::UseRemote | ResolutionStrategy::UseBase => {
            match conflict.side(strategy) {
                Some(bytes) => atomic_write(output_path, bytes),
                None if strategy == ResolutionStrategy::UseBase => {
                    Err(VaultError::ConstraintViolation {
                        detail: format!(
                            "conflict on '{}' has no base content to restore",
                            conflict.path.display()
                        ),
                    })
                }
                // The chosen side deleted the file; resolution is deletion.
                None => crate::storage::remove_tree(output_path),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::conflict::{ConflictKind, ResolutionHint};
    use std::fs;
    use std::path::PathBuf;

    struct Triple {
        _root: tempfile::TempDir,
        base: PathBuf,
        local: PathBuf,
        remote: PathBuf,
        output: PathBuf,
    }

    fn triple() -> Triple {
        let root = tempfile::tempdir().unwrap();
        let make = |name: &str| {
            let p = root.path().join(name);
            fs::create_dir_all(&p).unwrap();
            p
        };
        Triple {
            base: make("base"),
            local: make("local"),
            remote: make("remote"),
            output: make("output"),
            _root: root,
        }
    }

    fn write(dir: &Path, rel: &str, content: &str) {
        let full = dir.join(rel);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(full, content).unwrap();
    }

    #[test]
    fn clean_merge_applies_both_sides() {
        let t = triple();
        write(&t.base, "a.md", "base-a\n");
        write(&t.base, "b.md", "base-b\n");
        write(&t.local, "a.md", "local-a\n"); // local edit
        write(&t.local, "b.md", "base-b\n");
        write(&t.remote, "a.md", "base-a\n");
        write(&t.remote, "b.md", "remote-b\n"); // remote edit

        let result = merge_trees(&t.base, &t.local, &t.remote, &t.output).unwrap();
        assert!(result.success);
        assert_eq!(result.stats.auto_merged, 2);
        assert_eq!(result.stats.conflicted, 0);
        assert_eq!(fs::read_to_string(t.output.join("a.md")).unwrap(), "local-a\n");
        assert_eq!(fs::read_to_string(t.output.join("b.md")).unwrap(), "remote-b\n");
    }

    #[test]
    fn unchanged_files_survive_into_output() {
        let t = triple();
        write(&t.base, "keep.md", "same\n");
        write(&t.local, "keep.md", "same\n");
        write(&t.remote, "keep.md", "same\n");
        write(&t.local, "new.md", "added\n");

        let result = merge_trees(&t.base, &t.local, &t.remote, &t.output).unwrap();
        assert!(result.success);
        assert_eq!(fs::read_to_string(t.output.join("keep.md")).unwrap(), "same\n");
        assert_eq!(fs::read_to_string(t.output.join("new.md")).unwrap(), "added\n");
    }

    #[test]
    fn local_equals_base_merge_reproduces_remote() {
        let t = triple();
        write(&t.base, "a.md", "one\n");
        write(&t.base, "b.md", "two\n");
        write(&t.local, "a.md", "one\n");
        write(&t.local, "b.md", "two\n");
        write(&t.remote, "a.md", "edited\n");
        // b.md deleted remotely; c.md added remotely.
        write(&t.remote, "c.md", "new\n");

        let result = merge_trees(&t.base, &t.local, &t.remote, &t.output).unwrap();
        assert!(result.success);
        let merged = diff::read_tree(&t.output).unwrap();
        let remote = diff::read_tree(&t.remote).unwrap();
        assert_eq!(merged, remote, "merge output must equal the remote tree");
    }

    #[test]
    fn conflict_writes_marker_file() {
        let t = triple();
        write(&t.base, "f.md", "base\n");
        write(&t.local, "f.md", "local\n");
        write(&t.remote, "f.md", "remote\n");

        let result = merge_trees(&t.base, &t.local, &t.remote, &t.output).unwrap();
        assert!(!result.success);
        assert_eq!(result.stats.conflicted, 1);
        assert_eq!(result.conflicts.len(), 1);

        let merged = fs::read_to_string(t.output.join("f.md")).unwrap();
        assert!(merged.contains(MARKER_LOCAL));
        assert!(merged.contains("local\n"));
        assert!(merged.contains(MARKER_SEPARATOR));
        assert!(merged.contains("remote\n"));
        assert!(merged.contains(MARKER_REMOTE));
    }

    #[test]
    fn deletion_conflict_marks_missing_side() {
        let t = triple();
        write(&t.base, "f.md", "base\n");
        write(&t.local, "f.md", "local\n");
        // remote deleted f.md

        let result = merge_trees(&t.base, &t.local, &t.remote, &t.output).unwrap();
        assert!(!result.success);
        assert_eq!(result.conflicts[0].kind, ConflictKind::Deletion);

        let merged = fs::read_to_string(t.output.join("f.md")).unwrap();
        assert!(merged.contains(DELETED_PLACEHOLDER));
        assert!(merged.contains("local\n"));
    }

    #[test]
    fn binary_conflict_keeps_local_without_markers() {
        let t = triple();
        fs::write(t.base.join("blob.bin"), b"\x00base").unwrap();
        fs::write(t.local.join("blob.bin"), b"\x00local").unwrap();
        fs::write(t.remote.join("blob.bin"), b"\x00remote").unwrap();

        let result = merge_trees(&t.base, &t.local, &t.remote, &t.output).unwrap();
        assert!(!result.success);
        assert_eq!(result.stats.binary_conflicts, 1);
        assert_eq!(fs::read(t.output.join("blob.bin")).unwrap(), b"\x00local");
        assert!(result.summary.contains("binary"));
    }

    #[test]
    fn auto_delete_removes_from_output() {
        let t = triple();
        write(&t.base, "gone.md", "bye\n");
        write(&t.local, "gone.md", "bye\n");
        // remote deleted it; output already has the old copy (in-place merge).
        write(&t.output, "gone.md", "bye\n");

        let result = merge_trees(&t.base, &t.local, &t.remote, &t.output).unwrap();
        assert!(result.success);
        assert!(!t.output.join("gone.md").exists());
    }

    #[test]
    fn merge_files_single_conflict() {
        let t = triple();
        write(&t.base, "cmd.md", "base\n");
        write(&t.local, "cmd.md", "local\n");
        write(&t.remote, "cmd.md", "remote\n");

        let out = t.output.join("cmd.md");
        let result = merge_files(
            &t.base.join("cmd.md"),
            &t.local.join("cmd.md"),
            &t.remote.join("cmd.md"),
            &out,
        )
        .unwrap();
        assert!(!result.success);
        let merged = fs::read_to_string(&out).unwrap();
        assert!(merged.contains(MARKER_LOCAL));
    }

    #[test]
    fn merge_files_clean_takes_changed_side() {
        let t = triple();
        write(&t.base, "cmd.md", "base\n");
        write(&t.local, "cmd.md", "base\n");
        write(&t.remote, "cmd.md", "remote\n");

        let out = t.output.join("cmd.md");
        let result = merge_files(
            &t.base.join("cmd.md"),
            &t.local.join("cmd.md"),
            &t.remote.join("cmd.md"),
            &out,
        )
        .unwrap();
        assert!(result.success);
        assert_eq!(fs::read_to_string(&out).unwrap(), "remote\n");
    }

    // -----------------------------------------------------------------------
    // resolve_conflict
    // -----------------------------------------------------------------------

    fn sample_conflict() -> FileConflict {
        FileConflict {
            path: PathBuf::from("f.md"),
            kind: ConflictKind::BothModified,
            base: Some(b"base\n".to_vec()),
            local: Some(b"local\n".to_vec()),
            remote: Some(b"remote\n".to_vec()),
            auto_mergeable: false,
            recommendation: ResolutionHint::Manual,
            binary: false,
        }
    }

    #[test]
    fn resolve_use_local_writes_local_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("f.md");
        resolve_conflict(&sample_conflict(), ResolutionStrategy::UseLocal, None, &out).unwrap();
        assert_eq!(fs::read_to_string(&out).unwrap(), "local\n");
    }

    #[test]
    fn resolve_use_base_restores_base() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("f.md");
        resolve_conflict(&sample_conflict(), ResolutionStrategy::UseBase, None, &out).unwrap();
        assert_eq!(fs::read_to_string(&out).unwrap(), "base\n");
    }

    #[test]
    fn resolve_merge_requires_content() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("f.md");
        let err =
            resolve_conflict(&sample_conflict(), ResolutionStrategy::Merge, None, &out).unwrap_err();
        assert!(matches!(err, VaultError::ConstraintViolation { .. }));

        resolve_conflict(
            &sample_conflict(),
            ResolutionStrategy::Merge,
            Some(b"hand-merged\n"),
            &out,
        )
        .unwrap();
        assert_eq!(fs::read_to_string(&out).unwrap(), "hand-merged\n");
    }

    #[test]
    fn resolve_missing_base_fails_instead_of_writing_empty() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("f.md");
        let mut conflict = sample_conflict();
        conflict.kind = ConflictKind::AddAdd;
        conflict.base = None;
        let err =
            resolve_conflict(&conflict, ResolutionStrategy::UseBase, None, &out).unwrap_err();
        assert!(matches!(err, VaultError::ConstraintViolation { .. }));
        assert!(!out.exists());
    }

    #[test]
    fn resolve_deleted_side_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("f.md");
        fs::write(&out, "markers").unwrap();
        let mut conflict = sample_conflict();
        conflict.kind = ConflictKind::Deletion;
        conflict.remote = None;
        resolve_conflict(&conflict, ResolutionStrategy::UseRemote, None, &out).unwrap();
        assert!(!out.exists());
    }

    #[test]
    fn marker_file_adds_trailing_newline_to_sections() {
        let mut conflict = sample_conflict();
        conflict.local = Some(b"no-newline".to_vec());
        let rendered = String::from_utf8(marker_file(&conflict)).unwrap();
        assert!(rendered.contains("no-newline\n======="));
    }
}
