//! Snapshot archiving and restore.
//!
//! Packs the whole collection tree into a gzip-compressed tar archive before
//! destructive operations, with a TOML sidecar manifest describing it.
//! Snapshot ids are timestamp-based, so lexicographic order is creation
//! order. Restore extracts into a staging directory and swaps it into place
//! with atomic renames, rolling the old collection back on any failure.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VaultError};
use crate::storage::atomic_write;

/// File extension of snapshot archives.
const ARCHIVE_EXT: &str = "tar.gz";

// ---------------------------------------------------------------------------
// Snapshot descriptor
// ---------------------------------------------------------------------------

/// Sidecar manifest written next to each archive.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Timestamp-based id; sorts by creation time.
    pub snapshot_id: String,
    /// Name of the archived collection.
    pub collection_name: String,
    /// Why the snapshot was taken (e.g. `pre-sync-…`, `pre-refresh-…`).
    pub message: String,
    /// Creation time.
    pub created: DateTime<Utc>,
    /// Number of artifacts in the archived manifest.
    pub artifact_count: usize,
}

// ---------------------------------------------------------------------------
// SnapshotArchiver
// ---------------------------------------------------------------------------

/// Creates, lists, restores, and prunes collection snapshots.
///
/// Locking is the caller's concern: the sync coordinator holds the
/// collection read lock while creating a pre-sync snapshot and the write
/// lock around restore.
#[derive(Clone, Debug)]
pub struct SnapshotArchiver {
    snapshots_dir: PathBuf,
}

impl SnapshotArchiver {
    /// Create an archiver rooted at `snapshots_dir`.
    #[must_use]
    pub fn new(snapshots_dir: PathBuf) -> Self {
        Self { snapshots_dir }
    }

    /// Archive `collection_path` and return the descriptor.
    ///
    /// # Errors
    /// Any failure — unreadable tree, disk full, rename refused — surfaces
    /// as [`VaultError::Snapshot`]; callers treat it as fatal for the
    /// operation that requested the snapshot.
    pub fn create_snapshot(
        &self,
        collection_path: &Path,
        collection_name: &str,
        message: &str,
    ) -> Result<Snapshot> {
        if !collection_path.is_dir() {
            return Err(VaultError::Snapshot {
                detail: format!(
                    "collection directory '{}' does not exist",
                    collection_path.display()
                ),
            });
        }
        fs::create_dir_all(&self.snapshots_dir).map_err(snapshot_io)?;

        let created = Utc::now();
        let snapshot_id = self.allocate_id(collection_name, created);
        let archive_path = self.archive_path(&snapshot_id);
        let tmp_path = archive_path.with_extension("tmp");

        // Build the archive in a temp file, fsync, then rename into place.
        let file = fs::File::create(&tmp_path).map_err(snapshot_io)?;
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        builder
            .append_dir_all(".", collection_path)
            .map_err(snapshot_io)?;
        let encoder = builder.into_inner().map_err(snapshot_io)?;
        let file = encoder.finish().map_err(snapshot_io)?;
        file.sync_all().map_err(snapshot_io)?;
        drop(file);
        fs::rename(&tmp_path, &archive_path).map_err(snapshot_io)?;

        let artifact_count = count_artifacts(collection_path);
        let snapshot = Snapshot {
            snapshot_id: snapshot_id.clone(),
            collection_name: collection_name.to_owned(),
            message: message.to_owned(),
            created,
            artifact_count,
        };
        let sidecar = toml::to_string_pretty(&snapshot).map_err(|e| VaultError::Snapshot {
            detail: format!("serialize sidecar: {e}"),
        })?;
        atomic_write(&self.sidecar_path(&snapshot_id), sidecar.as_bytes()).map_err(|e| {
            VaultError::Snapshot {
                detail: format!("write sidecar: {e}"),
            }
        })?;

        tracing::info!(
            operation = "create_snapshot",
            collection = collection_name,
            snapshot_id = %snapshot.snapshot_id,
            artifact_count,
            "snapshot created"
        );
        Ok(snapshot)
    }

    /// Descriptors of all snapshots, sorted by id (which sorts by time).
    pub fn list_snapshots(&self) -> Result<Vec<Snapshot>> {
        let mut snapshots = Vec::new();
        if !self.snapshots_dir.exists() {
            return Ok(snapshots);
        }
        for entry in fs::read_dir(&self.snapshots_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("toml") {
                continue;
            }
            let content = fs::read_to_string(&path)?;
            let snapshot: Snapshot = toml::from_str(&content).map_err(|e| VaultError::Parse {
                path: path.clone(),
                detail: e.to_string(),
            })?;
            snapshots.push(snapshot);
        }
        snapshots.sort_by(|a, b| a.snapshot_id.cmp(&b.snapshot_id));
        Ok(snapshots)
    }

    /// Look up one snapshot descriptor.
    pub fn get_snapshot(&self, snapshot_id: &str) -> Result<Snapshot> {
        let path = self.sidecar_path(snapshot_id);
        let content = fs::read_to_string(&path).map_err(|e| VaultError::Snapshot {
            detail: format!("snapshot '{snapshot_id}' not found: {e}"),
        })?;
        toml::from_str(&content).map_err(|e| VaultError::Parse {
            path,
            detail: e.to_string(),
        })
    }

    /// Restore `snapshot_id` over `collection_path`.
    ///
    /// Extraction goes to a staging directory next to the collection; the
    /// old collection is renamed aside, the staging directory renamed into
    /// place, and the old tree removed only after the swap succeeded. On
    /// failure the old collection is moved back.
    pub fn restore_snapshot(&self, snapshot_id: &str, collection_path: &Path) -> Result<()> {
        let archive_path = self.archive_path(snapshot_id);
        if !archive_path.exists() {
            return Err(VaultError::Snapshot {
                detail: format!("snapshot archive '{snapshot_id}' not found"),
            });
        }

        let parent = collection_path.parent().ok_or_else(|| VaultError::Snapshot {
            detail: format!(
                "collection path '{}' has no parent directory",
                collection_path.display()
            ),
        })?;
        fs::create_dir_all(parent).map_err(snapshot_io)?;

        let staging = parent.join(format!(".restore-{snapshot_id}"));
        let displaced = parent.join(format!(".pre-restore-{snapshot_id}"));
        crate::storage::remove_tree(&staging)?;

        // 1. Extract into staging.
        let file = fs::File::open(&archive_path).map_err(snapshot_io)?;
        let mut archive = tar::Archive::new(GzDecoder::new(file));
        archive.unpack(&staging).map_err(snapshot_io)?;

        // 2. Swap: old aside, staging in. Roll back on failure.
        let had_old = collection_path.exists();
        if had_old {
            fs::rename(collection_path, &displaced).map_err(snapshot_io)?;
        }
        if let Err(e) = fs::rename(&staging, collection_path) {
            if had_old {
                let _ = fs::rename(&displaced, collection_path);
            }
            let _ = crate::storage::remove_tree(&staging);
            return Err(snapshot_io(e));
        }

        // 3. Swap succeeded; the displaced tree is no longer needed.
        if had_old {
            crate::storage::remove_tree(&displaced)?;
        }

        tracing::info!(
            operation = "restore_snapshot",
            snapshot_id,
            collection = %collection_path.display(),
            "snapshot restored"
        );
        Ok(())
    }

    /// Delete one snapshot (archive + sidecar).
    pub fn delete_snapshot(&self, snapshot_id: &str) -> Result<()> {
        let archive = self.archive_path(snapshot_id);
        let sidecar = self.sidecar_path(snapshot_id);
        if !archive.exists() && !sidecar.exists() {
            return Err(VaultError::Snapshot {
                detail: format!("snapshot '{snapshot_id}' not found"),
            });
        }
        crate::storage::remove_tree(&archive)?;
        crate::storage::remove_tree(&sidecar)?;
        Ok(())
    }

    /// Keep the `keep` newest snapshots and delete the rest. Returns the
    /// ids that were removed.
    pub fn prune(&self, keep: usize) -> Result<Vec<String>> {
        let snapshots = self.list_snapshots()?;
        let excess = snapshots.len().saturating_sub(keep);
        let mut removed = Vec::with_capacity(excess);
        for snapshot in snapshots.into_iter().take(excess) {
            self.delete_snapshot(&snapshot.snapshot_id)?;
            removed.push(snapshot.snapshot_id);
        }
        Ok(removed)
    }

    // -----------------------------------------------------------------------
    // Paths
    // -----------------------------------------------------------------------

    fn allocate_id(&self, collection_name: &str, created: DateTime<Utc>) -> String {
        let stamp = created.format("%Y%m%d-%H%M%S%3f");
        let base = format!("{collection_name}-{stamp}");
        // Two snapshots inside one millisecond get a disambiguating suffix
        // so ids stay unique and monotonically sortable.
        let mut candidate = base.clone();
        let mut n = 1;
        while self.archive_path(&candidate).exists() {
            n += 1;
            candidate = format!("{base}-{n}");
        }
        candidate
    }

    fn archive_path(&self, snapshot_id: &str) -> PathBuf {
        self.snapshots_dir.join(format!("{snapshot_id}.{ARCHIVE_EXT}"))
    }

    fn sidecar_path(&self, snapshot_id: &str) -> PathBuf {
        self.snapshots_dir.join(format!("{snapshot_id}.toml"))
    }
}

fn snapshot_io(e: std::io::Error) -> VaultError {
    VaultError::Snapshot {
        detail: e.to_string(),
    }
}

/// Count `[[artifacts]]` entries in the manifest; a missing or unreadable
/// manifest counts as zero (the archive still captures whatever is there).
fn count_artifacts(collection_path: &Path) -> usize {
    crate::storage::manifest::ManifestStore
        .read(collection_path)
        .map(|c| c.artifacts.len())
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::manifest::ManifestStore;

    struct Setup {
        _root: tempfile::TempDir,
        collection: PathBuf,
        archiver: SnapshotArchiver,
    }

    fn setup() -> Setup {
        let root = tempfile::tempdir().unwrap();
        let collection = root.path().join("collection");
        ManifestStore.create_empty(&collection, "personal").unwrap();
        let archiver = SnapshotArchiver::new(root.path().join("snapshots"));
        Setup {
            collection,
            archiver,
            _root: root,
        }
    }

    #[test]
    fn create_writes_archive_and_sidecar() {
        let s = setup();
        let snapshot = s
            .archiver
            .create_snapshot(&s.collection, "personal", "pre-sync-test")
            .unwrap();
        assert!(snapshot.snapshot_id.starts_with("personal-"));
        assert_eq!(snapshot.message, "pre-sync-test");
        assert_eq!(snapshot.artifact_count, 0);

        let listed = s.archiver.list_snapshots().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0], snapshot);
    }

    #[test]
    fn create_fails_for_missing_collection() {
        let s = setup();
        let err = s
            .archiver
            .create_snapshot(&s.collection.join("ghost"), "x", "m")
            .unwrap_err();
        assert!(matches!(err, VaultError::Snapshot { .. }));
    }

    #[test]
    fn ids_are_unique_and_sorted() {
        let s = setup();
        let a = s
            .archiver
            .create_snapshot(&s.collection, "personal", "first")
            .unwrap();
        let b = s
            .archiver
            .create_snapshot(&s.collection, "personal", "second")
            .unwrap();
        assert_ne!(a.snapshot_id, b.snapshot_id);

        let listed = s.archiver.list_snapshots().unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed[0].snapshot_id <= listed[1].snapshot_id);
    }

    #[test]
    fn restore_roundtrips_collection_content() {
        let s = setup();
        std::fs::create_dir_all(s.collection.join("skills/foo")).unwrap();
        std::fs::write(s.collection.join("skills/foo/SKILL.md"), "# Foo\n").unwrap();
        let before = crate::hash::hash_tree(&s.collection).unwrap();

        let snapshot = s
            .archiver
            .create_snapshot(&s.collection, "personal", "pre-delete")
            .unwrap();

        // Destroy the artifact, then restore.
        std::fs::remove_dir_all(s.collection.join("skills/foo")).unwrap();
        assert!(!s.collection.join("skills/foo").exists());

        s.archiver
            .restore_snapshot(&snapshot.snapshot_id, &s.collection)
            .unwrap();
        assert!(s.collection.join("skills/foo/SKILL.md").exists());
        let after = crate::hash::hash_tree(&s.collection).unwrap();
        assert_eq!(before, after, "restored tree must hash identically");
    }

    #[test]
    fn restore_unknown_snapshot_fails() {
        let s = setup();
        let err = s
            .archiver
            .restore_snapshot("personal-00000000-000000000", &s.collection)
            .unwrap_err();
        assert!(matches!(err, VaultError::Snapshot { .. }));
        // The collection is untouched.
        assert!(ManifestStore.exists(&s.collection));
    }

    #[test]
    fn restore_leaves_no_staging_leftovers() {
        let s = setup();
        let snapshot = s
            .archiver
            .create_snapshot(&s.collection, "personal", "m")
            .unwrap();
        s.archiver
            .restore_snapshot(&snapshot.snapshot_id, &s.collection)
            .unwrap();
        let parent = s.collection.parent().unwrap();
        let leftovers: Vec<_> = std::fs::read_dir(parent)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| {
                let name = e.file_name().to_string_lossy().into_owned();
                name.starts_with(".restore-") || name.starts_with(".pre-restore-")
            })
            .collect();
        assert!(leftovers.is_empty(), "staging dirs left behind: {leftovers:?}");
    }

    #[test]
    fn delete_removes_archive_and_sidecar() {
        let s = setup();
        let snapshot = s
            .archiver
            .create_snapshot(&s.collection, "personal", "m")
            .unwrap();
        s.archiver.delete_snapshot(&snapshot.snapshot_id).unwrap();
        assert!(s.archiver.list_snapshots().unwrap().is_empty());
        assert!(s.archiver.delete_snapshot(&snapshot.snapshot_id).is_err());
    }

    #[test]
    fn prune_keeps_newest() {
        let s = setup();
        let mut ids = Vec::new();
        for i in 0..4 {
            ids.push(
                s.archiver
                    .create_snapshot(&s.collection, "personal", &format!("m{i}"))
                    .unwrap()
                    .snapshot_id,
            );
        }
        let removed = s.archiver.prune(2).unwrap();
        assert_eq!(removed.len(), 2);
        let remaining = s.archiver.list_snapshots().unwrap();
        assert_eq!(remaining.len(), 2);
        // The newest two survive.
        assert_eq!(remaining[0].snapshot_id, ids[2]);
        assert_eq!(remaining[1].snapshot_id, ids[3]);
    }

    #[test]
    fn artifact_count_reflects_manifest() {
        let s = setup();
        let store = ManifestStore;
        let mut col = store.read(&s.collection).unwrap();
        let name = crate::model::types::ArtifactName::new("foo").unwrap();
        col.add(crate::model::artifact::Artifact {
            id: crate::model::types::ArtifactId::generate(),
            path: crate::model::artifact::artifact_rel_path(
                crate::model::types::ArtifactType::Skill,
                &name,
            ),
            name,
            artifact_type: crate::model::types::ArtifactType::Skill,
            origin: crate::model::types::OriginKind::Local,
            added: Utc::now(),
            upstream: None,
            version_spec: None,
            resolved_sha: None,
            resolved_version: None,
            tags: vec![],
            metadata: crate::model::artifact::ArtifactMetadata::default(),
        })
        .unwrap();
        store.write(&s.collection, &col).unwrap();

        let snapshot = s
            .archiver
            .create_snapshot(&s.collection, "personal", "m")
            .unwrap();
        assert_eq!(snapshot.artifact_count, 1);
    }
}
