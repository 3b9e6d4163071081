//! Collection manifest persistence (`collection.toml`).
//!
//! The manifest is the serialized authority for a collection: a
//! `[collection]` header, repeated `[[artifacts]]` tables, and optional
//! `[[tag_definitions]]` / `[[groups]]` arrays. Artifact trees live in
//! type-specific subdirectories next to it.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, VaultError};
use crate::model::artifact::{Artifact, Collection, Group, TagDefinition};
use crate::model::types::ArtifactType;

use super::atomic_write;

/// File name of the collection manifest.
pub const MANIFEST_FILENAME: &str = "collection.toml";

// ---------------------------------------------------------------------------
// Serialized document shape
// ---------------------------------------------------------------------------

/// The `[collection]` header table.
#[derive(Debug, Serialize, Deserialize)]
struct Header {
    name: String,
    format_version: String,
    created: DateTime<Utc>,
    updated: DateTime<Utc>,
}

/// The full manifest document as laid out on disk.
#[derive(Debug, Serialize, Deserialize)]
struct ManifestDoc {
    collection: Header,
    #[serde(default)]
    artifacts: Vec<Artifact>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tag_definitions: Vec<TagDefinition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    groups: Vec<Group>,
}

impl From<Collection> for ManifestDoc {
    fn from(col: Collection) -> Self {
        Self {
            collection: Header {
                name: col.name,
                format_version: col.format_version,
                created: col.created,
                updated: col.updated,
            },
            artifacts: col.artifacts,
            tag_definitions: col.tag_definitions,
            groups: col.groups,
        }
    }
}

impl From<ManifestDoc> for Collection {
    fn from(doc: ManifestDoc) -> Self {
        Self {
            name: doc.collection.name,
            format_version: doc.collection.format_version,
            created: doc.collection.created,
            updated: doc.collection.updated,
            artifacts: doc.artifacts,
            tag_definitions: doc.tag_definitions,
            groups: doc.groups,
        }
    }
}

// ---------------------------------------------------------------------------
// ManifestStore
// ---------------------------------------------------------------------------

/// Reads and writes `collection.toml` files.
#[derive(Clone, Debug, Default)]
pub struct ManifestStore;

impl ManifestStore {
    /// Canonical manifest path for a collection directory.
    #[must_use]
    pub fn manifest_path(collection_path: &Path) -> PathBuf {
        collection_path.join(MANIFEST_FILENAME)
    }

    /// Read the manifest and return the in-memory collection.
    ///
    /// # Errors
    /// - [`VaultError::Io`] with `NotFound` when the manifest is absent.
    /// - [`VaultError::Parse`] when the TOML is malformed.
    pub fn read(&self, collection_path: &Path) -> Result<Collection> {
        let manifest = Self::manifest_path(collection_path);
        let content = std::fs::read_to_string(&manifest).map_err(VaultError::Io)?;
        let doc: ManifestDoc = toml::from_str(&content).map_err(|e| VaultError::Parse {
            path: manifest,
            detail: e.to_string(),
        })?;
        Ok(doc.into())
    }

    /// Serialize and atomically write the collection, bumping `updated`.
    ///
    /// The `updated` timestamp strictly increases across writes even when
    /// two writes land within clock resolution.
    pub fn write(&self, collection_path: &Path, collection: &Collection) -> Result<()> {
        let mut to_write = collection.clone();
        let now = Utc::now();
        to_write.updated = if now > collection.updated {
            now
        } else {
            collection.updated + chrono::Duration::microseconds(1)
        };

        let doc = ManifestDoc::from(to_write);
        let content = toml::to_string_pretty(&doc).map_err(|e| VaultError::Parse {
            path: Self::manifest_path(collection_path),
            detail: format!("serialize: {e}"),
        })?;
        atomic_write(&Self::manifest_path(collection_path), content.as_bytes())
    }

    /// Create a new empty collection with its type subdirectories.
    ///
    /// # Errors
    /// Returns [`VaultError::ConstraintViolation`] when a manifest already
    /// exists at the path.
    pub fn create_empty(&self, collection_path: &Path, name: &str) -> Result<Collection> {
        if self.exists(collection_path) {
            return Err(VaultError::ConstraintViolation {
                detail: format!(
                    "collection already exists at {}",
                    collection_path.display()
                ),
            });
        }
        std::fs::create_dir_all(collection_path)?;
        for t in ArtifactType::ALL {
            std::fs::create_dir_all(collection_path.join(t.dir_name()))?;
        }

        let collection = Collection::empty(name, Utc::now());
        self.write(collection_path, &collection)?;
        Ok(collection)
    }

    /// Pure filesystem check for a manifest.
    #[must_use]
    pub fn exists(&self, collection_path: &Path) -> bool {
        Self::manifest_path(collection_path).exists()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::artifact::{artifact_rel_path, ArtifactMetadata, FORMAT_VERSION};
    use crate::model::types::{ArtifactId, ArtifactName, OriginKind};

    fn sample_artifact(name: &str) -> Artifact {
        let name = ArtifactName::new(name).unwrap();
        Artifact {
            id: ArtifactId::generate(),
            path: artifact_rel_path(ArtifactType::Skill, &name),
            name,
            artifact_type: ArtifactType::Skill,
            origin: OriginKind::Local,
            added: Utc::now(),
            upstream: None,
            version_spec: None,
            resolved_sha: None,
            resolved_version: None,
            tags: vec!["review".to_owned()],
            metadata: ArtifactMetadata {
                description: Some("Code review helper".to_owned()),
                ..ArtifactMetadata::default()
            },
        }
    }

    #[test]
    fn create_empty_then_read_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManifestStore;
        let created = store.create_empty(dir.path(), "personal").unwrap();
        let read = store.read(dir.path()).unwrap();
        assert_eq!(read.name, "personal");
        assert_eq!(read.format_version, FORMAT_VERSION);
        assert_eq!(read.artifacts, created.artifacts);
    }

    #[test]
    fn create_empty_makes_type_directories() {
        let dir = tempfile::tempdir().unwrap();
        ManifestStore.create_empty(dir.path(), "personal").unwrap();
        for t in ArtifactType::ALL {
            assert!(dir.path().join(t.dir_name()).is_dir(), "{t} dir missing");
        }
    }

    #[test]
    fn create_empty_refuses_existing_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManifestStore;
        store.create_empty(dir.path(), "personal").unwrap();
        let err = store.create_empty(dir.path(), "other").unwrap_err();
        assert!(matches!(err, VaultError::ConstraintViolation { .. }));
    }

    #[test]
    fn read_missing_manifest_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = ManifestStore.read(dir.path()).unwrap_err();
        match err {
            VaultError::Io(e) => assert_eq!(e.kind(), std::io::ErrorKind::NotFound),
            other => panic!("expected Io(NotFound), got {other:?}"),
        }
    }

    #[test]
    fn read_malformed_manifest_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(MANIFEST_FILENAME), "not [valid").unwrap();
        let err = ManifestStore.read(dir.path()).unwrap_err();
        assert!(matches!(err, VaultError::Parse { .. }));
    }

    #[test]
    fn write_roundtrips_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManifestStore;
        let mut col = store.create_empty(dir.path(), "personal").unwrap();
        col.add(sample_artifact("code-review")).unwrap();
        store.write(dir.path(), &col).unwrap();

        let read = store.read(dir.path()).unwrap();
        assert_eq!(read.artifacts.len(), 1);
        assert_eq!(read.artifacts[0].name.as_str(), "code-review");
        assert_eq!(
            read.artifacts[0].metadata.description.as_deref(),
            Some("Code review helper")
        );
    }

    #[test]
    fn write_strictly_increases_updated() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManifestStore;
        let col = store.create_empty(dir.path(), "personal").unwrap();
        let first = store.read(dir.path()).unwrap().updated;
        store.write(dir.path(), &col).unwrap();
        let second = store.read(dir.path()).unwrap().updated;
        store.write(dir.path(), &store.read(dir.path()).unwrap()).unwrap();
        let third = store.read(dir.path()).unwrap().updated;
        assert!(second > first);
        assert!(third > second);
    }

    #[test]
    fn exists_is_pure_check() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManifestStore;
        assert!(!store.exists(dir.path()));
        store.create_empty(dir.path(), "personal").unwrap();
        assert!(store.exists(dir.path()));
    }
}
