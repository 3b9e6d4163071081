//! Shared fixtures for integration tests.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;

use skillvault::config::VaultConfig;
use skillvault::model::artifact::{artifact_rel_path, Artifact, ArtifactMetadata};
use skillvault::model::types::{ArtifactId, ArtifactName, ArtifactType, OriginKind};
use skillvault::storage::manifest::ManifestStore;
use skillvault::sync::SyncCoordinator;

/// A vault (collection + coordinator) and a project directory, both under
/// one temp root. The temp dir is held so everything lives until drop.
pub struct Fixture {
    _root: tempfile::TempDir,
    pub config: VaultConfig,
    pub project: PathBuf,
}

impl Fixture {
    /// Fresh empty collection named `personal` plus an empty project dir.
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let config = VaultConfig::at(&root.path().join("vault"));
        ManifestStore
            .create_empty(&config.collection_path, "personal")
            .unwrap();
        let project = root.path().join("project");
        fs::create_dir_all(&project).unwrap();
        Self {
            _root: root,
            config,
            project,
        }
    }

    /// Build the coordinator; call after all fixture artifacts are added so
    /// the manifest cache starts warm and correct.
    pub fn coordinator(&self) -> SyncCoordinator {
        SyncCoordinator::new(self.config.clone()).unwrap()
    }

    /// Add a skill to the collection: tree on disk plus manifest entry.
    pub fn add_skill(&self, name: &str, files: &[(&str, &str)]) -> Artifact {
        let artifact_name = ArtifactName::new(name).unwrap();
        let rel = artifact_rel_path(ArtifactType::Skill, &artifact_name);
        let tree = self.config.collection_path.join(&rel);
        write_tree(&tree, files);

        let artifact = Artifact {
            id: ArtifactId::generate(),
            path: rel,
            name: artifact_name,
            artifact_type: ArtifactType::Skill,
            origin: OriginKind::Local,
            added: Utc::now(),
            upstream: None,
            version_spec: None,
            resolved_sha: None,
            resolved_version: None,
            tags: vec![],
            metadata: ArtifactMetadata::default(),
        };

        let store = ManifestStore;
        let mut collection = store.read(&self.config.collection_path).unwrap();
        collection.add(artifact.clone()).unwrap();
        store.write(&self.config.collection_path, &collection).unwrap();
        artifact
    }

    /// Path of a deployed skill tree inside the project.
    pub fn project_skill(&self, name: &str) -> PathBuf {
        self.project.join(".skillvault").join("skills").join(name)
    }

    /// Path of a skill tree inside the collection.
    pub fn collection_skill(&self, name: &str) -> PathBuf {
        self.config.collection_path.join("skills").join(name)
    }
}

/// Write `(relative path, content)` pairs under `root`.
pub fn write_tree(root: &Path, files: &[(&str, &str)]) {
    for (rel, content) in files {
        let full = root.join(rel);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(full, content).unwrap();
    }
}
