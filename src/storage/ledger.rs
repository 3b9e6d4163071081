//! Per-project deployment ledger.
//!
//! One TOML file per project, `.skillvault-deployed.toml` inside the
//! project's dot-prefixed config directory, recording what was deployed,
//! when, and from which baseline hash. The ledger entry's hash is the merge
//! base for three-way diffs.
//!
//! The `sha` and `content_hash` fields mirror each other; a file written
//! with only one of the two names is tolerated on read and normalized on
//! the next write.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, VaultError};
use crate::model::types::{ArtifactName, ArtifactType, ContentHash, SyncStatus};

use super::atomic_write;

/// Name of the project-local config directory.
pub const PROJECT_CONFIG_DIR: &str = ".skillvault";

/// Ledger file name inside the config directory.
pub const LEDGER_FILENAME: &str = ".skillvault-deployed.toml";

// ---------------------------------------------------------------------------
// DeploymentEntry
// ---------------------------------------------------------------------------

/// One `[[deployed]]` record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentEntry {
    /// Artifact name.
    pub name: ArtifactName,

    /// Artifact type.
    pub artifact_type: ArtifactType,

    /// Source descriptor (collection name or upstream locator).
    pub source: String,

    /// Version string at deployment time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Baseline content hash: what was written to the project.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha: Option<ContentHash>,

    /// Mirror of `sha`, kept for files written under the other name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<ContentHash>,

    /// Wall-clock deployment time.
    pub deployed_at: DateTime<Utc>,

    /// Origin collection path.
    pub deployed_from: PathBuf,

    /// Hashes on the path from the current version back to its root,
    /// most-recent first.
    #[serde(default)]
    pub version_lineage: Vec<ContentHash>,

    /// Sync state of the deployment.
    #[serde(default)]
    pub sync_status: SyncStatus,

    /// Relative paths of files with unresolved conflicts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending_conflicts: Vec<PathBuf>,
}

impl DeploymentEntry {
    /// The baseline hash, from whichever of the mirrored fields is present.
    #[must_use]
    pub fn baseline(&self) -> Option<&ContentHash> {
        self.sha.as_ref().or(self.content_hash.as_ref())
    }

    /// Set the baseline, keeping both mirrored fields in step.
    pub fn set_baseline(&mut self, hash: ContentHash) {
        self.sha = Some(hash.clone());
        self.content_hash = Some(hash);
    }
}

// ---------------------------------------------------------------------------
// Ledger document
// ---------------------------------------------------------------------------

/// The deserialized ledger for one project.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ledger {
    /// Deployed artifact records.
    #[serde(default)]
    pub deployed: Vec<DeploymentEntry>,
}

impl Ledger {
    /// Look up an entry by `(type, name)`.
    #[must_use]
    pub fn find(
        &self,
        artifact_type: ArtifactType,
        name: &ArtifactName,
    ) -> Option<&DeploymentEntry> {
        self.deployed
            .iter()
            .find(|e| e.artifact_type == artifact_type && &e.name == name)
    }

    /// Mutable lookup by `(type, name)`.
    #[must_use]
    pub fn find_mut(
        &mut self,
        artifact_type: ArtifactType,
        name: &ArtifactName,
    ) -> Option<&mut DeploymentEntry> {
        self.deployed
            .iter_mut()
            .find(|e| e.artifact_type == artifact_type && &e.name == name)
    }
}

// ---------------------------------------------------------------------------
// LedgerStore
// ---------------------------------------------------------------------------

/// Reads and writes per-project deployment ledgers.
#[derive(Clone, Debug, Default)]
pub struct LedgerStore;

impl LedgerStore {
    /// Canonical ledger path for a project root.
    #[must_use]
    pub fn ledger_path(project: &Path) -> PathBuf {
        project.join(PROJECT_CONFIG_DIR).join(LEDGER_FILENAME)
    }

    /// Load the ledger. A missing file means "no deployments".
    ///
    /// # Errors
    /// Returns [`VaultError::Parse`] on a malformed file; parse errors are
    /// fatal to the calling operation, never partially applied.
    pub fn load(&self, project: &Path) -> Result<Ledger> {
        let path = Self::ledger_path(project);
        if !path.exists() {
            return Ok(Ledger::default());
        }
        let content = std::fs::read_to_string(&path)?;
        let mut ledger: Ledger = toml::from_str(&content).map_err(|e| VaultError::Parse {
            path,
            detail: e.to_string(),
        })?;
        // Normalize the mirrored hash fields on the way in.
        for entry in &mut ledger.deployed {
            if let Some(hash) = entry.baseline().cloned() {
                entry.set_baseline(hash);
            }
        }
        Ok(ledger)
    }

    /// Upsert entries by `(type, name)` and rewrite the file atomically.
    pub fn record(&self, project: &Path, entries: Vec<DeploymentEntry>) -> Result<()> {
        let mut ledger = self.load(project)?;
        for entry in entries {
            match ledger.find_mut(entry.artifact_type, &entry.name) {
                Some(existing) => *existing = entry,
                None => ledger.deployed.push(entry),
            }
        }
        self.write(project, &ledger)
    }

    /// Remove the entry for `(type, name)`.
    ///
    /// # Errors
    /// Returns [`VaultError::ArtifactNotFound`] when no such entry exists.
    pub fn remove(&self, project: &Path, artifact_type: ArtifactType, name: &ArtifactName) -> Result<()> {
        let mut ledger = self.load(project)?;
        let before = ledger.deployed.len();
        ledger
            .deployed
            .retain(|e| !(e.artifact_type == artifact_type && &e.name == name));
        if ledger.deployed.len() == before {
            return Err(VaultError::ArtifactNotFound {
                key: crate::model::types::ArtifactKey::new(artifact_type, name.clone()),
            });
        }
        self.write(project, &ledger)
    }

    /// Rewrite the whole ledger atomically.
    pub fn write(&self, project: &Path, ledger: &Ledger) -> Result<()> {
        let path = Self::ledger_path(project);
        let content = toml::to_string_pretty(ledger).map_err(|e| VaultError::Parse {
            path: path.clone(),
            detail: format!("serialize: {e}"),
        })?;
        atomic_write(&path, content.as_bytes())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(c: char) -> ContentHash {
        ContentHash::new(&c.to_string().repeat(64)).unwrap()
    }

    fn sample_entry(name: &str) -> DeploymentEntry {
        let mut entry = DeploymentEntry {
            name: ArtifactName::new(name).unwrap(),
            artifact_type: ArtifactType::Skill,
            source: "personal".to_owned(),
            version: Some("1.0.0".to_owned()),
            sha: None,
            content_hash: None,
            deployed_at: Utc::now(),
            deployed_from: PathBuf::from("/home/user/.skillvault/collections/personal"),
            version_lineage: vec![hash('a')],
            sync_status: SyncStatus::Synced,
            pending_conflicts: vec![],
        };
        entry.set_baseline(hash('a'));
        entry
    }

    #[test]
    fn load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = LedgerStore.load(dir.path()).unwrap();
        assert!(ledger.deployed.is_empty());
    }

    #[test]
    fn record_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = LedgerStore;
        store.record(dir.path(), vec![sample_entry("bar")]).unwrap();
        let ledger = store.load(dir.path()).unwrap();
        assert_eq!(ledger.deployed.len(), 1);
        assert_eq!(ledger.deployed[0].name.as_str(), "bar");
        assert_eq!(ledger.deployed[0].baseline(), Some(&hash('a')));
    }

    #[test]
    fn record_upserts_by_type_and_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = LedgerStore;
        store.record(dir.path(), vec![sample_entry("bar")]).unwrap();

        let mut updated = sample_entry("bar");
        updated.set_baseline(hash('b'));
        store.record(dir.path(), vec![updated]).unwrap();

        let ledger = store.load(dir.path()).unwrap();
        assert_eq!(ledger.deployed.len(), 1);
        assert_eq!(ledger.deployed[0].baseline(), Some(&hash('b')));
    }

    #[test]
    fn remove_deletes_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = LedgerStore;
        store.record(dir.path(), vec![sample_entry("bar")]).unwrap();
        let name = ArtifactName::new("bar").unwrap();
        store.remove(dir.path(), ArtifactType::Skill, &name).unwrap();
        assert!(store.load(dir.path()).unwrap().deployed.is_empty());
    }

    #[test]
    fn remove_unknown_entry_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let name = ArtifactName::new("ghost").unwrap();
        let err = LedgerStore
            .remove(dir.path(), ArtifactType::Skill, &name)
            .unwrap_err();
        assert!(matches!(err, VaultError::ArtifactNotFound { .. }));
    }

    #[test]
    fn malformed_ledger_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = LedgerStore::ledger_path(dir.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "[[deployed").unwrap();
        let err = LedgerStore.load(dir.path()).unwrap_err();
        assert!(matches!(err, VaultError::Parse { .. }));
    }

    #[test]
    fn content_hash_name_is_tolerated_on_read() {
        // A file written under the `content_hash` name only (older writer).
        let dir = tempfile::tempdir().unwrap();
        let path = LedgerStore::ledger_path(dir.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let text = format!(
            r#"
[[deployed]]
name = "bar"
artifact_type = "skill"
source = "personal"
content_hash = "{}"
deployed_at = "2026-01-10T12:00:00Z"
deployed_from = "/collections/personal"
sync_status = "synced"
"#,
            "a".repeat(64)
        );
        std::fs::write(&path, text).unwrap();

        let ledger = LedgerStore.load(dir.path()).unwrap();
        let entry = &ledger.deployed[0];
        assert_eq!(entry.baseline(), Some(&hash('a')));
        // Normalized: both names now carry the hash.
        assert_eq!(entry.sha, entry.content_hash);
    }

    #[test]
    fn mirrored_fields_stay_in_step() {
        let mut entry = sample_entry("bar");
        entry.set_baseline(hash('c'));
        assert_eq!(entry.sha, Some(hash('c')));
        assert_eq!(entry.content_hash, Some(hash('c')));
    }
}
