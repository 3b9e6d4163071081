//! Vault configuration.
//!
//! All paths the core touches — collection directory, snapshots directory,
//! database location, lock directory — are passed in explicitly at
//! construction. There are no process-wide singletons in the core; the one
//! deliberate exception is the job queue's well-known per-user directory,
//! which [`VaultConfig::default_base`] computes.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::model::drift::ConflictAttribution;

/// Default bound on queued background jobs.
const DEFAULT_JOB_QUEUE_LIMIT: usize = 64;

/// Default number of snapshots kept by retention pruning.
const DEFAULT_SNAPSHOT_RETENTION: usize = 20;

// ---------------------------------------------------------------------------
// VaultConfig
// ---------------------------------------------------------------------------

/// Explicit wiring for the core: where things live and which policies apply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VaultConfig {
    /// The collection directory (holds `collection.toml` and artifact trees).
    pub collection_path: PathBuf,
    /// Where snapshot archives and sidecars are written.
    pub snapshots_dir: PathBuf,
    /// Location of the embedded database.
    pub db_path: PathBuf,
    /// Directory for artifact-level lock files.
    pub locks_dir: PathBuf,
    /// Directory for persisted background jobs.
    pub jobs_dir: PathBuf,
    /// How a `conflict` drift is attributed.
    pub conflict_attribution: ConflictAttribution,
    /// Backlog bound for the background job queue.
    pub job_queue_limit: usize,
    /// How many snapshots retention pruning keeps.
    pub snapshot_retention: usize,
}

impl VaultConfig {
    /// Standard layout under a base directory:
    ///
    /// ```text
    /// <base>/
    ///   collection/      artifact trees + collection.toml
    ///   snapshots/       archives + sidecars
    ///   locks/           artifact lock files
    ///   jobs/            persisted job records
    ///   vault.db         embedded database
    /// ```
    #[must_use]
    pub fn at(base: &Path) -> Self {
        Self {
            collection_path: base.join("collection"),
            snapshots_dir: base.join("snapshots"),
            db_path: base.join("vault.db"),
            locks_dir: base.join("locks"),
            jobs_dir: base.join("jobs"),
            conflict_attribution: ConflictAttribution::default(),
            job_queue_limit: DEFAULT_JOB_QUEUE_LIMIT,
            snapshot_retention: DEFAULT_SNAPSHOT_RETENTION,
        }
    }

    /// The per-user base directory (`~/.skillvault`), the one well-known
    /// location the job queue backbone relies on.
    #[must_use]
    pub fn default_base() -> PathBuf {
        std::env::var_os("HOME")
            .map_or_else(|| PathBuf::from("."), PathBuf::from)
            .join(".skillvault")
    }

    /// Apply overrides from an optional `config.toml` next to the base.
    ///
    /// A missing file leaves every default in place; a malformed one is an
    /// error (silently ignoring a user's config hides real mistakes).
    pub fn load_overrides(mut self, path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(self);
        }
        let content = std::fs::read_to_string(path)?;
        let overrides: ConfigFile =
            toml::from_str(&content).map_err(|e| crate::error::VaultError::Parse {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })?;

        if let Some(dir) = overrides.snapshots_dir {
            self.snapshots_dir = dir;
        }
        if let Some(path) = overrides.db_path {
            self.db_path = path;
        }
        if let Some(attribution) = overrides.conflict_attribution {
            self.conflict_attribution = attribution;
        }
        if let Some(limit) = overrides.job_queue_limit {
            self.job_queue_limit = limit;
        }
        if let Some(keep) = overrides.snapshot_retention {
            self.snapshot_retention = keep;
        }
        Ok(self)
    }
}

/// The optional `config.toml` override file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default)]
    snapshots_dir: Option<PathBuf>,
    #[serde(default)]
    db_path: Option<PathBuf>,
    #[serde(default)]
    conflict_attribution: Option<ConflictAttribution>,
    #[serde(default)]
    job_queue_limit: Option<usize>,
    #[serde(default)]
    snapshot_retention: Option<usize>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_lays_out_standard_paths() {
        let cfg = VaultConfig::at(Path::new("/base"));
        assert_eq!(cfg.collection_path, PathBuf::from("/base/collection"));
        assert_eq!(cfg.snapshots_dir, PathBuf::from("/base/snapshots"));
        assert_eq!(cfg.db_path, PathBuf::from("/base/vault.db"));
        assert_eq!(cfg.job_queue_limit, DEFAULT_JOB_QUEUE_LIMIT);
    }

    #[test]
    fn load_overrides_missing_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = VaultConfig::at(dir.path());
        let loaded = cfg.clone().load_overrides(&dir.path().join("config.toml")).unwrap();
        assert_eq!(cfg, loaded);
    }

    #[test]
    fn load_overrides_applies_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "job_queue_limit = 8\nconflict_attribution = \"sync\"\n",
        )
        .unwrap();
        let cfg = VaultConfig::at(dir.path()).load_overrides(&path).unwrap();
        assert_eq!(cfg.job_queue_limit, 8);
        assert_eq!(cfg.conflict_attribution, ConflictAttribution::Sync);
    }

    #[test]
    fn load_overrides_rejects_unknown_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "no_such_setting = true\n").unwrap();
        assert!(VaultConfig::at(dir.path()).load_overrides(&path).is_err());
    }
}
