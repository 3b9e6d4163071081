//! Persisted conflict state.
//!
//! When a merge leaves conflicts, the side content needed to resolve them
//! later must survive the merge itself (the merged-over tree now contains
//! markers, not the original bytes). Each conflicted artifact gets a state
//! file under the project's config directory, written atomically and removed
//! once every conflict is resolved.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, VaultError};
use crate::model::conflict::FileConflict;
use crate::model::types::{ArtifactKey, ContentHash};
use crate::storage::atomic_write;
use crate::storage::ledger::PROJECT_CONFIG_DIR;

/// Subdirectory of the project config dir holding conflict state files.
const CONFLICTS_DIR: &str = "conflicts";

// ---------------------------------------------------------------------------
// SyncDirection
// ---------------------------------------------------------------------------

/// Which way the conflicted sync was flowing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    /// Project → collection: conflicted files live in the collection tree.
    Pull,
    /// Collection → project: conflicted files live in the project tree.
    Push,
}

// ---------------------------------------------------------------------------
// ConflictState
// ---------------------------------------------------------------------------

/// The persisted record of one artifact's unresolved conflicts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictState {
    /// The conflicted artifact.
    pub key: ArtifactKey,
    /// Direction of the sync that conflicted.
    pub direction: SyncDirection,
    /// Baseline hash the merge ran against (parent for the eventual
    /// version record).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline: Option<ContentHash>,
    /// When the conflict was recorded.
    pub created: DateTime<Utc>,
    /// The unresolved conflicts, side content included.
    pub conflicts: Vec<FileConflict>,
}

impl ConflictState {
    /// Write the state file atomically.
    pub fn save(&self, project: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(|e| VaultError::Integrity {
            detail: format!("serialize conflict state: {e}"),
        })?;
        atomic_write(&state_path(project, &self.key), json.as_bytes())
    }

    /// Load the state for an artifact, if one is pending.
    pub fn load(project: &Path, key: &ArtifactKey) -> Result<Option<Self>> {
        let path = state_path(project, key);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        let state = serde_json::from_str(&content).map_err(|e| VaultError::Parse {
            path,
            detail: e.to_string(),
        })?;
        Ok(Some(state))
    }

    /// Remove the state file once resolution completed; missing is a no-op.
    pub fn clear(project: &Path, key: &ArtifactKey) -> Result<()> {
        crate::storage::remove_tree(&state_path(project, key))
    }
}

fn state_path(project: &Path, key: &ArtifactKey) -> PathBuf {
    project
        .join(PROJECT_CONFIG_DIR)
        .join(CONFLICTS_DIR)
        .join(format!("{}-{}.json", key.artifact_type, key.name))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
