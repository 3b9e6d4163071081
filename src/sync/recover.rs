//! Startup reconciliation of the deployment ledger.
//!
//! A crash between the version-graph insert and the ledger rewrite leaves
//! the two disagreeing about an artifact's baseline. On the next startup the
//! ledger entry is re-derived from the filesystem and the latest version
//! record: whichever carries the higher content hash wins (last write wins),
//! and entries for artifacts that exist in neither the collection nor the
//! project are dropped — deleted artifacts are never resurrected.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::db::Database;
use crate::error::Result;
use crate::model::artifact::artifact_rel_path;
use crate::model::types::ArtifactKey;
use crate::storage::ledger::LedgerStore;

// ---------------------------------------------------------------------------
// RecoveryFix
// ---------------------------------------------------------------------------

/// What reconciliation did to one ledger entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "action")]
pub enum RecoveryFix {
    /// The entry's baseline was rolled forward to the latest version record.
    BaselineAdvanced {
        /// The affected artifact.
        key: ArtifactKey,
        /// The baseline hash before reconciliation (hex).
        previous: Option<String>,
        /// The baseline hash after reconciliation (hex).
        current: String,
    },
    /// The entry referenced an artifact that exists nowhere; it was removed.
    EntryDropped {
        /// The dropped artifact.
        key: ArtifactKey,
    },
}

/// Reconcile a project's ledger against the version graph and the
/// filesystem. Returns the fixes applied; an empty list means the ledger
/// was already consistent.
pub fn reconcile(
    project: &Path,
    collection_path: &Path,
    collection_name: &str,
    db: &Database,
) -> Result<Vec<RecoveryFix>> {
    let ledgers = LedgerStore;
    let mut ledger = ledgers.load(project)?;
    let mut fixes = Vec::new();
    let mut dirty = false;

    ledger.deployed.retain(|entry| {
        let key = ArtifactKey::new(entry.artifact_type, entry.name.clone());
        let rel = artifact_rel_path(entry.artifact_type, &entry.name);
        let in_collection = collection_path.join(&rel).exists();
        let in_project = project
            .join(crate::storage::ledger::PROJECT_CONFIG_DIR)
            .join(&rel)
            .exists();
        if in_collection || in_project {
            return true;
        }
        tracing::warn!(
            operation = "reconcile",
            artifact = %key,
            "ledger entry references an artifact that exists nowhere; dropping"
        );
        fixes.push(RecoveryFix::EntryDropped { key });
        dirty = true;
        false
    });

    for entry in &mut ledger.deployed {
        let key = ArtifactKey::new(entry.artifact_type, entry.name.clone());
        let Some(artifact_id) =
            db.artifact_id(collection_name, entry.artifact_type, entry.name.as_str())?
        else {
            continue;
        };
        let Some(latest) = db.latest_version(artifact_id)? else {
            continue;
        };

        let ledger_baseline = entry.baseline().cloned();
        if ledger_baseline.as_ref() == Some(&latest.content_hash) {
            continue;
        }

        // Last write wins by higher content hash: only roll the ledger
        // forward when the graph's hash orders above the recorded one.
        let graph_wins = ledger_baseline
            .as_ref()
            .is_none_or(|recorded| latest.content_hash > *recorded);
        if graph_wins {
            fixes.push(RecoveryFix::BaselineAdvanced {
                key: key.clone(),
                previous: ledger_baseline.map(|h| h.as_str().to_owned()),
                current: latest.content_hash.as_str().to_owned(),
            });
            entry.set_baseline(latest.content_hash.clone());
            entry.version_lineage = latest.lineage.clone();
            dirty = true;
            tracing::info!(
                operation = "reconcile",
                artifact = %key,
                baseline = %latest.content_hash.short(),
                "ledger baseline re-derived from version graph"
            );
        }
    }

    if dirty {
        ledgers.write(project, &ledger)?;
    }
    Ok(fixes)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
