//! Version graph: an append-only DAG of artifact versions.
//!
//! Each record is a node keyed by content hash with a nullable parent-hash
//! edge. The graph is never traversed by in-memory pointers — `parent_hash`
//! links are the authoritative path, and the denormalized `lineage` array is
//! an O(1)-read convenience kept consistent on insert.
//!
//! Inserts are idempotent on content hash: recording a hash that already
//! exists returns the existing record unchanged. Reverting to an earlier
//! state and re-committing the same bytes therefore never creates a phantom
//! branch; the DAG remains a forest of content-hash singletons.

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VaultError};
use crate::model::types::{ArtifactId, ChangeOrigin, ContentHash};

use super::Database;

// ---------------------------------------------------------------------------
// VersionRecord
// ---------------------------------------------------------------------------

/// One node in an artifact's version DAG.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    /// Row id (insertion order).
    pub id: i64,
    /// The artifact this version belongs to.
    pub artifact_id: ArtifactId,
    /// Content hash of the tree at this version.
    pub content_hash: ContentHash,
    /// Parent version's content hash; `None` for branch roots.
    pub parent_hash: Option<ContentHash>,
    /// What kind of event produced this version.
    pub change_origin: ChangeOrigin,
    /// Hashes from this node back to its root, most-recent first.
    /// `lineage[0]` is always `content_hash`.
    pub lineage: Vec<ContentHash>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Database methods
// ---------------------------------------------------------------------------

impl Database {
    /// Record the first landing of an artifact: the root of a new branch.
    ///
    /// `parent_hash` is null and the lineage contains only the new hash.
    /// Idempotent: an existing record for `content_hash` is returned as-is.
    pub fn record_deployment(
        &self,
        artifact_id: ArtifactId,
        content_hash: &ContentHash,
    ) -> Result<VersionRecord> {
        if let Some(existing) = self.version_by_hash(content_hash)? {
            return Ok(existing);
        }
        self.insert_version(
            artifact_id,
            content_hash,
            None,
            ChangeOrigin::Deployment,
            vec![content_hash.clone()],
        )
    }

    /// Record an update pulled from the collection: a child of an existing
    /// version.
    ///
    /// The lineage is the new hash prepended to the parent's lineage. When
    /// the parent record is missing (imported ledgers, pruned history), the
    /// lineage falls back to `[hash, parent_hash]`.
    pub fn record_sync(
        &self,
        artifact_id: ArtifactId,
        content_hash: &ContentHash,
        parent_hash: &ContentHash,
    ) -> Result<VersionRecord> {
        self.record_child(artifact_id, content_hash, parent_hash, ChangeOrigin::Sync)
    }

    /// Record user edits to a deployed artifact. Identical shape to
    /// [`Database::record_sync`], differentiated only by attribution.
    pub fn record_local_modification(
        &self,
        artifact_id: ArtifactId,
        content_hash: &ContentHash,
        parent_hash: &ContentHash,
    ) -> Result<VersionRecord> {
        self.record_child(
            artifact_id,
            content_hash,
            parent_hash,
            ChangeOrigin::LocalModification,
        )
    }

    /// Dispatch on a change origin; deployment ignores the parent.
    pub fn record_version(
        &self,
        artifact_id: ArtifactId,
        content_hash: &ContentHash,
        parent_hash: Option<&ContentHash>,
        origin: ChangeOrigin,
    ) -> Result<VersionRecord> {
        match (origin, parent_hash) {
            (ChangeOrigin::Deployment, _) | (_, None) => {
                self.record_deployment(artifact_id, content_hash)
            }
            (ChangeOrigin::Sync, Some(parent)) => {
                self.record_sync(artifact_id, content_hash, parent)
            }
            (ChangeOrigin::LocalModification, Some(parent)) => {
                self.record_local_modification(artifact_id, content_hash, parent)
            }
        }
    }

    /// The most recent version for an artifact, by creation time (row id
    /// breaks ties, so the answer is total).
    pub fn latest_version(&self, artifact_id: ArtifactId) -> Result<Option<VersionRecord>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, artifact_id, content_hash, parent_hash, change_origin, lineage, created_at
             FROM artifact_versions
             WHERE artifact_id = ?1
             ORDER BY created_at DESC, id DESC
             LIMIT 1",
        )?;
        stmt.query_row([artifact_id.to_string()], row_to_record)
            .optional()?
            .map(validate_record)
            .transpose()
    }

    /// Look up a version by content hash.
    pub fn version_by_hash(&self, content_hash: &ContentHash) -> Result<Option<VersionRecord>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, artifact_id, content_hash, parent_hash, change_origin, lineage, created_at
             FROM artifact_versions
             WHERE content_hash = ?1",
        )?;
        stmt.query_row([content_hash.as_str()], row_to_record)
            .optional()?
            .map(validate_record)
            .transpose()
    }

    /// All versions of an artifact, newest first.
    pub fn versions_for(&self, artifact_id: ArtifactId) -> Result<Vec<VersionRecord>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, artifact_id, content_hash, parent_hash, change_origin, lineage, created_at
             FROM artifact_versions
             WHERE artifact_id = ?1
             ORDER BY created_at DESC, id DESC",
        )?;
        let rows = stmt.query_map([artifact_id.to_string()], row_to_record)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(validate_record(row?)?);
        }
        Ok(records)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn record_child(
        &self,
        artifact_id: ArtifactId,
        content_hash: &ContentHash,
        parent_hash: &ContentHash,
        origin: ChangeOrigin,
    ) -> Result<VersionRecord> {
        if let Some(existing) = self.version_by_hash(content_hash)? {
            return Ok(existing);
        }

        let lineage = match self.version_by_hash(parent_hash)? {
            Some(parent) if !parent.lineage.is_empty() => {
                let mut lineage = Vec::with_capacity(parent.lineage.len() + 1);
                lineage.push(content_hash.clone());
                lineage.extend(parent.lineage);
                lineage
            }
            // Parent record missing: advisory two-entry lineage. Walking
            // parent_hash links stays authoritative either way.
            _ => vec![content_hash.clone(), parent_hash.clone()],
        };

        self.insert_version(artifact_id, content_hash, Some(parent_hash), origin, lineage)
    }

    fn insert_version(
        &self,
        artifact_id: ArtifactId,
        content_hash: &ContentHash,
        parent_hash: Option<&ContentHash>,
        origin: ChangeOrigin,
        lineage: Vec<ContentHash>,
    ) -> Result<VersionRecord> {
        let created_at = Utc::now();
        let lineage_json = serde_json::to_string(&lineage).map_err(|e| VaultError::Integrity {
            detail: format!("serialize lineage: {e}"),
        })?;

        self.conn().execute(
            "INSERT INTO artifact_versions
                 (artifact_id, content_hash, parent_hash, change_origin, lineage, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                artifact_id.to_string(),
                content_hash.as_str(),
                parent_hash.map(ContentHash::as_str),
                origin.as_str(),
                lineage_json,
                created_at.to_rfc3339(),
            ],
        )?;

        let id = self.conn().last_insert_rowid();
        Ok(VersionRecord {
            id,
            artifact_id,
            content_hash: content_hash.clone(),
            parent_hash: parent_hash.cloned(),
            change_origin: origin,
            lineage,
            created_at,
        })
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRecord> {
    Ok(RawRecord {
        id: row.get(0)?,
        artifact_id: row.get(1)?,
        content_hash: row.get(2)?,
        parent_hash: row.get(3)?,
        change_origin: row.get(4)?,
        lineage: row.get(5)?,
        created_at: row.get(6)?,
    })
}

/// Row columns before domain validation.
struct RawRecord {
    id: i64,
    artifact_id: String,
    content_hash: String,
    parent_hash: Option<String>,
    change_origin: String,
    lineage: String,
    created_at: String,
}

fn validate_record(raw: RawRecord) -> Result<VersionRecord> {
    let integrity = |what: &str, detail: String| VaultError::Integrity {
        detail: format!("corrupt version record ({what}): {detail}"),
    };

    Ok(VersionRecord {
        id: raw.id,
        artifact_id: ArtifactId::parse(&raw.artifact_id)
            .map_err(|e| integrity("artifact_id", e.to_string()))?,
        content_hash: ContentHash::new(&raw.content_hash)
            .map_err(|e| integrity("content_hash", e.to_string()))?,
        parent_hash: raw
            .parent_hash
            .map(|h| ContentHash::new(&h))
            .transpose()
            .map_err(|e| integrity("parent_hash", e.to_string()))?,
        change_origin: ChangeOrigin::parse(&raw.change_origin)
            .map_err(|e| integrity("change_origin", e.to_string()))?,
        lineage: serde_json::from_str(&raw.lineage)
            .map_err(|e| integrity("lineage", e.to_string()))?,
        created_at: DateTime::parse_from_rfc3339(&raw.created_at)
            .map_err(|e| integrity("created_at", e.to_string()))?
            .with_timezone(&Utc),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
