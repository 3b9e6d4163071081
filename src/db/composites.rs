//! Composite artifacts: membership edges between a parent artifact and the
//! children it aggregates by reference.
//!
//! A composite is an ordinary artifact row of type `composite` plus a set of
//! membership edges. Edges reference children by stable identity so they
//! survive renames. Membership is unique per `(composite, child)`, and the
//! membership graph is kept acyclic at insert time.

use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VaultError};
use crate::model::types::{ArtifactId, ContentHash};

use super::Database;

// ---------------------------------------------------------------------------
// Membership
// ---------------------------------------------------------------------------

/// One membership edge of a composite.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    /// The aggregating composite.
    pub composite_id: ArtifactId,
    /// The aggregated child.
    pub child_id: ArtifactId,
    /// Relationship tag (e.g. `"includes"`, `"requires"`).
    pub relationship: String,
    /// Optional pin to a specific child version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pinned_hash: Option<ContentHash>,
    /// Optional ordering position within the composite.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<i64>,
}

// ---------------------------------------------------------------------------
// Database methods
// ---------------------------------------------------------------------------

impl Database {
    /// Add a membership edge.
    ///
    /// # Errors
    /// - [`VaultError::ConstraintViolation`] for a duplicate `(composite,
    ///   child)` pair or a self-edge.
    /// - [`VaultError::ConstraintViolation`] when the edge would create a
    ///   cycle: the composite is reachable from the proposed child through
    ///   existing membership edges.
    pub fn add_member(&self, edge: &Membership) -> Result<()> {
        if edge.composite_id == edge.child_id {
            return Err(VaultError::ConstraintViolation {
                detail: "a composite cannot contain itself".to_owned(),
            });
        }
        if self.membership_exists(edge.composite_id, edge.child_id)? {
            return Err(VaultError::ConstraintViolation {
                detail: format!(
                    "artifact {} is already a member of composite {}",
                    edge.child_id, edge.composite_id
                ),
            });
        }
        if self.reaches(edge.child_id, edge.composite_id)? {
            return Err(VaultError::ConstraintViolation {
                detail: format!(
                    "adding {} to composite {} would create a membership cycle",
                    edge.child_id, edge.composite_id
                ),
            });
        }

        self.conn().execute(
            "INSERT INTO composite_members
                 (composite_id, child_id, relationship, pinned_hash, position)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                edge.composite_id.to_string(),
                edge.child_id.to_string(),
                edge.relationship,
                edge.pinned_hash.as_ref().map(ContentHash::as_str),
                edge.position,
            ],
        )?;
        Ok(())
    }

    /// Remove a membership edge; unknown edges are a no-op.
    pub fn remove_member(&self, composite_id: ArtifactId, child_id: ArtifactId) -> Result<()> {
        self.conn().execute(
            "DELETE FROM composite_members WHERE composite_id = ?1 AND child_id = ?2",
            [composite_id.to_string(), child_id.to_string()],
        )?;
        Ok(())
    }

    /// All memberships of a composite, ordered by position then child id.
    pub fn members_of(&self, composite_id: ArtifactId) -> Result<Vec<Membership>> {
        let mut stmt = self.conn().prepare(
            "SELECT composite_id, child_id, relationship, pinned_hash, position
             FROM composite_members
             WHERE composite_id = ?1
             ORDER BY position IS NULL, position, child_id",
        )?;
        let rows = stmt.query_map([composite_id.to_string()], row_to_membership)?;
        let mut edges = Vec::new();
        for row in rows {
            edges.push(validate_membership(row?)?);
        }
        Ok(edges)
    }

    /// Composites that directly contain `child_id`.
    pub fn composites_containing(&self, child_id: ArtifactId) -> Result<Vec<ArtifactId>> {
        let mut stmt = self.conn().prepare(
            "SELECT composite_id FROM composite_members WHERE child_id = ?1 ORDER BY composite_id",
        )?;
        let rows = stmt.query_map([child_id.to_string()], |row| row.get::<_, String>(0))?;
        let mut ids = Vec::new();
        for row in rows {
            let raw = row?;
            ids.push(ArtifactId::parse(&raw).map_err(|e| VaultError::Integrity {
                detail: format!("corrupt composite id: {e}"),
            })?);
        }
        Ok(ids)
    }

    /// Delete a composite. Its membership edges go with it; the children
    /// are deleted only when `deep` is requested.
    pub fn delete_composite(&self, composite_id: ArtifactId, deep: bool) -> Result<()> {
        if deep {
            for member in self.members_of(composite_id)? {
                self.delete_artifact(member.child_id)?;
            }
        }
        // Edges cascade from the artifact row.
        self.delete_artifact(composite_id)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn membership_exists(&self, composite_id: ArtifactId, child_id: ArtifactId) -> Result<bool> {
        let found: Option<i64> = self
            .conn()
            .query_row(
                "SELECT 1 FROM composite_members WHERE composite_id = ?1 AND child_id = ?2",
                [composite_id.to_string(), child_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Whether `target` is reachable from `start` through membership edges
    /// (start contains ... contains target). Iterative walk; the graph is
    /// acyclic by construction so the frontier always terminates.
    fn reaches(&self, start: ArtifactId, target: ArtifactId) -> Result<bool> {
        let mut frontier = vec![start];
        let mut seen = std::collections::HashSet::new();
        while let Some(current) = frontier.pop() {
            if current == target {
                return Ok(true);
            }
            if !seen.insert(current) {
                continue;
            }
            for member in self.members_of(current)? {
                frontier.push(member.child_id);
            }
        }
        Ok(false)
    }
}

struct RawMembership {
    composite_id: String,
    child_id: String,
    relationship: String,
    pinned_hash: Option<String>,
    position: Option<i64>,
}

fn row_to_membership(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawMembership> {
    Ok(RawMembership {
        composite_id: row.get(0)?,
        child_id: row.get(1)?,
        relationship: row.get(2)?,
        pinned_hash: row.get(3)?,
        position: row.get(4)?,
    })
}

fn validate_membership(raw: RawMembership) -> Result<Membership> {
    let integrity = |what: &str, detail: String| VaultError::Integrity {
        detail: format!("corrupt membership edge ({what}): {detail}"),
    };
    Ok(Membership {
        composite_id: ArtifactId::parse(&raw.composite_id)
            .map_err(|e| integrity("composite_id", e.to_string()))?,
        child_id: ArtifactId::parse(&raw.child_id)
            .map_err(|e| integrity("child_id", e.to_string()))?,
        relationship: raw.relationship,
        pinned_hash: raw
            .pinned_hash
            .map(|h| ContentHash::new(&h))
            .transpose()
            .map_err(|e| integrity("pinned_hash", e.to_string()))?,
        position: raw.position,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ArtifactRow;
    use crate::model::types::{ArtifactType, OriginKind};

    fn hash(c: char) -> ContentHash {
        ContentHash::new(&c.to_string().repeat(64)).unwrap()
    }

    fn insert(db: &Database, name: &str, artifact_type: ArtifactType) -> ArtifactId {
        let id = ArtifactId::generate();
        db.upsert_artifact(&ArtifactRow {
            id,
            collection: "personal".to_owned(),
            artifact_type,
            name: name.to_owned(),
            content_hash: hash('0'),
            origin: OriginKind::Local,
            upstream: None,
        })
        .unwrap();
        id
    }

    fn edge(composite: ArtifactId, child: ArtifactId) -> Membership {
        Membership {
            composite_id: composite,
            child_id: child,
            relationship: "includes".to_owned(),
            pinned_hash: None,
            position: None,
        }
    }

    #[test]
    fn add_and_list_members() {
        let db = Database::open_in_memory().unwrap();
        let plugin = insert(&db, "review-suite", ArtifactType::Composite);
        let skill = insert(&db, "code-review", ArtifactType::Skill);
        let cmd = insert(&db, "deploy", ArtifactType::Command);

        db.add_member(&Membership {
            position: Some(1),
            ..edge(plugin, skill)
        })
        .unwrap();
        db.add_member(&Membership {
            position: Some(0),
            ..edge(plugin, cmd)
        })
        .unwrap();

        let members = db.members_of(plugin).unwrap();
        assert_eq!(members.len(), 2);
        // Ordered by position.
        assert_eq!(members[0].child_id, cmd);
        assert_eq!(members[1].child_id, skill);
    }

    #[test]
    fn duplicate_membership_is_refused() {
        let db = Database::open_in_memory().unwrap();
        let plugin = insert(&db, "suite", ArtifactType::Composite);
        let skill = insert(&db, "alpha", ArtifactType::Skill);
        db.add_member(&edge(plugin, skill)).unwrap();
        let err = db.add_member(&edge(plugin, skill)).unwrap_err();
        assert!(matches!(err, VaultError::ConstraintViolation { .. }));
    }

    #[test]
    fn self_membership_is_refused() {
        let db = Database::open_in_memory().unwrap();
        let plugin = insert(&db, "suite", ArtifactType::Composite);
        let err = db.add_member(&edge(plugin, plugin)).unwrap_err();
        assert!(matches!(err, VaultError::ConstraintViolation { .. }));
    }

    #[test]
    fn membership_cycle_is_refused() {
        let db = Database::open_in_memory().unwrap();
        let a = insert(&db, "outer", ArtifactType::Composite);
        let b = insert(&db, "middle", ArtifactType::Composite);
        let c = insert(&db, "inner", ArtifactType::Composite);
        db.add_member(&edge(a, b)).unwrap();
        db.add_member(&edge(b, c)).unwrap();

        // c → a would close the loop a → b → c → a.
        let err = db.add_member(&edge(c, a)).unwrap_err();
        assert!(matches!(err, VaultError::ConstraintViolation { .. }));
    }

    #[test]
    fn deleting_child_cascades_to_edges() {
        let db = Database::open_in_memory().unwrap();
        let plugin = insert(&db, "suite", ArtifactType::Composite);
        let skill = insert(&db, "alpha", ArtifactType::Skill);
        db.add_member(&edge(plugin, skill)).unwrap();

        db.delete_artifact(skill).unwrap();
        assert!(db.members_of(plugin).unwrap().is_empty());
    }

    #[test]
    fn shallow_delete_keeps_children() {
        let db = Database::open_in_memory().unwrap();
        let plugin = insert(&db, "suite", ArtifactType::Composite);
        let skill = insert(&db, "alpha", ArtifactType::Skill);
        db.add_member(&edge(plugin, skill)).unwrap();

        db.delete_composite(plugin, false).unwrap();
        assert!(db
            .artifact_id("personal", ArtifactType::Skill, "alpha")
            .unwrap()
            .is_some());
    }

    #[test]
    fn deep_delete_removes_children() {
        let db = Database::open_in_memory().unwrap();
        let plugin = insert(&db, "suite", ArtifactType::Composite);
        let skill = insert(&db, "alpha", ArtifactType::Skill);
        db.add_member(&edge(plugin, skill)).unwrap();

        db.delete_composite(plugin, true).unwrap();
        assert!(db
            .artifact_id("personal", ArtifactType::Skill, "alpha")
            .unwrap()
            .is_none());
    }

    #[test]
    fn composites_containing_lists_parents() {
        let db = Database::open_in_memory().unwrap();
        let plugin = insert(&db, "suite", ArtifactType::Composite);
        let skill = insert(&db, "alpha", ArtifactType::Skill);
        db.add_member(&edge(plugin, skill)).unwrap();
        assert_eq!(db.composites_containing(skill).unwrap(), vec![plugin]);
        assert!(db.composites_containing(plugin).unwrap().is_empty());
    }

    #[test]
    fn pinned_hash_roundtrips() {
        let db = Database::open_in_memory().unwrap();
        let plugin = insert(&db, "suite", ArtifactType::Composite);
        let skill = insert(&db, "alpha", ArtifactType::Skill);
        db.add_member(&Membership {
            pinned_hash: Some(hash('e')),
            ..edge(plugin, skill)
        })
        .unwrap();
        let members = db.members_of(plugin).unwrap();
        assert_eq!(members[0].pinned_hash, Some(hash('e')));
    }
}
