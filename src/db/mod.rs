//! Embedded relational store.
//!
//! Holds the artifact, composite-membership, and version tables the core
//! reads from. Schema changes are a linear migration sequence; the runtime
//! refuses to open a database whose on-disk schema is newer than the code
//! understands.

pub mod composites;
pub mod versions;

use std::path::Path;

use rusqlite::Connection;

use crate::error::{Result, VaultError};
use crate::model::types::{ArtifactId, ArtifactType, ContentHash, OriginKind};

// ---------------------------------------------------------------------------
// Migrations
// ---------------------------------------------------------------------------

/// The linear migration sequence. Index `i` migrates the schema from version
/// `i` to `i + 1`; the current schema version is the sequence length.
const MIGRATIONS: &[&str] = &[
    // v1: artifacts + version graph
    "
    CREATE TABLE artifacts (
        id            TEXT PRIMARY KEY,
        collection    TEXT NOT NULL,
        artifact_type TEXT NOT NULL,
        name          TEXT NOT NULL,
        content_hash  TEXT NOT NULL,
        origin        TEXT NOT NULL,
        upstream      TEXT,
        created_at    TEXT NOT NULL,
        updated_at    TEXT NOT NULL,
        UNIQUE (collection, artifact_type, name)
    );

    CREATE TABLE artifact_versions (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        artifact_id   TEXT NOT NULL REFERENCES artifacts(id) ON DELETE CASCADE,
        content_hash  TEXT NOT NULL UNIQUE,
        parent_hash   TEXT,
        change_origin TEXT NOT NULL,
        lineage       TEXT NOT NULL,
        created_at    TEXT NOT NULL
    );

    CREATE INDEX idx_versions_artifact
        ON artifact_versions (artifact_id, created_at);
    ",
    // v2: composite membership edges
    "
    CREATE TABLE composite_members (
        composite_id TEXT NOT NULL REFERENCES artifacts(id) ON DELETE CASCADE,
        child_id     TEXT NOT NULL REFERENCES artifacts(id) ON DELETE CASCADE,
        relationship TEXT NOT NULL,
        pinned_hash  TEXT,
        position     INTEGER,
        PRIMARY KEY (composite_id, child_id)
    );
    ",
];

/// Schema version the code understands.
#[must_use]
pub const fn schema_version() -> i64 {
    MIGRATIONS.len() as i64
}

// ---------------------------------------------------------------------------
// Database
// ---------------------------------------------------------------------------

/// A handle to the embedded store, with migrations applied.
#[derive(Debug)]
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) the database at `path` and bring the schema up to
    /// date.
    ///
    /// # Errors
    /// Returns [`VaultError::Integrity`] when the on-disk schema is newer
    /// than this build understands.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Open an in-memory database (tests and ephemeral use).
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        )?;

        let mut db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&mut self) -> Result<()> {
        let current: i64 = self
            .conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )?;

        let target = schema_version();
        if current > target {
            return Err(VaultError::Integrity {
                detail: format!(
                    "database schema version {current} is newer than this build understands ({target}); upgrade skillvault"
                ),
            });
        }

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        for (idx, sql) in MIGRATIONS.iter().enumerate().skip(current as usize) {
            let version = (idx + 1) as i64;
            let tx = self.conn.transaction()?;
            tx.execute_batch(sql)?;
            tx.execute("DELETE FROM schema_version", [])?;
            tx.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
            tx.commit()?;
        }
        Ok(())
    }

    /// The connection, for module-internal queries.
    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    /// The applied schema version.
    pub fn current_schema_version(&self) -> Result<i64> {
        Ok(self.conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )?)
    }

    // -----------------------------------------------------------------------
    // Artifact rows
    // -----------------------------------------------------------------------

    /// Insert or update an artifact row. The `(collection, type, name)`
    /// triple is unique; the identity is immutable once assigned, so an
    /// upsert never changes `id`.
    pub fn upsert_artifact(&self, row: &ArtifactRow) -> Result<()> {
        self.conn.execute(
            "INSERT INTO artifacts
                 (id, collection, artifact_type, name, content_hash, origin, upstream, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
             ON CONFLICT (collection, artifact_type, name) DO UPDATE SET
                 content_hash = excluded.content_hash,
                 origin       = excluded.origin,
                 upstream     = excluded.upstream,
                 updated_at   = excluded.updated_at",
            rusqlite::params![
                row.id.to_string(),
                row.collection,
                row.artifact_type.as_str(),
                row.name,
                row.content_hash.as_str(),
                row.origin.as_str(),
                row.upstream,
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Look up an artifact row id by `(collection, type, name)`.
    pub fn artifact_id(
        &self,
        collection: &str,
        artifact_type: ArtifactType,
        name: &str,
    ) -> Result<Option<ArtifactId>> {
        let mut stmt = self.conn.prepare(
            "SELECT id FROM artifacts
             WHERE collection = ?1 AND artifact_type = ?2 AND name = ?3",
        )?;
        let mut rows = stmt.query(rusqlite::params![collection, artifact_type.as_str(), name])?;
        match rows.next()? {
            Some(row) => {
                let raw: String = row.get(0)?;
                let id = ArtifactId::parse(&raw).map_err(|e| VaultError::Integrity {
                    detail: format!("corrupt artifact id in database: {e}"),
                })?;
                Ok(Some(id))
            }
            None => Ok(None),
        }
    }

    /// Delete an artifact row; membership edges cascade.
    pub fn delete_artifact(&self, id: ArtifactId) -> Result<()> {
        self.conn
            .execute("DELETE FROM artifacts WHERE id = ?1", [id.to_string()])?;
        Ok(())
    }
}

/// The columns of one artifact row.
#[derive(Clone, Debug)]
pub struct ArtifactRow {
    /// Stable identity.
    pub id: ArtifactId,
    /// Owning collection name.
    pub collection: String,
    /// Artifact type.
    pub artifact_type: ArtifactType,
    /// Artifact name.
    pub name: String,
    /// Current content hash of the on-disk tree.
    pub content_hash: ContentHash,
    /// Provenance tag.
    pub origin: OriginKind,
    /// Upstream reference, when refreshable.
    pub upstream: Option<String>,
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

    fn sample_row(name: &str) -> ArtifactRow {
        ArtifactRow {
            id: ArtifactId::generate(),
            collection: "personal".to_owned(),
            artifact_type: ArtifactType::Skill,
            name: name.to_owned(),
            content_hash: hash('a'),
            origin: OriginKind::Local,
            upstream: None,
        }
    }

    #[test]
    fn open_applies_all_migrations() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.current_schema_version().unwrap(), schema_version());
    }

    #[test]
    fn open_on_disk_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.db");
        drop(Database::open(&path).unwrap());
        let db = Database::open(&path).unwrap();
        assert_eq!(db.current_schema_version().unwrap(), schema_version());
    }

    #[test]
    fn newer_schema_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.db");
        drop(Database::open(&path).unwrap());

        // Simulate a newer build having written a higher version.
        let conn = Connection::open(&path).unwrap();
        conn.execute("UPDATE schema_version SET version = 999", [])
            .unwrap();
        drop(conn);

        let err = Database::open(&path).unwrap_err();
        assert!(matches!(err, VaultError::Integrity { .. }));
    }

    #[test]
    fn upsert_keeps_identity_stable() {
        let db = Database::open_in_memory().unwrap();
        let row = sample_row("alpha");
        db.upsert_artifact(&row).unwrap();

        // Upsert under the same (collection, type, name) with a new id: the
        // original identity must survive.
        let mut replayed = sample_row("alpha");
        replayed.content_hash = hash('b');
        db.upsert_artifact(&replayed).unwrap();

        let found = db
            .artifact_id("personal", ArtifactType::Skill, "alpha")
            .unwrap()
            .unwrap();
        assert_eq!(found, row.id);
    }

    #[test]
    fn artifact_id_missing_is_none() {
        let db = Database::open_in_memory().unwrap();
        assert!(db
            .artifact_id("personal", ArtifactType::Skill, "ghost")
            .unwrap()
            .is_none());
    }

    #[test]
    fn delete_artifact_removes_row() {
        let db = Database::open_in_memory().unwrap();
        let row = sample_row("alpha");
        db.upsert_artifact(&row).unwrap();
        db.delete_artifact(row.id).unwrap();
        assert!(db
            .artifact_id("personal", ArtifactType::Skill, "alpha")
            .unwrap()
            .is_none());
    }
}
