//! Metadata refresh for catalog-sourced artifacts.
//!
//! Re-reads the upstream descriptor for artifacts whose origin is a remote
//! repository or a marketplace, computes a field-level diff against the
//! in-memory artifact, and applies the subset of changes the caller
//! whitelisted. Fields outside the whitelist are still reported as "would
//! change" with their old and new values, but never applied.
//!
//! The refreshable field set is fixed; an unknown field name fails loudly
//! with a suggestion computed by case-insensitive prefix/substring match.

use std::fmt;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::VaultConfig;
use crate::error::{Result, VaultError};
use crate::model::artifact::{Artifact, Collection};
use crate::model::types::{ArtifactKey, Origin};
use crate::snapshot::SnapshotArchiver;
use crate::storage::manifest::ManifestStore;

/// The fixed set of refreshable fields.
pub const REFRESHABLE_FIELDS: [&str; 5] =
    ["description", "tags", "author", "license", "origin_source"];

// ---------------------------------------------------------------------------
// Fetch collaborator
// ---------------------------------------------------------------------------

/// The descriptor an upstream source reports for an artifact.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamDescriptor {
    /// Short description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Topic tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Author attribution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// License identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    /// Canonical upstream locator (may move when a repo is renamed).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_source: Option<String>,
}

/// Why a fetch failed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FetchError {
    /// The upstream signalled a quota limit; skip and continue the batch.
    RateLimited,
    /// The upstream was unreachable.
    Network(String),
    /// The upstream no longer has the artifact.
    NotFound(String),
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateLimited => write!(f, "rate limited"),
            Self::Network(detail) => write!(f, "network error: {detail}"),
            Self::NotFound(detail) => write!(f, "not found upstream: {detail}"),
        }
    }
}

impl std::error::Error for FetchError {}

/// External collaborator that fetches upstream descriptors. The core never
/// talks to the network itself.
pub trait UpstreamFetcher {
    /// Fetch the current descriptor for an artifact's origin.
    fn fetch(&self, origin: &Origin) -> std::result::Result<UpstreamDescriptor, FetchError>;
}

// ---------------------------------------------------------------------------
// Modes and results
// ---------------------------------------------------------------------------

/// What a refresh run is allowed to do.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RefreshMode {
    /// Apply whitelisted metadata changes.
    #[default]
    MetadataOnly,
    /// Report only; never mutate.
    CheckOnly,
    /// Reserved for future content sync; currently refused.
    Sync,
}

/// One field's detected difference.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    /// Field name.
    pub field: String,
    /// Value before the refresh.
    pub old: Value,
    /// Upstream's current value.
    pub new: Value,
    /// Whether the change was applied (inside the whitelist, not a dry run).
    pub applied: bool,
}

/// Why an artifact produced no update.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    /// Local artifacts have no upstream.
    LocalOrigin,
    /// The fetch collaborator was rate limited.
    RateLimited,
    /// The upstream was unreachable.
    NetworkError,
    /// The upstream no longer has the artifact.
    GoneUpstream,
}

/// Per-artifact refresh outcome.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshEntry {
    /// The artifact.
    pub key: ArtifactKey,
    /// Detected changes (whitelisted or not).
    pub changes: Vec<FieldChange>,
    /// Why nothing was fetched, when applicable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped: Option<SkipReason>,
}

/// The result of refreshing a collection.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshResult {
    /// Artifacts whose metadata was updated.
    pub updated: usize,
    /// Artifacts skipped (local origin, rate limit, unreachable).
    pub skipped: usize,
    /// Artifacts whose fetch failed.
    pub error_count: usize,
    /// Id of the pre-refresh snapshot, when one was taken.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<String>,
    /// Per-artifact outcomes.
    pub entries: Vec<RefreshEntry>,
}

// ---------------------------------------------------------------------------
// Field validation
// ---------------------------------------------------------------------------

/// Validate requested field names against the whitelist.
///
/// # Errors
/// An unknown name fails with a suggestion when a whitelist entry matches it
/// by case-insensitive prefix or substring.
pub fn validate_fields(fields: &[String]) -> Result<()> {
    for field in fields {
        if REFRESHABLE_FIELDS.contains(&field.as_str()) {
            continue;
        }
        let lower = field.to_lowercase();
        let suggestion = REFRESHABLE_FIELDS
            .iter()
            .find(|known| known.starts_with(&lower) || known.contains(&lower))
            .or_else(|| {
                REFRESHABLE_FIELDS
                    .iter()
                    .find(|known| lower.starts_with(**known) || lower.contains(**known))
            });
        let detail = match suggestion {
            Some(known) => format!("unknown refresh field '{field}'; did you mean '{known}'?"),
            None => format!(
                "unknown refresh field '{field}'; valid fields: {}",
                REFRESHABLE_FIELDS.join(", ")
            ),
        };
        return Err(VaultError::ConstraintViolation { detail });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Field diff
// ---------------------------------------------------------------------------

/// Compare one artifact against its upstream descriptor across the whole
/// whitelist, marking which detected changes fall inside `selected`.
#[must_use]
pub fn diff_fields(
    artifact: &Artifact,
    upstream: &UpstreamDescriptor,
    selected: Option<&[String]>,
) -> Vec<FieldChange> {
    let in_selection = |field: &str| {
        selected.is_none_or(|fields| fields.iter().any(|f| f == field))
    };
    let mut changes = Vec::new();

    let mut push = |field: &str, old: Value, new: Value| {
        if old != new {
            changes.push(FieldChange {
                field: field.to_owned(),
                old,
                new,
                applied: false,
            });
        }
    };

    push(
        "description",
        json_opt(artifact.metadata.description.as_deref()),
        json_opt(upstream.description.as_deref()),
    );
    push(
        "tags",
        Value::from(artifact.tags.clone()),
        Value::from(upstream.tags.clone()),
    );
    push(
        "author",
        json_opt(artifact.metadata.author.as_deref()),
        json_opt(upstream.author.as_deref()),
    );
    push(
        "license",
        json_opt(artifact.metadata.license.as_deref()),
        json_opt(upstream.license.as_deref()),
    );
    push(
        "origin_source",
        json_opt(artifact.upstream.as_deref()),
        json_opt(upstream.origin_source.as_deref()),
    );

    for change in &mut changes {
        change.applied = in_selection(&change.field);
    }
    changes
}

fn json_opt(value: Option<&str>) -> Value {
    value.map_or(Value::Null, Value::from)
}

/// Apply the `applied` subset of a field diff to the artifact.
fn apply_changes(artifact: &mut Artifact, changes: &[FieldChange]) {
    for change in changes.iter().filter(|c| c.applied) {
        let as_string = |v: &Value| v.as_str().map(str::to_owned);
        match change.field.as_str() {
            "description" => artifact.metadata.description = as_string(&change.new),
            "tags" => {
                artifact.tags = change
                    .new
                    .as_array()
                    .map(|a| {
                        a.iter()
                            .filter_map(|v| v.as_str().map(str::to_owned))
                            .collect()
                    })
                    .unwrap_or_default();
            }
            "author" => artifact.metadata.author = as_string(&change.new),
            "license" => artifact.metadata.license = as_string(&change.new),
            "origin_source" => artifact.upstream = as_string(&change.new),
            _ => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Refresher
// ---------------------------------------------------------------------------

/// Drives refresh runs over a collection.
pub struct Refresher {
    config: VaultConfig,
    manifests: ManifestStore,
    archiver: SnapshotArchiver,
}

impl Refresher {
    /// Build a refresher over the configured collection.
    #[must_use]
    pub fn new(config: VaultConfig) -> Self {
        let archiver = SnapshotArchiver::new(config.snapshots_dir.clone());
        Self {
            config,
            manifests: ManifestStore,
            archiver,
        }
    }

    /// Refresh every refreshable artifact in the collection.
    ///
    /// `fields` restricts which detected changes are applied; `None` applies
    /// every whitelisted field. In `metadata-only` mode a `pre-refresh`
    /// snapshot is taken before any change lands (skipped for dry runs and
    /// `check-only`). Per-artifact failures do not abort the batch.
    pub fn refresh_collection(
        &self,
        fetcher: &dyn UpstreamFetcher,
        fields: Option<&[String]>,
        mode: RefreshMode,
        dry_run: bool,
    ) -> Result<RefreshResult> {
        if let Some(fields) = fields {
            validate_fields(fields)?;
        }
        if mode == RefreshMode::Sync {
            return Err(VaultError::ConstraintViolation {
                detail: "refresh mode 'sync' is reserved and not yet supported".to_owned(),
            });
        }

        let started = Instant::now();
        let mut collection = self.manifests.read(&self.config.collection_path)?;
        let mut result = RefreshResult::default();
        let applying = mode == RefreshMode::MetadataOnly && !dry_run;

        if applying {
            let snapshot = self.archiver.create_snapshot(
                &self.config.collection_path,
                &collection.name,
                &format!("pre-refresh-{}", Utc::now().format("%Y%m%d-%H%M%S")),
            )?;
            result.snapshot_id = Some(snapshot.snapshot_id);
        }

        let mut dirty = false;
        for artifact in &mut collection.artifacts {
            let entry = refresh_one(artifact, fetcher, fields, applying);
            match &entry.skipped {
                Some(SkipReason::LocalOrigin | SkipReason::RateLimited) => result.skipped += 1,
                Some(SkipReason::NetworkError | SkipReason::GoneUpstream) => {
                    result.error_count += 1;
                }
                None => {
                    if entry.changes.iter().any(|c| c.applied) && applying {
                        result.updated += 1;
                        dirty = true;
                    }
                }
            }
            result.entries.push(entry);
        }

        if dirty {
            self.manifests.write(&self.config.collection_path, &collection)?;
        }

        tracing::info!(
            operation = "refresh_collection",
            collection = %collection.name,
            updated = result.updated,
            skipped = result.skipped,
            error_count = result.error_count,
            duration_ms = started.elapsed().as_millis() as u64,
            "refresh complete"
        );
        Ok(result)
    }

    /// Refresh a single artifact by key.
    pub fn refresh_artifact(
        &self,
        fetcher: &dyn UpstreamFetcher,
        key: &ArtifactKey,
        fields: Option<&[String]>,
        mode: RefreshMode,
        dry_run: bool,
    ) -> Result<RefreshEntry> {
        if let Some(fields) = fields {
            validate_fields(fields)?;
        }
        if mode == RefreshMode::Sync {
            return Err(VaultError::ConstraintViolation {
                detail: "refresh mode 'sync' is reserved and not yet supported".to_owned(),
            });
        }

        let mut collection: Collection = self.manifests.read(&self.config.collection_path)?;
        let applying = mode == RefreshMode::MetadataOnly && !dry_run;
        if applying {
            self.archiver.create_snapshot(
                &self.config.collection_path,
                &collection.name,
                &format!("pre-refresh-{}", Utc::now().format("%Y%m%d-%H%M%S")),
            )?;
        }

        let artifact = collection
            .find_mut(key.artifact_type, &key.name)
            .ok_or_else(|| VaultError::ArtifactNotFound { key: key.clone() })?;
        let entry = refresh_one(artifact, fetcher, fields, applying);

        if applying && entry.changes.iter().any(|c| c.applied) {
            self.manifests.write(&self.config.collection_path, &collection)?;
        }
        Ok(entry)
    }
}

fn refresh_one(
    artifact: &mut Artifact,
    fetcher: &dyn UpstreamFetcher,
    fields: Option<&[String]>,
    applying: bool,
) -> RefreshEntry {
    let key = artifact.key();
    let origin = artifact.origin();
    if !origin.is_refreshable() {
        return RefreshEntry {
            key,
            changes: vec![],
            skipped: Some(SkipReason::LocalOrigin),
        };
    }

    let upstream = match fetcher.fetch(&origin) {
        Ok(descriptor) => descriptor,
        Err(FetchError::RateLimited) => {
            tracing::warn!(operation = "refresh", artifact = %key, "rate limited; skipping");
            return RefreshEntry {
                key,
                changes: vec![],
                skipped: Some(SkipReason::RateLimited),
            };
        }
        Err(FetchError::Network(detail)) => {
            tracing::warn!(operation = "refresh", artifact = %key, %detail, "unreachable upstream");
            return RefreshEntry {
                key,
                changes: vec![],
                skipped: Some(SkipReason::NetworkError),
            };
        }
        Err(FetchError::NotFound(detail)) => {
            tracing::warn!(operation = "refresh", artifact = %key, %detail, "gone upstream");
            return RefreshEntry {
                key,
                changes: vec![],
                skipped: Some(SkipReason::GoneUpstream),
            };
        }
    };

    let mut changes = diff_fields(artifact, &upstream, fields);
    if applying {
        apply_changes(artifact, &changes);
    } else {
        for change in &mut changes {
            change.applied = false;
        }
    }
    RefreshEntry {
        key,
        changes,
        skipped: None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
