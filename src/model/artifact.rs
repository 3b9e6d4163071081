//! Collection and artifact records.
//!
//! In-memory model of the `collection.toml` manifest: the collection header,
//! the artifact entries, and optional tag/group definitions. The manifest and
//! the artifact trees next to it are the serialized authority; everything here
//! is derivable from them.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::{ArtifactId, ArtifactKey, ArtifactName, ArtifactType, Origin, OriginKind};

/// Manifest format version written by this crate.
pub const FORMAT_VERSION: &str = "1.0.0";

// ---------------------------------------------------------------------------
// ArtifactMetadata
// ---------------------------------------------------------------------------

/// Descriptor metadata parsed from an artifact's header by the (external)
/// metadata collaborator and carried in the manifest.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    /// Human-readable title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Short description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Author attribution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,

    /// License identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,

    /// Upstream version string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Declared dependencies on other artifacts (`type:name` keys).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
}

// ---------------------------------------------------------------------------
// Artifact
// ---------------------------------------------------------------------------

/// One `[[artifacts]]` entry in the collection manifest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Stable identity, generated at import time. Immutable once assigned.
    pub id: ArtifactId,

    /// Artifact name, unique per `(collection, type)`.
    pub name: ArtifactName,

    /// Artifact type.
    #[serde(rename = "type")]
    pub artifact_type: ArtifactType,

    /// Path of the artifact tree relative to the collection root.
    pub path: PathBuf,

    /// Provenance tag.
    pub origin: OriginKind,

    /// When the artifact was added to the collection.
    pub added: DateTime<Utc>,

    /// Upstream reference (repository locator or marketplace source id);
    /// present only for refreshable origins.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream: Option<String>,

    /// Requested upstream version constraint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_spec: Option<String>,

    /// Commit identifier resolved at import time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_sha: Option<String>,

    /// Version string resolved at import time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_version: Option<String>,

    /// Free-form tags.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Descriptor metadata.
    #[serde(default)]
    pub metadata: ArtifactMetadata,
}

impl Artifact {
    /// The compound `type:name` key for this artifact.
    #[must_use]
    pub fn key(&self) -> ArtifactKey {
        ArtifactKey::new(self.artifact_type, self.name.clone())
    }

    /// Assemble the full [`Origin`] variant from the persisted tag and the
    /// upstream reference.
    #[must_use]
    pub fn origin(&self) -> Origin {
        match self.origin {
            OriginKind::Local => Origin::Local,
            OriginKind::RemoteRepo => Origin::RemoteRepo {
                locator: self.upstream.clone().unwrap_or_default(),
            },
            OriginKind::Marketplace => Origin::Marketplace {
                source_id: self.upstream.clone().unwrap_or_default(),
            },
        }
    }
}

/// Canonical path of an artifact tree relative to a collection or project
/// root: `skills/<name>` for tree types, `commands/<name>.md` for file types.
#[must_use]
pub fn artifact_rel_path(artifact_type: ArtifactType, name: &ArtifactName) -> PathBuf {
    let dir = PathBuf::from(artifact_type.dir_name());
    match artifact_type.file_extension() {
        Some(ext) => dir.join(format!("{}.{ext}", name.as_str())),
        None => dir.join(name.as_str()),
    }
}

// ---------------------------------------------------------------------------
// TagDefinition / Group
// ---------------------------------------------------------------------------

/// A named tag with an optional display color, from `[[tag_definitions]]`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagDefinition {
    /// Tag name.
    pub name: String,
    /// Display color (hex or palette name), if configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

/// A named group of artifacts, from `[[groups]]`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    /// Group name.
    pub name: String,
    /// Member artifact keys (`type:name`).
    #[serde(default)]
    pub members: Vec<String>,
}

// ---------------------------------------------------------------------------
// Collection
// ---------------------------------------------------------------------------

/// A fully populated in-memory collection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Collection {
    /// Collection name.
    pub name: String,
    /// Manifest format version.
    pub format_version: String,
    /// Creation timestamp.
    pub created: DateTime<Utc>,
    /// Last-write timestamp; strictly increases on every manifest write.
    pub updated: DateTime<Utc>,
    /// Artifact entries.
    pub artifacts: Vec<Artifact>,
    /// Optional tag definitions.
    pub tag_definitions: Vec<TagDefinition>,
    /// Optional groups.
    pub groups: Vec<Group>,
}

impl Collection {
    /// Create an empty collection with the given name.
    #[must_use]
    pub fn empty(name: &str, now: DateTime<Utc>) -> Self {
        Self {
            name: name.to_owned(),
            format_version: FORMAT_VERSION.to_owned(),
            created: now,
            updated: now,
            artifacts: Vec::new(),
            tag_definitions: Vec::new(),
            groups: Vec::new(),
        }
    }

    /// Look up an artifact by `type:name`.
    #[must_use]
    pub fn find(&self, artifact_type: ArtifactType, name: &ArtifactName) -> Option<&Artifact> {
        self.artifacts
            .iter()
            .find(|a| a.artifact_type == artifact_type && &a.name == name)
    }

    /// Mutable lookup by `type:name`.
    #[must_use]
    pub fn find_mut(
        &mut self,
        artifact_type: ArtifactType,
        name: &ArtifactName,
    ) -> Option<&mut Artifact> {
        self.artifacts
            .iter_mut()
            .find(|a| a.artifact_type == artifact_type && &a.name == name)
    }

    /// Add an artifact, enforcing `(type, name)` uniqueness.
    ///
    /// # Errors
    /// Returns the offending key when an entry with the same type and name
    /// already exists.
    pub fn add(&mut self, artifact: Artifact) -> Result<(), ArtifactKey> {
        if self.find(artifact.artifact_type, &artifact.name).is_some() {
            return Err(artifact.key());
        }
        self.artifacts.push(artifact);
        Ok(())
    }

    /// Remove an artifact by key; returns the removed entry.
    pub fn remove(&mut self, artifact_type: ArtifactType, name: &ArtifactName) -> Option<Artifact> {
        let idx = self
            .artifacts
            .iter()
            .position(|a| a.artifact_type == artifact_type && &a.name == name)?;
        Some(self.artifacts.remove(idx))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
