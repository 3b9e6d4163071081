//! Core domain types for skillvault.
//!
//! Foundation types used throughout the crate: content hashes, artifact
//! identifiers, origin tags, change-origin attribution, and sync status.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// ContentHash
// ---------------------------------------------------------------------------

/// A validated 64-character lowercase hex SHA-256 digest.
///
/// Content hashes identify artifact tree states across the collection, the
/// deployment ledger, and the version graph.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

impl ContentHash {
    /// Create a new `ContentHash` from a string, validating format.
    ///
    /// # Errors
    /// Returns an error if the string is not exactly 64 lowercase hex characters.
    pub fn new(s: &str) -> Result<Self, ValidationError> {
        Self::validate(s)?;
        Ok(Self(s.to_owned()))
    }

    /// Return the inner hex string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The first twelve hex characters, for log lines and summaries.
    #[must_use]
    pub fn short(&self) -> &str {
        &self.0[..12]
    }

    fn validate(s: &str) -> Result<(), ValidationError> {
        if s.len() != 64 {
            return Err(ValidationError {
                kind: ErrorKind::ContentHash,
                value: s.to_owned(),
                reason: format!("expected 64 hex characters, got {}", s.len()),
            });
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
        {
            return Err(ValidationError {
                kind: ErrorKind::ContentHash,
                value: s.to_owned(),
                reason: "must contain only lowercase hex characters (0-9, a-f)".to_owned(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ContentHash {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ContentHash {
    type Error = ValidationError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::validate(&s)?;
        Ok(Self(s))
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.0
    }
}

// ---------------------------------------------------------------------------
// ArtifactId
// ---------------------------------------------------------------------------

/// A stable 128-bit artifact identity, generated once at import time.
///
/// Edges that must survive renames (composite membership, version records)
/// reference artifacts by this identity rather than by `type:name`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactId(Uuid);

impl ArtifactId {
    /// Generate a fresh random identity.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse an identity from its hyphenated string form.
    ///
    /// # Errors
    /// Returns an error if the string is not a valid UUID.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        Uuid::parse_str(s).map(Self).map_err(|e| ValidationError {
            kind: ErrorKind::ArtifactId,
            value: s.to_owned(),
            reason: e.to_string(),
        })
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

// ---------------------------------------------------------------------------
// ArtifactName
// ---------------------------------------------------------------------------

/// A validated artifact name.
///
/// Names must be lowercase alphanumeric with hyphens or underscores,
/// 1–64 characters. Examples: `code-review`, `deploy_checklist`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ArtifactName(String);

impl ArtifactName {
    /// The maximum length of an artifact name.
    pub const MAX_LEN: usize = 64;

    /// Create a new `ArtifactName` from a string, validating format.
    ///
    /// # Errors
    /// Returns an error if the name is empty, too long, or contains invalid
    /// characters.
    pub fn new(s: &str) -> Result<Self, ValidationError> {
        Self::validate(s)?;
        Ok(Self(s.to_owned()))
    }

    /// Return the name as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(s: &str) -> Result<(), ValidationError> {
        if s.is_empty() {
            return Err(ValidationError {
                kind: ErrorKind::ArtifactName,
                value: s.to_owned(),
                reason: "artifact name must not be empty".to_owned(),
            });
        }
        if s.len() > Self::MAX_LEN {
            return Err(ValidationError {
                kind: ErrorKind::ArtifactName,
                value: s.to_owned(),
                reason: format!(
                    "artifact name must be at most {} characters, got {}",
                    Self::MAX_LEN,
                    s.len()
                ),
            });
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
        {
            return Err(ValidationError {
                kind: ErrorKind::ArtifactName,
                value: s.to_owned(),
                reason: "must contain only lowercase alphanumeric, '-' or '_'".to_owned(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for ArtifactName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ArtifactName {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ArtifactName {
    type Error = ValidationError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::validate(&s)?;
        Ok(Self(s))
    }
}

impl From<ArtifactName> for String {
    fn from(name: ArtifactName) -> Self {
        name.0
    }
}

// ---------------------------------------------------------------------------
// ArtifactType
// ---------------------------------------------------------------------------

/// The closed set of artifact types managed by the collection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactType {
    /// A skill: a directory tree anchored by a skill definition file.
    Skill,
    /// A command: a single markdown file.
    Command,
    /// An agent: a directory tree.
    Agent,
    /// A hook: a single markdown file.
    Hook,
    /// An MCP server definition: a single JSON file.
    McpServer,
    /// A composite that aggregates child artifacts by reference.
    Composite,
}

impl ArtifactType {
    /// All types, in manifest directory order.
    pub const ALL: [Self; 6] = [
        Self::Skill,
        Self::Command,
        Self::Agent,
        Self::Hook,
        Self::McpServer,
        Self::Composite,
    ];

    /// The tag used in `type:name` keys and serialized records.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Skill => "skill",
            Self::Command => "command",
            Self::Agent => "agent",
            Self::Hook => "hook",
            Self::McpServer => "mcp-server",
            Self::Composite => "composite",
        }
    }

    /// The subdirectory of the collection root holding this type's trees.
    #[must_use]
    pub const fn dir_name(self) -> &'static str {
        match self {
            Self::Skill => "skills",
            Self::Command => "commands",
            Self::Agent => "agents",
            Self::Hook => "hooks",
            Self::McpServer => "mcp-servers",
            Self::Composite => "composites",
        }
    }

    /// Whether artifacts of this type are stored as a directory tree
    /// (as opposed to a single file).
    #[must_use]
    pub const fn is_tree(self) -> bool {
        matches!(self, Self::Skill | Self::Agent | Self::Composite)
    }

    /// File extension for single-file artifact types.
    #[must_use]
    pub const fn file_extension(self) -> Option<&'static str> {
        match self {
            Self::Command | Self::Hook => Some("md"),
            Self::McpServer => Some("json"),
            Self::Skill | Self::Agent | Self::Composite => None,
        }
    }

    /// Parse a type tag.
    ///
    /// # Errors
    /// Returns an error for an unknown tag.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        match s {
            "skill" => Ok(Self::Skill),
            "command" => Ok(Self::Command),
            "agent" => Ok(Self::Agent),
            "hook" => Ok(Self::Hook),
            "mcp-server" => Ok(Self::McpServer),
            "composite" => Ok(Self::Composite),
            other => Err(ValidationError {
                kind: ErrorKind::ArtifactType,
                value: other.to_owned(),
                reason: "expected one of: skill, command, agent, hook, mcp-server, composite"
                    .to_owned(),
            }),
        }
    }
}

impl fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactType {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// ---------------------------------------------------------------------------
// ArtifactKey
// ---------------------------------------------------------------------------

/// The compound `type:name` key identifying an artifact within a collection.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ArtifactKey {
    /// The artifact type tag.
    pub artifact_type: ArtifactType,
    /// The artifact name.
    pub name: ArtifactName,
}

impl ArtifactKey {
    /// Build a key from its parts.
    #[must_use]
    pub const fn new(artifact_type: ArtifactType, name: ArtifactName) -> Self {
        Self {
            artifact_type,
            name,
        }
    }

    /// Parse a `type:name` string.
    ///
    /// # Errors
    /// Returns an error when the separator is missing or either part is invalid.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        let (type_part, name_part) = s.split_once(':').ok_or_else(|| ValidationError {
            kind: ErrorKind::ArtifactKey,
            value: s.to_owned(),
            reason: "expected 'type:name'".to_owned(),
        })?;
        Ok(Self {
            artifact_type: ArtifactType::parse(type_part)?,
            name: ArtifactName::new(name_part)?,
        })
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.artifact_type, self.name)
    }
}

impl FromStr for ArtifactKey {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ArtifactKey {
    type Error = ValidationError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<ArtifactKey> for String {
    fn from(key: ArtifactKey) -> Self {
        key.to_string()
    }
}

// ---------------------------------------------------------------------------
// OriginKind / Origin
// ---------------------------------------------------------------------------

/// The origin tag persisted in manifests and ledgers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OriginKind {
    /// Imported from a local path.
    #[default]
    Local,
    /// Imported from a remote source repository.
    RemoteRepo,
    /// Imported from a curated marketplace.
    Marketplace,
}

impl OriginKind {
    /// The serialized tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::RemoteRepo => "remote-repo",
            Self::Marketplace => "marketplace",
        }
    }
}

impl fmt::Display for OriginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An artifact's provenance, with the upstream reference attached where one
/// exists. The set is closed; every operation branches exhaustively on it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Origin {
    /// Imported from a local path; no upstream to refresh against.
    Local,
    /// Tracks a remote source repository.
    RemoteRepo {
        /// Repository locator (e.g. `owner/repo` or a full URL).
        locator: String,
    },
    /// Tracks a curated marketplace listing.
    Marketplace {
        /// Marketplace source identifier.
        source_id: String,
    },
}

impl Origin {
    /// The persisted tag for this origin.
    #[must_use]
    pub const fn kind(&self) -> OriginKind {
        match self {
            Self::Local => OriginKind::Local,
            Self::RemoteRepo { .. } => OriginKind::RemoteRepo,
            Self::Marketplace { .. } => OriginKind::Marketplace,
        }
    }

    /// Whether this origin has an upstream that can be refreshed.
    #[must_use]
    pub const fn is_refreshable(&self) -> bool {
        matches!(self, Self::RemoteRepo { .. } | Self::Marketplace { .. })
    }
}

// ---------------------------------------------------------------------------
// ChangeOrigin
// ---------------------------------------------------------------------------

/// Attribution attached to a version record: what kind of event produced it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOrigin {
    /// First landing of an artifact in a project; roots a new branch.
    Deployment,
    /// An update pulled from the upstream collection.
    Sync,
    /// User edits to a deployed artifact.
    LocalModification,
}

impl ChangeOrigin {
    /// The serialized tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Deployment => "deployment",
            Self::Sync => "sync",
            Self::LocalModification => "local_modification",
        }
    }

    /// Parse a serialized tag.
    ///
    /// # Errors
    /// Returns an error for an unknown tag.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        match s {
            "deployment" => Ok(Self::Deployment),
            "sync" => Ok(Self::Sync),
            "local_modification" => Ok(Self::LocalModification),
            other => Err(ValidationError {
                kind: ErrorKind::ChangeOrigin,
                value: other.to_owned(),
                reason: "expected one of: deployment, sync, local_modification".to_owned(),
            }),
        }
    }
}

impl fmt::Display for ChangeOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// SyncStatus
// ---------------------------------------------------------------------------

/// Per-deployment sync state recorded in the ledger.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Project matches the recorded baseline.
    #[default]
    Synced,
    /// The project copy has diverged from the baseline.
    LocallyModified,
    /// A merge left unresolved conflicts in the project or collection.
    Conflicted,
}

impl SyncStatus {
    /// The serialized tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Synced => "synced",
            Self::LocallyModified => "locally_modified",
            Self::Conflicted => "conflicted",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ValidationError
// ---------------------------------------------------------------------------

/// Which kind of value failed validation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// A content hash string.
    ContentHash,
    /// An artifact identity string.
    ArtifactId,
    /// An artifact name.
    ArtifactName,
    /// An artifact type tag.
    ArtifactType,
    /// A compound `type:name` key.
    ArtifactKey,
    /// A change-origin tag.
    ChangeOrigin,
}

/// A value failed format validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationError {
    /// Which kind of value was rejected.
    pub kind: ErrorKind,
    /// The rejected value.
    pub value: String,
    /// Why the value is invalid.
    pub reason: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid value '{}': {}", self.value, self.reason)
    }
}

impl std::error::Error for ValidationError {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
