//! Drift classification.
//!
//! Turns the `(collection_hash, baseline_hash, project_hash)` triple for one
//! artifact into a drift kind, a recommended action, and a change-origin
//! attribution. The classifier is a pure function: the same inputs always
//! yield the same decision.
//!
//! | collection | baseline | project | drift | recommendation |
//! |---|---|---|---|---|
//! | present | absent | absent | added | deploy-to-project |
//! | absent | present | present | removed | remove-from-project |
//! | = baseline | present | ≠ baseline | modified | push-to-collection |
//! | ≠ baseline | present | = baseline | outdated | pull-from-collection |
//! | ≠ baseline | present | ≠ baseline, ≠ collection | conflict | review-manually |
//! | version tag mismatch only | — | — | version-mismatch | pull-from-collection |

use std::fmt;

use serde::{Deserialize, Serialize};

use super::types::{ArtifactKey, ChangeOrigin, ContentHash};

// ---------------------------------------------------------------------------
// DriftKind
// ---------------------------------------------------------------------------

/// The six kinds of divergence between collection, baseline, and project.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftKind {
    /// In the collection but never deployed to the project.
    Added,
    /// Deployed but no longer in the collection.
    Removed,
    /// The project copy diverged from the baseline; collection unchanged.
    Modified,
    /// The collection moved past the baseline; project unchanged.
    Outdated,
    /// Both sides moved, to different content.
    Conflict,
    /// Content is identical but the recorded version tag differs.
    VersionMismatch,
}

impl DriftKind {
    /// The serialized tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Removed => "removed",
            Self::Modified => "modified",
            Self::Outdated => "outdated",
            Self::Conflict => "conflict",
            Self::VersionMismatch => "version_mismatch",
        }
    }
}

impl fmt::Display for DriftKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Recommendation
// ---------------------------------------------------------------------------

/// The action the classifier recommends for a drift.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Recommendation {
    /// Deploy the collection copy into the project.
    DeployToProject,
    /// Remove the stale deployment from the project.
    RemoveFromProject,
    /// Pull the user's edits back into the collection.
    PushToCollection,
    /// Update the project from the collection.
    PullFromCollection,
    /// Both sides moved; a human must look.
    ReviewManually,
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Self::DeployToProject => "deploy-to-project",
            Self::RemoveFromProject => "remove-from-project",
            Self::PushToCollection => "push-to-collection",
            Self::PullFromCollection => "pull-from-collection",
            Self::ReviewManually => "review-manually",
        };
        f.write_str(tag)
    }
}

// ---------------------------------------------------------------------------
// ConflictAttribution
// ---------------------------------------------------------------------------

/// Policy for attributing a `conflict` drift to a change origin.
///
/// When both sides moved, the original behavior credits the user's edits:
/// the version record is attributed to `local_modification` even though the
/// collection also changed. The alternative attributes it to `sync`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictAttribution {
    /// The user's edits win attribution (default).
    #[default]
    LocalModification,
    /// The upstream change wins attribution.
    Sync,
}

// ---------------------------------------------------------------------------
// classify
// ---------------------------------------------------------------------------

/// The classifier's decision for one artifact.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftDecision {
    /// What kind of drift was detected.
    pub kind: DriftKind,
    /// The attribution downstream code should request from the version graph.
    pub change_origin: ChangeOrigin,
    /// The recommended action.
    pub recommendation: Recommendation,
}

/// Inputs to the classifier for one artifact.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DriftInput {
    /// Hash of the collection tree, if the artifact is in the collection.
    pub collection: Option<ContentHash>,
    /// Baseline hash from the deployment ledger, if deployed.
    pub baseline: Option<ContentHash>,
    /// Hash of the project tree, if present on disk.
    pub project: Option<ContentHash>,
    /// True when the recorded version tag differs from the collection's
    /// while content is otherwise identical.
    pub version_mismatch: bool,
}

/// Classify one artifact's drift. Returns `None` when nothing diverged.
#[must_use]
pub fn classify(input: &DriftInput, attribution: ConflictAttribution) -> Option<DriftDecision> {
    let conflict_origin = match attribution {
        ConflictAttribution::LocalModification => ChangeOrigin::LocalModification,
        ConflictAttribution::Sync => ChangeOrigin::Sync,
    };

    let decision = |kind: DriftKind| {
        let (change_origin, recommendation) = match kind {
            DriftKind::Added => (ChangeOrigin::Sync, Recommendation::DeployToProject),
            DriftKind::Removed => (ChangeOrigin::Sync, Recommendation::RemoveFromProject),
            DriftKind::Modified => (
                ChangeOrigin::LocalModification,
                Recommendation::PushToCollection,
            ),
            DriftKind::Outdated | DriftKind::VersionMismatch => {
                (ChangeOrigin::Sync, Recommendation::PullFromCollection)
            }
            DriftKind::Conflict => (conflict_origin, Recommendation::ReviewManually),
        };
        Some(DriftDecision {
            kind,
            change_origin,
            recommendation,
        })
    };

    match (&input.collection, &input.baseline, &input.project) {
        // Never deployed: the ledger has no record of it.
        (Some(_), None, _) => decision(DriftKind::Added),

        // Gone from the collection but still recorded as deployed.
        (None, Some(_), _) => decision(DriftKind::Removed),

        // Not in the collection, not deployed: no relationship to report.
        (None, None, _) => None,

        // Deployed, but the project copy was deleted by hand. Surfaced as a
        // local modification that needs review; pushing a deletion into the
        // collection is never done automatically.
        (Some(_), Some(_), None) => Some(DriftDecision {
            kind: DriftKind::Modified,
            change_origin: ChangeOrigin::LocalModification,
            recommendation: Recommendation::ReviewManually,
        }),

        (Some(collection), Some(baseline), Some(project)) => {
            let collection_moved = collection != baseline;
            let project_moved = project != baseline;
            match (collection_moved, project_moved) {
                (false, false) | (true, true) if !collection_moved || collection == project => {
                    // Content agrees everywhere (or both sides landed on the
                    // same bytes); only a version-tag difference can remain.
                    if input.version_mismatch {
                        decision(DriftKind::VersionMismatch)
                    } else {
                        None
                    }
                }
                (false, true) => decision(DriftKind::Modified),
                (true, false) => decision(DriftKind::Outdated),
                (true, true) => decision(DriftKind::Conflict),
                (false, false) => unreachable!("covered by the guard above"),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// DriftReport
// ---------------------------------------------------------------------------

/// One artifact's drift as reported by `check_drift`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftReport {
    /// The artifact's `type:name` key.
    pub key: ArtifactKey,
    /// What kind of drift was detected.
    pub drift: DriftKind,
    /// Attribution for the eventual version record.
    pub change_origin: ChangeOrigin,
    /// The recommended action.
    pub recommendation: Recommendation,
    /// Hash of the collection tree, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_hash: Option<ContentHash>,
    /// Baseline hash recorded at last deployment, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_hash: Option<ContentHash>,
    /// Hash of the project tree, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_hash: Option<ContentHash>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
