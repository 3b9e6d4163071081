//! Sync coordination: drift checks, pull/push cycles, conflict resolution.
//!
//! The coordinator orchestrates the hasher, diff/merge engines, drift
//! classifier, version graph, and deployment ledger:
//!
//! - [`SyncCoordinator::check_drift`] — read-only classification of every
//!   known artifact.
//! - [`SyncCoordinator::sync_from_project`] — pull project edits into the
//!   collection.
//! - [`SyncCoordinator::sync_to_project`] — push collection state into the
//!   project.
//! - [`SyncCoordinator::resolve_conflict`] — apply a resolution strategy to
//!   an artifact's pending conflicts.
//!
//! Discipline: at most one writer per artifact (exclusive lock held for the
//! full read-modify-write cycle), a snapshot before any destructive write
//! (snapshot failure aborts the operation), per-artifact errors recorded
//! without failing the batch, conflicts returned as results rather than
//! errors, and cancellation honored at artifact boundaries.

pub mod conflict_state;
pub mod lock;
pub mod recover;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::config::VaultConfig;
use crate::db::{ArtifactRow, Database};
use crate::error::{Result, VaultError};
use crate::hash;
use crate::merge;
use crate::model::artifact::{artifact_rel_path, Artifact, Collection};
use crate::model::conflict::{FileConflict, ResolutionStrategy};
use crate::model::drift::{classify, DriftDecision, DriftInput, DriftKind, DriftReport};
use crate::model::types::{ArtifactKey, ArtifactName, ChangeOrigin, ContentHash, SyncStatus};
use crate::snapshot::SnapshotArchiver;
use crate::storage::ledger::{DeploymentEntry, Ledger, LedgerStore, PROJECT_CONFIG_DIR};
use crate::storage::manifest::ManifestStore;
use crate::storage::{copy_tree, remove_tree};

use conflict_state::{ConflictState, SyncDirection};
use lock::ArtifactLock;

/// Subdirectory of the project config dir mirroring each deployment's
/// baseline tree (the merge base for later three-way diffs).
const BASELINES_DIR: &str = ".baselines";

// ---------------------------------------------------------------------------
// Options and results
// ---------------------------------------------------------------------------

/// How a sync applies changes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncStrategy {
    /// Replace the destination subtree wholesale.
    Overwrite,
    /// Three-way merge against the recorded baseline (default).
    #[default]
    Merge,
    /// Copy into `<name>-fork`, leaving the original untouched.
    Fork,
    /// Defer to the caller; non-interactive runs consult
    /// [`SyncOptions::auto_resolve`].
    Prompt,
}

/// What `strategy = prompt` does when no one can be asked.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AutoResolve {
    /// Skip the artifact.
    #[default]
    Abort,
    /// Keep the destination side untouched.
    Ours,
    /// Fall through to overwrite.
    Theirs,
}

/// Options shared by pull and push.
#[derive(Clone, Debug, Default)]
pub struct SyncOptions {
    /// How to apply changes.
    pub strategy: SyncStrategy,
    /// Restrict to these artifacts; `None` means all drifted artifacts.
    pub artifact_filter: Option<Vec<ArtifactKey>>,
    /// Whether an interactive surface can prompt the user.
    pub interactive: bool,
    /// Classify and report without mutating anything.
    pub dry_run: bool,
    /// Consulted only when `interactive` is false and the strategy is
    /// [`SyncStrategy::Prompt`].
    pub auto_resolve: AutoResolve,
}

/// Per-artifact outcome status.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// Changes applied and recorded.
    Synced,
    /// First deployment into the project.
    Deployed,
    /// Removed from the project (collection no longer has it).
    Removed,
    /// Merge left conflicts; resolution pending.
    Conflicted,
    /// A `<name>-fork` copy was created.
    Forked,
    /// Prompt strategy, non-interactive, `auto_resolve = ours`.
    KeptLocalNonInteractive,
    /// Prompt strategy, non-interactive, `auto_resolve = abort`.
    SkippedNonInteractive,
    /// Prompt strategy in interactive mode: the outer surface must decide
    /// and re-invoke with a concrete strategy.
    NeedsDecision,
    /// Dry run preview; nothing was mutated.
    Previewed,
    /// A per-artifact error; the batch continued.
    Failed,
}

/// One artifact's outcome within a sync batch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactOutcome {
    /// The artifact.
    pub key: ArtifactKey,
    /// What happened.
    pub status: OutcomeStatus,
    /// Human-readable detail (error text, fork name).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Conflicts left behind, when status is `conflicted`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<FileConflict>,
    /// The content hash recorded after a successful apply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_hash: Option<ContentHash>,
}

/// The result of one pull or push batch.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    /// `pull` or `push`.
    pub operation: String,
    /// Whether this was a preview only.
    pub dry_run: bool,
    /// Id of the pre-sync snapshot, when one was taken.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<String>,
    /// True when a cancellation signal stopped the batch early; completed
    /// artifacts stay committed.
    pub cancelled: bool,
    /// Per-artifact outcomes.
    pub outcomes: Vec<ArtifactOutcome>,
}

impl SyncResult {
    /// True iff nothing conflicted or failed.
    #[must_use]
    pub fn success(&self) -> bool {
        !self.outcomes.iter().any(|o| {
            matches!(o.status, OutcomeStatus::Conflicted | OutcomeStatus::Failed)
        })
    }

    /// Count outcomes with the given status.
    #[must_use]
    pub fn count(&self, status: &OutcomeStatus) -> usize {
        self.outcomes.iter().filter(|o| &o.status == status).count()
    }
}

/// The result of resolving one artifact's pending conflicts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveResult {
    /// The artifact.
    pub key: ArtifactKey,
    /// Files rewritten by the resolution.
    pub resolved_paths: Vec<PathBuf>,
    /// The content hash recorded after resolution.
    pub new_hash: ContentHash,
}

// ---------------------------------------------------------------------------
// SyncCoordinator
// ---------------------------------------------------------------------------

/// Orchestrates drift checks and sync cycles for one collection.
///
/// The coordinator is `Sync`: many threads may run syncs concurrently.
/// Distinct artifacts proceed in parallel under their own locks; the shared
/// ledger file and the database connection are serialized internally.
pub struct SyncCoordinator {
    config: VaultConfig,
    manifests: ManifestStore,
    ledgers: LedgerStore,
    db: Mutex<Database>,
    archiver: SnapshotArchiver,
    /// Serializes snapshot restore (writer) against syncs (readers).
    collection_lock: RwLock<()>,
    /// Serializes read-modify-write cycles on a project's ledger file.
    ledger_lock: Mutex<()>,
    /// Bumped on every manifest write; invalidates the parsed-manifest cache.
    generation: AtomicU64,
    manifest_cache: Mutex<Option<(u64, Collection)>>,
}

impl SyncCoordinator {
    /// Build a coordinator over the configured collection.
    pub fn new(config: VaultConfig) -> Result<Self> {
        let db = Database::open(&config.db_path)?;
        let archiver = SnapshotArchiver::new(config.snapshots_dir.clone());
        Ok(Self {
            config,
            manifests: ManifestStore,
            ledgers: LedgerStore,
            db: Mutex::new(db),
            archiver,
            collection_lock: RwLock::new(()),
            ledger_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
            manifest_cache: Mutex::new(None),
        })
    }

    /// Run a closure against the embedded database (version graph,
    /// composites); the connection is shared behind a mutex.
    pub fn with_db<R>(&self, f: impl FnOnce(&Database) -> R) -> R {
        let db = self
            .db
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&db)
    }

    /// The snapshot archiver for this collection.
    #[must_use]
    pub fn archiver(&self) -> &SnapshotArchiver {
        &self.archiver
    }

    /// The configuration the coordinator was built with.
    #[must_use]
    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // check_drift
    // -----------------------------------------------------------------------

    /// Read-only drift classification of every known artifact: everything in
    /// the collection manifest plus everything in the project ledger.
    pub fn check_drift(&self, project: &Path) -> Result<Vec<DriftReport>> {
        let _read = self.read_collection_guard();
        let started = Instant::now();
        let collection = self.load_collection()?;
        let ledger = self.ledgers.load(project)?;

        let mut reports = Vec::new();
        for key in known_keys(&collection, &ledger) {
            let (input, decision) = self.classify_artifact(project, &collection, &ledger, &key)?;
            if let Some(decision) = decision {
                reports.push(DriftReport {
                    key,
                    drift: decision.kind,
                    change_origin: decision.change_origin,
                    recommendation: decision.recommendation,
                    collection_hash: input.collection,
                    baseline_hash: input.baseline,
                    current_hash: input.project,
                });
            }
        }

        tracing::info!(
            operation = "check_drift",
            collection = %collection.name,
            drift_count = reports.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "drift check complete"
        );
        Ok(reports)
    }

    // -----------------------------------------------------------------------
    // sync_from_project (pull)
    // -----------------------------------------------------------------------

    /// Pull project edits back into the collection.
    ///
    /// Candidates are the drifted artifacts attributed to
    /// `local_modification` (the user's edits). A pre-sync snapshot is taken
    /// before the first mutation; snapshot failure aborts the whole batch.
    pub fn sync_from_project(
        &self,
        project: &Path,
        options: &SyncOptions,
        cancel: &CancelToken,
    ) -> Result<SyncResult> {
        let _read = self.read_collection_guard();
        let started = Instant::now();
        let collection = self.load_collection()?;
        let ledger = self.ledgers.load(project)?;

        let candidates = self.candidates(
            project,
            &collection,
            &ledger,
            options,
            ChangeOrigin::LocalModification,
        )?;

        let mut result = SyncResult {
            operation: "pull".to_owned(),
            dry_run: options.dry_run,
            ..SyncResult::default()
        };

        if options.dry_run {
            result.outcomes = preview(&candidates);
            return Ok(result);
        }

        if !candidates.is_empty() {
            let snapshot = self.archiver.create_snapshot(
                &self.config.collection_path,
                &collection.name,
                &format!("pre-sync-{}", Utc::now().format("%Y%m%d-%H%M%S")),
            )?;
            result.snapshot_id = Some(snapshot.snapshot_id);
        }

        let mut collection = collection;
        let mut manifest_dirty = false;

        for candidate in candidates {
            if cancel.is_cancelled() {
                result.cancelled = true;
                break;
            }
            let _lock =
                ArtifactLock::acquire(&self.config.locks_dir, &collection.name, &candidate.key)?;

            let outcome = self.pull_one(project, &mut collection, &candidate, options);
            match outcome {
                Ok((outcome, dirty)) => {
                    manifest_dirty |= dirty;
                    result.outcomes.push(outcome);
                }
                Err(e) => result.outcomes.push(failed(&candidate.key, &e)),
            }
        }

        if manifest_dirty {
            self.write_collection(&collection)?;
        }

        tracing::info!(
            operation = "sync_from_project",
            collection = %collection.name,
            synced = result.count(&OutcomeStatus::Synced),
            conflicted = result.count(&OutcomeStatus::Conflicted),
            failed = result.count(&OutcomeStatus::Failed),
            duration_ms = started.elapsed().as_millis() as u64,
            "pull complete"
        );
        Ok(result)
    }

    fn pull_one(
        &self,
        project: &Path,
        collection: &mut Collection,
        candidate: &Candidate,
        options: &SyncOptions,
    ) -> Result<(ArtifactOutcome, bool)> {
        let key = &candidate.key;
        let collection_tree = self.collection_tree(key);
        let project_tree = project_tree(project, key);

        if !project_tree.exists() {
            return Ok((
                ArtifactOutcome {
                    key: key.clone(),
                    status: OutcomeStatus::NeedsDecision,
                    detail: Some("project copy was deleted by hand; review manually".to_owned()),
                    conflicts: vec![],
                    new_hash: None,
                },
                false,
            ));
        }

        let effective = match effective_strategy(options) {
            EffectiveStrategy::Apply(s) => s,
            EffectiveStrategy::Outcome(status) => {
                return Ok((simple(key, status), false));
            }
        };

        match effective {
            SyncStrategy::Overwrite => {
                remove_tree(&collection_tree)?;
                copy_tree(&project_tree, &collection_tree)?;
                let outcome = self.finalize(
                    project,
                    collection,
                    key,
                    &collection_tree,
                    candidate,
                    SyncDirection::Pull,
                )?;
                Ok((outcome, false))
            }
            SyncStrategy::Merge => {
                let base = self.merge_base_for(project, key, candidate, &collection_tree)?;
                let merged = merge_artifact(
                    key,
                    &base,
                    &collection_tree,
                    &project_tree,
                    &collection_tree,
                )?;
                if merged.success {
                    let outcome = self.finalize(
                        project,
                        collection,
                        key,
                        &collection_tree,
                        candidate,
                        SyncDirection::Pull,
                    )?;
                    Ok((outcome, false))
                } else {
                    self.record_conflicts(
                        project,
                        key,
                        candidate,
                        SyncDirection::Pull,
                        &merged.conflicts,
                    )?;
                    Ok((
                        ArtifactOutcome {
                            key: key.clone(),
                            status: OutcomeStatus::Conflicted,
                            detail: Some(merged.summary),
                            conflicts: merged.conflicts,
                            new_hash: None,
                        },
                        false,
                    ))
                }
            }
            SyncStrategy::Fork => {
                let fork_name = fork_name(&key.name)?;
                let fork_key = ArtifactKey::new(key.artifact_type, fork_name.clone());
                if collection.find(key.artifact_type, &fork_name).is_some() {
                    return Ok((
                        ArtifactOutcome {
                            key: key.clone(),
                            status: OutcomeStatus::Failed,
                            detail: Some(format!("fork target '{fork_key}' already exists")),
                            conflicts: vec![],
                            new_hash: None,
                        },
                        false,
                    ));
                }
                let fork_tree = self.collection_tree(&fork_key);
                copy_tree(&project_tree, &fork_tree)?;

                let original = collection
                    .find(key.artifact_type, &key.name)
                    .ok_or_else(|| VaultError::ArtifactNotFound { key: key.clone() })?;
                let mut forked = original.clone();
                forked.id = crate::model::types::ArtifactId::generate();
                forked.name = fork_name.clone();
                forked.path = artifact_rel_path(key.artifact_type, &fork_name);
                forked.added = Utc::now();
                collection
                    .add(forked)
                    .map_err(|key| VaultError::ConstraintViolation {
                        detail: format!("duplicate artifact '{key}'"),
                    })?;

                Ok((
                    ArtifactOutcome {
                        key: key.clone(),
                        status: OutcomeStatus::Forked,
                        detail: Some(fork_key.to_string()),
                        conflicts: vec![],
                        new_hash: Some(hash::hash_tree(&fork_tree)?),
                    },
                    true,
                ))
            }
            SyncStrategy::Prompt => unreachable!("prompt resolved by effective_strategy"),
        }
    }

    // -----------------------------------------------------------------------
    // sync_to_project (push)
    // -----------------------------------------------------------------------

    /// Push collection state into the project: deploy added artifacts,
    /// update outdated ones, remove artifacts the collection dropped.
    pub fn sync_to_project(
        &self,
        project: &Path,
        options: &SyncOptions,
        cancel: &CancelToken,
    ) -> Result<SyncResult> {
        let _read = self.read_collection_guard();
        let started = Instant::now();
        let collection = self.load_collection()?;
        let ledger = self.ledgers.load(project)?;

        let candidates =
            self.candidates(project, &collection, &ledger, options, ChangeOrigin::Sync)?;

        let mut result = SyncResult {
            operation: "push".to_owned(),
            dry_run: options.dry_run,
            ..SyncResult::default()
        };

        if options.dry_run {
            result.outcomes = preview(&candidates);
            return Ok(result);
        }

        if !candidates.is_empty() {
            let snapshot = self.archiver.create_snapshot(
                &self.config.collection_path,
                &collection.name,
                &format!("pre-sync-{}", Utc::now().format("%Y%m%d-%H%M%S")),
            )?;
            result.snapshot_id = Some(snapshot.snapshot_id);
        }

        for candidate in candidates {
            if cancel.is_cancelled() {
                result.cancelled = true;
                break;
            }
            let _lock =
                ArtifactLock::acquire(&self.config.locks_dir, &collection.name, &candidate.key)?;

            match self.push_one(project, &collection, &candidate, options) {
                Ok(outcome) => result.outcomes.push(outcome),
                Err(e) => result.outcomes.push(failed(&candidate.key, &e)),
            }
        }

        tracing::info!(
            operation = "sync_to_project",
            collection = %collection.name,
            synced = result.count(&OutcomeStatus::Synced)
                + result.count(&OutcomeStatus::Deployed),
            removed = result.count(&OutcomeStatus::Removed),
            conflicted = result.count(&OutcomeStatus::Conflicted),
            duration_ms = started.elapsed().as_millis() as u64,
            "push complete"
        );
        Ok(result)
    }

    fn push_one(
        &self,
        project: &Path,
        collection: &Collection,
        candidate: &Candidate,
        options: &SyncOptions,
    ) -> Result<ArtifactOutcome> {
        let key = &candidate.key;
        let collection_tree = self.collection_tree(key);
        let project_tree_path = project_tree(project, key);

        match candidate.decision.kind {
            DriftKind::Added => {
                copy_tree(&collection_tree, &project_tree_path)?;
                let outcome = self.finalize(
                    project,
                    collection,
                    key,
                    &project_tree_path,
                    candidate,
                    SyncDirection::Push,
                )?;
                Ok(ArtifactOutcome {
                    status: OutcomeStatus::Deployed,
                    ..outcome
                })
            }
            DriftKind::Removed => {
                remove_tree(&project_tree_path)?;
                remove_tree(&baseline_tree(project, key))?;
                {
                    let _ledger = self.ledger_guard();
                    self.ledgers.remove(project, key.artifact_type, &key.name)?;
                }
                self.with_db(|db| -> Result<()> {
                    if let Some(id) =
                        db.artifact_id(&candidate.source, key.artifact_type, key.name.as_str())?
                    {
                        db.delete_artifact(id)?;
                    }
                    Ok(())
                })?;
                Ok(simple(key, OutcomeStatus::Removed))
            }
            DriftKind::Outdated | DriftKind::VersionMismatch => {
                let effective = match effective_strategy(options) {
                    EffectiveStrategy::Apply(s) => s,
                    EffectiveStrategy::Outcome(status) => return Ok(simple(key, status)),
                };
                match effective {
                    SyncStrategy::Overwrite => {
                        remove_tree(&project_tree_path)?;
                        copy_tree(&collection_tree, &project_tree_path)?;
                        self.finalize(
                            project,
                            collection,
                            key,
                            &project_tree_path,
                            candidate,
                            SyncDirection::Push,
                        )
                    }
                    SyncStrategy::Merge => {
                        let base =
                            self.merge_base_for(project, key, candidate, &project_tree_path)?;
                        let merged = merge_artifact(
                            key,
                            &base,
                            &project_tree_path,
                            &collection_tree,
                            &project_tree_path,
                        )?;
                        if merged.success {
                            self.finalize(
                                project,
                                collection,
                                key,
                                &project_tree_path,
                                candidate,
                                SyncDirection::Push,
                            )
                        } else {
                            self.record_conflicts(
                                project,
                                key,
                                candidate,
                                SyncDirection::Push,
                                &merged.conflicts,
                            )?;
                            Ok(ArtifactOutcome {
                                key: key.clone(),
                                status: OutcomeStatus::Conflicted,
                                detail: Some(merged.summary),
                                conflicts: merged.conflicts,
                                new_hash: None,
                            })
                        }
                    }
                    SyncStrategy::Fork => {
                        // Mirror of pull-fork: the collection's bytes land
                        // next to the user's copy as an unmanaged fork.
                        let fork_name = fork_name(&key.name)?;
                        let fork_key = ArtifactKey::new(key.artifact_type, fork_name);
                        let fork_tree = project_tree(project, &fork_key);
                        copy_tree(&collection_tree, &fork_tree)?;
                        Ok(ArtifactOutcome {
                            key: key.clone(),
                            status: OutcomeStatus::Forked,
                            detail: Some(fork_key.to_string()),
                            conflicts: vec![],
                            new_hash: Some(hash::hash_tree(&fork_tree)?),
                        })
                    }
                    SyncStrategy::Prompt => unreachable!("prompt resolved by effective_strategy"),
                }
            }
            DriftKind::Modified | DriftKind::Conflict => Err(VaultError::Integrity {
                detail: format!(
                    "push candidate '{key}' carries a local-modification drift; \
                     pull it first or use sync_from_project"
                ),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // resolve_conflict
    // -----------------------------------------------------------------------

    /// Apply `strategy` to every pending conflict of one artifact, then
    /// record the version and mark the ledger synced.
    ///
    /// `merged_content` is required by [`ResolutionStrategy::Merge`] and only
    /// valid when exactly one conflict is pending.
    pub fn resolve_conflict(
        &self,
        project: &Path,
        key: &ArtifactKey,
        strategy: ResolutionStrategy,
        merged_content: Option<&[u8]>,
    ) -> Result<ResolveResult> {
        let _read = self.read_collection_guard();
        let collection = self.load_collection()?;
        let _lock = ArtifactLock::acquire(&self.config.locks_dir, &collection.name, key)?;

        let state = ConflictState::load(project, key)?.ok_or_else(|| {
            VaultError::ArtifactNotFound { key: key.clone() }
        })?;

        if merged_content.is_some() && state.conflicts.len() != 1 {
            return Err(VaultError::ConstraintViolation {
                detail: format!(
                    "merged content applies to exactly one conflict, but '{key}' has {}",
                    state.conflicts.len()
                ),
            });
        }

        let target_root = match state.direction {
            SyncDirection::Pull => self.collection_tree(key),
            SyncDirection::Push => project_tree(project, key),
        };

        let mut resolved_paths = Vec::with_capacity(state.conflicts.len());
        for conflict in &state.conflicts {
            let output = target_path(&target_root, key, &conflict.path);
            merge::resolve_conflict(conflict, strategy, merged_content, &output)?;
            resolved_paths.push(conflict.path.clone());
        }

        let new_hash = hash::hash_tree(&target_root)?;
        let origin = match state.direction {
            SyncDirection::Pull => ChangeOrigin::LocalModification,
            SyncDirection::Push => ChangeOrigin::Sync,
        };
        let artifact = collection
            .find(key.artifact_type, &key.name)
            .ok_or_else(|| VaultError::ArtifactNotFound { key: key.clone() })?;
        let record = self.with_db(|db| {
            let record = db.record_version(artifact.id, &new_hash, state.baseline.as_ref(), origin)?;
            db.upsert_artifact(&artifact_row(&collection.name, artifact, &new_hash))?;
            Ok::<_, VaultError>(record)
        })?;

        {
            let _ledger_guard = self.ledger_guard();
            let mut ledger = self.ledgers.load(project)?;
            if let Some(entry) = ledger.find_mut(key.artifact_type, &key.name) {
                entry.set_baseline(new_hash.clone());
                entry.version_lineage = record.lineage.clone();
                entry.sync_status = SyncStatus::Synced;
                entry.pending_conflicts.clear();
            }
            self.ledgers.write(project, &ledger)?;
        }

        // The resolved tree becomes the new baseline for future merges.
        let baseline = baseline_tree(project, key);
        remove_tree(&baseline)?;
        copy_tree(&target_root, &baseline)?;
        ConflictState::clear(project, key)?;

        tracing::info!(
            operation = "resolve_conflict",
            artifact_id = %artifact.id,
            collection = %collection.name,
            resolved = resolved_paths.len(),
            "conflicts resolved"
        );
        Ok(ResolveResult {
            key: key.clone(),
            resolved_paths,
            new_hash,
        })
    }

    // -----------------------------------------------------------------------
    // restore
    // -----------------------------------------------------------------------

    /// Restore a snapshot over the collection, serialized against every
    /// concurrent sync by the collection write lock.
    pub fn restore_collection(&self, snapshot_id: &str) -> Result<()> {
        let _write = self
            .collection_lock
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        self.archiver
            .restore_snapshot(snapshot_id, &self.config.collection_path)?;
        self.generation.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn read_collection_guard(&self) -> std::sync::RwLockReadGuard<'_, ()> {
        self.collection_lock
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Parsed-manifest cache keyed by the write generation.
    fn load_collection(&self) -> Result<Collection> {
        let generation = self.generation.load(Ordering::SeqCst);
        {
            let cache = self
                .manifest_cache
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if let Some((cached_gen, collection)) = cache.as_ref() {
                if *cached_gen == generation {
                    return Ok(collection.clone());
                }
            }
        }
        let collection = self.manifests.read(&self.config.collection_path)?;
        let mut cache = self
            .manifest_cache
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *cache = Some((generation, collection.clone()));
        Ok(collection)
    }

    fn write_collection(&self, collection: &Collection) -> Result<()> {
        self.manifests.write(&self.config.collection_path, collection)?;
        self.generation.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn collection_tree(&self, key: &ArtifactKey) -> PathBuf {
        self.config
            .collection_path
            .join(artifact_rel_path(key.artifact_type, &key.name))
    }

    fn classify_artifact(
        &self,
        project: &Path,
        collection: &Collection,
        ledger: &Ledger,
        key: &ArtifactKey,
    ) -> Result<(DriftInput, Option<DriftDecision>)> {
        let artifact = collection.find(key.artifact_type, &key.name);
        let entry = ledger.find(key.artifact_type, &key.name);

        let collection_hash = match artifact {
            Some(_) => hash_if_present(&self.collection_tree(key))?,
            None => None,
        };
        let baseline = entry.and_then(|e| e.baseline().cloned());
        let project_hash = hash_if_present(&project_tree(project, key))?;

        let version_mismatch = match (artifact, entry) {
            (Some(artifact), Some(entry)) => {
                let collection_version = artifact
                    .resolved_version
                    .clone()
                    .or_else(|| artifact.metadata.version.clone());
                collection_version.is_some() && collection_version != entry.version
            }
            _ => false,
        };

        let input = DriftInput {
            collection: collection_hash,
            baseline,
            project: project_hash,
            version_mismatch,
        };
        let decision = classify(&input, self.config.conflict_attribution);
        Ok((input, decision))
    }

    /// Drifted artifacts matching the requested change origin and filter.
    fn candidates(
        &self,
        project: &Path,
        collection: &Collection,
        ledger: &Ledger,
        options: &SyncOptions,
        origin: ChangeOrigin,
    ) -> Result<Vec<Candidate>> {
        let mut candidates = Vec::new();
        for key in known_keys(collection, ledger) {
            if let Some(filter) = &options.artifact_filter {
                if !filter.contains(&key) {
                    continue;
                }
            }
            let (input, decision) = self.classify_artifact(project, collection, ledger, &key)?;
            let Some(decision) = decision else { continue };
            if decision.change_origin != origin {
                continue;
            }
            candidates.push(Candidate {
                key,
                decision,
                baseline: input.baseline,
                source: collection.name.clone(),
            });
        }
        Ok(candidates)
    }

    /// The base tree for a three-way merge: the mirrored baseline copy when
    /// it matches the recorded hash, otherwise the side the classifier knows
    /// equals the baseline. A baseline that cannot be reconstructed refuses
    /// the merge for this artifact.
    fn merge_base_for(
        &self,
        project: &Path,
        key: &ArtifactKey,
        candidate: &Candidate,
        fallback_equal_side: &Path,
    ) -> Result<PathBuf> {
        let baseline_copy = baseline_tree(project, key);
        match (&candidate.baseline, baseline_copy.exists()) {
            (Some(expected), true) => {
                let actual = hash::hash_tree(&baseline_copy)?;
                if &actual == expected {
                    Ok(baseline_copy)
                } else {
                    tracing::warn!(
                        operation = "merge_base",
                        artifact = %key,
                        expected = %expected.short(),
                        actual = %actual.short(),
                        "baseline copy does not match recorded hash; rebuilding from the unchanged side"
                    );
                    self.baseline_from_unchanged_side(key, candidate, fallback_equal_side)
                }
            }
            (Some(_), false) => {
                self.baseline_from_unchanged_side(key, candidate, fallback_equal_side)
            }
            (None, _) => Err(VaultError::Integrity {
                detail: format!("artifact '{key}' has no recorded baseline hash to merge against"),
            }),
        }
    }

    fn baseline_from_unchanged_side(
        &self,
        key: &ArtifactKey,
        candidate: &Candidate,
        fallback_equal_side: &Path,
    ) -> Result<PathBuf> {
        // When only one side moved, the unchanged side *is* the baseline.
        let expected = candidate.baseline.as_ref().ok_or_else(|| VaultError::Integrity {
            detail: format!("artifact '{key}' has no recorded baseline hash"),
        })?;
        let actual = hash::hash_tree(fallback_equal_side)?;
        if &actual == expected {
            Ok(fallback_equal_side.to_path_buf())
        } else {
            Err(VaultError::Integrity {
                detail: format!(
                    "baseline tree for '{key}' is unavailable and neither side matches the \
                     recorded baseline {}; re-deploy or restore a snapshot",
                    expected.short()
                ),
            })
        }
    }

    /// Commit one artifact's successful apply: hash, version record, ledger
    /// entry, baseline mirror, and the database artifact row — together.
    fn finalize(
        &self,
        project: &Path,
        collection: &Collection,
        key: &ArtifactKey,
        applied_tree: &Path,
        candidate: &Candidate,
        direction: SyncDirection,
    ) -> Result<ArtifactOutcome> {
        let new_hash = hash::hash_tree(applied_tree)?;
        let artifact = collection
            .find(key.artifact_type, &key.name)
            .ok_or_else(|| VaultError::ArtifactNotFound { key: key.clone() })?;

        let origin = if candidate.baseline.is_none() {
            ChangeOrigin::Deployment
        } else {
            match direction {
                SyncDirection::Pull => candidate.decision.change_origin,
                SyncDirection::Push => ChangeOrigin::Sync,
            }
        };
        let record = self.with_db(|db| {
            let record =
                db.record_version(artifact.id, &new_hash, candidate.baseline.as_ref(), origin)?;
            db.upsert_artifact(&artifact_row(&candidate.source, artifact, &new_hash))?;
            Ok::<_, VaultError>(record)
        })?;

        {
            let _ledger_guard = self.ledger_guard();
            let mut entry = self
                .ledgers
                .load(project)?
                .find(key.artifact_type, &key.name)
                .cloned()
                .unwrap_or_else(|| DeploymentEntry {
                    name: key.name.clone(),
                    artifact_type: key.artifact_type,
                    source: candidate.source.clone(),
                    version: None,
                    sha: None,
                    content_hash: None,
                    deployed_at: Utc::now(),
                    deployed_from: self.config.collection_path.clone(),
                    version_lineage: vec![],
                    sync_status: SyncStatus::Synced,
                    pending_conflicts: vec![],
                });
            entry.set_baseline(new_hash.clone());
            entry.version = artifact
                .resolved_version
                .clone()
                .or_else(|| artifact.metadata.version.clone());
            entry.version_lineage = record.lineage.clone();
            entry.sync_status = SyncStatus::Synced;
            entry.pending_conflicts.clear();
            entry.deployed_at = Utc::now();
            self.ledgers.record(project, vec![entry])?;
        }

        // Mirror the applied tree as the new merge base.
        let baseline = baseline_tree(project, key);
        remove_tree(&baseline)?;
        copy_tree(applied_tree, &baseline)?;

        tracing::debug!(
            operation = "finalize",
            artifact_id = %artifact.id,
            collection = %candidate.source,
            new_hash = %new_hash.short(),
            change_origin = %record.change_origin,
            "artifact committed"
        );
        Ok(ArtifactOutcome {
            key: key.clone(),
            status: OutcomeStatus::Synced,
            detail: None,
            conflicts: vec![],
            new_hash: Some(new_hash),
        })
    }

    fn record_conflicts(
        &self,
        project: &Path,
        key: &ArtifactKey,
        candidate: &Candidate,
        direction: SyncDirection,
        conflicts: &[FileConflict],
    ) -> Result<()> {
        ConflictState {
            key: key.clone(),
            direction,
            baseline: candidate.baseline.clone(),
            created: Utc::now(),
            conflicts: conflicts.to_vec(),
        }
        .save(project)?;

        let _ledger_guard = self.ledger_guard();
        let mut ledger = self.ledgers.load(project)?;
        if let Some(entry) = ledger.find_mut(key.artifact_type, &key.name) {
            entry.sync_status = SyncStatus::Conflicted;
            entry.pending_conflicts = conflicts.iter().map(|c| c.path.clone()).collect();
            self.ledgers.write(project, &ledger)?;
        }
        Ok(())
    }

    fn ledger_guard(&self) -> std::sync::MutexGuard<'_, ()> {
        self.ledger_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// Free helpers
// ---------------------------------------------------------------------------

/// One drifted artifact selected for a sync batch.
#[derive(Clone, Debug)]
struct Candidate {
    key: ArtifactKey,
    decision: DriftDecision,
    baseline: Option<ContentHash>,
    source: String,
}

enum EffectiveStrategy {
    Apply(SyncStrategy),
    Outcome(OutcomeStatus),
}

fn effective_strategy(options: &SyncOptions) -> EffectiveStrategy {
    match options.strategy {
        SyncStrategy::Prompt if options.interactive => {
            EffectiveStrategy::Outcome(OutcomeStatus::NeedsDecision)
        }
        SyncStrategy::Prompt => match options.auto_resolve {
            AutoResolve::Abort => EffectiveStrategy::Outcome(OutcomeStatus::SkippedNonInteractive),
            AutoResolve::Ours => {
                EffectiveStrategy::Outcome(OutcomeStatus::KeptLocalNonInteractive)
            }
            AutoResolve::Theirs => EffectiveStrategy::Apply(SyncStrategy::Overwrite),
        },
        other => EffectiveStrategy::Apply(other),
    }
}

fn preview(candidates: &[Candidate]) -> Vec<ArtifactOutcome> {
    candidates
        .iter()
        .map(|c| ArtifactOutcome {
            key: c.key.clone(),
            status: OutcomeStatus::Previewed,
            detail: Some(format!(
                "{} → {}",
                c.decision.kind, c.decision.recommendation
            )),
            conflicts: vec![],
            new_hash: None,
        })
        .collect()
}

fn simple(key: &ArtifactKey, status: OutcomeStatus) -> ArtifactOutcome {
    ArtifactOutcome {
        key: key.clone(),
        status,
        detail: None,
        conflicts: vec![],
        new_hash: None,
    }
}

fn failed(key: &ArtifactKey, error: &VaultError) -> ArtifactOutcome {
    ArtifactOutcome {
        key: key.clone(),
        status: OutcomeStatus::Failed,
        detail: Some(error.to_string()),
        conflicts: vec![],
        new_hash: None,
    }
}

/// Merge one artifact, dispatching on its storage shape: directory trees go
/// through the tree merge, single-file artifacts through the file merge.
fn merge_artifact(
    key: &ArtifactKey,
    base: &Path,
    local: &Path,
    remote: &Path,
    output: &Path,
) -> Result<merge::MergeResult> {
    if key.artifact_type.is_tree() {
        merge::merge_trees(base, local, remote, output)
    } else {
        merge::merge_files(base, local, remote, output)
    }
}

fn fork_name(name: &ArtifactName) -> Result<ArtifactName> {
    ArtifactName::new(&format!("{name}-fork")).map_err(|e| VaultError::ConstraintViolation {
        detail: format!("cannot derive fork name: {e}"),
    })
}

/// Every artifact known on either side: the collection manifest union the
/// project ledger, sorted for deterministic batch order.
fn known_keys(collection: &Collection, ledger: &Ledger) -> Vec<ArtifactKey> {
    let mut keys: Vec<ArtifactKey> = collection.artifacts.iter().map(Artifact::key).collect();
    for entry in &ledger.deployed {
        let key = ArtifactKey::new(entry.artifact_type, entry.name.clone());
        if !keys.contains(&key) {
            keys.push(key);
        }
    }
    keys.sort();
    keys
}

/// Where an artifact lives inside a project.
fn project_tree(project: &Path, key: &ArtifactKey) -> PathBuf {
    project
        .join(PROJECT_CONFIG_DIR)
        .join(artifact_rel_path(key.artifact_type, &key.name))
}

/// Where a deployment's baseline mirror lives.
fn baseline_tree(project: &Path, key: &ArtifactKey) -> PathBuf {
    project
        .join(PROJECT_CONFIG_DIR)
        .join(BASELINES_DIR)
        .join(artifact_rel_path(key.artifact_type, &key.name))
}

/// Resolve a conflict's relative path against the artifact root. Single-file
/// artifacts are their own root.
fn target_path(target_root: &Path, key: &ArtifactKey, rel: &Path) -> PathBuf {
    if key.artifact_type.is_tree() {
        target_root.join(rel)
    } else {
        target_root.to_path_buf()
    }
}

fn hash_if_present(path: &Path) -> Result<Option<ContentHash>> {
    if path.exists() {
        hash::hash_tree(path).map(Some)
    } else {
        Ok(None)
    }
}

fn artifact_row(collection: &str, artifact: &Artifact, new_hash: &ContentHash) -> ArtifactRow {
    ArtifactRow {
        id: artifact.id,
        collection: collection.to_owned(),
        artifact_type: artifact.artifact_type,
        name: artifact.name.as_str().to_owned(),
        content_hash: new_hash.clone(),
        origin: artifact.origin,
        upstream: artifact.upstream.clone(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
