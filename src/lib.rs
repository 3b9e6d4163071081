//! skillvault — personal collection manager and synchronization engine for
//! AI-assistant artifacts (skills, commands, agents, hooks, MCP servers).
//!
//! The crate tracks the provenance of every deployed artifact by content
//! hash, detects divergence between the collection, the last-deployed
//! baseline, and the project copy, classifies that drift, performs
//! three-way merges with conflict markers, and records a branching version
//! lineage so any change can be attributed and rolled back.
//!
//! # Architecture
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`hash`] | Deterministic content hashing of artifact trees |
//! | [`storage`] | Collection manifest and per-project deployment ledger |
//! | [`db`] | Embedded store: artifacts, version DAG, composite edges |
//! | [`diff`] | Two-way and three-way tree diffing |
//! | [`merge`] | Merge execution with conflict markers |
//! | [`model`] | Domain types: artifacts, conflicts, drift |
//! | [`sync`] | The coordinator: check/pull/push/resolve |
//! | [`snapshot`] | Collection archiving and restore |
//! | [`refresh`] | Whitelisted upstream metadata refresh |
//! | [`jobs`] | Persistent bounded background job queue |
//!
//! The outer surfaces (HTTP API, CLI, remote fetching, prompts) live outside
//! this crate and consume the programmatic verbs exposed here.

pub mod cancel;
pub mod config;
pub mod db;
pub mod diff;
pub mod error;
pub mod hash;
pub mod jobs;
pub mod merge;
pub mod model;
pub mod refresh;
pub mod snapshot;
pub mod storage;
pub mod sync;
pub mod telemetry;

pub use cancel::CancelToken;
pub use config::VaultConfig;
pub use error::{Result, VaultError};
pub use model::drift::{DriftKind, DriftReport};
pub use model::types::{ArtifactKey, ArtifactName, ArtifactType, ContentHash};
pub use sync::{SyncCoordinator, SyncOptions, SyncResult, SyncStrategy};
