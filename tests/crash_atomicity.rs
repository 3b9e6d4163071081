//! Atomic-write visibility and concurrent sync ordering.

mod common;

use std::fs;
use std::sync::Arc;
use std::thread;

use common::Fixture;
use skillvault::cancel::CancelToken;
use skillvault::model::types::{ArtifactKey, ArtifactName, ArtifactType, ChangeOrigin};
use skillvault::storage::ledger::LedgerStore;
use skillvault::storage::manifest::ManifestStore;
use skillvault::sync::{SyncOptions, SyncStrategy};

fn key(name: &str) -> ArtifactKey {
    ArtifactKey::new(ArtifactType::Skill, ArtifactName::new(name).unwrap())
}

// ---------------------------------------------------------------------------
// Atomic visibility: readers never observe a torn manifest or ledger
// ---------------------------------------------------------------------------

#[test]
fn concurrent_manifest_readers_always_parse() {
    let fixture = Fixture::new();
    fixture.add_skill("seed", &[("SKILL.md", "# Seed\n")]);
    let collection_path = fixture.config.collection_path.clone();

    let writer_path = collection_path.clone();
    let writer = thread::spawn(move || {
        let store = ManifestStore;
        for _ in 0..50 {
            let collection = store.read(&writer_path).unwrap();
            store.write(&writer_path, &collection).unwrap();
        }
    });

    let reader = thread::spawn(move || {
        let store = ManifestStore;
        for _ in 0..200 {
            // Every read must parse: the write-temp + rename discipline
            // means a reader sees old bytes or new bytes, never a torn file.
            let collection = store.read(&collection_path).unwrap();
            assert_eq!(collection.name, "personal");
        }
    });

    writer.join().unwrap();
    reader.join().unwrap();
}

#[test]
fn concurrent_ledger_readers_always_parse() {
    let fixture = Fixture::new();
    fixture.add_skill("seed", &[("SKILL.md", "# Seed\n")]);
    let coordinator = fixture.coordinator();
    coordinator
        .sync_to_project(&fixture.project, &SyncOptions::default(), &CancelToken::new())
        .unwrap();

    let project = fixture.project.clone();
    let writer_project = project.clone();
    let writer = thread::spawn(move || {
        let store = LedgerStore;
        for _ in 0..50 {
            let ledger = store.load(&writer_project).unwrap();
            store.write(&writer_project, &ledger).unwrap();
        }
    });
    let reader = thread::spawn(move || {
        let store = LedgerStore;
        for _ in 0..200 {
            let ledger = store.load(&project).unwrap();
            assert_eq!(ledger.deployed.len(), 1);
        }
    });

    writer.join().unwrap();
    reader.join().unwrap();
}

// ---------------------------------------------------------------------------
// Concurrency: parallel syncs of distinct artifacts do not interfere
// ---------------------------------------------------------------------------

#[test]
fn parallel_syncs_of_distinct_artifacts_all_commit() {
    const ARTIFACTS: usize = 32;

    let fixture = Fixture::new();
    let names: Vec<String> = (0..ARTIFACTS).map(|i| format!("skill-{i:02}")).collect();
    for name in &names {
        fixture.add_skill(name, &[("SKILL.md", &format!("# {name}\nbase\n"))]);
    }
    let coordinator = Arc::new(fixture.coordinator());
    coordinator
        .sync_to_project(&fixture.project, &SyncOptions::default(), &CancelToken::new())
        .unwrap();

    // Each artifact gets a distinct local edit.
    for name in &names {
        fs::write(
            fixture.project_skill(name).join("SKILL.md"),
            format!("# {name}\nedited\n"),
        )
        .unwrap();
    }

    let handles: Vec<_> = names
        .iter()
        .map(|name| {
            let coordinator = Arc::clone(&coordinator);
            let project = fixture.project.clone();
            let filter_key = key(name);
            thread::spawn(move || {
                let result = coordinator
                    .sync_from_project(
                        &project,
                        &SyncOptions {
                            strategy: SyncStrategy::Overwrite,
                            artifact_filter: Some(vec![filter_key]),
                            ..SyncOptions::default()
                        },
                        &CancelToken::new(),
                    )
                    .unwrap();
                assert!(result.success(), "{result:?}");
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    // Every artifact's edit landed, and every ledger entry advanced.
    let ledger = LedgerStore.load(&fixture.project).unwrap();
    assert_eq!(ledger.deployed.len(), ARTIFACTS);
    for name in &names {
        let content =
            fs::read_to_string(fixture.collection_skill(name).join("SKILL.md")).unwrap();
        assert_eq!(content, format!("# {name}\nedited\n"));

        let entry = ledger
            .find(ArtifactType::Skill, &ArtifactName::new(name).unwrap())
            .unwrap();
        assert_eq!(entry.version_lineage.len(), 2, "lineage for {name}");
    }
}

// ---------------------------------------------------------------------------
// Same artifact: successive syncs form a parent/child chain
// ---------------------------------------------------------------------------

#[test]
fn successive_syncs_of_one_artifact_are_totally_ordered() {
    let fixture = Fixture::new();
    let artifact = fixture.add_skill("bar", &[("SKILL.md", "# Bar\nv0\n")]);
    let coordinator = fixture.coordinator();
    coordinator
        .sync_to_project(&fixture.project, &SyncOptions::default(), &CancelToken::new())
        .unwrap();

    for round in 1..=3 {
        fs::write(
            fixture.project_skill("bar").join("SKILL.md"),
            format!("# Bar\nv{round}\n"),
        )
        .unwrap();
        let result = coordinator
            .sync_from_project(
                &fixture.project,
                &SyncOptions {
                    strategy: SyncStrategy::Overwrite,
                    ..SyncOptions::default()
                },
                &CancelToken::new(),
            )
            .unwrap();
        assert!(result.success(), "round {round}: {result:?}");
    }

    // Four records (deployment + three edits), each the parent of the next.
    let versions = coordinator
        .with_db(|db| db.versions_for(artifact.id))
        .unwrap();
    assert_eq!(versions.len(), 4);
    for pair in versions.windows(2) {
        // versions_for returns newest first.
        assert_eq!(
            pair[0].parent_hash.as_ref(),
            Some(&pair[1].content_hash),
            "chain broken between {} and {}",
            pair[0].content_hash.short(),
            pair[1].content_hash.short()
        );
    }
    assert_eq!(versions[3].change_origin, ChangeOrigin::Deployment);
    assert_eq!(versions[3].parent_hash, None);
    assert_eq!(versions[0].lineage.len(), 4);
}

// ---------------------------------------------------------------------------
// Crash recovery: ledger re-derived from the version graph
// ---------------------------------------------------------------------------

#[test]
fn reconcile_repairs_ledger_after_simulated_crash() {
    let fixture = Fixture::new();
    let artifact = fixture.add_skill("bar", &[("SKILL.md", "# Bar\nv0\n")]);
    let coordinator = fixture.coordinator();
    coordinator
        .sync_to_project(&fixture.project, &SyncOptions::default(), &CancelToken::new())
        .unwrap();

    let old_baseline = LedgerStore
        .load(&fixture.project)
        .unwrap()
        .deployed[0]
        .baseline()
        .cloned()
        .unwrap();

    // Simulate the crash window: a version record landed but the ledger
    // write never happened. The all-f hash orders above any real digest, so
    // the last-write-wins rule must roll the ledger forward to it.
    let forged = skillvault::model::types::ContentHash::new(&"f".repeat(64)).unwrap();
    assert!(forged > old_baseline);
    coordinator
        .with_db(|db| db.record_sync(artifact.id, &forged, &old_baseline))
        .unwrap();

    let fixes = coordinator
        .with_db(|db| {
            skillvault::sync::recover::reconcile(
                &fixture.project,
                &fixture.config.collection_path,
                "personal",
                db,
            )
        })
        .unwrap();
    assert_eq!(fixes.len(), 1);

    let ledger = LedgerStore.load(&fixture.project).unwrap();
    assert_eq!(ledger.deployed[0].baseline(), Some(&forged));
    assert_eq!(
        ledger.deployed[0].version_lineage,
        vec![forged, old_baseline]
    );
}
