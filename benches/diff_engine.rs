//! Diff engine benchmarks.
//!
//! Measures two-way diff and three-way classification over synthetic trees.
//!
//! # Running
//!
//! ```bash
//! cargo bench --bench diff_engine
//! # With a custom filter:
//! cargo bench --bench diff_engine -- three_way
//! ```
//!
//! # Performance target
//!
//! Three-way classification of 500 moderate files must complete in under
//! 2.5 s on a developer workstation.

use std::collections::BTreeMap;
use std::path::PathBuf;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use skillvault::diff::{diff_trees, three_way_diff, FileTree};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// A synthetic tree of `n` markdown-ish files, ~40 lines each.
fn synthetic_tree(n: usize, seed: &str) -> FileTree {
    let mut tree: FileTree = BTreeMap::new();
    for i in 0..n {
        let mut content = String::with_capacity(1024);
        for line in 0..40 {
            content.push_str(&format!("file {i} line {line} {seed}\n"));
        }
        tree.insert(PathBuf::from(format!("docs/file-{i:04}.md")), content.into_bytes());
    }
    tree
}

/// Mutate every `stride`-th file of a tree.
fn mutate(tree: &FileTree, stride: usize, marker: &str) -> FileTree {
    tree.iter()
        .enumerate()
        .map(|(i, (path, bytes))| {
            if i % stride == 0 {
                let mut edited = bytes.clone();
                edited.extend_from_slice(format!("edited {marker}\n").as_bytes());
                (path.clone(), edited)
            } else {
                (path.clone(), bytes.clone())
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

fn bench_two_way(c: &mut Criterion) {
    let mut group = c.benchmark_group("two_way");
    for n in [50usize, 200, 500] {
        let source = synthetic_tree(n, "base");
        let target = mutate(&source, 4, "target");
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| diff_trees(&source, &target));
        });
    }
    group.finish();
}

fn bench_three_way(c: &mut Criterion) {
    let mut group = c.benchmark_group("three_way");
    for n in [50usize, 200, 500] {
        let base = synthetic_tree(n, "base");
        // Disjoint edit sets: local edits every 3rd file, remote every 5th,
        // overlapping on multiples of 15 (conflicts).
        let local = mutate(&base, 3, "local");
        let remote = mutate(&base, 5, "remote");
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| three_way_diff(&base, &local, &remote));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_two_way, bench_three_way);
criterion_main!(benches);
