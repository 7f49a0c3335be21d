//! Search benchmarks over a synthetic corpus.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use sift::{CorpusBuilder, MemStore, SearchOpts, SearchPool};
use std::sync::Arc;

/// Build a corpus of generated source-like files with plenty of shared
/// lines across files.
fn build_pool(files: usize, lines: usize) -> SearchPool {
    let mut blobs = Vec::with_capacity(files);
    for i in 0..files {
        let mut body = String::new();
        for j in 0..lines {
            match j % 4 {
                0 => body.push_str(&format!("fn handler_{}() {{\n", j)),
                1 => body.push_str(&format!("    let state_{}_{} = init();\n", i, j)),
                2 => body.push_str(&format!("    dispatch({});\n", j)),
                _ => body.push_str("}\n"),
            }
        }
        blobs.push((format!("src/file_{}.rs", i), body.into_bytes()));
    }

    let refs: Vec<(&str, &[u8])> = blobs
        .iter()
        .map(|(p, b)| (p.as_str(), b.as_slice()))
        .collect();
    let mut store = MemStore::new();
    store.add_snapshot("HEAD", &refs);
    let mut builder = CorpusBuilder::new();
    builder.walk_ref(&store, "HEAD").unwrap();
    SearchPool::new(Arc::new(builder.finalize()), 0)
}

fn bench_search(c: &mut Criterion) {
    let pool = build_pool(500, 200);
    let opts = SearchOpts {
        timeout: None,
        ..SearchOpts::default()
    };

    let mut group = c.benchmark_group("search");

    group.bench_function("literal_rare", |b| {
        b.iter(|| {
            let (results, _) = pool
                .search(black_box("state_499_197"), None, &opts)
                .unwrap();
            black_box(results)
        })
    });

    group.bench_function("literal_common", |b| {
        b.iter(|| {
            let (results, _) = pool.search(black_box("dispatch"), None, &opts).unwrap();
            black_box(results)
        })
    });

    group.bench_function("regex_class", |b| {
        b.iter(|| {
            let (results, _) = pool
                .search(black_box(r"handler_\d+"), None, &opts)
                .unwrap();
            black_box(results)
        })
    });

    group.bench_function("unindexed_scan", |b| {
        let unindexed = SearchOpts {
            use_index: false,
            ..opts.clone()
        };
        b.iter(|| {
            let (results, _) = pool
                .search(black_box("state_499_197"), None, &unindexed)
                .unwrap();
            black_box(results)
        })
    });

    group.finish();
}

fn bench_ingest(c: &mut Criterion) {
    let mut blobs = Vec::new();
    for i in 0..200 {
        let mut body = String::new();
        for j in 0..100 {
            body.push_str(&format!("line {} of file {}\n", j, i % 20));
        }
        blobs.push((format!("f_{}.txt", i), body.into_bytes()));
    }
    let refs: Vec<(&str, &[u8])> = blobs
        .iter()
        .map(|(p, b)| (p.as_str(), b.as_slice()))
        .collect();

    c.bench_function("ingest_and_finalize", |b| {
        b.iter(|| {
            let mut store = MemStore::new();
            store.add_snapshot("HEAD", black_box(&refs));
            let mut builder = CorpusBuilder::new();
            builder.walk_ref(&store, "HEAD").unwrap();
            black_box(builder.finalize())
        })
    });
}

criterion_group!(benches, bench_search, bench_ingest);
criterion_main!(benches);
