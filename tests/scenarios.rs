//! End-to-end scenarios over small in-memory corpora.

use sift::{CorpusBuilder, MatchResult, MemStore, SearchOpts, SearchPool};
use std::sync::Arc;
use std::time::Duration;

fn pool_of(files: &[(&str, &[u8])]) -> SearchPool {
    pool_of_refs(&[("HEAD", files)])
}

fn pool_of_refs(refs: &[(&str, &[(&str, &[u8])])]) -> SearchPool {
    let mut store = MemStore::new();
    for (ref_name, files) in refs {
        store.add_snapshot(ref_name, files);
    }
    let mut builder = CorpusBuilder::new();
    for (ref_name, _) in refs {
        builder.walk_ref(&store, ref_name).unwrap();
    }
    SearchPool::new(Arc::new(builder.finalize()), 2)
}

fn no_limits() -> SearchOpts {
    SearchOpts {
        max_matches: usize::MAX,
        timeout: None,
        ..SearchOpts::default()
    }
}

/// `(ref, path, line_number)` for every emitted context path
fn triples(results: &[MatchResult]) -> Vec<(String, String, u32)> {
    let mut out = Vec::new();
    for m in results {
        for ctx in &m.context {
            for p in &ctx.paths {
                out.push((p.ref_name.clone(), p.path.clone(), ctx.line_number));
            }
        }
    }
    out.sort();
    out
}

#[test]
fn single_file_match_with_context() {
    let pool = pool_of(&[("a.txt", b"hello\nworld\n")]);
    let (results, _) = pool.search("world", None, &no_limits()).unwrap();

    assert_eq!(results.len(), 1);
    let m = &results[0];
    assert_eq!(pool.corpus().span_bytes(&m.line), b"world");
    assert_eq!(m.match_left, 0);
    assert_eq!(m.match_right, 5);

    assert_eq!(m.context.len(), 1);
    let ctx = &m.context[0];
    assert_eq!(ctx.line_number, 2);
    assert_eq!(ctx.context_before.len(), 1);
    assert_eq!(pool.corpus().span_bytes(&ctx.context_before[0]), b"hello");
    assert!(ctx.context_after.is_empty());
}

#[test]
fn identical_blobs_match_once_per_path() {
    let pool = pool_of(&[("a.txt", b"x\n"), ("b.txt", b"x\n")]);
    let (results, _) = pool.search("x", None, &no_limits()).unwrap();

    assert_eq!(results.len(), 2);
    let got = triples(&results);
    assert_eq!(
        got,
        vec![
            ("HEAD".into(), "a.txt".into(), 1),
            ("HEAD".into(), "b.txt".into(), 1),
        ]
    );
}

#[test]
fn match_limit_caps_results() {
    let files: Vec<(String, Vec<u8>)> = (0..1000)
        .map(|i| (format!("f{:04}.txt", i), b"foo\n".to_vec()))
        .collect();
    let refs: Vec<(&str, &[u8])> = files
        .iter()
        .map(|(p, b)| (p.as_str(), b.as_slice()))
        .collect();
    let pool = pool_of(&refs);

    let opts = SearchOpts {
        max_matches: 10,
        timeout: None,
        ..SearchOpts::default()
    };
    let (results, stats) = pool.search("foo", None, &opts).unwrap();
    assert_eq!(results.len(), 10);
    assert_eq!(stats.exit_reason, sift::ExitReason::MatchLimit);
}

#[test]
fn match_offsets_count_scalars_not_bytes() {
    let pool = pool_of(&[("a.txt", "αβγ match δ\n".as_bytes())]);
    let (results, _) = pool.search("match", None, &no_limits()).unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].match_left, 4);
    assert_eq!(results[0].match_right, 9);
}

#[test]
fn invalid_utf8_lines_are_skipped() {
    let pool = pool_of(&[("a.txt", b"BEGIN\n\xff\xfe invalid\nEND\n")]);
    let (results, _) = pool.search("invalid", None, &no_limits()).unwrap();
    assert!(results.is_empty());
}

#[test]
fn shared_blob_across_refs_collects_both_paths() {
    let pool = pool_of_refs(&[
        ("main", &[("src/x.c", b"TODO\n" as &[u8])]),
        ("dev", &[("src/x.c", b"TODO\n")]),
    ]);
    let (results, _) = pool.search("TODO", Some("^src/"), &no_limits()).unwrap();

    assert_eq!(results.len(), 1);
    let ctx = &results[0].context[0];
    let paths: Vec<(&str, &str)> = ctx
        .paths
        .iter()
        .map(|p| (p.ref_name.as_str(), p.path.as_str()))
        .collect();
    assert_eq!(paths, vec![("main", "src/x.c"), ("dev", "src/x.c")]);
}

#[test]
fn timeout_terminates_query() {
    let files: Vec<(String, Vec<u8>)> = (0..50)
        .map(|i| {
            let body: String = (0..200).map(|j| format!("line {} {}\n", i, j)).collect();
            (format!("f{}.txt", i), body.into_bytes())
        })
        .collect();
    let refs: Vec<(&str, &[u8])> = files
        .iter()
        .map(|(p, b)| (p.as_str(), b.as_slice()))
        .collect();
    let pool = pool_of(&refs);

    let opts = SearchOpts {
        max_matches: usize::MAX,
        timeout: Some(Duration::ZERO),
        ..SearchOpts::default()
    };
    let (_, stats) = pool.search("line", None, &opts).unwrap();
    assert_eq!(stats.exit_reason, sift::ExitReason::Timeout);
}

#[test]
fn invalid_regex_reports_synchronously() {
    let pool = pool_of(&[("a.txt", b"x\n")]);
    assert!(pool.search("(", None, &no_limits()).is_err());
    assert!(pool.search("x", Some("("), &no_limits()).is_err());
}

#[test]
fn perform_search_false_emits_nothing() {
    let pool = pool_of(&[("a.txt", b"x\n")]);
    let opts = SearchOpts {
        perform_search: false,
        ..SearchOpts::default()
    };
    let (results, stats) = pool.search("x", None, &opts).unwrap();
    assert!(results.is_empty());
    assert_eq!(stats.matches, 0);
}

#[test]
fn snapshot_from_disk_directory() {
    // The CLI path: walk a real directory into a snapshot, then search.
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("src")).unwrap();
    std::fs::write(dir.path().join("src/lib.rs"), "pub fn entry() {}\n").unwrap();
    std::fs::write(dir.path().join("README.md"), "docs\n").unwrap();

    let mut files = Vec::new();
    for entry in ignore::WalkBuilder::new(dir.path()).build() {
        let entry = entry.unwrap();
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(dir.path())
            .unwrap()
            .to_string_lossy()
            .replace('\\', "/");
        files.push((rel, std::fs::read(entry.path()).unwrap()));
    }
    let refs: Vec<(&str, &[u8])> = files
        .iter()
        .map(|(p, b)| (p.as_str(), b.as_slice()))
        .collect();
    let pool = pool_of(&refs);

    let (results, _) = pool.search("entry", None, &no_limits()).unwrap();
    let got = triples(&results);
    assert_eq!(got, vec![("HEAD".into(), "src/lib.rs".into(), 1)]);
}

#[test]
fn file_pattern_filters_paths() {
    let pool = pool_of(&[
        ("src/a.rs", b"needle\n" as &[u8]),
        ("docs/b.md", b"needle\n"),
    ]);
    let (results, _) = pool.search("needle", Some(r"\.rs$"), &no_limits()).unwrap();
    let got = triples(&results);
    assert_eq!(got, vec![("HEAD".into(), "src/a.rs".into(), 1)]);
}
