//! # sift - indexed regex search over deduplicated snapshots
//!
//! sift ingests source files from one or more version-controlled
//! snapshots, deduplicates identical lines across every file and
//! revision, and answers regular-expression queries interactively over
//! the whole corpus.
//!
//! ## Architecture
//!
//! - [`index`] - corpus ingestion, line dedup, chunks with suffix
//!   arrays and interval trees
//! - [`query`] - per-query searchers, the regex-to-prefix-filter
//!   derivation, and the worker pool
//! - [`output`] - grep-style result formatting for the CLI
//! - [`utils`] - radix sort and friends
//!
//! ## Quick start
//!
//! ```ignore
//! use std::sync::Arc;
//! use sift::{CorpusBuilder, MemStore, SearchOpts, SearchPool};
//!
//! let mut store = MemStore::new();
//! store.add_snapshot("HEAD", &[("a.txt", b"hello\nworld\n")]);
//!
//! let mut builder = CorpusBuilder::new();
//! builder.walk_ref(&store, "HEAD").unwrap();
//! let corpus = Arc::new(builder.finalize());
//!
//! let pool = SearchPool::new(corpus, 0);
//! let (results, stats) = pool.search("world", None, &SearchOpts::default()).unwrap();
//! assert_eq!(results.len(), 1);
//! ```
//!
//! Queries run against an immutable corpus: `finalize` consumes the
//! builder, after which chunks, suffix arrays, and the file table are
//! shared across worker threads with no synchronization.

pub mod index;
pub mod output;
pub mod query;
pub mod utils;

pub use index::build::{Corpus, CorpusBuilder};
pub use index::store::{MemStore, SnapshotStore};
pub use index::types::{FileId, IndexStats, Span, TreePath};
pub use query::pool::SearchPool;
pub use query::searcher::{ExitReason, MatchContext, MatchResult, SearchOpts, SearchStats};
