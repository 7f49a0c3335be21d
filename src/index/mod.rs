//! The in-memory corpus: ingestion, dedup, and the per-chunk index.
//!
//! - [`build`] - corpus construction from snapshot refs
//! - [`chunk`] - chunk arenas, suffix arrays, interval trees
//! - [`store`] - content-addressed snapshot store trait + in-memory impl
//! - [`types`] - ids, spans, constants, stats
//!
//! ## Lifecycle
//!
//! ```ignore
//! use sift::index::build::CorpusBuilder;
//! use sift::index::store::MemStore;
//!
//! let mut store = MemStore::new();
//! store.add_snapshot("HEAD", &[("a.txt", b"hello\nworld\n")]);
//!
//! let mut builder = CorpusBuilder::new();
//! builder.walk_ref(&store, "HEAD").unwrap();
//! let corpus = builder.finalize();
//! ```
//!
//! `finalize` consumes the builder, so the corpus is read-only by
//! construction: every container it holds is shared across query threads
//! without locks.

pub mod build;
pub mod chunk;
pub mod store;
pub mod types;

pub use build::{Corpus, CorpusBuilder};
pub use store::{MemStore, SnapshotStore};
pub use types::*;
