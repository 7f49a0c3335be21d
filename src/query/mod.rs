//! Query execution: filter derivation, per-chunk search, coordination.
//!
//! - [`index_key`] - regex to byte-prefix trie derivation
//! - [`searcher`] - the per-query search pipeline over one chunk
//! - [`pool`] - worker threads and result draining

pub mod index_key;
pub mod pool;
pub mod searcher;

pub use index_key::IndexKey;
pub use pool::SearchPool;
pub use searcher::{ExitReason, MatchContext, MatchResult, SearchOpts, SearchStats};
