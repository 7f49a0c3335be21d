use serde::Serialize;

/// Dense index of a unique blob in the file table
pub type FileId = u32;

/// Index of a chunk in the corpus chunk list
pub type ChunkId = u32;

/// Content hash identifying a unique blob (blake3)
pub type Oid = [u8; 32];

/// Default capacity of a chunk's byte buffer
pub const CHUNK_SIZE: usize = 1 << 25;

/// Lines of context captured on each side of a match
pub const CONTEXT_LINES: usize = 3;

/// Candidate offsets closer than this are scanned as a single range.
/// Balances regex startup cost against redundant scanning.
pub const MIN_SKIP: usize = 250;

/// A filtered walk must narrow the chunk by at least this factor to pay
/// for itself; denser candidate sets fall back to a full scan.
pub const MIN_FILTER_RATIO: usize = 50;

/// Upper bound on a single regex scan window, in bytes
pub const MAX_SCAN: usize = 1 << 20;

/// Weight of per-candidate file resolution in the path-filter fallback
/// test (`DENSITY_FALLBACK_FACTOR * count / chunk_size > files_density`).
/// Inherited tuning constant; kept separate rather than folded into
/// `MIN_FILTER_RATIO`.
pub const DENSITY_FALLBACK_FACTOR: usize = 30;

/// A byte range inside one chunk's buffer.
///
/// Spans are non-owning: they are resolved to bytes through the corpus
/// handle (`Corpus::span_bytes`), which owns the chunk buffers for the
/// lifetime of the process. A line span never includes its trailing
/// `'\n'`, though that byte is always present in the chunk right after
/// the span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub chunk: ChunkId,
    pub start: u32,
    pub len: u32,
}

impl Span {
    /// One past the last byte of the span, as a chunk offset
    #[inline]
    pub fn end(&self) -> u32 {
        self.start + self.len
    }
}

/// One `(ref, path)` under which a blob appears in the corpus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreePath {
    pub ref_name: String,
    pub path: String,
}

/// The canonical record for one unique blob.
///
/// Identical blobs ingested under different refs or paths share a single
/// `SearchFile`; every occurrence is listed in `paths`. `content` holds
/// the blob line-by-line as spans into chunk memory, with runs of lines
/// that happen to be stored contiguously merged into one span.
#[derive(Debug)]
pub struct SearchFile {
    pub oid: Oid,
    pub no: FileId,
    pub paths: Vec<TreePath>,
    pub content: Vec<Span>,
}

/// Ingestion counters, before and after line deduplication
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct IndexStats {
    pub bytes: u64,
    pub dedup_bytes: u64,
    pub lines: u64,
    pub dedup_lines: u64,
    pub files: u64,
    pub dedup_files: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_end() {
        let s = Span {
            chunk: 0,
            start: 10,
            len: 5,
        };
        assert_eq!(s.end(), 15);
    }
}
