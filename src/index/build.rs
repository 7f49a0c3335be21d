//! Corpus construction: ingestion, line dedup, finalize.
//!
//! `CorpusBuilder` walks snapshot refs, splits each blob into lines,
//! deduplicates identical lines across every file and revision, and
//! records which byte ranges of which chunk belong to which files.
//! `finalize` consumes the builder and seals everything into an immutable
//! `Corpus` that concurrent searches share without locks.

use crate::index::chunk::Chunk;
use crate::index::store::{EntryKind, SnapshotStore};
use crate::index::types::{
    ChunkId, FileId, IndexStats, Oid, SearchFile, Span, TreePath, CHUNK_SIZE,
};
use ahash::{AHashMap, RandomState};
use anyhow::Result;
use std::hash::{BuildHasher, Hash, Hasher};

/// Builds the deduplicated corpus from one or more snapshot refs.
pub struct CorpusBuilder {
    chunks: Vec<Chunk>,
    chunk_capacity: usize,
    /// Line dedup table: content hash of line bytes -> spans with that
    /// hash. Buckets are verified byte-wise on lookup.
    lines: AHashMap<u64, Vec<Span>>,
    hasher: RandomState,
    files: Vec<SearchFile>,
    file_map: AHashMap<Oid, FileId>,
    refs: Vec<String>,
    /// Top-level directory names walked first, in this order; the rest
    /// of the root tree follows in its own order.
    order_root: Vec<String>,
    stats: IndexStats,
}

impl Default for CorpusBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CorpusBuilder {
    pub fn new() -> Self {
        Self::with_chunk_capacity(CHUNK_SIZE)
    }

    /// Builder with a non-default chunk capacity. Small capacities force
    /// multi-chunk corpora, which the tests lean on.
    pub fn with_chunk_capacity(capacity: usize) -> Self {
        CorpusBuilder {
            chunks: vec![Chunk::new(capacity)],
            chunk_capacity: capacity,
            lines: AHashMap::new(),
            hasher: RandomState::new(),
            files: Vec::new(),
            file_map: AHashMap::new(),
            refs: Vec::new(),
            order_root: Vec::new(),
            stats: IndexStats::default(),
        }
    }

    /// Walk these top-level directories first when ingesting a ref
    pub fn set_order_root(&mut self, dirs: Vec<String>) {
        self.order_root = dirs;
    }

    pub fn stats(&self) -> &IndexStats {
        &self.stats
    }

    /// Ingest every blob reachable from `ref_name` in `store`.
    pub fn walk_ref(&mut self, store: &dyn SnapshotStore, ref_name: &str) -> Result<()> {
        let root = store.resolve_ref(ref_name)?;
        self.refs.push(ref_name.to_string());

        let mut entries = store.tree_entries(root)?;
        let mut ordered = Vec::with_capacity(entries.len());
        for dir in &self.order_root {
            if let Some(i) = entries.iter().position(|e| &e.name == dir) {
                ordered.push(entries.remove(i));
            }
        }
        ordered.extend(entries);

        for entry in ordered {
            match entry.kind {
                EntryKind::Tree => {
                    let prefix = format!("{}/", entry.name);
                    self.walk_tree(store, ref_name, &prefix, entry.id)?;
                }
                EntryKind::Blob => {
                    let (oid, bytes) = store.blob(entry.id)?;
                    self.ingest_blob(ref_name, &entry.name, oid, bytes);
                }
            }
        }
        Ok(())
    }

    fn walk_tree(
        &mut self,
        store: &dyn SnapshotStore,
        ref_name: &str,
        prefix: &str,
        tree: crate::index::store::ObjectId,
    ) -> Result<()> {
        for entry in store.tree_entries(tree)? {
            let path = format!("{}{}", prefix, entry.name);
            match entry.kind {
                EntryKind::Tree => {
                    let prefix = format!("{}/", path);
                    self.walk_tree(store, ref_name, &prefix, entry.id)?;
                }
                EntryKind::Blob => {
                    let (oid, bytes) = store.blob(entry.id)?;
                    self.ingest_blob(ref_name, &path, oid, bytes);
                }
            }
        }
        Ok(())
    }

    /// Ingest one blob under `(ref_name, path)`.
    ///
    /// Blobs containing NUL are skipped silently. A blob whose oid was
    /// already ingested only gains the new path. An unterminated final
    /// line (no trailing `'\n'`) is not indexed.
    pub fn ingest_blob(&mut self, ref_name: &str, path: &str, oid: Oid, bytes: &[u8]) {
        if memchr::memchr(0, bytes).is_some() {
            return;
        }

        self.stats.bytes += bytes.len() as u64;
        self.stats.files += 1;

        if let Some(&no) = self.file_map.get(&oid) {
            self.files[no as usize].paths.push(TreePath {
                ref_name: ref_name.to_string(),
                path: path.to_string(),
            });
            return;
        }

        self.stats.dedup_files += 1;
        let no = self.files.len() as FileId;
        self.file_map.insert(oid, no);
        self.files.push(SearchFile {
            oid,
            no,
            paths: vec![TreePath {
                ref_name: ref_name.to_string(),
                path: path.to_string(),
            }],
            content: Vec::new(),
        });

        let mut pos = 0;
        while let Some(nl) = memchr::memchr(b'\n', &bytes[pos..]) {
            let line = &bytes[pos..pos + nl];
            let span = self.dedup_line(line);
            let chunk = &mut self.chunks[span.chunk as usize];
            chunk.add_file_line(no, span.start, span.end());
            self.append_content(no, span);
            pos += nl + 1;
            self.stats.lines += 1;
        }

        for chunk in &mut self.chunks {
            chunk.close_open_ranges();
        }
    }

    /// Look the line up in the dedup table; on miss, copy it (plus its
    /// `'\n'`) into the current chunk and remember the span.
    fn dedup_line(&mut self, line: &[u8]) -> Span {
        let mut h = self.hasher.build_hasher();
        line.hash(&mut h);
        let key = h.finish();

        if let Some(bucket) = self.lines.get(&key) {
            for &span in bucket {
                if span_bytes(&self.chunks, &span) == line {
                    return span;
                }
            }
        }

        self.stats.dedup_bytes += line.len() as u64 + 1;
        self.stats.dedup_lines += 1;

        assert!(
            line.len() + 1 <= self.chunk_capacity,
            "line of {} bytes exceeds the chunk capacity",
            line.len()
        );
        if self.chunks.last().unwrap().remaining() < line.len() + 1 {
            self.chunks.push(Chunk::new(self.chunk_capacity));
        }
        let chunk_id = (self.chunks.len() - 1) as ChunkId;
        let chunk = self.chunks.last_mut().unwrap();
        let start = chunk.alloc(line);
        chunk.alloc(b"\n");

        let span = Span {
            chunk: chunk_id,
            start,
            len: line.len() as u32,
        };
        self.lines.entry(key).or_default().push(span);
        span
    }

    /// Append a line to the file's content, merging with the previous
    /// span when the bytes are contiguous in the same chunk (the line's
    /// `'\n'` separator then sits in place between them).
    fn append_content(&mut self, no: FileId, span: Span) {
        let content = &mut self.files[no as usize].content;
        if let Some(back) = content.last_mut() {
            if back.chunk == span.chunk && back.end() + 1 == span.start {
                debug_assert_eq!(
                    self.chunks[back.chunk as usize].data[back.end() as usize],
                    b'\n'
                );
                back.len = span.end() - back.start;
                return;
            }
        }
        content.push(span);
    }

    /// Seal the corpus: merge and sort every chunk's file ranges, build
    /// suffix arrays and interval trees. Consuming the builder makes a
    /// second finalize, or ingestion after finalize, unrepresentable.
    pub fn finalize(mut self) -> Corpus {
        for chunk in &mut self.chunks {
            chunk.finalize();
        }
        Corpus {
            chunks: self.chunks,
            chunk_capacity: self.chunk_capacity,
            files: self.files,
            refs: self.refs,
            stats: self.stats,
        }
    }
}

fn span_bytes<'a>(chunks: &'a [Chunk], span: &Span) -> &'a [u8] {
    &chunks[span.chunk as usize].data[span.start as usize..span.end() as usize]
}

/// The finalized, immutable corpus. Shared across query threads with no
/// synchronization.
#[derive(Debug)]
pub struct Corpus {
    chunks: Vec<Chunk>,
    chunk_capacity: usize,
    files: Vec<SearchFile>,
    refs: Vec<String>,
    stats: IndexStats,
}

impl Corpus {
    #[inline]
    pub fn span_bytes(&self, span: &Span) -> &[u8] {
        span_bytes(&self.chunks, span)
    }

    #[inline]
    pub(crate) fn chunk(&self, id: ChunkId) -> &Chunk {
        &self.chunks[id as usize]
    }

    pub fn num_chunks(&self) -> usize {
        self.chunks.len()
    }

    pub fn chunk_capacity(&self) -> usize {
        self.chunk_capacity
    }

    pub fn files(&self) -> &[SearchFile] {
        &self.files
    }

    pub fn file(&self, no: FileId) -> &SearchFile {
        &self.files[no as usize]
    }

    pub fn refs(&self) -> &[String] {
        &self.refs
    }

    pub fn stats(&self) -> &IndexStats {
        &self.stats
    }
}
