//! Per-query search over finalized chunks.
//!
//! A `Searcher` owns everything one query needs: the compiled pattern,
//! the optional file-path pattern, the derived index key, the result
//! sender, the match counter and deadline. Worker threads share one
//! searcher and call [`Searcher::search_chunk`] once per chunk.
//!
//! The indexed path per chunk: walk the suffix array under the key to
//! collect candidate offsets, radix-sort them, coalesce near-adjacent
//! candidates into line ranges, scan those ranges with the regex engine,
//! and resolve each matched line back to the files containing it through
//! the chunk's interval tree. Dedup means a line's bytes may be shared by
//! files that do not actually contain the matched line, so every
//! resolution is confirmed against the file's own content spans before a
//! result is emitted.

use crate::index::build::Corpus;
use crate::index::chunk::{suffix_rank, Chunk};
use crate::index::types::{
    ChunkId, FileId, SearchFile, Span, TreePath, CONTEXT_LINES, DENSITY_FALLBACK_FACTOR, MAX_SCAN,
    MIN_FILTER_RATIO, MIN_SKIP,
};
use crate::query::index_key::IndexKey;
use crate::utils::radix_sort_u32;
use anyhow::{Context, Result};
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Why a query stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExitReason {
    /// Ran to completion
    #[default]
    None,
    /// Hit the per-query match cap
    MatchLimit,
    /// Ran past the wall-clock budget
    Timeout,
}

/// Per-query knobs
#[derive(Debug, Clone)]
pub struct SearchOpts {
    /// Cap on distinct `(path, line)` matches
    pub max_matches: usize,
    /// Wall-clock budget; `None` disables the deadline
    pub timeout: Option<Duration>,
    /// Use the suffix-array index; unfiltered scans otherwise
    pub use_index: bool,
    /// When false, compile and analyze but emit nothing
    pub perform_search: bool,
}

impl Default for SearchOpts {
    fn default() -> Self {
        SearchOpts {
            max_matches: 50,
            timeout: Some(Duration::from_secs(1)),
            use_index: true,
            perform_search: true,
        }
    }
}

/// One matched line under one path
#[derive(Debug, Clone)]
pub struct MatchResult {
    /// The matched line, without its trailing `'\n'`
    pub line: Span,
    /// Unicode scalar offset of the match start within the line
    pub match_left: u32,
    /// Unicode scalar offset of the match end
    pub match_right: u32,
    /// One entry per confirming file under this path
    pub context: Vec<MatchContext>,
}

/// A confirmed occurrence in one file, with surrounding lines
#[derive(Debug, Clone)]
pub struct MatchContext {
    pub file: FileId,
    /// 1-based
    pub line_number: u32,
    /// Up to `CONTEXT_LINES` preceding lines, nearest first
    pub context_before: Vec<Span>,
    /// Up to `CONTEXT_LINES` following lines, nearest first
    pub context_after: Vec<Span>,
    /// Every accepted `(ref, path)` this context was resolved under
    pub paths: Vec<TreePath>,
}

/// Per-phase wall time plus totals for one query
#[derive(Debug, Clone, Default)]
pub struct SearchStats {
    pub matches: usize,
    pub exit_reason: ExitReason,
    pub analyze_time: Duration,
    pub index_time: Duration,
    pub sort_time: Duration,
    pub scan_time: Duration,
    pub resolve_time: Duration,
}

#[derive(Default)]
struct Timers {
    index: AtomicU64,
    sort: AtomicU64,
    scan: AtomicU64,
    resolve: AtomicU64,
}

/// Accumulates elapsed nanos into an atomic on drop
struct Timed<'a> {
    acc: &'a AtomicU64,
    start: Instant,
}

impl<'a> Timed<'a> {
    fn new(acc: &'a AtomicU64) -> Self {
        Timed {
            acc,
            start: Instant::now(),
        }
    }
}

impl Drop for Timed<'_> {
    fn drop(&mut self) {
        self.acc
            .fetch_add(self.start.elapsed().as_nanos() as u64, Ordering::Relaxed);
    }
}

const ACCEPT_UNKNOWN: u8 = 0xff;

const EXIT_NONE: u8 = 0;
const EXIT_MATCH_LIMIT: u8 = 1;
const EXIT_TIMEOUT: u8 = 2;

/// Matches found on one line, grouped by path before flushing
#[derive(Default)]
struct MatchGroup {
    matches: BTreeMap<String, Vec<MatchContext>>,
}

pub struct Searcher {
    corpus: Arc<Corpus>,
    pat: regex::bytes::Regex,
    file_pat: Option<regex::Regex>,
    key: Option<IndexKey>,
    use_index: bool,
    results: Sender<Option<MatchResult>>,
    matches: AtomicUsize,
    max_matches: usize,
    deadline: Option<Instant>,
    exit_reason: AtomicU8,
    /// Path-regex verdict per file; `0xff` = not yet computed. Written
    /// racily with the same value from any worker.
    accept_cache: Vec<AtomicU8>,
    /// Fraction of files accepted by the path regex, sampled lazily
    files_density: Mutex<Option<f64>>,
    candidate_cap: usize,
    analyze_time: Duration,
    timers: Timers,
}

impl Searcher {
    pub(crate) fn new(
        corpus: Arc<Corpus>,
        pattern: &str,
        file_pattern: Option<&str>,
        opts: &SearchOpts,
        results: Sender<Option<MatchResult>>,
    ) -> Result<Searcher> {
        let pat = regex::bytes::Regex::new(pattern)
            .with_context(|| format!("invalid pattern {:?}", pattern))?;
        let file_pat = file_pattern
            .map(|p| regex::Regex::new(p).with_context(|| format!("invalid file pattern {:?}", p)))
            .transpose()?;

        let start = Instant::now();
        let key = if opts.use_index {
            IndexKey::from_pattern(pattern)
        } else {
            None
        };
        let analyze_time = start.elapsed();

        let accept_cache = (0..corpus.files().len())
            .map(|_| AtomicU8::new(ACCEPT_UNKNOWN))
            .collect();
        let candidate_cap = corpus.chunk_capacity() / MIN_FILTER_RATIO;

        Ok(Searcher {
            pat,
            file_pat,
            key,
            use_index: opts.use_index,
            results,
            matches: AtomicUsize::new(0),
            max_matches: opts.max_matches,
            deadline: opts.timeout.map(|t| Instant::now() + t),
            exit_reason: AtomicU8::new(EXIT_NONE),
            accept_cache,
            files_density: Mutex::new(None),
            candidate_cap,
            analyze_time,
            timers: Timers::default(),
            corpus,
        })
    }

    /// Search one chunk. `scratch` is the worker's reusable candidate
    /// buffer.
    pub(crate) fn search_chunk(&self, cid: ChunkId, scratch: &mut Vec<u32>) {
        if self.exit_early() {
            return;
        }
        let chunk = self.corpus.chunk(cid);
        match &self.key {
            Some(key) if self.use_index => self.filtered_search(chunk, cid, key, scratch),
            _ => self.full_search(chunk, cid),
        }
    }

    /// Signal the coordinator that one chunk's work is done.
    pub(crate) fn finish_chunk(&self) {
        let _ = self.results.send(None);
    }

    pub(crate) fn stats(&self, matches: usize) -> SearchStats {
        let dur = |a: &AtomicU64| Duration::from_nanos(a.load(Ordering::Relaxed));
        SearchStats {
            matches,
            exit_reason: self.exit_reason(),
            analyze_time: self.analyze_time,
            index_time: dur(&self.timers.index),
            sort_time: dur(&self.timers.sort),
            scan_time: dur(&self.timers.scan),
            resolve_time: dur(&self.timers.resolve),
        }
    }

    pub(crate) fn exit_reason(&self) -> ExitReason {
        match self.exit_reason.load(Ordering::Relaxed) {
            EXIT_MATCH_LIMIT => ExitReason::MatchLimit,
            EXIT_TIMEOUT => ExitReason::Timeout,
            _ => ExitReason::None,
        }
    }

    /// Check the exit conditions, recording the first one that fires.
    /// Polled before every chunk, line scan, and file resolution.
    fn exit_early(&self) -> bool {
        if self.exit_reason.load(Ordering::Relaxed) != EXIT_NONE {
            return true;
        }
        if self.matches.load(Ordering::Relaxed) >= self.max_matches {
            self.set_exit(EXIT_MATCH_LIMIT);
            return true;
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() > deadline {
                self.set_exit(EXIT_TIMEOUT);
                return true;
            }
        }
        false
    }

    fn set_exit(&self, reason: u8) {
        // First writer wins; the transition is monotonic.
        let _ = self.exit_reason.compare_exchange(
            EXIT_NONE,
            reason,
            Ordering::Relaxed,
            Ordering::Relaxed,
        );
    }

    /// Walk the suffix array under the index key, collecting candidate
    /// offsets whose local bytes could start a match.
    fn filtered_search(&self, chunk: &Chunk, cid: ChunkId, key: &IndexKey, scratch: &mut Vec<u32>) {
        struct Frame<'k> {
            left: usize,
            right: usize,
            key: Option<&'k IndexKey>,
            depth: usize,
        }

        scratch.clear();
        let mut overflow = false;
        {
            let _t = Timed::new(&self.timers.index);
            let data = &chunk.data[..];
            let suffixes = &chunk.suffixes[..];
            let mut stack = vec![Frame {
                left: 0,
                right: suffixes.len(),
                key: Some(key),
                depth: 0,
            }];

            while let Some(f) = stack.pop() {
                let narrow = match f.key {
                    // Below ~100 suffixes the walk costs more than
                    // rescanning the range.
                    Some(k) if !k.empty() && f.right - f.left > 100 => Some(k),
                    _ => None,
                };
                let Some(k) = narrow else {
                    if scratch.len() + (f.right - f.left) > self.candidate_cap {
                        overflow = true;
                        break;
                    }
                    scratch.extend_from_slice(&suffixes[f.left..f.right]);
                    continue;
                };

                for (lo, hi, child) in k.edges() {
                    let l = f.left + lower_bound(&suffixes[f.left..f.right], data, f.depth, lo as u16);
                    let r = l + lower_bound(&suffixes[l..f.right], data, f.depth, hi as u16 + 1);
                    if l == r {
                        continue;
                    }
                    debug_assert!(suffix_byte(data, suffixes[l], f.depth) >= lo as u16 + 1);

                    // Split the range per byte value so each child frame
                    // shares a fixed prefix.
                    let mut cl = l;
                    for ch in lo..=hi {
                        let cr =
                            cl + lower_bound(&suffixes[cl..r], data, f.depth, ch as u16 + 1);
                        if cr > cl {
                            stack.push(Frame {
                                left: cl,
                                right: cr,
                                key: child,
                                depth: f.depth + 1,
                            });
                        }
                        cl = cr;
                    }
                }
            }
        }

        if overflow {
            self.full_search(chunk, cid);
            return;
        }
        self.search_lines(chunk, cid, scratch);
    }

    /// Sort the candidates, coalesce near-adjacent ones into line
    /// ranges, and scan each range with the regex.
    fn search_lines(&self, chunk: &Chunk, cid: ChunkId, scratch: &mut Vec<u32>) {
        let count = scratch.len();
        if count == 0 {
            return;
        }

        // The index barely narrowed the chunk; a straight scan is
        // cheaper than per-range bookkeeping.
        if count * MIN_FILTER_RATIO > chunk.size() {
            self.full_search(chunk, cid);
            return;
        }

        // With a file filter, each candidate match pays a file
        // resolution; when few files pass the filter that cost
        // dominates and the range-skipping full scan wins.
        if self.file_pat.is_some()
            && (DENSITY_FALLBACK_FACTOR * count) as f64 / chunk.size() as f64
                > self.files_density()
        {
            self.full_search(chunk, cid);
            return;
        }

        {
            let _t = Timed::new(&self.timers.sort);
            radix_sort_u32(scratch);
        }

        let mut finger = 0usize;
        let mut max = scratch[0] as usize;
        let mut min = chunk.line_start(max);
        for i in 0..=count {
            if self.exit_early() {
                break;
            }
            if i != count {
                let off = scratch[i] as usize;
                if off < max {
                    continue;
                }
                if off < max + MIN_SKIP {
                    max = off;
                    continue;
                }
            }
            let end = chunk.line_end(max);
            self.scan_range(&mut finger, chunk, cid, min, end);
            if i != count {
                max = scratch[i] as usize;
                min = chunk.line_start(max);
            }
        }
    }

    fn full_search(&self, chunk: &Chunk, cid: ChunkId) {
        if chunk.size() == 0 {
            return;
        }
        let mut finger = 0usize;
        self.scan_range(&mut finger, chunk, cid, 0, chunk.size() - 1);
    }

    /// With a file filter and the index on, narrow `[pos, endpos)` to
    /// sub-ranges intersecting chunk files that contain at least one
    /// accepted file. The finger only moves forward across calls.
    fn next_range(
        &self,
        finger: &mut usize,
        chunk: &Chunk,
        pos: &mut usize,
        endpos: &mut usize,
        maxpos: usize,
    ) {
        if self.file_pat.is_none() || !self.use_index {
            return;
        }

        let files = &chunk.files;
        let mut it = *finger;

        // First accepted range intersecting [pos, maxpos)
        while it < files.len()
            && ((files[it].right as usize) < *pos || !self.accept_any(&files[it].files))
            && (files[it].left as usize) < maxpos
        {
            it += 1;
        }
        if it == files.len() || files[it].left as usize >= maxpos {
            *finger = it;
            *pos = maxpos;
            *endpos = maxpos;
            return;
        }

        *pos = (*pos).max(files[it].left as usize);
        *endpos = files[it].right as usize;

        // Absorb follow-on accepted ranges until a gap of MIN_SKIP or
        // the end of the outer range.
        loop {
            if files[it].left as usize >= *endpos + MIN_SKIP {
                break;
            }
            if files[it].right as usize >= *endpos && self.accept_any(&files[it].files) {
                *endpos = (*endpos).max(files[it].right as usize);
                if *endpos >= maxpos {
                    break;
                }
            }
            it += 1;
            if it == files.len() || files[it].left as usize >= maxpos {
                break;
            }
        }

        *endpos = (*endpos).min(maxpos);
        *finger = it;
    }

    /// Scan `[minpos, maxpos)` for matches, one line at a time.
    fn scan_range(
        &self,
        finger: &mut usize,
        chunk: &Chunk,
        cid: ChunkId,
        minpos: usize,
        maxpos: usize,
    ) {
        let data = &chunk.data[..];
        let mut pos = minpos;
        let mut end = minpos;
        while pos < maxpos && !self.exit_early() {
            if pos >= end {
                end = maxpos;
                self.next_range(finger, chunk, &mut pos, &mut end, maxpos);
                debug_assert!(pos <= end);
            }
            if pos >= maxpos {
                break;
            }

            let mut limit = end;
            if limit - pos > MAX_SCAN {
                // Never hand the engine a window that splits a line.
                limit = chunk.line_end(pos + MAX_SCAN);
            }

            let found = {
                let _t = Timed::new(&self.timers.scan);
                self.pat.find_at(&data[..limit], pos)
            };
            let Some(m) = found else {
                pos = limit + 1;
                continue;
            };
            debug_assert!(memchr::memchr(b'\n', &data[m.start()..m.end()]).is_none());

            let ls = chunk.line_start(m.start());
            let le = chunk.line_end(m.end());
            if std::str::from_utf8(&data[ls..le]).is_ok() {
                self.find_match(chunk, cid, ls, le, m.start(), m.end());
            }
            debug_assert!(le + 1 > pos);
            pos = le + 1;
        }
    }

    /// Resolve which files contain the matched line and emit one result
    /// per `(path, line)` through the group.
    fn find_match(&self, chunk: &Chunk, cid: ChunkId, ls: usize, le: usize, ms: usize, me: usize) {
        let _t = Timed::new(&self.timers.resolve);
        let data = &chunk.data[..];
        let left = char_count(&data[ls..ms]);
        let right = left + char_count(&data[ms..me]);
        let loff = ls as u32;

        let mut group = MatchGroup::default();
        if self.use_index {
            chunk.stab(loff, |cf| {
                for &f in &cf.files {
                    let sf = self.corpus.file(f);
                    if !self.accept_file(sf) {
                        continue;
                    }
                    if self.exit_early() {
                        return false;
                    }
                    self.try_match(&mut group, cid, loff, le as u32, sf);
                }
                true
            });
        } else {
            for cf in &chunk.files {
                if cf.left > loff || loff > cf.right {
                    continue;
                }
                for &f in &cf.files {
                    let sf = self.corpus.file(f);
                    if !self.accept_file(sf) {
                        continue;
                    }
                    if self.exit_early() {
                        break;
                    }
                    self.try_match(&mut group, cid, loff, le as u32, sf);
                }
            }
        }

        self.finish_group(
            Span {
                chunk: cid,
                start: ls as u32,
                len: (le - ls) as u32,
            },
            left,
            right,
            group,
        );
    }

    /// Confirm that `sf` really contains the matched line (dedup can
    /// route us to files that merely share other lines in the range) and
    /// attach its context to the group under each accepted path.
    fn try_match(&self, group: &mut MatchGroup, cid: ChunkId, loff: u32, le: u32, sf: &SearchFile) {
        let mut lno: u32 = 1;
        let mut found = None;
        for (i, span) in sf.content.iter().enumerate() {
            if span.chunk == cid && span.start <= loff && loff <= span.end() {
                let bytes = self.corpus.span_bytes(span);
                lno += count_newlines(&bytes[..(loff - span.start) as usize]);
                found = Some(i);
                break;
            }
            lno += count_newlines(self.corpus.span_bytes(span)) + 1;
        }
        let Some(i) = found else {
            return;
        };

        let span = sf.content[i];
        let ctx = MatchContext {
            file: sf.no,
            line_number: lno,
            context_before: self.context_before(sf, i, loff - span.start),
            context_after: self.context_after(sf, i, le - span.start),
            paths: Vec::new(),
        };

        for p in &sf.paths {
            if self.exit_early() {
                break;
            }
            if !self.accept_path(&p.path) {
                continue;
            }
            if let Some(ctxs) = group.matches.get_mut(&p.path) {
                if ctxs.last().map(|c| c.file) != Some(sf.no) {
                    ctxs.push(ctx.clone());
                }
                ctxs.last_mut().unwrap().paths.push(p.clone());
            } else {
                self.matches.fetch_add(1, Ordering::Relaxed);
                let mut first = ctx.clone();
                first.paths.push(p.clone());
                group.matches.insert(p.path.clone(), vec![first]);
            }
        }
    }

    /// Up to `CONTEXT_LINES` lines preceding the line starting at `rel`
    /// (relative to content span `i`), nearest first, crossing span
    /// boundaries as needed.
    fn context_before(&self, sf: &SearchFile, mut i: usize, mut rel: u32) -> Vec<Span> {
        let mut out = Vec::new();
        for _ in 0..CONTEXT_LINES {
            let end;
            if rel == 0 {
                if i == 0 {
                    break;
                }
                i -= 1;
                end = sf.content[i].len;
            } else {
                // The byte before the current line is the separator.
                end = rel - 1;
            }
            let span = sf.content[i];
            let bytes = self.corpus.span_bytes(&span);
            let start = memchr::memrchr(b'\n', &bytes[..end as usize])
                .map(|p| p as u32 + 1)
                .unwrap_or(0);
            out.push(Span {
                chunk: span.chunk,
                start: span.start + start,
                len: end - start,
            });
            rel = start;
        }
        out
    }

    /// Up to `CONTEXT_LINES` lines following the line ending at
    /// `rel_end` (relative to content span `i`), nearest first.
    fn context_after(&self, sf: &SearchFile, mut i: usize, mut rel_end: u32) -> Vec<Span> {
        let mut out = Vec::new();
        for _ in 0..CONTEXT_LINES {
            let start;
            if rel_end == sf.content[i].len {
                if i + 1 == sf.content.len() {
                    break;
                }
                i += 1;
                start = 0;
            } else {
                start = rel_end + 1;
            }
            let span = sf.content[i];
            let bytes = self.corpus.span_bytes(&span);
            let end = memchr::memchr(b'\n', &bytes[start as usize..])
                .map(|p| start + p as u32)
                .unwrap_or(span.len);
            out.push(Span {
                chunk: span.chunk,
                start: span.start + start,
                len: end - start,
            });
            rel_end = end;
        }
        out
    }

    /// Flush the group: one result per path, ascending by path.
    fn finish_group(&self, line: Span, left: u32, right: u32, group: MatchGroup) {
        for (_path, ctxs) in group.matches {
            let _ = self.results.send(Some(MatchResult {
                line,
                match_left: left,
                match_right: right,
                context: ctxs,
            }));
        }
    }

    fn accept_path(&self, path: &str) -> bool {
        match &self.file_pat {
            Some(pat) => pat.is_match(path),
            None => true,
        }
    }

    /// Path-regex verdict for a file, memoized per query. Two workers
    /// may compute it at once; they store the same answer.
    fn accept_file(&self, sf: &SearchFile) -> bool {
        if self.file_pat.is_none() {
            return true;
        }
        let cached = self.accept_cache[sf.no as usize].load(Ordering::Relaxed);
        if cached != ACCEPT_UNKNOWN {
            return cached != 0;
        }
        let ok = sf.paths.iter().any(|p| self.accept_path(&p.path));
        self.accept_cache[sf.no as usize].store(ok as u8, Ordering::Relaxed);
        ok
    }

    fn accept_any(&self, files: &[FileId]) -> bool {
        files.iter().any(|&f| self.accept_file(self.corpus.file(f)))
    }

    /// Approximate fraction of files accepted by the file pattern,
    /// estimated from up to 1,000 uniform samples and memoized for the
    /// query.
    fn files_density(&self) -> f64 {
        let mut guard = self.files_density.lock().unwrap();
        if let Some(d) = *guard {
            return d;
        }
        let files = self.corpus.files();
        let d = if files.is_empty() {
            1.0
        } else {
            let sample = files.len().min(1000);
            let mut rng = rand::thread_rng();
            let hits = (0..sample)
                .filter(|_| self.accept_file(&files[rng.gen_range(0..files.len())]))
                .count();
            hits as f64 / sample as f64
        };
        *guard = Some(d);
        d
    }
}

/// First index in `suffixes` whose byte at `depth` has rank >= the rank
/// of byte value `value` (`'\n'` ranks below every value).
#[inline]
fn lower_bound(suffixes: &[u32], data: &[u8], depth: usize, value: u16) -> usize {
    suffixes.partition_point(|&s| suffix_byte(data, s, depth) < value + 1)
}

#[inline]
fn suffix_byte(data: &[u8], suffix: u32, depth: usize) -> u16 {
    suffix_rank(data[suffix as usize + depth])
}

/// Unicode scalars in a byte slice of valid UTF-8 (continuation bytes
/// don't count)
#[inline]
fn char_count(bytes: &[u8]) -> u32 {
    bytes.iter().filter(|&&b| b & 0xc0 != 0x80).count() as u32
}

#[inline]
fn count_newlines(bytes: &[u8]) -> u32 {
    memchr::memchr_iter(b'\n', bytes).count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn char_count_counts_scalars() {
        assert_eq!(char_count("abc".as_bytes()), 3);
        assert_eq!(char_count("αβγ".as_bytes()), 3);
        assert_eq!(char_count("αβγ ".as_bytes()), 4);
    }

    #[test]
    fn default_opts_match_contract() {
        let opts = SearchOpts::default();
        assert_eq!(opts.max_matches, 50);
        assert_eq!(opts.timeout, Some(Duration::from_secs(1)));
        assert!(opts.use_index);
        assert!(opts.perform_search);
    }
}
