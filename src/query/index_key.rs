//! Deriving a byte-prefix filter from a regex.
//!
//! An `IndexKey` is a small trie of inclusive byte ranges
//! over-approximating the set of byte prefixes a match can begin with.
//! The filtered search walks it depth-by-depth across a chunk's suffix
//! array: every edge narrows the candidate range, every node with no
//! edges (or marked accepting) stops the descent and emits whatever is
//! left.
//!
//! Derivation walks the regex-syntax HIR conservatively: literals chain
//! bytes, classes become byte-range edges (Unicode classes expand to
//! UTF-8 byte-range sequences), alternations union, repetitions open
//! their tails, zero-width assertions are transparent. Anything the
//! analysis cannot bound collapses to an all-bytes edge, and an
//! unselective or empty result yields `None`: the caller falls back to
//! an unfiltered scan. Over-approximation is the safety contract here --
//! the filter may emit extra candidates but must never drop a real one.

use regex_syntax::hir::{Class, Hir, HirKind};

/// Maximum trie depth; deeper filtering costs more than it saves
const MAX_DEPTH: usize = 4;

/// Node allocation budget for one derivation; exceeding it gives up
const NODE_BUDGET: usize = 4096;

/// A root spanning more than half the byte alphabet filters nothing
/// worth walking for
const MAX_ROOT_COVERAGE: u32 = 128;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Edge {
    lo: u8,
    hi: u8,
    /// `None` means the continuation is unconstrained: the walk stops
    /// here and emits the whole sub-range.
    child: Option<Box<IndexKey>>,
}

/// One node of the byte-range trie.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IndexKey {
    /// Sorted, disjoint ranges
    edges: Vec<Edge>,
    /// A prefix may end at this node, after which anything can follow.
    /// During derivation this is the hook concatenation extends; in the
    /// finished key it means "stop filtering here".
    accept: bool,
}

struct Overflow;

struct Budget(usize);

impl Budget {
    fn take(&mut self, n: usize) -> Result<(), Overflow> {
        if self.0 < n {
            return Err(Overflow);
        }
        self.0 -= n;
        Ok(())
    }
}

impl IndexKey {
    /// Derive a filter for `pattern`, or `None` when no useful filter
    /// exists and the search should scan unfiltered.
    pub fn from_pattern(pattern: &str) -> Option<IndexKey> {
        let hir = regex_syntax::ParserBuilder::new()
            .utf8(false)
            .build()
            .parse(pattern)
            .ok()?;
        let mut budget = Budget(NODE_BUDGET);
        let mut key = analyze(&hir, &mut budget).ok()?;
        key.truncate(MAX_DEPTH);
        if key.empty() || key.coverage() > MAX_ROOT_COVERAGE {
            return None;
        }
        Some(key)
    }

    /// True when this node contributes no filtering: the walk stops and
    /// emits its whole suffix range.
    #[inline]
    pub fn empty(&self) -> bool {
        self.accept || self.edges.is_empty()
    }

    /// Ordered `(lo, hi, child)` edges; an absent child is an
    /// unconstrained continuation.
    pub fn edges(&self) -> impl Iterator<Item = (u8, u8, Option<&IndexKey>)> + '_ {
        self.edges.iter().map(|e| (e.lo, e.hi, e.child.as_deref()))
    }

    /// The empty-string prefix: concatenation extends from here
    fn epsilon() -> IndexKey {
        IndexKey {
            edges: Vec::new(),
            accept: true,
        }
    }

    /// A match can start with any byte
    fn any() -> IndexKey {
        IndexKey {
            edges: vec![Edge {
                lo: 0,
                hi: 255,
                child: None,
            }],
            accept: false,
        }
    }

    fn node_count(&self) -> usize {
        1 + self
            .edges
            .iter()
            .filter_map(|e| e.child.as_ref())
            .map(|c| c.node_count())
            .sum::<usize>()
    }

    /// Distinct byte values covered by the root edges
    fn coverage(&self) -> u32 {
        self.edges
            .iter()
            .map(|e| e.hi as u32 - e.lo as u32 + 1)
            .sum()
    }

    /// Append an edge, coalescing with the previous one when the ranges
    /// abut and the children are identical.
    fn push_edge(&mut self, lo: u8, hi: u8, child: Option<Box<IndexKey>>) {
        if let Some(last) = self.edges.last_mut() {
            if last.hi as u16 + 1 == lo as u16 && last.child == child {
                last.hi = hi;
                return;
            }
        }
        self.edges.push(Edge { lo, hi, child });
    }

    fn find(&self, b: u8) -> Option<&Edge> {
        self.edges.iter().find(|e| e.lo <= b && b <= e.hi)
    }

    /// Replace every accept node with the continuation: the core of
    /// concatenation. Children are extended first so deeper prefixes
    /// pick up the continuation before this node unions it in.
    fn extend_with(&mut self, cont: &IndexKey, budget: &mut Budget) -> Result<(), Overflow> {
        for edge in &mut self.edges {
            if let Some(child) = &mut edge.child {
                child.extend_with(cont, budget)?;
            }
        }
        if self.accept {
            self.accept = false;
            let merged = union(self, cont, budget)?;
            *self = merged;
        }
        Ok(())
    }

    /// Turn every accepting descendant into an unconstrained tail.
    /// Returns true when this node itself accepts, meaning the caller
    /// must treat the whole subtree as unconstrained.
    fn open_tails(&mut self) -> bool {
        if self.accept {
            return true;
        }
        for edge in &mut self.edges {
            if let Some(child) = &mut edge.child {
                if child.open_tails() {
                    edge.child = None;
                }
            }
        }
        false
    }

    fn truncate(&mut self, depth_left: usize) {
        for edge in &mut self.edges {
            if edge.child.is_some() {
                if depth_left <= 1 {
                    edge.child = None;
                } else if let Some(child) = &mut edge.child {
                    child.truncate(depth_left - 1);
                }
            }
        }
    }
}

/// Union of two prefix sets. Ranges are swept at every boundary so the
/// output stays sorted and disjoint; an unconstrained child on either
/// side wins.
fn union(a: &IndexKey, b: &IndexKey, budget: &mut Budget) -> Result<IndexKey, Overflow> {
    let mut out = IndexKey {
        edges: Vec::new(),
        accept: a.accept || b.accept,
    };
    let mut cuts: Vec<u16> = Vec::with_capacity(2 * (a.edges.len() + b.edges.len()));
    for e in a.edges.iter().chain(b.edges.iter()) {
        cuts.push(e.lo as u16);
        cuts.push(e.hi as u16 + 1);
    }
    cuts.sort_unstable();
    cuts.dedup();
    for w in cuts.windows(2) {
        let (lo, hi) = (w[0] as u8, (w[1] - 1) as u8);
        let child = match (a.find(lo), b.find(lo)) {
            (None, None) => continue,
            (Some(e), None) | (None, Some(e)) => {
                let child = e.child.clone();
                if let Some(c) = &child {
                    budget.take(c.node_count())?;
                }
                child
            }
            (Some(ea), Some(eb)) => match (&ea.child, &eb.child) {
                (None, _) | (_, None) => None,
                (Some(x), Some(y)) => Some(Box::new(union(x, y, budget)?)),
            },
        };
        budget.take(1)?;
        out.push_edge(lo, hi, child);
    }
    Ok(out)
}

/// A chain of single-byte edges ending in an accept leaf
fn chain_bytes(bytes: &[u8], budget: &mut Budget) -> Result<IndexKey, Overflow> {
    let mut key = IndexKey::epsilon();
    for &b in bytes.iter().rev() {
        budget.take(1)?;
        key = IndexKey {
            edges: vec![Edge {
                lo: b,
                hi: b,
                child: Some(Box::new(key)),
            }],
            accept: false,
        };
    }
    Ok(key)
}

/// First byte of a scalar's UTF-8 encoding
fn lead_byte(c: char) -> u8 {
    let mut buf = [0u8; 4];
    c.encode_utf8(&mut buf);
    buf[0]
}

fn analyze(hir: &Hir, budget: &mut Budget) -> Result<IndexKey, Overflow> {
    match hir.kind() {
        HirKind::Empty | HirKind::Look(_) => Ok(IndexKey::epsilon()),
        HirKind::Literal(lit) => chain_bytes(&lit.0, budget),
        HirKind::Class(Class::Bytes(cls)) => {
            let mut key = IndexKey::default();
            for r in cls.ranges() {
                budget.take(1)?;
                key.push_edge(r.start(), r.end(), Some(Box::new(IndexKey::epsilon())));
            }
            Ok(key)
        }
        HirKind::Class(Class::Unicode(cls)) => {
            // ASCII sub-ranges become exact single-byte edges. Anything
            // beyond ASCII is approximated by one open edge spanning the
            // UTF-8 lead bytes involved: a superset of the real prefix
            // set at a fixed, tiny cost even for huge classes like \w.
            let mut key = IndexKey::default();
            let mut lead: Option<(u8, u8)> = None;
            for r in cls.ranges() {
                if (r.start() as u32) < 0x80 {
                    let hi = if (r.end() as u32) < 0x80 {
                        r.end() as u8
                    } else {
                        0x7f
                    };
                    budget.take(1)?;
                    key.push_edge(r.start() as u8, hi, Some(Box::new(IndexKey::epsilon())));
                }
                if (r.end() as u32) >= 0x80 {
                    let lo = lead_byte(r.start().max('\u{80}'));
                    let hi = lead_byte(r.end());
                    lead = Some(match lead {
                        None => (lo, hi),
                        Some((l, h)) => (l.min(lo), h.max(hi)),
                    });
                }
            }
            if let Some((lo, hi)) = lead {
                budget.take(1)?;
                key.push_edge(lo, hi, None);
            }
            Ok(key)
        }
        HirKind::Capture(cap) => analyze(&cap.sub, budget),
        HirKind::Concat(subs) => {
            let mut acc = IndexKey::epsilon();
            for sub in subs.iter().rev() {
                let mut key = analyze(sub, budget)?;
                key.extend_with(&acc, budget)?;
                acc = key;
            }
            Ok(acc)
        }
        HirKind::Alternation(subs) => {
            let mut acc = IndexKey::default();
            for sub in subs {
                let key = analyze(sub, budget)?;
                acc = union(&acc, &key, budget)?;
            }
            Ok(acc)
        }
        HirKind::Repetition(rep) => {
            if rep.max == Some(0) {
                return Ok(IndexKey::epsilon());
            }
            let mut key = analyze(&rep.sub, budget)?;
            if rep.min == 0 && rep.max == Some(1) {
                // X?: still exactly extendable by what follows
                key.accept = true;
                return Ok(key);
            }
            if rep.min == 1 && rep.max == Some(1) {
                return Ok(key);
            }
            // X* / X+ / X{m,n}: after one pass through X the continuation
            // is unconstrained.
            if key.open_tails() {
                key = IndexKey::any();
            }
            if rep.min == 0 {
                key.accept = true;
            }
            Ok(key)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn walk<'k>(key: &'k IndexKey, bytes: &[u8]) -> Option<&'k IndexKey> {
        let mut node = key;
        for &b in bytes {
            let edge = node.find(b)?;
            match &edge.child {
                Some(c) => node = c,
                None => return Some(node), // unconstrained tail
            }
        }
        Some(node)
    }

    #[test]
    fn literal_chains_bytes() {
        let key = IndexKey::from_pattern("main").unwrap();
        assert!(!key.empty());
        assert!(walk(&key, b"main").is_some());
        assert!(walk(&key, b"mai").is_some());
        assert!(walk(&key, b"x").is_none());
    }

    #[test]
    fn alternation_unions_branches() {
        let key = IndexKey::from_pattern("foo|bar").unwrap();
        assert!(walk(&key, b"foo").is_some());
        assert!(walk(&key, b"bar").is_some());
        assert!(walk(&key, b"far").is_none());
        assert!(walk(&key, b"boo").is_none());
    }

    #[test]
    fn class_becomes_range_edges() {
        let key = IndexKey::from_pattern("[a-c]x").unwrap();
        assert!(walk(&key, b"ax").is_some());
        assert!(walk(&key, b"cx").is_some());
        assert!(walk(&key, b"dx").is_none());
        assert!(walk(&key, b"ay").is_none());
    }

    #[test]
    fn optional_prefix_forks() {
        let key = IndexKey::from_pattern("(foo)?bar").unwrap();
        assert!(walk(&key, b"foob").is_some());
        assert!(walk(&key, b"bar").is_some());
        assert!(walk(&key, b"oba").is_none());
    }

    #[test]
    fn plus_opens_the_tail() {
        let key = IndexKey::from_pattern("ab+c").unwrap();
        // After the repeated 'b' anything may follow; the walk must not
        // demand the 'c' at a fixed depth.
        assert!(walk(&key, b"ab").is_some());
        assert!(walk(&key, b"abb").is_some());
        assert!(walk(&key, b"abc").is_some());
        assert!(walk(&key, b"ac").is_none());
    }

    #[test]
    fn anchors_are_transparent() {
        let key = IndexKey::from_pattern(r"^\bword\b$").unwrap();
        assert!(walk(&key, b"word").is_some());
    }

    #[test]
    fn case_insensitive_covers_both_cases() {
        let key = IndexKey::from_pattern("(?i)abc").unwrap();
        assert!(walk(&key, b"abc").is_some());
        assert!(walk(&key, b"ABC").is_some());
        assert!(walk(&key, b"aBc").is_some());
    }

    #[test]
    fn unicode_literal_chains_utf8_bytes() {
        let key = IndexKey::from_pattern("δx").unwrap();
        assert!(walk(&key, "δx".as_bytes()).is_some());
    }

    #[test]
    fn unselective_patterns_yield_none() {
        assert!(IndexKey::from_pattern(".*").is_none());
        assert!(IndexKey::from_pattern("").is_none());
        assert!(IndexKey::from_pattern(".*foo").is_none());
        assert!(IndexKey::from_pattern("x?").is_none()); // nullable at top
    }

    #[test]
    fn word_class_is_kept() {
        // \w+ still narrows to word bytes, useful even without depth.
        let key = IndexKey::from_pattern(r"\w+").unwrap();
        assert!(walk(&key, b"a").is_some());
        assert!(walk(&key, b" ").is_none());
    }

    #[test]
    fn depth_is_capped() {
        let key = IndexKey::from_pattern("abcdefghij").unwrap();
        fn depth(k: &IndexKey) -> usize {
            k.edges
                .iter()
                .filter_map(|e| e.child.as_ref())
                .map(|c| 1 + depth(c))
                .max()
                .unwrap_or(0)
        }
        assert!(depth(&key) <= MAX_DEPTH);
    }

    #[test]
    fn invalid_pattern_yields_none() {
        assert!(IndexKey::from_pattern("(").is_none());
    }
}
