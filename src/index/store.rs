//! Content-addressed snapshot stores.
//!
//! Ingestion only needs three operations from the system that holds the
//! actual snapshots: resolve a ref name to a root tree, enumerate a
//! tree's entries, and read a blob's bytes. `SnapshotStore` captures
//! that surface; `MemStore` is the in-memory implementation used by the
//! CLI (which snapshots a directory walk) and by tests.

use crate::index::types::Oid;
use anyhow::{bail, Result};
use std::collections::BTreeMap;
use std::collections::HashMap;

/// Store-local handle for a tree or blob object
pub type ObjectId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Tree,
    Blob,
}

#[derive(Debug, Clone)]
pub struct TreeEntry {
    pub name: String,
    pub kind: EntryKind,
    pub id: ObjectId,
}

/// The surface ingestion needs from a content-addressed snapshot store
pub trait SnapshotStore {
    /// Resolve a ref name to its root tree
    fn resolve_ref(&self, name: &str) -> Result<ObjectId>;

    /// Enumerate a tree's entries, in the tree's own order
    fn tree_entries(&self, tree: ObjectId) -> Result<Vec<TreeEntry>>;

    /// Read a blob: its content hash and bytes
    fn blob(&self, blob: ObjectId) -> Result<(Oid, &[u8])>;
}

/// In-memory snapshot store. Trees keep entries sorted by name.
#[derive(Debug, Default)]
pub struct MemStore {
    trees: Vec<Vec<TreeEntry>>,
    blobs: Vec<(Oid, Vec<u8>)>,
    refs: HashMap<String, ObjectId>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a blob, deduplicating by content hash
    pub fn add_blob(&mut self, bytes: &[u8]) -> ObjectId {
        let oid: Oid = *blake3::hash(bytes).as_bytes();
        if let Some(i) = self.blobs.iter().position(|(o, _)| *o == oid) {
            return i as ObjectId;
        }
        self.blobs.push((oid, bytes.to_vec()));
        (self.blobs.len() - 1) as ObjectId
    }

    pub fn add_tree(&mut self, entries: Vec<TreeEntry>) -> ObjectId {
        self.trees.push(entries);
        (self.trees.len() - 1) as ObjectId
    }

    pub fn set_ref(&mut self, name: &str, tree: ObjectId) {
        self.refs.insert(name.to_string(), tree);
    }

    /// Build a whole snapshot from `(path, bytes)` pairs and register it
    /// under `ref_name`. Paths use `/` separators; intermediate trees are
    /// created as needed, entries sorted by name.
    pub fn add_snapshot(&mut self, ref_name: &str, files: &[(&str, &[u8])]) {
        #[derive(Default)]
        struct Dir<'a> {
            dirs: BTreeMap<&'a str, Dir<'a>>,
            blobs: BTreeMap<&'a str, &'a [u8]>,
        }

        let mut root = Dir::default();
        for &(path, bytes) in files {
            let mut dir = &mut root;
            let mut parts = path.split('/').peekable();
            while let Some(part) = parts.next() {
                if parts.peek().is_some() {
                    dir = dir.dirs.entry(part).or_default();
                } else {
                    dir.blobs.insert(part, bytes);
                }
            }
        }

        fn build(store: &mut MemStore, dir: &Dir) -> ObjectId {
            let mut entries = Vec::new();
            for (name, sub) in &dir.dirs {
                let id = build(store, sub);
                entries.push(TreeEntry {
                    name: name.to_string(),
                    kind: EntryKind::Tree,
                    id,
                });
            }
            for (name, bytes) in &dir.blobs {
                let id = store.add_blob(bytes);
                entries.push(TreeEntry {
                    name: name.to_string(),
                    kind: EntryKind::Blob,
                    id,
                });
            }
            entries.sort_by(|a, b| a.name.cmp(&b.name));
            store.add_tree(entries)
        }

        let tree = build(self, &root);
        self.set_ref(ref_name, tree);
    }
}

impl SnapshotStore for MemStore {
    fn resolve_ref(&self, name: &str) -> Result<ObjectId> {
        match self.refs.get(name) {
            Some(&id) => Ok(id),
            None => bail!("unknown ref {:?}", name),
        }
    }

    fn tree_entries(&self, tree: ObjectId) -> Result<Vec<TreeEntry>> {
        match self.trees.get(tree as usize) {
            Some(entries) => Ok(entries.clone()),
            None => bail!("no such tree object {}", tree),
        }
    }

    fn blob(&self, blob: ObjectId) -> Result<(Oid, &[u8])> {
        match self.blobs.get(blob as usize) {
            Some((oid, bytes)) => Ok((*oid, bytes.as_slice())),
            None => bail!("no such blob object {}", blob),
        }
    }
}
