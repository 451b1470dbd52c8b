//! Component C: a 256-bit Blake2b-keyed radix (Urkel-style) tree mapping
//! name-hash → name-state, yielding a root committed into block headers
//! (`spec.md` §4.C, §6, GLOSSARY). Grounded in the teacher's
//! `core/store/src/trie/mem` split between a committed on-disk layer and
//! an in-memory working transaction, and `trie_recording.rs` for proof
//! generation over that same split.
//!
//! Keys are consumed bit-by-bit from the most significant bit of byte 0, so
//! every leaf sits at a fixed depth of 256: this is a full radix tree
//! rather than a path-compressed one, trading some node-count efficiency
//! for a simpler, obviously-correct insert/remove.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use borsh::BorshDeserialize;
use rocksdb::{Options, WriteBatch, DB};

use crate::block::blake2_hash;
use crate::error::Result;
use crate::layout::Column;
use crate::types::Hash;

const DEPTH: usize = 256;
const NULL_HASH: Hash = Hash([0u8; 32]);

#[derive(Clone, Debug, PartialEq, Eq, borsh::BorshSerialize, borsh::BorshDeserialize)]
enum Node {
    Leaf { value: Vec<u8> },
    Internal { left: Hash, right: Hash },
}

impl Node {
    fn hash(&self) -> Hash {
        blake2_hash(&borsh::to_vec(self).expect("node always serializes"))
    }
}

fn bit_at(key: &Hash, depth: usize) -> bool {
    let byte = key.0[depth / 8];
    (byte >> (7 - (depth % 8))) & 1 == 1
}

/// A Merkle inclusion/exclusion proof: the sibling hash at every depth
/// walked from the root to the target key (`spec.md` §6
/// `snapshot(root).prove`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Proof {
    pub siblings: Vec<Hash>,
    pub value: Option<Vec<u8>>,
}

/// Persistent, content-addressed tree store plus a single mutable
/// in-memory transaction (`spec.md` §5: "the authenticated tree maintains
/// a long-lived transaction `txn` that must be rebuilt after every
/// `tree.inject` and after `close`").
pub struct Tree {
    // `None` only for the instant inside `compact` between releasing the
    // handle on the live directory and reopening it after the rename.
    db: Option<Arc<DB>>,
    root: Hash,
    txn: HashMap<Hash, Vec<u8>>,
}

impl Tree {
    pub(crate) fn open(db: Arc<DB>, root: Hash) -> Self {
        Tree { db: Some(db), root, txn: HashMap::new() }
    }

    fn db(&self) -> &DB {
        self.db.as_deref().expect("tree db open")
    }

    fn cf(&self) -> &rocksdb::ColumnFamily {
        self.db().cf_handle(Column::TreeNode.cf_name()).expect("tree CF registered at open")
    }

    fn get_node(&self, hash: &Hash) -> Result<Option<Node>> {
        if *hash == NULL_HASH {
            return Ok(None);
        }
        if let Some(bytes) = self.txn.get(hash) {
            return Ok(Some(Node::try_from_slice(bytes)?));
        }
        match self.db().get_cf(self.cf(), hash.0)? {
            Some(bytes) => Ok(Some(Node::try_from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn root_hash(&self) -> Hash {
        self.root
    }

    /// Rewinds the in-memory root to `root`, implicitly discarding any
    /// uncommitted `txn` state (`spec.md` §9: "re-synchronizes in-memory
    /// tree state with KV-committed state, implicitly discarding any tree
    /// writes that occurred after the last KV commit"). Per `spec.md` §5,
    /// the transaction must be rebuilt after this call; `txn()` does that.
    pub fn inject(&mut self, root: Hash) {
        self.root = root;
        self.txn.clear();
    }

    /// Rebuilds the working transaction against the current root
    /// (`spec.md` §6 `tree.txn()`).
    pub fn txn(&mut self) -> TreeTxn<'_> {
        self.txn.clear();
        TreeTxn { tree: self }
    }

    /// A read-only view pinned at `root`, independent of the live
    /// transaction (`spec.md` §6 `snapshot(root)`).
    pub fn snapshot(&self, root: Hash) -> Snapshot<'_> {
        Snapshot { tree: self, root }
    }

    /// Returns the value stored under `key` as of the current root
    /// (including any uncommitted `txn` state staged on top of it).
    pub fn get(&self, key: &Hash) -> Result<Option<Vec<u8>>> {
        self.snapshot(self.root).get(key)
    }

    /// Rewrites the tree store at `db_path` to contain only nodes
    /// reachable from the current root, via a scratch directory at
    /// `tmp_dir` (`spec.md` §4.H `compactTree` step 4).
    ///
    /// Releases its own database handle before the directory rename and
    /// reopens a fresh one afterward, so RocksDB never has a file handle
    /// open against a path whose contents have moved out from under it.
    pub fn compact(&mut self, db_path: &Path, tmp_dir: &Path) -> Result<()> {
        if tmp_dir.exists() {
            std::fs::remove_dir_all(tmp_dir)?;
        }
        std::fs::create_dir_all(tmp_dir.parent().unwrap_or(tmp_dir))?;
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        let cfs = vec![rocksdb::ColumnFamilyDescriptor::new(
            Column::TreeNode.cf_name(),
            Options::default(),
        )];
        let tmp_db = DB::open_cf_descriptors(&opts, tmp_dir, cfs)?;
        let tmp_cf = tmp_db.cf_handle(Column::TreeNode.cf_name()).unwrap();

        let mut stack = vec![self.root];
        let mut seen = std::collections::HashSet::new();
        while let Some(hash) = stack.pop() {
            if hash == NULL_HASH || !seen.insert(hash) {
                continue;
            }
            if let Some(node) = self.get_node(&hash)? {
                let bytes = borsh::to_vec(&node).expect("node always serializes");
                tmp_db.put_cf(tmp_cf, hash.0, bytes)?;
                if let Node::Internal { left, right } = node {
                    stack.push(left);
                    stack.push(right);
                }
            }
        }
        drop(tmp_db);

        // Drop our handle on the live directory so the rename below moves
        // a directory nobody has open.
        self.db = None;

        let backup = db_path.with_extension("pre-compact");
        if backup.exists() {
            std::fs::remove_dir_all(&backup)?;
        }
        if db_path.exists() {
            std::fs::rename(db_path, &backup)?;
        }
        std::fs::rename(tmp_dir, db_path)?;
        if backup.exists() {
            std::fs::remove_dir_all(&backup)?;
        }

        self.db = Some(open_store(db_path)?);
        Ok(())
    }

    pub fn destroy(db_path: &Path) -> Result<()> {
        if db_path.exists() {
            std::fs::remove_dir_all(db_path)?;
        }
        Ok(())
    }
}

/// Opens the tree's own RocksDB instance at `path`, separate from
/// [`crate::kv::MetaStore`]'s database so that [`Tree::compact`] can rename
/// the whole directory without disturbing any other column family.
pub fn open_store(path: &Path) -> Result<Arc<DB>> {
    std::fs::create_dir_all(path)?;
    let mut opts = Options::default();
    opts.create_if_missing(true);
    opts.create_missing_column_families(true);
    let cfs =
        vec![rocksdb::ColumnFamilyDescriptor::new(Column::TreeNode.cf_name(), Options::default())];
    Ok(Arc::new(DB::open_cf_descriptors(&opts, path, cfs)?))
}

pub struct Snapshot<'a> {
    tree: &'a Tree,
    root: Hash,
}

impl<'a> Snapshot<'a> {
    pub fn get(&self, key: &Hash) -> Result<Option<Vec<u8>>> {
        let mut cursor = self.root;
        for depth in 0..DEPTH {
            match self.tree.get_node(&cursor)? {
                None => return Ok(None),
                Some(Node::Leaf { value }) => return Ok(Some(value)),
                Some(Node::Internal { left, right }) => {
                    cursor = if bit_at(key, depth) { right } else { left };
                }
            }
        }
        match self.tree.get_node(&cursor)? {
            Some(Node::Leaf { value }) => Ok(Some(value)),
            _ => Ok(None),
        }
    }

    pub fn prove(&self, key: &Hash) -> Result<Proof> {
        let mut cursor = self.root;
        let mut siblings = Vec::new();
        for depth in 0..DEPTH {
            match self.tree.get_node(&cursor)? {
                None => return Ok(Proof { siblings, value: None }),
                Some(Node::Leaf { value }) => return Ok(Proof { siblings, value: Some(value) }),
                Some(Node::Internal { left, right }) => {
                    let (next, sibling) = if bit_at(key, depth) { (right, left) } else { (left, right) };
                    siblings.push(sibling);
                    cursor = next;
                }
            }
        }
        let value = match self.tree.get_node(&cursor)? {
            Some(Node::Leaf { value }) => Some(value),
            _ => None,
        };
        Ok(Proof { siblings, value })
    }
}

/// A batch of inserts/removes against the current root, materialized into
/// fresh content-addressed nodes on `commit` (`spec.md` §4.I
/// `_saveNames`: "others are inserted").
pub struct TreeTxn<'a> {
    tree: &'a mut Tree,
}

impl<'a> TreeTxn<'a> {
    pub fn get(&self, key: &Hash) -> Result<Option<Vec<u8>>> {
        self.tree.get(key)
    }

    /// Walks from the root to the leaf slot for `key`, recording the real
    /// sibling hash (or `NULL_HASH` where no branch exists yet) at every
    /// depth, so the caller can rebuild the path bottom-up.
    fn siblings_to_leaf(&self, key: &Hash) -> Result<Vec<Hash>> {
        let mut cursor = self.tree.root;
        let mut siblings = Vec::with_capacity(DEPTH);
        for depth in 0..DEPTH {
            match self.tree.get_node(&cursor)? {
                None => {
                    siblings.push(NULL_HASH);
                    cursor = NULL_HASH;
                }
                Some(Node::Leaf { .. }) => {
                    // Only possible if DEPTH didn't fully consume the key,
                    // which cannot happen since every leaf sits at depth
                    // 256; treat as an empty remainder defensively.
                    siblings.push(NULL_HASH);
                    cursor = NULL_HASH;
                }
                Some(Node::Internal { left, right }) => {
                    let (next, sibling) = if bit_at(key, depth) { (right, left) } else { (left, right) };
                    siblings.push(sibling);
                    cursor = next;
                }
            }
        }
        Ok(siblings)
    }

    pub fn insert(&mut self, key: Hash, value: Vec<u8>) -> Result<()> {
        let siblings = self.siblings_to_leaf(&key)?;
        let mut built = self.stage(Node::Leaf { value });
        for depth in (0..DEPTH).rev() {
            let sibling = siblings[depth];
            built = self.stage(if bit_at(&key, depth) {
                Node::Internal { left: sibling, right: built }
            } else {
                Node::Internal { left: built, right: sibling }
            });
        }
        self.tree.root = built;
        Ok(())
    }

    /// Removes `key`. A no-op if the key is absent, matching `spec.md`
    /// §4.I `_saveNames`: "null states are removed from the tree txn".
    pub fn remove(&mut self, key: &Hash) -> Result<()> {
        if self.get(key)?.is_none() {
            return Ok(());
        }
        let siblings = self.siblings_to_leaf(key)?;
        let mut built = NULL_HASH;
        for depth in (0..DEPTH).rev() {
            let sibling = siblings[depth];
            built = if built == NULL_HASH && sibling == NULL_HASH {
                NULL_HASH
            } else if built == NULL_HASH {
                sibling
            } else {
                self.stage(if bit_at(key, depth) {
                    Node::Internal { left: sibling, right: built }
                } else {
                    Node::Internal { left: built, right: sibling }
                })
            };
        }
        self.tree.root = built;
        Ok(())
    }

    fn stage(&mut self, node: Node) -> Hash {
        let hash = node.hash();
        let bytes = borsh::to_vec(&node).expect("node always serializes");
        self.tree.txn.insert(hash, bytes);
        hash
    }

    /// Persists every staged node and returns the new root (`spec.md`
    /// §4.I `_saveNames`: "`tree.commit()` the accumulated txn").
    pub fn commit(self) -> Result<Hash> {
        let mut batch = WriteBatch::default();
        let cf = self.tree.cf();
        for (hash, bytes) in self.tree.txn.drain() {
            batch.put_cf(cf, hash.0, bytes);
        }
        self.tree.db().write(batch)?;
        Ok(self.tree.root)
    }
}

pub fn tree_dir(base: &Path) -> PathBuf {
    base.join("tree")
}
