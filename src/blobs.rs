//! Component B: append-only storage of raw blocks and undo records, with
//! prune (`spec.md` §4.B, §6). Realized as two more RocksDB column
//! families on the same [`crate::kv::MetaStore`] handle rather than a flat
//! file blob store (see `SPEC_FULL.md` §4.B), grounded in the teacher's
//! `core/store/src/archive/cold_storage.rs` treatment of block archival as
//! KV-column traffic.

use std::sync::Arc;

use rocksdb::WriteBatch;

use crate::error::Result;
use crate::layout::Column;
use crate::types::Hash;

pub struct BlobStore {
    db: Arc<rocksdb::DB>,
}

impl BlobStore {
    pub(crate) fn new(db: Arc<rocksdb::DB>) -> Self {
        BlobStore { db }
    }

    fn cf(&self, col: Column) -> &rocksdb::ColumnFamily {
        self.db.cf_handle(col.cf_name()).expect("column family registered at open")
    }

    pub fn read_block(&self, hash: &Hash) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get_cf(self.cf(Column::Block), hash.0)?)
    }

    pub fn read_undo(&self, hash: &Hash) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get_cf(self.cf(Column::UndoBlob), hash.0)?)
    }

    pub fn batch(&self) -> BlobBatch<'_> {
        BlobBatch { store: self, writes: WriteBatch::default(), prunes: WriteBatch::default() }
    }
}

/// A batch of blob writes and prunes, committed in two separate phases
/// (`spec.md` §4.G step 1 for writes, step 6 for prunes — prunes commit
/// last and are idempotent so a crash between the two is safe to resume).
pub struct BlobBatch<'a> {
    store: &'a BlobStore,
    writes: WriteBatch,
    prunes: WriteBatch,
}

impl<'a> BlobBatch<'a> {
    pub fn write_block(&mut self, hash: &Hash, bytes: &[u8]) {
        self.writes.put_cf(self.store.cf(Column::Block), hash.0, bytes);
    }

    pub fn write_undo(&mut self, hash: &Hash, bytes: &[u8]) {
        self.writes.put_cf(self.store.cf(Column::UndoBlob), hash.0, bytes);
    }

    pub fn prune_block(&mut self, hash: &Hash) {
        self.prunes.delete_cf(self.store.cf(Column::Block), hash.0);
    }

    pub fn prune_undo(&mut self, hash: &Hash) {
        self.prunes.delete_cf(self.store.cf(Column::UndoBlob), hash.0);
    }

    pub fn has_writes(&self) -> bool {
        !self.writes.is_empty()
    }

    pub fn has_prunes(&self) -> bool {
        !self.prunes.is_empty()
    }

    /// `spec.md` §4.G step 1: commit blob writes first — a later KV commit
    /// failure then only leaves orphan blobs, never missing ones.
    pub fn commit_writes(&mut self) -> Result<()> {
        let batch = std::mem::take(&mut self.writes);
        self.store.db.write(batch)?;
        Ok(())
    }

    /// `spec.md` §4.G step 6: commit blob prunes. Idempotent: deleting an
    /// already-missing key is a no-op, so a crash here is safe to retry.
    pub fn commit_prunes(&mut self) -> Result<()> {
        let batch = std::mem::take(&mut self.prunes);
        self.store.db.write(batch)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{MetaStore, OpenMode};

    fn open(dir: &std::path::Path) -> (MetaStore, BlobStore) {
        let meta = MetaStore::open(dir, OpenMode::ReadWrite).unwrap();
        let blobs = BlobStore::new(meta.db_handle());
        (meta, blobs)
    }

    #[test]
    fn write_then_read_then_prune() {
        let dir = tempfile::tempdir().unwrap();
        let (_meta, blobs) = open(dir.path());
        let hash = Hash([7u8; 32]);
        let mut batch = blobs.batch();
        batch.write_block(&hash, b"block-bytes");
        batch.commit_writes().unwrap();
        assert_eq!(blobs.read_block(&hash).unwrap().unwrap(), b"block-bytes");

        let mut batch = blobs.batch();
        batch.prune_block(&hash);
        batch.commit_prunes().unwrap();
        assert!(blobs.read_block(&hash).unwrap().is_none());

        // pruning twice is a no-op, not an error
        let mut batch = blobs.batch();
        batch.prune_block(&hash);
        batch.commit_prunes().unwrap();
    }
}
