//! Component A: ordered byte-key meta store, backed by RocksDB column
//! families (`spec.md` §4.A, §6). Grounded in the teacher's
//! `core/store/src/node_storage/opener.rs` for open/version handling and
//! `core/store/src/columns.rs` for the column-per-table layout.

use std::path::Path;
use std::sync::Arc;

use rocksdb::{ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, DB};

use crate::error::{ChainDbError, Result};
use crate::layout::{Column, SCHEMA_MAGIC, SCHEMA_VERSION};

/// Read/write mode the database was opened in, grounded in the teacher's
/// `near_store::Mode`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpenMode {
    ReadWrite,
    ReadOnly,
}

pub struct MetaStore {
    db: Arc<DB>,
}

impl MetaStore {
    pub fn open(path: &Path, mode: OpenMode) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        // `Column::TreeNode` lives in its own RocksDB instance (see
        // `crate::tree::open_store`) so that tree compaction can rename that
        // directory in place without touching this database.
        let cf_descriptors: Vec<ColumnFamilyDescriptor> = Column::all()
            .filter(|col| !matches!(col, Column::TreeNode))
            .map(|col| ColumnFamilyDescriptor::new(col.cf_name(), Options::default()))
            .collect();

        let db = match mode {
            OpenMode::ReadWrite => DB::open_cf_descriptors(&opts, path, cf_descriptors)?,
            OpenMode::ReadOnly => {
                DB::open_cf_descriptors_read_only(&opts, path, cf_descriptors, false)?
            }
        };

        let store = MetaStore { db: Arc::new(db) };
        store.verify_or_write_version(mode)?;
        Ok(store)
    }

    fn verify_or_write_version(&self, mode: OpenMode) -> Result<()> {
        let cf = self.db.cf_handle(Column::Version.cf_name()).expect("version CF exists");
        match self.db.get_cf(cf, [])? {
            Some(bytes) => {
                if bytes.len() != 9 || &bytes[..5] != SCHEMA_MAGIC {
                    return Err(ChainDbError::VersionMismatch { got: 0, want: SCHEMA_VERSION });
                }
                let got = u32::from_le_bytes(bytes[5..9].try_into().unwrap());
                if got != SCHEMA_VERSION {
                    return Err(ChainDbError::VersionMismatch { got, want: SCHEMA_VERSION });
                }
            }
            None => {
                if mode == OpenMode::ReadOnly {
                    return Err(ChainDbError::VersionMismatch { got: 0, want: SCHEMA_VERSION });
                }
                let mut record = SCHEMA_MAGIC.to_vec();
                record.extend_from_slice(&SCHEMA_VERSION.to_le_bytes());
                self.db.put_cf(cf, [], record)?;
            }
        }
        Ok(())
    }

    pub(crate) fn cf(&self, col: Column) -> &rocksdb::ColumnFamily {
        self.db.cf_handle(col.cf_name()).expect("column family registered at open")
    }

    pub fn get(&self, col: Column, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get_cf(self.cf(col), key)?)
    }

    pub fn has(&self, col: Column, key: &[u8]) -> Result<bool> {
        Ok(self.get(col, key)?.is_some())
    }

    /// Iterates `col` in key order starting at `start` (inclusive), for
    /// `getHashes`/`getEntries`-style range scans (`spec.md` §6).
    pub fn range(&self, col: Column, start: &[u8]) -> impl Iterator<Item = (Box<[u8]>, Box<[u8]>)> + '_ {
        self.db
            .iterator_cf(self.cf(col), IteratorMode::From(start, rocksdb::Direction::Forward))
            .filter_map(|item| item.ok())
    }

    pub fn batch(&self) -> KvBatch<'_> {
        KvBatch { store: self, batch: WriteBatch::default() }
    }

    /// Shares the underlying RocksDB handle with [`crate::blobs::BlobStore`]
    /// so block/undo traffic lands in the same database (`SPEC_FULL.md`
    /// §4.B).
    pub fn db_handle(&self) -> Arc<DB> {
        self.db.clone()
    }
}

/// A batched set of puts/dels, committed atomically (`spec.md` §4.G step 2).
pub struct KvBatch<'a> {
    store: &'a MetaStore,
    batch: WriteBatch,
}

impl<'a> KvBatch<'a> {
    pub fn put(&mut self, col: Column, key: &[u8], value: &[u8]) {
        self.batch.put_cf(self.store.cf(col), key, value);
    }

    pub fn del(&mut self, col: Column, key: &[u8]) {
        self.batch.delete_cf(self.store.cf(col), key);
    }

    pub fn commit(self) -> Result<()> {
        self.store.db.write(self.batch)?;
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_writes_version_then_reads_it_back() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = MetaStore::open(dir.path(), OpenMode::ReadWrite).unwrap();
            assert!(store.has(Column::Version, &[]).unwrap());
        }
        let store = MetaStore::open(dir.path(), OpenMode::ReadWrite).unwrap();
        assert!(store.has(Column::Version, &[]).unwrap());
    }

    #[test]
    fn batch_put_is_visible_only_after_commit() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetaStore::open(dir.path(), OpenMode::ReadWrite).unwrap();
        let mut batch = store.batch();
        batch.put(Column::State, b"k", b"v");
        assert!(store.get(Column::State, b"k").unwrap().is_none());
        batch.commit().unwrap();
        assert_eq!(store.get(Column::State, b"k").unwrap().unwrap(), b"v");
    }
}
