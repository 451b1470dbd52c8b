//! Component G: the batch coordinator (`spec.md` §4.G). `start()` clones
//! `state`/`treeState` into pending copies and stages the LRU caches;
//! `commit()` runs the fixed six-step ordering; `drop()` discards
//! everything and is also what happens automatically if a caller's `?`
//! bails out before `commit()` is reached, matching `spec.md` §7 class 4:
//! "I/O failures inside a batch propagate after `drop`; caller retries."
//!
//! Grounded in the teacher's `ChainStoreUpdate<'a>` (`near_chain`), which
//! likewise wraps `&'a mut ChainStore` and exposes `save_*`/`commit`
//! methods rather than handing back raw RocksDB batches.

use rocksdb::WriteBatch;

use crate::engine::ChainDb;
use crate::error::Result;
use crate::layout::{deployment_state_key, Column};
use crate::state::{ChainState, TreeState};
use crate::types::Hash;

pub struct Batch<'a> {
    pub(crate) db: &'a mut ChainDb,
    kv_writes: WriteBatch,
    blob_writes: WriteBatch,
    blob_prunes: WriteBatch,
    pub pending_state: ChainState,
    pub pending_tree_state: TreeState,
    done: bool,
}

impl<'a> Batch<'a> {
    pub(crate) fn new(db: &'a mut ChainDb) -> Self {
        let pending_state = db.state.start_batch();
        let pending_tree_state = db.tree_state.start_batch();
        db.entry_cache.start();
        db.height_cache.start();
        db.coin_cache.start();
        Batch {
            db,
            kv_writes: WriteBatch::default(),
            blob_writes: WriteBatch::default(),
            blob_prunes: WriteBatch::default(),
            pending_state,
            pending_tree_state,
            done: false,
        }
    }

    pub fn put(&mut self, col: Column, key: &[u8], value: &[u8]) {
        self.kv_writes.put_cf(self.db.meta.cf(col), key, value);
    }

    pub fn del(&mut self, col: Column, key: &[u8]) {
        self.kv_writes.delete_cf(self.db.meta.cf(col), key);
    }

    pub fn write_block(&mut self, hash: &Hash, bytes: &[u8]) {
        self.blob_writes.put_cf(self.db.meta.cf(Column::Block), hash.0, bytes);
    }

    pub fn write_undo(&mut self, hash: &Hash, bytes: &[u8]) {
        self.blob_writes.put_cf(self.db.meta.cf(Column::UndoBlob), hash.0, bytes);
    }

    pub fn prune_block(&mut self, hash: &Hash) {
        self.blob_prunes.delete_cf(self.db.meta.cf(Column::Block), hash.0);
    }

    pub fn prune_undo(&mut self, hash: &Hash) {
        self.blob_prunes.delete_cf(self.db.meta.cf(Column::UndoBlob), hash.0);
    }

    /// Stages a versionbit signalling update for `(bit, hash)` (`spec.md`
    /// §4.E), visible to in-batch reads via `ChainDb::get_deployment_state`
    /// and flushed to `Column::DeploymentState` at commit step 5.
    pub fn set_deployment_state(&mut self, bit: u8, hash: Hash, state: u8) {
        self.db.state_cache.set(bit, hash, state);
    }

    /// Mark the pending `ChainState`/`TreeState` as ready to swap in on
    /// commit (`spec.md` §4.G steps 3–4 check `pending.committed`).
    pub fn finalize_state(&mut self) {
        self.pending_state.committed = true;
    }

    pub fn finalize_tree_state(&mut self) {
        self.pending_tree_state.committed = true;
    }

    /// Explicit `drop()` per `spec.md` §4.G: "clears all batches and
    /// staged caches and nulls the pending state pointers." Equivalent to
    /// letting the value go out of scope; spelled out for callers that
    /// want to abort a batch by name rather than relying on an early
    /// return.
    pub fn abort(self) {
        // Drop impl below performs the actual cleanup.
    }

    /// `spec.md` §4.G `commit()`, steps executed in the exact specified
    /// order: blob writes, KV batch, state swap, tree-state swap, cache
    /// promotion + StateCache flush, blob prunes.
    pub fn commit(mut self) -> Result<()> {
        self.db.meta.db_handle().write(std::mem::take(&mut self.blob_writes))?;
        self.db.meta.db_handle().write(std::mem::take(&mut self.kv_writes))?;

        if self.pending_state.committed {
            self.db.state = self.pending_state.clone();
        }
        if self.pending_tree_state.committed {
            self.db.tree_state = self.pending_tree_state.clone();
        }

        self.db.entry_cache.commit();
        self.db.height_cache.commit();
        self.db.coin_cache.commit();

        let deployment_updates = self.db.state_cache.drain();
        if !deployment_updates.is_empty() {
            let mut state_writes = WriteBatch::default();
            let cf = self.db.meta.cf(Column::DeploymentState);
            for ((bit, hash), state) in deployment_updates {
                state_writes.put_cf(cf, deployment_state_key(bit, &hash), [state]);
            }
            self.db.meta.db_handle().write(state_writes)?;
        }

        self.db.meta.db_handle().write(std::mem::take(&mut self.blob_prunes))?;

        self.done = true;
        Ok(())
    }
}

impl<'a> Drop for Batch<'a> {
    fn drop(&mut self) {
        if !self.done {
            self.db.entry_cache.drop_batch();
            self.db.height_cache.drop_batch();
            self.db.coin_cache.drop_batch();
            self.db.state_cache.updates.clear();
        }
        self.db.batch_active = false;
    }
}
