//! Component H: the chain mutation engine — `save`, `reconnect`,
//! `disconnect`, `reset`, `prune`, `compactTree` (`spec.md` §4.H) — plus
//! `ChainDb`, the struct that owns every substore and is the crate's sole
//! entry point. Grounded in the teacher's `near_chain::ChainStore` (the
//! struct) and `tools/undo-block` (for the store-only disconnect shape).

use std::num::NonZeroUsize;
use std::path::PathBuf;

use borsh::BorshDeserialize;
use tracing::{info, instrument, warn};

use crate::batch::Batch;
use crate::block::Block;
use crate::blobs::BlobStore;
use crate::cache::StagedCache;
use crate::coins::CoinView;
use crate::entry::ChainEntry;
use crate::error::{ChainDbError, Result};
use crate::kv::{MetaStore, OpenMode};
use crate::layout::Column;
use crate::state::{ChainFlags, ChainState, Deployments, StateCache, TreeState};
use crate::tree::{self, tree_dir, Tree};
use crate::types::{Hash, Height, Outpoint};

const ENTRY_CACHE_SIZE: usize = 5_000;
const HEIGHT_CACHE_SIZE: usize = 5_000;
const COIN_CACHE_SIZE: usize = 50_000;

pub struct ChainOptions {
    pub base_dir: PathBuf,
    pub mode: OpenMode,
    pub flags: ChainFlags,
    pub tree_interval: u32,
}

pub struct ChainDb {
    pub(crate) meta: MetaStore,
    pub(crate) blobs: BlobStore,
    pub(crate) tree: Tree,
    pub(crate) entry_cache: StagedCache<Hash, ChainEntry>,
    pub(crate) height_cache: StagedCache<Height, Hash>,
    pub(crate) coin_cache: StagedCache<Outpoint, crate::coins::CoinEntry>,
    pub(crate) state_cache: StateCache,
    pub(crate) state: ChainState,
    pub(crate) tree_state: TreeState,
    pub(crate) flags: ChainFlags,
    pub(crate) tree_interval: u32,
    pub(crate) batch_active: bool,
    pub(crate) db_path: PathBuf,
}

impl ChainDb {
    /// Reads back the genesis block and on-disk flags of an already-
    /// initialized database, read-only, without constructing a full
    /// `ChainDb`. Operator tools (`chaindb-undo`, `chaindb-validate`) use
    /// this to reopen a database in read-write mode via `open()` without
    /// needing their own copy of the node's genesis config.
    pub fn peek_genesis(base_dir: &std::path::Path) -> Result<(Block, ChainFlags)> {
        let db_path = base_dir.join("chain");
        let meta = MetaStore::open(&db_path, OpenMode::ReadOnly)?;
        let blobs = BlobStore::new(meta.db_handle());

        let hash_bytes = meta
            .get(Column::HeightToHash, &crate::layout::height_key(0))?
            .ok_or(ChainDbError::EntryNotFound(Hash::ZERO))?;
        let mut raw = [0u8; 32];
        raw.copy_from_slice(&hash_bytes);
        let genesis_hash = Hash(raw);

        let block_bytes = blobs.read_block(&genesis_hash)?.ok_or(ChainDbError::BlockNotFound(genesis_hash))?;
        let block = Block::try_from_slice(&block_bytes)?;

        let flags_bytes = meta.get(Column::Flags, &[])?.expect("flags present once genesis is written");
        let flags = ChainFlags::try_from_slice(&flags_bytes)?;

        Ok((block, flags))
    }

    /// `spec.md` §6 `open`. Opens the meta/blob store, verifies (or
    /// writes, on first run) the schema version and persisted flags, and
    /// re-synchronizes the tree with the last committed root.
    #[instrument(skip(opts, genesis))]
    pub fn open(opts: ChainOptions, genesis: Block) -> Result<Self> {
        let db_path = opts.base_dir.join("chain");
        std::fs::create_dir_all(&db_path)?;
        let meta = MetaStore::open(&db_path, opts.mode)?;
        let blobs = BlobStore::new(meta.db_handle());
        let tree_db = tree::open_store(&tree_dir(&db_path))?;

        let genesis_entry = ChainEntry::genesis(genesis.header.clone());

        let (state, tree_state, flags) = match meta.get(Column::State, &[])? {
            Some(bytes) => {
                let state = ChainState::try_from_slice(&bytes)?;
                let tree_state_bytes =
                    meta.get(Column::TreeState, &[])?.expect("tree state present with state");
                let tree_state = TreeState::try_from_slice(&tree_state_bytes)?;
                let flags_bytes = meta.get(Column::Flags, &[])?.expect("flags present with state");
                let on_disk_flags = ChainFlags::try_from_slice(&flags_bytes)?;
                if on_disk_flags != opts.flags {
                    return Err(ChainDbError::FlagsMismatch);
                }
                (state, tree_state, on_disk_flags)
            }
            None => {
                info!("initializing fresh chain database at genesis");
                let state = ChainState::genesis(genesis_entry.hash);
                let tree_state = TreeState::genesis(genesis_entry.tree_root());
                let mut batch = meta.batch();
                batch.put(Column::State, &[], &borsh::to_vec(&state)?);
                batch.put(Column::TreeState, &[], &borsh::to_vec(&tree_state)?);
                batch.put(Column::Flags, &[], &borsh::to_vec(&opts.flags)?);
                batch.put(Column::Deployments, &[], &borsh::to_vec(&Deployments::default())?);
                batch.put(
                    Column::HeightToHash,
                    &crate::layout::height_key(0),
                    &genesis_entry.hash.0,
                );
                batch.put(
                    Column::HashToHeight,
                    &genesis_entry.hash.0,
                    &genesis_entry.height.to_le_bytes(),
                );
                batch.put(Column::Entry, &genesis_entry.hash.0, &borsh::to_vec(&genesis_entry)?);
                batch.commit()?;
                (state, tree_state, opts.flags)
            }
        };

        let tree = Tree::open(tree_db, tree_state.tree_root);

        let mut db = ChainDb {
            meta,
            blobs,
            tree,
            entry_cache: StagedCache::new(NonZeroUsize::new(ENTRY_CACHE_SIZE).unwrap()),
            height_cache: StagedCache::new(NonZeroUsize::new(HEIGHT_CACHE_SIZE).unwrap()),
            coin_cache: StagedCache::new(NonZeroUsize::new(COIN_CACHE_SIZE).unwrap()),
            state_cache: StateCache::new(),
            state,
            tree_state,
            flags,
            tree_interval: opts.tree_interval,
            batch_active: false,
            db_path,
        };
        db.entry_cache.put(genesis_entry.hash, genesis_entry);
        Ok(db)
    }

    /// `spec.md` §6 `close`. Drops the borrowed handles; the long-lived
    /// tree transaction is rebuilt on next open via `inject` (`spec.md`
    /// §5).
    pub fn close(self) {
        drop(self);
    }

    pub(crate) fn start_batch(&mut self) -> Result<Batch<'_>> {
        if self.batch_active {
            return Err(ChainDbError::BatchAlreadyActive);
        }
        self.batch_active = true;
        Ok(Batch::new(self))
    }

    pub fn flags(&self) -> &ChainFlags {
        &self.flags
    }

    pub fn state(&self) -> &ChainState {
        &self.state
    }

    pub fn tree_state(&self) -> &TreeState {
        &self.tree_state
    }

    /// `spec.md` §6 `saveFlags`.
    pub fn save_flags(&mut self, flags: ChainFlags) -> Result<()> {
        let bytes = borsh::to_vec(&flags)?;
        let mut batch = self.start_batch()?;
        batch.put(Column::Flags, &[], &bytes);
        batch.commit()?;
        self.flags = flags;
        Ok(())
    }

    /// `spec.md` §6 `saveDeployments`.
    pub fn save_deployments(&mut self, deployments: &Deployments) -> Result<()> {
        let bytes = borsh::to_vec(deployments)?;
        let mut batch = self.start_batch()?;
        batch.put(Column::Deployments, &[], &bytes);
        batch.commit()
    }

    /// Stages and immediately commits a single `(bit, hash)` versionbit
    /// signalling update (`spec.md` §4.E `StateCache`), persisted under
    /// `Column::DeploymentState` at commit step 5.
    pub fn set_deployment_state(&mut self, bit: u8, hash: Hash, state: u8) -> Result<()> {
        let mut batch = self.start_batch()?;
        batch.set_deployment_state(bit, hash, state);
        batch.commit()
    }

    /// `spec.md` §6 `verifyFlags`: a read-only comparison, no state change.
    pub fn verify_flags(&self, expected: &ChainFlags) -> Result<bool> {
        Ok(&self.flags == expected)
    }

    /// `spec.md` §6 `verifyDeployments`. Decode errors are treated as "all
    /// bits invalid" per `spec.md` §7 class 6 / §9, not as a hard failure.
    pub fn verify_deployments(&self) -> Result<Deployments> {
        match self.meta.get(Column::Deployments, &[])? {
            Some(bytes) => Ok(Deployments::try_from_slice(&bytes).unwrap_or_default()),
            None => Ok(Deployments::default()),
        }
    }

    // ---- §4.H: save / reconnect / disconnect / reset / prune / compactTree ----

    /// `spec.md` §4.H `save(entry, block, view?)`. `view: None` is
    /// store-only (the entry is recorded but not connected); `Some(view)`
    /// connects it at the tip.
    #[instrument(skip(self, block, view))]
    pub fn save(&mut self, entry: &ChainEntry, block: &Block, view: Option<CoinView>) -> Result<()> {
        let entry_bytes = borsh::to_vec(entry)?;
        let block_bytes = borsh::to_vec(block)?;

        let mut batch = self.start_batch()?;
        batch.put(Column::HashToHeight, &entry.hash.0, &entry.height.to_le_bytes());
        batch.put(Column::Entry, &entry.hash.0, &entry_bytes);
        batch.del(Column::TipSet, &entry.prev_block().0);
        batch.put(Column::TipSet, &entry.hash.0, &[]);
        batch.write_block(&entry.hash, &block_bytes);

        match view {
            None => {
                batch.commit()?;
            }
            Some(view) => {
                batch.put(Column::Next, &entry.prev_block().0, &entry.hash.0);
                batch.put(Column::HeightToHash, &crate::layout::height_key(entry.height), &entry.hash.0);
                crate::apply::connect_block(&mut batch, entry, block, view)?;
                batch.pending_state.tip = entry.hash;
                batch.finalize_state();
                let state_bytes = borsh::to_vec(&batch.pending_state)?;
                batch.put(Column::State, &[], &state_bytes);
                batch.commit()?;
                self.height_cache.put(entry.height, entry.hash);
            }
        }

        self.entry_cache.put(entry.hash, entry.clone());
        Ok(())
    }

    /// `spec.md` §4.H `reconnect(entry, block, view)`. Precondition:
    /// `entry` is not genesis and its parent is the current tip.
    #[instrument(skip(self, block, view))]
    pub fn reconnect(&mut self, entry: &ChainEntry, block: &Block, view: CoinView) -> Result<()> {
        if entry.is_genesis() || entry.prev_block() != self.state.tip {
            return Err(ChainDbError::NotTipChild(entry.hash));
        }
        let mut batch = self.start_batch()?;
        batch.put(Column::Next, &entry.prev_block().0, &entry.hash.0);
        batch.put(Column::HeightToHash, &crate::layout::height_key(entry.height), &entry.hash.0);

        crate::apply::connect_block(&mut batch, entry, block, view)?;
        batch.pending_state.tip = entry.hash;
        batch.finalize_state();
        let state_bytes = borsh::to_vec(&batch.pending_state)?;
        batch.put(Column::State, &[], &state_bytes);
        batch.commit()?;
        self.entry_cache.put(entry.hash, entry.clone());
        self.height_cache.put(entry.height, entry.hash);
        Ok(())
    }

    /// `spec.md` §4.H `disconnect(entry, block) -> CoinView`.
    #[instrument(skip(self, block))]
    pub fn disconnect(&mut self, entry: &ChainEntry, block: &Block) -> Result<CoinView> {
        let mut batch = self.start_batch()?;
        batch.del(Column::Next, &entry.prev_block().0);
        batch.del(Column::HeightToHash, &crate::layout::height_key(entry.height));

        let view = crate::apply::disconnect_block(&mut batch, entry, block)?;
        batch.pending_state.tip = entry.prev_block();
        batch.finalize_state();
        let state_bytes = borsh::to_vec(&batch.pending_state)?;
        batch.put(Column::State, &[], &state_bytes);
        batch.commit()?;
        self.height_cache.remove(&entry.height);
        Ok(view)
    }

    /// `spec.md` §4.H `reset(target)`. Precondition: target is on the main
    /// chain, pruning is off, the tree is not compacted.
    #[instrument(skip(self, target))]
    pub fn reset(&mut self, target: &ChainEntry) -> Result<()> {
        if self.flags.prune {
            return Err(ChainDbError::ResetWhilePruned);
        }
        if self.tree_state.compaction_height.is_some() {
            return Err(ChainDbError::ResetWhileCompacted);
        }
        if !self.is_main_chain(target)? {
            return Err(ChainDbError::NotMainChain(target.hash));
        }

        self.remove_alternate_chains()?;

        let mut tip = self.get_entry_by_hash(self.state.tip)?;
        while tip.hash != target.hash {
            let block = self.get_block(&tip.hash)?.ok_or(ChainDbError::BlockNotFound(tip.hash))?;
            let prev = tip.prev_block();
            let mut batch = self.start_batch()?;
            batch.del(Column::TipSet, &tip.hash.0);
            batch.put(Column::TipSet, &prev.0, &[]);
            batch.del(Column::HeightToHash, &crate::layout::height_key(tip.height));
            batch.del(Column::HashToHeight, &tip.hash.0);
            batch.del(Column::Entry, &tip.hash.0);
            batch.del(Column::Next, &prev.0);

            crate::apply::remove_block(&mut batch, &tip, &block)?;
            batch.pending_state.tip = prev;
            batch.finalize_state();
            let state_bytes = borsh::to_vec(&batch.pending_state)?;
            batch.put(Column::State, &[], &state_bytes);
            batch.commit()?;

            self.entry_cache.remove(&tip.hash);
            self.height_cache.remove(&tip.height);
            tip = self.get_entry_by_hash(prev)?;
        }

        info!(target = ?target.hash, "reset complete");
        Ok(())
    }

    fn remove_alternate_chains(&mut self) -> Result<()> {
        let mut tips = Vec::new();
        for (key, _) in self.meta.range(Column::TipSet, &[]) {
            if key.len() == 32 {
                let mut hash = [0u8; 32];
                hash.copy_from_slice(&key);
                tips.push(Hash(hash));
            }
        }
        for hash in tips {
            if hash == self.state.tip {
                continue;
            }
            let mut cursor = self.get_entry_by_hash(hash)?;
            let mut batch = self.start_batch()?;
            loop {
                batch.del(Column::TipSet, &cursor.hash.0);
                batch.del(Column::Entry, &cursor.hash.0);
                batch.del(Column::HashToHeight, &cursor.hash.0);
                if cursor.is_genesis() {
                    break;
                }
                let prev = cursor.prev_block();
                if self.meta.has(Column::HeightToHash, &crate::layout::height_key(cursor.height - 1))?
                    && self
                        .meta
                        .get(Column::HeightToHash, &crate::layout::height_key(cursor.height - 1))?
                        .as_deref()
                        == Some(&prev.0[..])
                {
                    break;
                }
                cursor = self.get_entry_by_hash(prev)?;
            }
            batch.commit()?;
        }
        Ok(())
    }

    /// `spec.md` §4.H `prune()`. Precondition: not SPV, not already
    /// pruned. Returns `false` (and mutates nothing) when the prune window
    /// is empty.
    #[instrument(skip(self))]
    pub fn prune(&mut self) -> Result<bool> {
        if self.flags.spv {
            return Err(ChainDbError::SpvModeUnsupported);
        }
        if self.flags.prune {
            return Err(ChainDbError::AlreadyPruned);
        }
        let tip_height = self.get_entry_by_hash(self.state.tip)?.height;
        let end = tip_height.saturating_sub(self.flags.keep_blocks);
        let start = self.flags.prune_after_height + 1;
        if end <= start {
            return Ok(false);
        }

        let mut batch = self.start_batch()?;
        let mut height = start;
        while height <= end {
            if let Some(hash) = self.get_hash_at_height(height)? {
                batch.prune_block(&hash);
                batch.prune_undo(&hash);
            }
            height += 1;
        }
        batch.commit()?;

        let mut flags = self.flags.clone();
        flags.prune = true;
        self.save_flags(flags)?;
        info!(start, end, "pruned blocks below keep-window");
        Ok(true)
    }

    /// `spec.md` §4.H `compactTree(entry)`.
    #[instrument(skip(self, entry))]
    pub fn compact_tree(&mut self, entry: &ChainEntry) -> Result<()> {
        if self.tree_state.compaction_height == Some(entry.height.saturating_sub(1))
            && self.tree_state.tree_root == entry.tree_root()
        {
            return Err(ChainDbError::AlreadyCompacted(entry.tree_root()));
        }

        self.tree.inject(entry.tree_root());
        let _ = self.tree.txn();

        let tree_path = tree_dir(&self.db_path);
        let tmp_dir = self.db_path.join("tree~tmp");
        self.tree.compact(&tree_path, &tmp_dir)?;

        let mut batch = self.start_batch()?;
        self.tree_state.compact(entry.tree_root(), entry.height.saturating_sub(1));
        let tree_state_bytes = borsh::to_vec(&self.tree_state)?;
        batch.put(Column::TreeState, &[], &tree_state_bytes);
        batch.finalize_tree_state();
        batch.commit()?;

        warn!(root = ?entry.tree_root(), "tree compaction complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    use crate::testutils::*;

    #[test]
    fn reopening_with_different_flags_errors() {
        let (dir, db) = open_fresh();
        let base_dir = db.db_path.parent().unwrap().to_path_buf();
        drop(db);

        let mut mismatched = crate::state::ChainFlags::new(crate::state::Network::Main);
        mismatched.index_tx = true;
        let opts = ChainOptions {
            base_dir,
            mode: crate::kv::OpenMode::ReadWrite,
            flags: mismatched,
            tree_interval: TREE_INTERVAL,
        };
        let reopened = ChainDb::open(opts, genesis_block());
        assert_matches!(reopened, Err(ChainDbError::FlagsMismatch));
        drop(dir);
    }

    #[test]
    fn reset_while_pruned_is_rejected() {
        let (_dir, mut db) = open_fresh();
        let mut flags = db.flags().clone();
        flags.prune = true;
        db.save_flags(flags).unwrap();
        let genesis = db.get_tip().unwrap();
        assert_matches!(db.reset(&genesis), Err(ChainDbError::ResetWhilePruned));
    }

    #[test]
    fn prune_in_spv_mode_is_rejected() {
        let (_dir, mut db) = open_fresh();
        let mut flags = db.flags().clone();
        flags.spv = true;
        db.save_flags(flags).unwrap();
        assert_matches!(db.prune(), Err(ChainDbError::SpvModeUnsupported));
    }

    #[test]
    fn peek_genesis_reads_back_flags_written_at_open() {
        let (dir, db) = open_fresh();
        let base_dir = db.db_path.parent().unwrap().to_path_buf();
        let expected_flags = db.flags().clone();
        drop(db);

        let (genesis, flags) = ChainDb::peek_genesis(&base_dir).unwrap();
        assert_eq!(flags, expected_flags);
        assert_eq!(genesis.txs.len(), 0);
        drop(dir);
    }

    #[test]
    fn deployment_state_persists_across_the_committed_kv_write() {
        let (_dir, mut db) = open_fresh();
        let hash = crate::types::Hash([9u8; 32]);

        assert_eq!(db.get_deployment_state(3, hash).unwrap(), None);

        db.set_deployment_state(3, hash, 2).unwrap();
        assert_eq!(db.get_deployment_state(3, hash).unwrap(), Some(2));

        // A different bit or a different hash is unaffected.
        assert_eq!(db.get_deployment_state(4, hash).unwrap(), None);
        assert_eq!(db.get_deployment_state(3, crate::types::Hash([1u8; 32])).unwrap(), None);
    }
}
