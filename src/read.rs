//! Component J: the caller-facing read API (`spec.md` §4.J, §6). Grounded
//! in the teacher's `near_chain::ChainStore` read-side methods
//! (`get_block`, `get_block_header`, `get_block_hash_by_height`,
//! `is_on_current_chain`), adapted to this crate's hash/height/coin/name
//! lookups.

use borsh::BorshDeserialize;

use crate::block::{blake2_hash, Block, Transaction, TXMeta};
use crate::coins::{CoinEntry, CoinView, UndoCoins};
use crate::engine::ChainDb;
use crate::entry::ChainEntry;
use crate::error::{ChainDbError, Result};
use crate::layout::{coin_key, deployment_state_key, height_key, Column};
use crate::names::NameState;
use crate::tree::Proof;
use crate::types::{Hash, Height, Outpoint};

/// Dispatch key for `getEntry`, which `spec.md` §4.J describes as
/// dispatching "by type" to the height- or hash-indexed lookup.
#[derive(Clone, Copy, Debug)]
pub enum BlockRef {
    Height(Height),
    Hash(Hash),
}

/// Coarse auction-phase summary of a name. Full auction-rule
/// interpretation is out of scope (`spec.md` §1); this only reflects the
/// two flags `NameState` itself carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NameStatus {
    Unregistered,
    Registered,
    Expired,
}

impl ChainDb {
    pub fn get_entry(&mut self, r: BlockRef) -> Result<Option<ChainEntry>> {
        match r {
            BlockRef::Height(h) => self.get_entry_by_height(h),
            BlockRef::Hash(h) => match self.get_entry_by_hash(h) {
                Ok(entry) => Ok(Some(entry)),
                Err(ChainDbError::EntryNotFound(_)) => Ok(None),
                Err(e) => Err(e),
            },
        }
    }

    /// `spec.md` §4.J: "hash-indexed reads are always cached."
    pub fn get_entry_by_hash(&mut self, hash: Hash) -> Result<ChainEntry> {
        if let Some(entry) = self.entry_cache.get(&hash) {
            return Ok(entry);
        }
        let bytes = self.meta.get(Column::Entry, &hash.0)?.ok_or(ChainDbError::EntryNotFound(hash))?;
        let entry = ChainEntry::try_from_slice(&bytes)?;
        self.entry_cache.put(hash, entry.clone());
        Ok(entry)
    }

    /// `spec.md` §4.J: "Height-indexed reads are only cached if `state` has
    /// not changed during the read" — a reorg between the height lookup and
    /// the entry fetch must not poison the height cache with a stale hash.
    pub fn get_entry_by_height(&mut self, height: Height) -> Result<Option<ChainEntry>> {
        if let Some(hash) = self.height_cache.get(&height) {
            return Ok(Some(self.get_entry_by_hash(hash)?));
        }
        let tip_before = self.state.tip;
        let hash = match self.get_hash_at_height(height)? {
            Some(hash) => hash,
            None => return Ok(None),
        };
        let entry = self.get_entry_by_hash(hash)?;
        if self.state.tip == tip_before {
            self.height_cache.put(height, hash);
        }
        Ok(Some(entry))
    }

    pub fn get_hash_at_height(&self, height: Height) -> Result<Option<Hash>> {
        match self.meta.get(Column::HeightToHash, &height_key(height))? {
            Some(bytes) => Ok(Some(decode_hash(&bytes))),
            None => Ok(None),
        }
    }

    pub fn get_height_of_hash(&self, hash: &Hash) -> Result<Option<Height>> {
        match self.meta.get(Column::HashToHeight, &hash.0)? {
            Some(bytes) => Ok(Some(u32::from_le_bytes(bytes.as_slice().try_into().expect("4-byte height")))),
            None => Ok(None),
        }
    }

    pub fn get_tip(&mut self) -> Result<ChainEntry> {
        let tip = self.state.tip;
        self.get_entry_by_hash(tip)
    }

    /// `spec.md` §4.J `getAncestor`: walks `prevBlock` when `entry` is
    /// off-main, else jumps via `getEntryByHeight`.
    pub fn get_ancestor(&mut self, entry: &ChainEntry, height: Height) -> Result<Option<ChainEntry>> {
        if height > entry.height {
            return Ok(None);
        }
        if self.is_main_chain(entry)? {
            return self.get_entry_by_height(height);
        }
        let mut cursor = entry.clone();
        while cursor.height > height {
            cursor = self.get_entry_by_hash(cursor.prev_block())?;
        }
        Ok(Some(cursor))
    }

    pub fn get_previous(&mut self, entry: &ChainEntry) -> Result<Option<ChainEntry>> {
        if entry.is_genesis() {
            return Ok(None);
        }
        Ok(Some(self.get_entry_by_hash(entry.prev_block())?))
    }

    pub fn get_next_hash(&self, entry: &ChainEntry) -> Result<Option<Hash>> {
        match self.meta.get(Column::Next, &entry.hash.0)? {
            Some(bytes) => Ok(Some(decode_hash(&bytes))),
            None => Ok(None),
        }
    }

    pub fn get_next(&mut self, entry: &ChainEntry) -> Result<Option<ChainEntry>> {
        match self.get_next_hash(entry)? {
            Some(hash) => Ok(Some(self.get_entry_by_hash(hash)?)),
            None => Ok(None),
        }
    }

    /// `spec.md` §4.J `isMainChain`: "checks genesis, tip equality,
    /// height-cache match, then probes `n(hash)`."
    pub fn is_main_chain(&mut self, entry: &ChainEntry) -> Result<bool> {
        if entry.is_genesis() || entry.hash == self.state.tip {
            return Ok(true);
        }
        if let Some(cached) = self.height_cache.get(&entry.height) {
            return Ok(cached == entry.hash);
        }
        self.meta.has(Column::Next, &entry.hash.0)
    }

    pub fn is_main_hash(&mut self, hash: Hash) -> Result<bool> {
        let entry = self.get_entry_by_hash(hash)?;
        self.is_main_chain(&entry)
    }

    pub fn has_entry(&self, hash: &Hash) -> Result<bool> {
        self.meta.has(Column::Entry, &hash.0)
    }

    pub fn get_hashes(&self, start: Height) -> Result<Vec<Hash>> {
        Ok(self.meta.range(Column::HeightToHash, &height_key(start)).map(|(_, v)| decode_hash(&v)).collect())
    }

    pub fn get_entries(&mut self, start: Height) -> Result<Vec<ChainEntry>> {
        self.get_hashes(start)?.into_iter().map(|hash| self.get_entry_by_hash(hash)).collect()
    }

    pub fn get_tips(&self) -> Result<Vec<Hash>> {
        Ok(self
            .meta
            .range(Column::TipSet, &[])
            .filter(|(k, _)| k.len() == 32)
            .map(|(k, _)| decode_hash(&k))
            .collect())
    }

    pub fn get_block(&self, hash: &Hash) -> Result<Option<Block>> {
        match self.blobs.read_block(hash)? {
            Some(bytes) => Ok(Some(Block::try_from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn get_raw_block(&self, hash: &Hash) -> Result<Option<Vec<u8>>> {
        self.blobs.read_block(hash)
    }

    /// `spec.md` §6 `getBlockView`: the block plus a best-effort view of
    /// the inputs it spends, built from whatever is still in the current
    /// coin store (inputs already spent by a later block are absent).
    pub fn get_block_view(&mut self, hash: &Hash) -> Result<Option<(Block, CoinView)>> {
        let block = match self.get_block(hash)? {
            Some(block) => block,
            None => return Ok(None),
        };
        let mut view = CoinView::new();
        for tx in &block.txs {
            if tx.is_coinbase() {
                continue;
            }
            for input in &tx.inputs {
                if let Some(entry) = self.read_coin(&input.prevout)? {
                    view.add_coin(input.prevout, entry);
                }
            }
        }
        Ok(Some((block, view)))
    }

    pub fn get_coin(&mut self, outpoint: &Outpoint) -> Result<Option<CoinEntry>> {
        self.read_coin(outpoint)
    }

    pub fn read_coin(&mut self, outpoint: &Outpoint) -> Result<Option<CoinEntry>> {
        if let Some(entry) = self.coin_cache.get(outpoint) {
            return Ok(Some(entry));
        }
        match self.meta.get(Column::Coin, &coin_key(&outpoint.txid, outpoint.index))? {
            Some(bytes) => {
                let entry = CoinEntry::try_from_slice(&bytes)?;
                self.coin_cache.put(*outpoint, entry.clone());
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    pub fn has_coins(&mut self, outpoint: &Outpoint) -> Result<bool> {
        Ok(self.read_coin(outpoint)?.is_some())
    }

    pub fn get_coin_view(&mut self, tx: &Transaction) -> Result<CoinView> {
        let mut view = CoinView::new();
        if !tx.is_coinbase() {
            for input in &tx.inputs {
                if let Some(entry) = self.read_coin(&input.prevout)? {
                    view.add_coin(input.prevout, entry);
                }
            }
        }
        Ok(view)
    }

    /// `spec.md` §4.J `getSpentView`: `getCoinView` extended by looking up
    /// inputs already spent (and so absent from the live coin store) via
    /// the tx index.
    pub fn get_spent_view(&mut self, tx: &Transaction) -> Result<CoinView> {
        self.require_tx_index()?;
        let mut view = self.get_coin_view(tx)?;
        if !tx.is_coinbase() {
            for input in &tx.inputs {
                if view.get(&input.prevout).is_some() {
                    continue;
                }
                if let Some(bytes) = self.meta.get(Column::TxMeta, &input.prevout.txid.0)? {
                    let meta = TXMeta::try_from_slice(&bytes)?;
                    if let Some(output) = meta.tx.outputs.get(input.prevout.index as usize) {
                        view.add_coin(
                            input.prevout,
                            CoinEntry { output: output.clone(), height: meta.height, coinbase: meta.index == 0 },
                        );
                    }
                }
            }
        }
        Ok(view)
    }

    pub fn get_undo_coins(&self, hash: &Hash) -> Result<Option<UndoCoins>> {
        match self.blobs.read_undo(hash)? {
            Some(bytes) => Ok(Some(UndoCoins::try_from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Versionbit signalling state for `(bit, hash)` (`spec.md` §4.E). Checks
    /// the current batch's staged `StateCache` first, so a caller that just
    /// called `Batch::set_deployment_state` in this batch sees it back before
    /// commit, then falls back to the persisted `Column::DeploymentState`.
    pub fn get_deployment_state(&self, bit: u8, hash: Hash) -> Result<Option<u8>> {
        if let Some(state) = self.state_cache.get_staged(bit, hash) {
            return Ok(Some(state));
        }
        match self.meta.get(Column::DeploymentState, &deployment_state_key(bit, &hash))? {
            Some(bytes) => Ok(bytes.first().copied()),
            None => Ok(None),
        }
    }

    pub fn get_name_state(&self, name_hash: &Hash) -> Result<Option<NameState>> {
        if self.flags.spv {
            return Err(ChainDbError::SpvModeUnsupported);
        }
        self.lookup(name_hash)
    }

    pub fn get_name_state_by_name(&self, name: &[u8]) -> Result<Option<NameState>> {
        self.get_name_state(&name_hash_of(name))
    }

    pub fn get_name_status(&self, name_hash: &Hash) -> Result<NameStatus> {
        match self.get_name_state(name_hash)? {
            None => Ok(NameStatus::Unregistered),
            Some(state) if state.expired => Ok(NameStatus::Expired),
            Some(_) => Ok(NameStatus::Registered),
        }
    }

    /// `spec.md` §6 `snapshot(root).get` exposed at the top level, reading
    /// the currently-committed root.
    pub fn lookup(&self, name_hash: &Hash) -> Result<Option<NameState>> {
        match self.tree.get(name_hash)? {
            Some(bytes) => Ok(Some(NameState::try_from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn prove(&self, name_hash: &Hash) -> Result<Proof> {
        if self.flags.spv {
            return Err(ChainDbError::SpvModeUnsupported);
        }
        self.tree.snapshot(self.tree_state.tree_root).prove(name_hash)
    }

    pub fn tree_root(&self) -> Hash {
        self.tree.root_hash()
    }

    pub fn get_meta(&mut self, txid: &Hash) -> Result<Option<TXMeta>> {
        self.require_tx_index()?;
        match self.meta.get(Column::TxMeta, &txid.0)? {
            Some(bytes) => Ok(Some(TXMeta::try_from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn get_tx(&mut self, txid: &Hash) -> Result<Option<Transaction>> {
        Ok(self.get_meta(txid)?.map(|meta| meta.tx))
    }

    pub fn has_tx(&self, txid: &Hash) -> Result<bool> {
        self.require_tx_index()?;
        self.meta.has(Column::TxMeta, &txid.0)
    }

    pub fn get_hashes_by_address(&self, address: &[u8]) -> Result<Vec<Hash>> {
        self.require_tx_address_index()?;
        let addr_hash = blake2_hash(address);
        Ok(self
            .meta
            .range(Column::TxByAddress, &addr_hash.0)
            .take_while(|(k, _)| k.len() == 64 && k[..32] == addr_hash.0)
            .map(|(k, _)| decode_hash(&k[32..64]))
            .collect())
    }

    pub fn get_tx_by_address(&mut self, address: &[u8]) -> Result<Vec<Transaction>> {
        let txids = self.get_hashes_by_address(address)?;
        txids.into_iter().filter_map(|txid| self.get_tx(&txid).transpose()).collect()
    }

    pub fn get_meta_by_address(&mut self, address: &[u8]) -> Result<Vec<TXMeta>> {
        let txids = self.get_hashes_by_address(address)?;
        txids.into_iter().filter_map(|txid| self.get_meta(&txid).transpose()).collect()
    }

    pub fn get_coins_by_address(&mut self, address: &[u8]) -> Result<Vec<CoinEntry>> {
        if !self.flags.index_address {
            return Err(ChainDbError::AddressIndexDisabled);
        }
        let addr_hash = blake2_hash(address);
        let outpoints: Vec<Outpoint> = self
            .meta
            .range(Column::CoinByAddress, &addr_hash.0)
            .take_while(|(k, _)| k.len() == 68 && k[..32] == addr_hash.0)
            .map(|(k, _)| Outpoint {
                txid: decode_hash(&k[32..64]),
                index: u32::from_be_bytes(k[64..68].try_into().expect("4-byte index")),
            })
            .collect();
        outpoints.into_iter().filter_map(|op| self.read_coin(&op).transpose()).collect()
    }

    /// `spec.md` §4.J `scan(start, filter, iter)`: walks the main chain
    /// from `start`, applying `filter` to each transaction and invoking
    /// `iter` with the matches before advancing. Pruned blocks invoke
    /// `iter` with an empty list.
    pub fn scan(
        &mut self,
        start: Height,
        filter: &mut dyn FnMut(&Transaction) -> bool,
        iter: &mut dyn FnMut(&ChainEntry, &[Transaction]) -> Result<()>,
    ) -> Result<()> {
        let mut entry = match self.get_entry_by_height(start)? {
            Some(entry) => entry,
            None => return Ok(()),
        };
        loop {
            self.scan_block(&entry, filter, iter)?;
            match self.get_next(&entry)? {
                Some(next) => entry = next,
                None => return Ok(()),
            }
        }
    }

    pub fn scan_block(
        &mut self,
        entry: &ChainEntry,
        filter: &mut dyn FnMut(&Transaction) -> bool,
        iter: &mut dyn FnMut(&ChainEntry, &[Transaction]) -> Result<()>,
    ) -> Result<()> {
        match self.get_block(&entry.hash)? {
            Some(block) => {
                let matched: Vec<Transaction> = block.txs.into_iter().filter(|tx| filter(tx)).collect();
                iter(entry, &matched)
            }
            None => iter(entry, &[]),
        }
    }

    fn require_tx_index(&self) -> Result<()> {
        if !self.flags.index_tx {
            return Err(ChainDbError::TxIndexDisabled);
        }
        Ok(())
    }

    fn require_tx_address_index(&self) -> Result<()> {
        self.require_tx_index()?;
        if !self.flags.index_address {
            return Err(ChainDbError::AddressIndexDisabled);
        }
        Ok(())
    }
}

fn decode_hash(bytes: &[u8]) -> Hash {
    let mut raw = [0u8; 32];
    raw.copy_from_slice(bytes);
    Hash(raw)
}

fn name_hash_of(name: &[u8]) -> Hash {
    let encoded = borsh::to_vec(&name.to_vec()).expect("name always serializes");
    blake2_hash(&encoded)
}

#[cfg(test)]
mod tests {
    use crate::block::{Block, BlockHeader};
    use crate::entry::ChainEntry;
    use crate::read::BlockRef;
    use crate::testutils::*;
    use crate::types::Hash;

    fn header(prev: Hash, time: u64) -> BlockHeader {
        BlockHeader { prev_block: prev, tree_root: Hash::ZERO, time, bits: 0, nonce: 0 }
    }

    #[test]
    fn fresh_db_has_a_single_entry_reachable_both_ways() {
        let (_dir, mut db) = open_fresh();
        let genesis = db.get_tip().unwrap();
        assert!(db.is_main_chain(&genesis).unwrap());
        assert_eq!(db.get_hash_at_height(0).unwrap(), Some(genesis.hash));
        assert_eq!(db.get_height_of_hash(&genesis.hash).unwrap(), Some(0));
        assert_eq!(db.get_entry(BlockRef::Hash(genesis.hash)).unwrap().unwrap().hash, genesis.hash);
        assert_eq!(db.get_entry(BlockRef::Height(0)).unwrap().unwrap().hash, genesis.hash);
    }

    #[test]
    fn get_next_and_get_previous_walk_the_chain() {
        let (_dir, mut db) = open_fresh();
        let genesis = db.get_tip().unwrap();
        let block1 = Block { header: header(genesis.hash, 1), txs: vec![coinbase(vec![])] };
        let entry1 = ChainEntry { header: block1.header.clone(), height: 1, hash: block1.hash() };
        db.save(&entry1, &block1, Some(crate::coins::CoinView::new())).unwrap();

        assert_eq!(db.get_next(&genesis).unwrap().unwrap().hash, entry1.hash);
        assert_eq!(db.get_previous(&entry1).unwrap().unwrap().hash, genesis.hash);
        assert!(db.get_next(&entry1).unwrap().is_none());
    }

    #[test]
    fn scan_filters_and_visits_every_block_from_start() {
        let (_dir, mut db) = open_fresh();
        let genesis = db.get_tip().unwrap();
        let block1 = Block { header: header(genesis.hash, 1), txs: vec![coinbase(vec![plain_output(5, b"a")])] };
        let entry1 = ChainEntry { header: block1.header.clone(), height: 1, hash: block1.hash() };
        db.save(&entry1, &block1, Some(crate::coins::CoinView::new())).unwrap();

        let mut seen = 0;
        let mut filter = |_: &crate::block::Transaction| true;
        let mut collect = |_: &ChainEntry, txs: &[crate::block::Transaction]| {
            seen += txs.len();
            Ok(())
        };
        db.scan(0, &mut filter, &mut collect).unwrap();
        assert_eq!(seen, 1);
    }
}
