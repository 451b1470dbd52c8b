//! Versioned aggregate records: `ChainState`, `TreeState`, `StateCache`,
//! `ChainFlags` (`spec.md` §3, component E). Each is cloned into a
//! `pending` copy at batch start and swapped into the live value only on a
//! successful commit (`spec.md` §4.G), the way the teacher swaps
//! `near_chain::types::Tip` only after a `ChainStoreUpdate::commit`.

use std::collections::HashMap;

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::{Amount, Hash, Height};

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ChainState {
    pub tip: Hash,
    pub tx: u64,
    pub coin: u64,
    pub value: Amount,
    pub burned: Amount,
    pub committed: bool,
}

impl ChainState {
    pub fn genesis(genesis_hash: Hash) -> Self {
        ChainState { tip: genesis_hash, tx: 0, coin: 0, value: 0, burned: 0, committed: true }
    }

    /// Marks this state as the pending value of a batch in progress
    /// (`spec.md` §4.G `start()`: "clones `state → pending`").
    pub fn start_batch(&self) -> ChainState {
        let mut pending = self.clone();
        pending.committed = false;
        pending
    }

    /// A non-locked output leaves the unspent set (`spec.md` §4.I
    /// `pending.spend(output)`).
    pub fn spend(&mut self, amount: Amount) {
        self.coin = self.coin.saturating_sub(1);
        self.value = self.value.saturating_sub(amount);
    }

    /// A non-locked output enters the unspent set (`spec.md` §4.I
    /// `pending.add(output)`).
    pub fn add(&mut self, amount: Amount) {
        self.coin += 1;
        self.value += amount;
    }

    /// A `REGISTER` output permanently burns its value (`spec.md` §4.I
    /// `pending.burn(output)`).
    pub fn burn(&mut self, amount: Amount) {
        self.burned += amount;
    }

    /// Disconnect-side mirror of [`ChainState::spend`].
    pub fn unspend(&mut self, amount: Amount) {
        self.coin += 1;
        self.value += amount;
    }

    /// Disconnect-side mirror of [`ChainState::add`].
    pub fn unadd(&mut self, amount: Amount) {
        self.coin = self.coin.saturating_sub(1);
        self.value = self.value.saturating_sub(amount);
    }

    /// Disconnect-side mirror of [`ChainState::burn`].
    pub fn unburn(&mut self, amount: Amount) {
        self.burned = self.burned.saturating_sub(amount);
    }

    pub fn inc_tx(&mut self) {
        self.tx += 1;
    }

    pub fn dec_tx(&mut self) {
        self.tx = self.tx.saturating_sub(1);
    }
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct TreeState {
    pub tree_root: Hash,
    pub commit_height: Height,
    pub compaction_height: Option<Height>,
    pub committed: bool,
}

impl TreeState {
    pub fn genesis(tree_root: Hash) -> Self {
        TreeState { tree_root, commit_height: 0, compaction_height: None, committed: true }
    }

    pub fn start_batch(&self) -> TreeState {
        let mut pending = self.clone();
        pending.committed = false;
        pending
    }

    /// `spec.md` §4.H `compactTree` step 5: mark the tree state compacted
    /// at the target root/height.
    pub fn compact(&mut self, root: Hash, height: Height) {
        self.tree_root = root;
        self.compaction_height = Some(height);
        self.committed = true;
    }
}

/// Per-(bit, block hash) versionbit signalling state (`spec.md` §3,
/// component E). Accumulates `updates` during a batch, flushed at commit
/// (`spec.md` §4.G step 5).
#[derive(Clone, Debug, Default)]
pub struct StateCache {
    pub updates: HashMap<(u8, Hash), u8>,
}

impl StateCache {
    pub fn new() -> Self {
        StateCache::default()
    }

    pub fn set(&mut self, bit: u8, hash: Hash, state: u8) {
        self.updates.insert((bit, hash), state);
    }

    pub fn get_staged(&self, bit: u8, hash: Hash) -> Option<u8> {
        self.updates.get(&(bit, hash)).copied()
    }

    /// `spec.md` §4.G step 5: "flush StateCache updates". Returns the
    /// drained updates for the caller to persist, and empties the
    /// in-memory accumulator.
    pub fn drain(&mut self) -> Vec<((u8, Hash), u8)> {
        self.updates.drain().collect()
    }
}

/// A single soft-fork deployment's signalling window (`spec.md` §6, table
/// `D`): bit, start time, timeout, threshold, window. Decode failures of
/// the whole table are treated as "all bits invalid" per `spec.md` §7
/// class 6 and §9's open question, rather than a hard error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Deployment {
    pub bit: u8,
    pub start_time: u32,
    pub timeout: u32,
    pub threshold: i32,
    pub window: i32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Deployments {
    pub entries: Vec<Deployment>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Network {
    Main,
    Test,
    Regtest,
    Simnet,
}

/// Persisted options (`spec.md` §3, component E, key `O`). `keep_blocks`
/// and `prune_after_height` are the ambient home for the two constants
/// `prune()` needs (see `SPEC_FULL.md` §3).
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ChainFlags {
    pub network_id: u32,
    pub spv: bool,
    pub prune: bool,
    pub index_tx: bool,
    pub index_address: bool,
    pub keep_blocks: u32,
    pub prune_after_height: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spend_add_roundtrip_is_a_no_op() {
        let mut state = ChainState::genesis(Hash::default());
        state.add(100);
        state.spend(100);
        assert_eq!(state.value, 0);
        assert_eq!(state.coin, 0);
    }

    #[test]
    fn unspend_unadd_mirror_spend_add() {
        let mut state = ChainState::genesis(Hash::default());
        state.add(50);
        let after_add = state.clone();
        state.spend(50);
        state.unspend(50);
        assert_eq!(state, after_add);
        state.unadd(50);
        assert_eq!(state.value, 0);
    }

    #[test]
    fn burn_and_unburn_are_saturating() {
        let mut state = ChainState::genesis(Hash::default());
        state.unburn(10);
        assert_eq!(state.burned, 0);
        state.burn(10);
        state.unburn(20);
        assert_eq!(state.burned, 0);
    }

    #[test]
    fn tx_counter_never_underflows() {
        let mut state = ChainState::genesis(Hash::default());
        state.dec_tx();
        assert_eq!(state.tx, 0);
        state.inc_tx();
        assert_eq!(state.tx, 1);
    }

    #[test]
    fn start_batch_clones_and_clears_committed() {
        let mut state = ChainState::genesis(Hash::default());
        state.value = 42;
        let pending = state.start_batch();
        assert_eq!(pending.value, 42);
        assert!(!pending.committed);
        state.value = 0;
        assert_eq!(pending.value, 42);
    }
}

impl ChainFlags {
    pub fn new(network: Network) -> Self {
        let network_id = match network {
            Network::Main => 0,
            Network::Test => 1,
            Network::Regtest => 2,
            Network::Simnet => 3,
        };
        ChainFlags {
            network_id,
            spv: false,
            prune: false,
            index_tx: false,
            index_address: false,
            keep_blocks: 288,
            prune_after_height: 0,
        }
    }
}
