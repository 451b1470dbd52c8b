//! Offline invariant checker over a live database (`spec.md` §8), grounded
//! in the teacher's `test-utils/store-validator` CLI: it accumulates a list
//! of `(check, detail, error)` findings and a count of conditions examined
//! rather than failing fast on the first violation, so one run surfaces
//! every problem in the database.

use borsh::BorshDeserialize;

use crate::engine::ChainDb;
use crate::error::Result;
use crate::layout::Column;

/// One invariant violation found during a validation pass.
#[derive(Clone, Debug)]
pub struct Finding {
    pub check: &'static str,
    pub detail: String,
}

pub struct StoreValidator<'a> {
    db: &'a mut ChainDb,
    pub checks_run: u64,
    pub findings: Vec<Finding>,
}

impl<'a> StoreValidator<'a> {
    pub fn new(db: &'a mut ChainDb) -> Self {
        StoreValidator { db, checks_run: 0, findings: Vec::new() }
    }

    pub fn is_failed(&self) -> bool {
        !self.findings.is_empty()
    }

    fn fail(&mut self, check: &'static str, detail: impl Into<String>) {
        self.findings.push(Finding { check, detail: detail.into() });
    }

    /// Runs every invariant from `spec.md` §8 and returns once. Later calls
    /// (e.g. after a repair) start a fresh findings list.
    pub fn validate(&mut self) -> Result<()> {
        self.findings.clear();
        self.checks_run = 0;
        self.check_height_index()?;
        self.check_next_index()?;
        self.check_tip_reachable()?;
        self.check_tree_root()?;
        self.check_undo_presence()?;
        self.check_value_total()?;
        Ok(())
    }

    /// `H(h)` exists for every `h <= tip.height` and its `e`-record's
    /// height matches.
    fn check_height_index(&mut self) -> Result<()> {
        let tip_height = self.db.get_tip()?.height;
        for height in 0..=tip_height {
            self.checks_run += 1;
            match self.db.get_hash_at_height(height)? {
                None => self.fail("height-index", format!("H({height}) missing")),
                Some(hash) => match self.db.meta.get(Column::Entry, &hash.0)? {
                    None => self.fail("height-index", format!("e({hash:?}) missing for H({height})")),
                    Some(bytes) => {
                        let entry = crate::entry::ChainEntry::try_from_slice(&bytes)?;
                        if entry.height != height {
                            self.fail(
                                "height-index",
                                format!("e({hash:?}).height == {} but H({height}) points to it", entry.height),
                            );
                        }
                    }
                },
            }
        }
        Ok(())
    }

    /// `n(prevBlock) == hash` for every main-chain entry except genesis.
    fn check_next_index(&mut self) -> Result<()> {
        let entries = self.db.get_entries(1)?;
        for entry in entries {
            self.checks_run += 1;
            match self.db.get_next_hash(&self.db.get_entry_by_hash(entry.prev_block())?)? {
                Some(next) if next == entry.hash => {}
                Some(other) => {
                    let expected = entry.hash;
                    self.fail(
                        "next-index",
                        format!("n(prevBlock of {expected:?}) == {other:?}, expected {expected:?}"),
                    )
                }
                None => self.fail("next-index", format!("n(prevBlock of {:?}) missing", entry.hash)),
            }
        }
        Ok(())
    }

    /// `state.tip` equals the hash reached by repeatedly following `n` from
    /// genesis.
    fn check_tip_reachable(&mut self) -> Result<()> {
        self.checks_run += 1;
        let mut cursor = self.db.get_entry_by_height(0)?.expect("genesis always indexed");
        while let Some(next) = self.db.get_next(&cursor)? {
            cursor = next;
        }
        if cursor.hash != self.db.state().tip {
            self.fail(
                "tip-reachable",
                format!("following n from genesis reaches {:?}, state.tip is {:?}", cursor.hash, self.db.state().tip),
            );
        }
        Ok(())
    }

    /// `tree.rootHash() == treeState.treeRoot` and
    /// `treeState.commitHeight % treeInterval == 0`.
    fn check_tree_root(&mut self) -> Result<()> {
        self.checks_run += 1;
        let commit_height = self.db.tree_state().commit_height;
        let tree_root = self.db.tree_state().tree_root;
        if self.db.tree_root() != tree_root {
            self.fail(
                "tree-root",
                format!("tree.rootHash() == {:?}, treeState.treeRoot == {tree_root:?}", self.db.tree_root()),
            );
        }
        self.checks_run += 1;
        if commit_height % self.db.tree_interval != 0 {
            self.fail(
                "tree-root",
                format!("treeState.commitHeight == {commit_height}, not a multiple of treeInterval"),
            );
        }
        Ok(())
    }

    /// For every block with non-empty spent inputs, `readUndo(blockHash)`
    /// is present.
    fn check_undo_presence(&mut self) -> Result<()> {
        let entries = self.db.get_entries(1)?;
        for entry in entries {
            self.checks_run += 1;
            let block = match self.db.get_block(&entry.hash)? {
                Some(block) => block,
                None => continue,
            };
            let spends_any = block.txs.iter().any(|tx| !tx.is_coinbase() && !tx.inputs.is_empty());
            let has_undo = self.db.get_undo_coins(&entry.hash)?.is_some();
            if spends_any && !has_undo {
                self.fail("undo-presence", format!("block {:?} spends inputs but has no undo record", entry.hash));
            }
        }
        Ok(())
    }

    /// `sum(value of unspent non-locked outputs) == state.value`.
    fn check_value_total(&mut self) -> Result<()> {
        self.checks_run += 1;
        let mut total: u128 = 0;
        for (key, value) in self.db.meta.range(Column::Coin, &[]) {
            if key.len() != 36 {
                continue;
            }
            let entry = crate::coins::CoinEntry::try_from_slice(&value)?;
            if !entry.output.covenant.covenant_type.is_locked() {
                total += entry.output.value as u128;
            }
        }
        if total != self.db.state().value as u128 {
            self.fail("value-total", format!("sum of unspent non-locked outputs == {total}, state.value == {}", self.db.state().value));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coins::{CoinEntry, CoinView};
    use crate::testutils::*;
    use crate::types::{Hash, Outpoint};

    #[test]
    fn fresh_genesis_only_db_has_no_findings() {
        let (_dir, mut db) = open_fresh();
        let mut validator = StoreValidator::new(&mut db);
        validator.validate().unwrap();
        assert!(!validator.is_failed(), "{:?}", validator.findings);
        assert!(validator.checks_run > 0);
    }

    #[test]
    fn connected_chain_still_validates_clean() {
        let (_dir, mut db) = open_fresh();
        let genesis = db.get_tip().unwrap();
        let cb = coinbase(vec![plain_output(30, b"addr")]);
        let txid = cb.txid();
        let block = crate::block::Block {
            header: crate::block::BlockHeader { prev_block: genesis.hash, tree_root: Hash::ZERO, time: 1, bits: 0, nonce: 0 },
            txs: vec![cb.clone()],
        };
        let entry =
            crate::entry::ChainEntry { header: block.header.clone(), height: 1, hash: block.hash() };
        let mut view = CoinView::new();
        view.add_coin(
            Outpoint { txid, index: 0 },
            CoinEntry { output: cb.outputs[0].clone(), height: 1, coinbase: true },
        );
        db.save(&entry, &block, Some(view)).unwrap();

        let mut validator = StoreValidator::new(&mut db);
        validator.validate().unwrap();
        assert!(!validator.is_failed(), "{:?}", validator.findings);
    }
}
