//! Component I: UTXO and name-state application — `connectBlock` /
//! `disconnectBlock` and their `connectNames` / `disconnectNames` /
//! `_saveNames` helpers (`spec.md` §4.I). Grounded in the teacher's
//! `near_chain::update_shard::apply_new_chunk` for the "walk transactions,
//! accumulate outcomes into a side-effect batch" shape, and in
//! `near_store::trie::update::TrieUpdate` for committing accumulated
//! key-value changes into a content-addressed tree alongside a flat store.
//!
//! `connectBlock`'s `view` arrives already populated by the caller (who
//! validated the block and knows which coins it spends and creates); this
//! module only does value accounting, persistence, and indexing.
//! `disconnectBlock` instead builds `view` from scratch out of the stored
//! undo log, since there is no caller-supplied view to disconnect from.

use borsh::BorshDeserialize;

use crate::batch::Batch;
use crate::bitfield::BitField;
use crate::block::{blake2_hash, Block, Transaction, TXMeta};
use crate::coins::{CoinEntry, CoinView, UndoCoins};
use crate::entry::ChainEntry;
use crate::error::{ChainDbError, Result};
use crate::layout::{addr_coin_key, addr_tx_key, coin_key, height_key, Column};
use crate::names::{NameDelta, NameState, NameUndo};
use crate::types::Outpoint;

/// `spec.md` §4.I `connectBlock(entry, block, view)`.
pub(crate) fn connect_block(
    batch: &mut Batch<'_>,
    entry: &ChainEntry,
    block: &Block,
    mut view: CoinView,
) -> Result<()> {
    for (index, tx) in block.txs.iter().enumerate() {
        if !tx.is_coinbase() {
            for input in &tx.inputs {
                let coin = view
                    .get(&input.prevout)
                    .expect("caller-supplied view holds every coin a validated block spends")
                    .clone();
                if !coin.output.covenant.covenant_type.is_locked() {
                    batch.pending_state.spend(coin.output.value);
                }
                view.mark_spent(input.prevout, coin);
            }
        }

        for output in &tx.outputs {
            if output.is_unspendable() {
                continue;
            }
            if output.covenant.covenant_type.is_register() {
                batch.pending_state.burn(output.value);
            }
            if output.covenant.covenant_type.is_locked() {
                continue;
            }
            let credit = if output.covenant.covenant_type.is_claim() {
                output.covenant.claim_sequence() == Some(1)
            } else {
                true
            };
            if credit {
                batch.pending_state.add(output.value);
            }
        }

        batch.pending_state.inc_tx();
        index_tx(batch, tx, &view, entry, index as u32)?;
    }

    save_view(batch, &view)?;
    if !view.bits.is_empty() {
        rewrite_bitfield(batch, &view.bits)?;
    }
    if !view.undo.is_empty() {
        let bytes = borsh::to_vec(&view.undo)?;
        batch.write_undo(&entry.hash, &bytes);
    }
    prune_block(batch, entry)?;
    connect_names(batch, entry, &view)
}

/// `spec.md` §4.I `disconnectBlock(entry, block) -> CoinView`.
pub(crate) fn disconnect_block(
    batch: &mut Batch<'_>,
    entry: &ChainEntry,
    block: &Block,
) -> Result<CoinView> {
    let mut undo = match batch.db.blobs.read_undo(&entry.hash)? {
        Some(bytes) => UndoCoins::try_from_slice(&bytes)?,
        None => UndoCoins::default(),
    };

    let name_undo = match batch.db.meta.get(Column::NameUndo, &height_key(entry.height))? {
        Some(bytes) => NameUndo::try_from_slice(&bytes)?,
        None => NameUndo::default(),
    };

    let mut view = CoinView::new();
    view.bits = BitField::invert_delta(&name_undo.bits);

    for tx in block.txs.iter().rev() {
        let txid = tx.txid();
        for (i, output) in tx.outputs.iter().enumerate().rev() {
            if output.is_unspendable() {
                continue;
            }
            let outpoint = Outpoint { txid, index: i as u32 };
            view.mark_spent(
                outpoint,
                CoinEntry { output: output.clone(), height: entry.height, coinbase: tx.is_coinbase() },
            );
            if output.covenant.covenant_type.is_register() {
                batch.pending_state.unburn(output.value);
            }
            if output.covenant.covenant_type.is_locked() {
                continue;
            }
            let credit = if output.covenant.covenant_type.is_claim() {
                output.covenant.claim_sequence() == Some(1)
            } else {
                true
            };
            if credit {
                batch.pending_state.unadd(output.value);
            }
        }

        for input in tx.inputs.iter().rev() {
            let undo_coin = undo.coins.pop().ok_or(ChainDbError::MissingUndo(entry.hash))?;
            assert_eq!(undo_coin.outpoint, input.prevout, "Undo coins data inconsistency");
            if !undo_coin.coin.output.covenant.covenant_type.is_locked() {
                batch.pending_state.unspend(undo_coin.coin.output.value);
            }
            view.add_coin(undo_coin.outpoint, undo_coin.coin);
        }

        unindex_tx(batch, tx, &view)?;
        batch.pending_state.dec_tx();
    }

    assert!(undo.is_empty(), "Undo coins data inconsistency");

    save_view(batch, &view)?;
    if !view.bits.is_empty() {
        rewrite_bitfield(batch, &view.bits)?;
    }
    batch.prune_undo(&entry.hash);
    disconnect_names(batch, entry, &mut view)?;
    Ok(view)
}

fn save_view(batch: &mut Batch<'_>, view: &CoinView) -> Result<()> {
    for (outpoint, vc) in view.coins.iter() {
        let key = coin_key(&outpoint.txid, outpoint.index);
        if vc.spent {
            batch.del(Column::Coin, &key);
            batch.db.coin_cache.remove(outpoint);
        } else if vc.dirty {
            let bytes = borsh::to_vec(&vc.entry)?;
            batch.put(Column::Coin, &key, &bytes);
            batch.db.coin_cache.put(*outpoint, vc.entry.clone());
        }
    }
    Ok(())
}

fn rewrite_bitfield(batch: &mut Batch<'_>, delta: &[(u32, bool)]) -> Result<()> {
    let mut bf = match batch.db.meta.get(Column::BitField, &[])? {
        Some(bytes) => BitField::try_from_slice(&bytes)?,
        None => BitField::new(),
    };
    bf.apply_delta(delta);
    let bytes = borsh::to_vec(&bf)?;
    batch.put(Column::BitField, &[], &bytes);
    Ok(())
}

/// `spec.md` §4.I: "no-op unless `prune` is enabled and `entry.height -
/// keepBlocks > pruneAfterHeight`".
fn prune_block(batch: &mut Batch<'_>, entry: &ChainEntry) -> Result<()> {
    if !batch.db.flags.prune {
        return Ok(());
    }
    let target = entry.height.saturating_sub(batch.db.flags.keep_blocks);
    if target <= batch.db.flags.prune_after_height {
        return Ok(());
    }
    if let Some(bytes) = batch.db.meta.get(Column::HeightToHash, &height_key(target))? {
        let mut raw = [0u8; 32];
        raw.copy_from_slice(&bytes);
        let hash = crate::types::Hash(raw);
        batch.prune_block(&hash);
        batch.prune_undo(&hash);
    }
    Ok(())
}

fn index_tx(
    batch: &mut Batch<'_>,
    tx: &Transaction,
    view: &CoinView,
    entry: &ChainEntry,
    index: u32,
) -> Result<()> {
    if !batch.db.flags.index_tx {
        return Ok(());
    }
    let txid = tx.txid();
    let meta = TXMeta { tx: tx.clone(), entry_hash: entry.hash, height: entry.height, index };
    let bytes = borsh::to_vec(&meta)?;
    batch.put(Column::TxMeta, &txid.0, &bytes);

    if !batch.db.flags.index_address {
        return Ok(());
    }
    for (i, output) in tx.outputs.iter().enumerate() {
        if output.address.is_empty() {
            continue;
        }
        let addr_hash = blake2_hash(&output.address);
        batch.put(Column::TxByAddress, &addr_tx_key(&addr_hash, &txid), &[]);
        batch.put(Column::CoinByAddress, &addr_coin_key(&addr_hash, &txid, i as u32), &[]);
    }
    for input in &tx.inputs {
        if let Some(coin) = view.get(&input.prevout) {
            if !coin.output.address.is_empty() {
                let addr_hash = blake2_hash(&coin.output.address);
                batch.put(Column::TxByAddress, &addr_tx_key(&addr_hash, &txid), &[]);
            }
        }
    }
    Ok(())
}

fn unindex_tx(batch: &mut Batch<'_>, tx: &Transaction, view: &CoinView) -> Result<()> {
    if !batch.db.flags.index_tx {
        return Ok(());
    }
    let txid = tx.txid();
    batch.del(Column::TxMeta, &txid.0);

    if !batch.db.flags.index_address {
        return Ok(());
    }
    for (i, output) in tx.outputs.iter().enumerate() {
        if output.address.is_empty() {
            continue;
        }
        let addr_hash = blake2_hash(&output.address);
        batch.del(Column::TxByAddress, &addr_tx_key(&addr_hash, &txid));
        batch.del(Column::CoinByAddress, &addr_coin_key(&addr_hash, &txid, i as u32));
    }
    for input in &tx.inputs {
        if let Some(coin) = view.get(&input.prevout) {
            if !coin.output.address.is_empty() {
                let addr_hash = blake2_hash(&coin.output.address);
                batch.del(Column::TxByAddress, &addr_tx_key(&addr_hash, &txid));
            }
        }
    }
    Ok(())
}

/// `spec.md` §4.I: writes/clears the `w(height)` undo record derived from
/// the view, then calls `_saveNames(..., false)`.
fn connect_names(batch: &mut Batch<'_>, entry: &ChainEntry, view: &CoinView) -> Result<()> {
    let mut undo = NameUndo::default();
    for name_hash in view.names.keys() {
        let before = match batch.db.tree.get(name_hash)? {
            Some(bytes) => Some(NameState::try_from_slice(&bytes)?),
            None => None,
        };
        undo.deltas.push(NameDelta { name_hash: *name_hash, before });
    }
    undo.bits = BitField::invert_delta(&view.bits);

    if undo.is_empty() {
        batch.del(Column::NameUndo, &height_key(entry.height));
    } else {
        let bytes = borsh::to_vec(&undo)?;
        batch.put(Column::NameUndo, &height_key(entry.height), &bytes);
    }
    save_names(batch, view, entry, false)
}

/// `spec.md` §4.I: reads `w(height)`, applies each delta to the name state
/// fetched through the view, deletes `w(height)`, then calls
/// `_saveNames(..., true)`.
fn disconnect_names(batch: &mut Batch<'_>, entry: &ChainEntry, view: &mut CoinView) -> Result<()> {
    if let Some(bytes) = batch.db.meta.get(Column::NameUndo, &height_key(entry.height))? {
        let undo = NameUndo::try_from_slice(&bytes)?;
        for delta in undo.deltas {
            view.names.insert(delta.name_hash, delta.before);
        }
    }
    batch.del(Column::NameUndo, &height_key(entry.height));
    save_names(batch, view, entry, true)
}

/// `spec.md` §4.I `_saveNames(view, entry, revert)`.
///
/// The distilled spec's `tree.inject(entry.treeRoot)` on revert reads
/// ambiguously: injecting this entry's own (post-connect) root would be a
/// no-op against invariant 4. Resolved here as injecting the *parent*
/// entry's root, which is what the tree must roll back to when this
/// block's name-tree effects are undone.
fn save_names(batch: &mut Batch<'_>, view: &CoinView, entry: &ChainEntry, revert: bool) -> Result<()> {
    {
        let mut txn = batch.db.tree.txn();
        for (name_hash, state) in view.names.iter() {
            match state {
                None => txn.remove(name_hash)?,
                Some(s) => {
                    let bytes = borsh::to_vec(s)?;
                    txn.insert(*name_hash, bytes)?
                }
            }
        }
        txn.commit()?;
    }

    if entry.height % batch.db.tree_interval != 0 {
        return Ok(());
    }

    let (root, commit_height) = if revert {
        let prev_bytes = batch
            .db
            .meta
            .get(Column::Entry, &entry.prev_block().0)?
            .ok_or(ChainDbError::EntryNotFound(entry.prev_block()))?;
        let prev = ChainEntry::try_from_slice(&prev_bytes)?;
        batch.db.tree.inject(prev.tree_root());
        (prev.tree_root(), entry.height.saturating_sub(batch.db.tree_interval))
    } else {
        (batch.db.tree.root_hash(), entry.height)
    };

    batch.pending_tree_state.tree_root = root;
    batch.pending_tree_state.commit_height = commit_height;
    batch.finalize_tree_state();
    let bytes = borsh::to_vec(&batch.pending_tree_state)?;
    batch.put(Column::TreeState, &[], &bytes);
    Ok(())
}

/// Disconnect-then-remove composition used by `reset` (`spec.md` §4.H
/// step 2: `removeBlock(tip)` "prunes the blob and returns a view").
pub(crate) fn remove_block(batch: &mut Batch<'_>, entry: &ChainEntry, block: &Block) -> Result<()> {
    disconnect_block(batch, entry, block)?;
    batch.prune_block(&entry.hash);
    batch.prune_undo(&entry.hash);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockHeader;
    use crate::testutils::*;
    use crate::types::Hash;

    fn header(prev: Hash, height_seed: u64) -> BlockHeader {
        BlockHeader { prev_block: prev, tree_root: Hash::ZERO, time: height_seed, bits: 0, nonce: 0 }
    }

    #[test]
    fn connect_then_disconnect_restores_state() {
        let (_dir, mut db) = open_fresh();
        let genesis = db.get_tip().unwrap();

        let cb = coinbase(vec![plain_output(50, b"addr-a"), plain_output(25, b"addr-b")]);
        let txid = cb.txid();
        let block1 = Block { header: header(genesis.hash, 1), txs: vec![cb.clone()] };
        let entry1 = ChainEntry { header: block1.header.clone(), height: 1, hash: block1.hash() };

        let mut view1 = CoinView::new();
        for (i, output) in cb.outputs.iter().enumerate() {
            view1.add_coin(Outpoint { txid, index: i as u32 }, CoinEntry { output: output.clone(), height: 1, coinbase: true });
        }
        db.save(&entry1, &block1, Some(view1)).unwrap();
        assert_eq!(db.state().value, 75);
        assert_eq!(db.state().tx, 1);

        let spent_outpoint = Outpoint { txid, index: 0 };
        let spent_coin = db.read_coin(&spent_outpoint).unwrap().unwrap();
        let spend_tx = spend(spent_outpoint, vec![plain_output(40, b"addr-c")]);
        let block2 = Block { header: header(entry1.hash, 2), txs: vec![coinbase(vec![]), spend_tx.clone()] };
        let entry2 = ChainEntry { header: block2.header.clone(), height: 2, hash: block2.hash() };

        let mut view2 = CoinView::new();
        view2.undo.push(spent_outpoint, spent_coin.clone());
        view2.add_coin(spent_outpoint, spent_coin);
        let new_outpoint = Outpoint { txid: spend_tx.txid(), index: 0 };
        view2.add_coin(new_outpoint, CoinEntry { output: spend_tx.outputs[0].clone(), height: 2, coinbase: false });
        db.save(&entry2, &block2, Some(view2)).unwrap();

        assert_eq!(db.state().value, 65);
        assert_eq!(db.state().tx, 3);
        assert!(db.read_coin(&spent_outpoint).unwrap().is_none());
        assert_eq!(db.read_coin(&new_outpoint).unwrap().unwrap().output.value, 40);

        db.disconnect(&entry2, &block2).unwrap();
        assert_eq!(db.state().value, 75);
        assert_eq!(db.state().tx, 1);
        assert_eq!(db.read_coin(&spent_outpoint).unwrap().unwrap().output.value, 50);
        assert!(db.read_coin(&new_outpoint).unwrap().is_none());
    }

    #[test]
    fn disconnect_undoes_the_coinbase_reward_itself() {
        let (_dir, mut db) = open_fresh();
        let genesis = db.get_tip().unwrap();

        let cb = coinbase(vec![plain_output(50, b"addr-a"), plain_output(25, b"addr-b")]);
        let txid = cb.txid();
        let block1 = Block { header: header(genesis.hash, 1), txs: vec![cb.clone()] };
        let entry1 = ChainEntry { header: block1.header.clone(), height: 1, hash: block1.hash() };

        let mut view = CoinView::new();
        for (i, output) in cb.outputs.iter().enumerate() {
            view.add_coin(Outpoint { txid, index: i as u32 }, CoinEntry { output: output.clone(), height: 1, coinbase: true });
        }
        db.save(&entry1, &block1, Some(view)).unwrap();
        assert_eq!(db.state().value, 75);
        assert_eq!(db.state().coin, 2);
        assert_eq!(db.state().tx, 1);

        db.disconnect(&entry1, &block1).unwrap();
        assert_eq!(db.state().value, 0);
        assert_eq!(db.state().coin, 0);
        assert_eq!(db.state().tx, 0);
        assert!(db.read_coin(&Outpoint { txid, index: 0 }).unwrap().is_none());
        assert!(db.read_coin(&Outpoint { txid, index: 1 }).unwrap().is_none());
    }

    #[test]
    fn register_output_is_locked_and_burned() {
        let (_dir, mut db) = open_fresh();
        let genesis = db.get_tip().unwrap();

        let mut register = plain_output(10, b"name-owner");
        register.covenant.covenant_type = crate::types::CovenantType::Register;
        let cb = coinbase(vec![plain_output(50, b"addr-a"), register]);
        let txid = cb.txid();
        let block1 = Block { header: header(genesis.hash, 1), txs: vec![cb.clone()] };
        let entry1 = ChainEntry { header: block1.header.clone(), height: 1, hash: block1.hash() };

        let mut view = CoinView::new();
        for (i, output) in cb.outputs.iter().enumerate() {
            view.add_coin(Outpoint { txid, index: i as u32 }, CoinEntry { output: output.clone(), height: 1, coinbase: true });
        }
        db.save(&entry1, &block1, Some(view)).unwrap();

        // The plain output counts toward value; the register output is
        // locked (bookkeeping-only, burned, not counted).
        assert_eq!(db.state().value, 50);
        assert_eq!(db.state().burned, 10);
    }

    #[test]
    fn claim_output_only_credits_at_sequence_one() {
        let (_dir, mut db) = open_fresh();
        let genesis = db.get_tip().unwrap();

        let mut claim = plain_output(5, b"claimant");
        claim.covenant.covenant_type = crate::types::CovenantType::Claim;
        claim.covenant.items = vec![vec![], vec![], vec![], vec![], vec![], 2u32.to_le_bytes().to_vec()];
        let cb = coinbase(vec![claim]);
        let txid = cb.txid();
        let block1 = Block { header: header(genesis.hash, 1), txs: vec![cb.clone()] };
        let entry1 = ChainEntry { header: block1.header.clone(), height: 1, hash: block1.hash() };

        let mut view = CoinView::new();
        view.add_coin(Outpoint { txid, index: 0 }, CoinEntry { output: cb.outputs[0].clone(), height: 1, coinbase: true });
        db.save(&entry1, &block1, Some(view)).unwrap();

        // Sequence 2, not 1: not credited even though it's an ordinary
        // unlocked covenant type.
        assert_eq!(db.state().value, 0);
    }
}
