//! Coin and coin-view shapes (`spec.md` §3): the spendable form of an
//! output, the working set a block mutates, and the undo log that lets a
//! disconnect restore it.

use std::collections::HashMap;

use borsh::{BorshDeserialize, BorshSerialize};

use crate::block::Output;
use crate::names::NameState;
use crate::types::{Hash, Height, Outpoint};

/// The spendable form of an output plus the height it was created at.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct CoinEntry {
    pub output: Output,
    pub height: Height,
    pub coinbase: bool,
}

/// One entry in an [`UndoCoins`] log: the coin consumed by a spent input,
/// recorded in reverse-application order.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct UndoCoin {
    pub outpoint: Outpoint,
    pub coin: CoinEntry,
}

/// Ordered list of coins consumed by a block, in reverse-application order
/// (`spec.md` §3). Written once per connected block that spends inputs.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct UndoCoins {
    pub coins: Vec<UndoCoin>,
}

impl UndoCoins {
    pub fn is_empty(&self) -> bool {
        self.coins.is_empty()
    }

    pub fn push(&mut self, outpoint: Outpoint, coin: CoinEntry) {
        self.coins.push(UndoCoin { outpoint, coin });
    }
}

/// A coin tracked in a [`CoinView`], with the `spent` flag the view uses to
/// decide, on save, whether to delete or persist it (`spec.md` §4.I
/// `saveView`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ViewCoin {
    pub entry: CoinEntry,
    pub spent: bool,
    /// Set when this entry was freshly created by the block being applied
    /// (as opposed to loaded from storage to be spent); only entries that
    /// are live and dirty need to be written back.
    pub dirty: bool,
}

/// A block's working set: outpoint → coin, an undo log of coins consumed so
/// far, per-name state deltas, and a bitfield delta (`spec.md` §3).
#[derive(Clone, Debug, Default)]
pub struct CoinView {
    pub coins: HashMap<Outpoint, ViewCoin>,
    pub undo: UndoCoins,
    pub names: HashMap<Hash, Option<NameState>>,
    pub bits: Vec<(u32, bool)>,
}

impl CoinView {
    pub fn new() -> Self {
        CoinView::default()
    }

    /// Records a coin entering the view as unspent (used both when applying
    /// a new output and when restoring one from undo data).
    pub fn add_coin(&mut self, outpoint: Outpoint, entry: CoinEntry) {
        self.coins.insert(outpoint, ViewCoin { entry, spent: false, dirty: true });
    }

    pub fn mark_spent(&mut self, outpoint: Outpoint, entry: CoinEntry) {
        self.coins.insert(outpoint, ViewCoin { entry, spent: true, dirty: true });
    }

    pub fn get(&self, outpoint: &Outpoint) -> Option<&CoinEntry> {
        self.coins.get(outpoint).map(|c| &c.entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Covenant;
    use crate::types::CovenantType;

    fn coin(value: u64) -> CoinEntry {
        CoinEntry {
            output: Output { value, address: Vec::new(), covenant: Covenant::new(CovenantType::None) },
            height: 1,
            coinbase: false,
        }
    }

    #[test]
    fn mark_spent_then_get_still_returns_the_coin() {
        let mut view = CoinView::new();
        let outpoint = Outpoint { txid: Hash::ZERO, index: 0 };
        view.add_coin(outpoint, coin(10));
        view.mark_spent(outpoint, coin(10));
        assert_eq!(view.get(&outpoint).unwrap().output.value, 10);
        assert!(view.coins.get(&outpoint).unwrap().spent);
    }

    #[test]
    fn undo_push_preserves_order() {
        let mut undo = UndoCoins::default();
        assert!(undo.is_empty());
        let a = Outpoint { txid: Hash::ZERO, index: 0 };
        let b = Outpoint { txid: Hash::ZERO, index: 1 };
        undo.push(a, coin(5));
        undo.push(b, coin(6));
        assert_eq!(undo.coins[0].outpoint, a);
        assert_eq!(undo.coins[1].outpoint, b);
        assert!(!undo.is_empty());
    }
}
