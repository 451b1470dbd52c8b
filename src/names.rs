//! Per-name authenticated state (`spec.md` §3). `NameState` lives only in
//! the authenticated tree (component C), never in the meta store; `w(height)`
//! undo records (component A) hold the deltas needed to revert it.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::{Hash, Height};

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct NameState {
    pub name: Vec<u8>,
    pub owner: Hash,
    pub height: Height,
    pub renewal: Height,
    pub registered: bool,
    pub expired: bool,
    /// Raw bid/reveal data accumulated during the auction; kept opaque
    /// since this crate doesn't interpret auction rules (out of scope per
    /// `spec.md` §1).
    pub data: Vec<u8>,
}

impl NameState {
    pub fn name_hash(&self) -> Hash {
        let encoded = borsh::to_vec(&self.name).expect("name always serializes");
        crate::block::blake2_hash(&encoded)
    }
}

/// One `(nameHash, delta)` pair needed to revert a name-state change for
/// one block (`spec.md` §3). `before` is `None` when the name didn't exist
/// prior to the block (so reverting removes it).
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct NameDelta {
    pub name_hash: Hash,
    pub before: Option<NameState>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct NameUndo {
    pub deltas: Vec<NameDelta>,
    /// The bitfield delta to re-apply to restore this block's pre-connect
    /// bitfield, i.e. the inverse of the delta `connectBlock` applied.
    /// `spec.md` §6 lists no dedicated bits-undo key, but §4.I's
    /// `disconnectBlock` calls for reverting the bitfield when undoing the
    /// coinbase transaction, so it rides along on the same per-height
    /// undo record as the name-tree deltas.
    pub bits: Vec<(u32, bool)>,
}

impl NameUndo {
    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty() && self.bits.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_undo_is_empty() {
        assert!(NameUndo::default().is_empty());
    }

    #[test]
    fn bits_alone_make_undo_non_empty() {
        let undo = NameUndo { deltas: Vec::new(), bits: vec![(3, true)] };
        assert!(!undo.is_empty());
    }

    #[test]
    fn name_hash_is_stable_for_same_name() {
        let a = NameState {
            name: b"example".to_vec(),
            owner: Hash::ZERO,
            height: 1,
            renewal: 1,
            registered: true,
            expired: false,
            data: Vec::new(),
        };
        let mut b = a.clone();
        b.height = 2;
        assert_eq!(a.name_hash(), b.name_hash());

        let mut c = a.clone();
        c.name = b"other".to_vec();
        assert_ne!(a.name_hash(), c.name_hash());
    }
}
