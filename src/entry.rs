//! `ChainEntry`: a block header plus the chain-position metadata attached
//! once it is accepted (`spec.md` §3). Immutable once written.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::block::BlockHeader;
use crate::types::{Hash, Height};

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ChainEntry {
    pub header: BlockHeader,
    pub height: Height,
    pub hash: Hash,
}

impl ChainEntry {
    pub fn genesis(header: BlockHeader) -> Self {
        let encoded = borsh::to_vec(&header).expect("header always serializes");
        let hash = crate::block::blake2_hash(&encoded);
        ChainEntry { header, height: 0, hash }
    }

    pub fn is_genesis(&self) -> bool {
        self.height == 0
    }

    pub fn prev_block(&self) -> Hash {
        self.header.prev_block
    }

    pub fn tree_root(&self) -> Hash {
        self.header.tree_root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_entry_has_height_zero_and_derived_hash() {
        let header = BlockHeader { prev_block: Hash::ZERO, tree_root: Hash::ZERO, time: 0, bits: 0, nonce: 0 };
        let entry = ChainEntry::genesis(header.clone());
        assert!(entry.is_genesis());
        assert_eq!(entry.height, 0);
        assert_eq!(entry.prev_block(), Hash::ZERO);
        assert_eq!(entry.tree_root(), Hash::ZERO);

        let encoded = borsh::to_vec(&header).unwrap();
        assert_eq!(entry.hash, crate::block::blake2_hash(&encoded));
    }
}
