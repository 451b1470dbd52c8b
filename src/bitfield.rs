//! Packed bit vector of claim/allocation flags, serialized monolithically
//! (`spec.md` §3, §6 key `f`).

use borsh::{BorshDeserialize, BorshSerialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct BitField {
    bytes: Vec<u8>,
}

impl BitField {
    pub fn new() -> Self {
        BitField::default()
    }

    pub fn get(&self, index: u32) -> bool {
        let (byte, bit) = (index / 8, index % 8);
        self.bytes.get(byte as usize).map(|b| b & (1 << bit) != 0).unwrap_or(false)
    }

    pub fn set(&mut self, index: u32, value: bool) {
        let (byte, bit) = (index / 8, index % 8);
        let byte = byte as usize;
        if self.bytes.len() <= byte {
            self.bytes.resize(byte + 1, 0);
        }
        if value {
            self.bytes[byte] |= 1 << bit;
        } else {
            self.bytes[byte] &= !(1 << bit);
        }
    }

    /// Applies a list of `(index, value)` deltas, as produced by a
    /// [`crate::coins::CoinView`]'s `bits` field.
    pub fn apply_delta(&mut self, delta: &[(u32, bool)]) {
        for &(index, value) in delta {
            self.set(index, value);
        }
    }

    /// The delta needed to revert `delta`: for each index, the bit's value
    /// *before* `delta` was applied. Caller supplies the pre-image because
    /// the bitfield itself doesn't retain history.
    pub fn invert_delta(delta: &[(u32, bool)]) -> Vec<(u32, bool)> {
        delta.iter().map(|&(index, value)| (index, !value)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_roundtrip() {
        let mut bf = BitField::new();
        bf.set(3, true);
        bf.set(17, true);
        assert!(bf.get(3));
        assert!(bf.get(17));
        assert!(!bf.get(4));
        bf.set(3, false);
        assert!(!bf.get(3));
    }

    #[test]
    fn delta_apply_and_revert() {
        let mut bf = BitField::new();
        let delta = vec![(1u32, true), (9u32, true)];
        bf.apply_delta(&delta);
        assert!(bf.get(1) && bf.get(9));
        let inverse = BitField::invert_delta(&delta);
        bf.apply_delta(&inverse);
        assert!(!bf.get(1) && !bf.get(9));
    }
}
