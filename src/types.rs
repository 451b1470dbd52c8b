//! Primitive types shared across the crate: hashes, heights, amounts, and
//! the covenant taxonomy that drives value accounting (`spec.md` §3, §9).

use borsh::{BorshDeserialize, BorshSerialize};

/// 32-byte opaque digest. Used for block hashes, txids, and name hashes.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize, Default,
)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    pub const ZERO: Hash = Hash([0u8; 32]);

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0[..4] {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, "..")
    }
}

impl From<[u8; 32]> for Hash {
    fn from(value: [u8; 32]) -> Self {
        Hash(value)
    }
}

pub type Height = u32;
pub type Amount = u64;

/// Covenant discriminant. The range `Register..=Revoke` is the "locked"
/// range with special value-accounting rules (`spec.md` §4.I, §9).
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash,
    BorshSerialize, BorshDeserialize, strum::EnumIter, strum::FromRepr,
)]
#[repr(u8)]
pub enum CovenantType {
    None = 0,
    Claim = 1,
    Open = 2,
    Bid = 3,
    Reveal = 4,
    Redeem = 5,
    Register = 6,
    Update = 7,
    Renew = 8,
    Transfer = 9,
    Finalize = 10,
    Revoke = 11,
}

impl CovenantType {
    /// `spec.md` §3: the `REGISTER..=REVOKE` range is locked — these coins
    /// neither count toward `value` nor are removed from the ledger when
    /// spent; they are bookkeeping-only.
    pub fn is_locked(self) -> bool {
        matches!(
            self,
            CovenantType::Register
                | CovenantType::Update
                | CovenantType::Renew
                | CovenantType::Transfer
                | CovenantType::Finalize
                | CovenantType::Revoke
        )
    }

    pub fn is_register(self) -> bool {
        matches!(self, CovenantType::Register)
    }

    pub fn is_claim(self) -> bool {
        matches!(self, CovenantType::Claim)
    }
}

/// An outpoint: the transaction id and output index it refers to.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize)]
pub struct Outpoint {
    pub txid: Hash,
    pub index: u32,
}

impl std::fmt::Debug for Outpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}:{}", self.txid, self.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locked_range_is_exactly_register_through_revoke() {
        let locked = [
            CovenantType::Register,
            CovenantType::Update,
            CovenantType::Renew,
            CovenantType::Transfer,
            CovenantType::Finalize,
            CovenantType::Revoke,
        ];
        for covenant_type in locked {
            assert!(covenant_type.is_locked(), "{covenant_type:?} should be locked");
        }
        let unlocked = [
            CovenantType::None,
            CovenantType::Claim,
            CovenantType::Open,
            CovenantType::Bid,
            CovenantType::Reveal,
            CovenantType::Redeem,
        ];
        for covenant_type in unlocked {
            assert!(!covenant_type.is_locked(), "{covenant_type:?} should not be locked");
        }
    }

    #[test]
    fn hash_zero_is_all_zero_bytes() {
        assert_eq!(Hash::ZERO.as_bytes(), &[0u8; 32]);
    }
}
