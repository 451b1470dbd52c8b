//! Block, transaction, output, and covenant shapes (`spec.md` §3).
//!
//! These are the caller's validated data structures: ChainDB treats them as
//! opaque payloads it stores and walks, not as something it validates
//! (validation is out of scope per `spec.md` §1).

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::{Amount, CovenantType, Hash, Height};

/// Side-data on an output encoding a name-system operation. `items` holds
/// the covenant's raw operands; claim sequence numbers and similar fields
/// are read out of `items` by index rather than given named fields, the
/// same way the teacher treats opaque `Vec<u8>` operands in
/// `near_primitives::action::Action` variants it doesn't need to interpret.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Covenant {
    pub covenant_type: CovenantType,
    pub items: Vec<Vec<u8>>,
}

impl Covenant {
    pub fn new(covenant_type: CovenantType) -> Self {
        Covenant { covenant_type, items: Vec::new() }
    }

    /// A claim's sequence number lives in operand index 5 as a little-endian
    /// u32 (`spec.md` §4.I: "the claim's sequence equals 1").
    pub fn claim_sequence(&self) -> Option<u32> {
        self.items.get(5).and_then(|item| item.as_slice().try_into().ok()).map(u32::from_le_bytes)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Output {
    pub value: Amount,
    pub address: Vec<u8>,
    pub covenant: Covenant,
}

impl Output {
    /// An output with no spendable value is skipped entirely by value
    /// accounting (`spec.md` §4.I: "skip if unspendable").
    pub fn is_unspendable(&self) -> bool {
        self.value == 0 && matches!(self.covenant.covenant_type, CovenantType::None)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Input {
    pub prevout: crate::types::Outpoint,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Transaction {
    pub inputs: Vec<Input>,
    pub outputs: Vec<Output>,
}

impl Transaction {
    pub fn is_coinbase(&self) -> bool {
        self.inputs.is_empty()
    }

    pub fn txid(&self) -> Hash {
        let encoded = borsh::to_vec(self).expect("transaction always serializes");
        blake2_hash(&encoded)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct BlockHeader {
    pub prev_block: Hash,
    pub tree_root: Hash,
    pub time: u64,
    pub bits: u32,
    pub nonce: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub txs: Vec<Transaction>,
}

impl Block {
    pub fn hash(&self) -> Hash {
        let encoded = borsh::to_vec(&self.header).expect("header always serializes");
        blake2_hash(&encoded)
    }
}

/// Indexed transaction record, written under `t(txid)` only when `indexTX`
/// is enabled (`spec.md` §6 key `t`).
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct TXMeta {
    pub tx: Transaction,
    pub entry_hash: Hash,
    pub height: Height,
    pub index: u32,
}

pub(crate) fn blake2_hash(data: &[u8]) -> Hash {
    use blake2::Digest;
    let mut hasher = blake2::Blake2b::<blake2::digest::consts::U32>::new();
    hasher.update(data);
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    Hash(out)
}
