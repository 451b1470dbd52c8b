//! Key layout and column families (`spec.md` §6), grounded in the teacher's
//! `core/store/src/columns.rs` `DBCol` enum: one RocksDB column family per
//! logical table instead of one flat keyspace with a leading prefix byte
//! (see `SPEC_FULL.md` §REDESIGN FLAGS). `Column::prefix_byte()` documents
//! the prefix byte the distilled spec names, for readers cross-referencing
//! `spec.md` §6.

use crate::types::{Hash, Height};

/// One column family per logical table. Mirrors the teacher's `DBCol`:
/// variant names are documented with *rows* / *content type*, and the
/// ordering here is append-only — never reorder or reuse a discriminant,
/// only add new variants, to keep existing on-disk column names stable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::EnumIter, strum::IntoStaticStr)]
pub enum Column {
    /// Schema version record. *Rows*: single row. *Content*: ASCII
    /// `"chain"` followed by a u32-LE version (`spec.md` §6 key `V`).
    Version,
    /// Persisted `ChainFlags`. *Rows*: single row (`spec.md` §6 key `O`).
    Flags,
    /// Persisted `ChainState`. *Rows*: single row (`spec.md` §6 key `R`).
    State,
    /// Persisted `TreeState`. *Rows*: single row (`spec.md` §6 key `s`).
    TreeState,
    /// Deployment table. *Rows*: single row (`spec.md` §6 key `D`).
    Deployments,
    /// `BitField`. *Rows*: single row (`spec.md` §6 key `f`).
    BitField,
    /// hash → height. *Rows*: block hash (`spec.md` §6 key `h`).
    HashToHeight,
    /// height → hash, main chain only. *Rows*: height (`spec.md` §6 key `H`).
    HeightToHash,
    /// hash → `ChainEntry`. *Rows*: block hash (`spec.md` §6 key `e`).
    Entry,
    /// hash → next-block hash, main chain only. *Rows*: block hash
    /// (`spec.md` §6 key `n`).
    Next,
    /// Tip set membership. *Rows*: block hash, empty value (`spec.md` §6
    /// key `p`).
    TipSet,
    /// outpoint → `CoinEntry`. *Rows*: (txid, index) (`spec.md` §6 key `c`).
    Coin,
    /// hash → `TXMeta`, only when `indexTX`. *Rows*: txid (`spec.md` §6
    /// key `t`).
    TxMeta,
    /// (addrHash, txid) membership, only when `indexTX && indexAddress`.
    /// (`spec.md` §6 key `T`).
    TxByAddress,
    /// (addrHash, txid, index) membership, only when `indexAddress`.
    /// (`spec.md` §6 key `C`).
    CoinByAddress,
    /// (bit, hash) → 1-byte deployment state (`spec.md` §6 key `v`).
    DeploymentState,
    /// height → `NameUndo` (`spec.md` §6 key `w`).
    NameUndo,
    /// Raw block bytes, keyed by block hash (component B).
    Block,
    /// Raw undo-record bytes, keyed by block hash (component B).
    UndoBlob,
    /// Authenticated tree nodes, keyed by node hash (component C).
    TreeNode,
}

impl Column {
    pub fn all() -> impl Iterator<Item = Column> {
        <Column as strum::IntoEnumIterator>::iter()
    }

    pub fn cf_name(self) -> &'static str {
        self.into()
    }

    /// Documents the single-byte prefix `spec.md` §6 assigns this table,
    /// for readers cross-referencing the distilled spec.
    pub fn prefix_byte(self) -> u8 {
        match self {
            Column::Version => b'V',
            Column::Flags => b'O',
            Column::State => b'R',
            Column::TreeState => b's',
            Column::Deployments => b'D',
            Column::BitField => b'f',
            Column::HashToHeight => b'h',
            Column::HeightToHash => b'H',
            Column::Entry => b'e',
            Column::Next => b'n',
            Column::TipSet => b'p',
            Column::Coin => b'c',
            Column::TxMeta => b't',
            Column::TxByAddress => b'T',
            Column::CoinByAddress => b'C',
            Column::DeploymentState => b'v',
            Column::NameUndo => b'w',
            Column::Block => b'B',
            Column::UndoBlob => b'U',
            Column::TreeNode => b't', // distinct CF from Column::TxMeta despite shared spec prefix letter
        }
    }
}

pub const SCHEMA_MAGIC: &[u8; 5] = b"chain";
pub const SCHEMA_VERSION: u32 = 3;

pub fn height_key(height: Height) -> [u8; 4] {
    height.to_be_bytes()
}

pub fn hash_key(hash: &Hash) -> [u8; 32] {
    hash.0
}

pub fn coin_key(txid: &Hash, index: u32) -> [u8; 36] {
    let mut key = [0u8; 36];
    key[..32].copy_from_slice(&txid.0);
    key[32..].copy_from_slice(&index.to_be_bytes());
    key
}

/// `(addr_hash, txid)` composite key for `Column::TxByAddress`.
pub fn addr_tx_key(addr_hash: &Hash, txid: &Hash) -> [u8; 64] {
    let mut key = [0u8; 64];
    key[..32].copy_from_slice(&addr_hash.0);
    key[32..].copy_from_slice(&txid.0);
    key
}

/// `(addr_hash, txid, index)` composite key for `Column::CoinByAddress`.
pub fn addr_coin_key(addr_hash: &Hash, txid: &Hash, index: u32) -> [u8; 68] {
    let mut key = [0u8; 68];
    key[..32].copy_from_slice(&addr_hash.0);
    key[32..64].copy_from_slice(&txid.0);
    key[64..].copy_from_slice(&index.to_be_bytes());
    key
}

pub fn deployment_state_key(bit: u8, hash: &Hash) -> [u8; 33] {
    let mut key = [0u8; 33];
    key[0] = bit;
    key[1..].copy_from_slice(&hash.0);
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn height_key_sorts_big_endian() {
        assert!(height_key(1) < height_key(2));
        assert!(height_key(255) < height_key(256));
    }

    #[test]
    fn coin_key_distinguishes_index() {
        let txid = Hash([7u8; 32]);
        assert_ne!(coin_key(&txid, 0), coin_key(&txid, 1));
        assert_eq!(coin_key(&txid, 0).len(), 36);
    }

    #[test]
    fn tree_node_shares_prefix_byte_with_tx_meta_but_not_cf_name() {
        assert_eq!(Column::TreeNode.prefix_byte(), Column::TxMeta.prefix_byte());
        assert_ne!(Column::TreeNode.cf_name(), Column::TxMeta.cf_name());
    }

    #[test]
    fn all_columns_have_distinct_cf_names() {
        let names: Vec<_> = Column::all().map(Column::cf_name).collect();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(names.len(), sorted.len());
    }
}
