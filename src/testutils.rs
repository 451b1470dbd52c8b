//! Shared test fixtures: a genesis-only `ChainDb` in a tempdir, and a few
//! small builders for blocks/transactions. Grounded in the teacher's
//! `chain/chain/src/tests/simple_chain.rs` / `core/epoch-manager/src/test_utils.rs`
//! pattern of a small builder-returning-fixture reused across test modules.
//!
//! Only compiled under `#[cfg(test)]`; integration tests under `tests/`
//! have their own copy since they can't see crate-internal `#[cfg(test)]`
//! items.

#![cfg(test)]

use tempfile::TempDir;

use crate::block::{Block, BlockHeader, Covenant, Input, Output, Transaction};
use crate::engine::{ChainDb, ChainOptions};
use crate::kv::OpenMode;
use crate::state::{ChainFlags, Network};
use crate::types::{Amount, CovenantType, Hash, Outpoint};

pub const TREE_INTERVAL: u32 = 4;

pub fn genesis_block() -> Block {
    Block {
        header: BlockHeader { prev_block: Hash::ZERO, tree_root: Hash::ZERO, time: 0, bits: 0, nonce: 0 },
        txs: Vec::new(),
    }
}

/// Opens a fresh database in a fresh tempdir, returning both so the
/// tempdir outlives the db (dropping it deletes the directory).
pub fn open_fresh() -> (TempDir, ChainDb) {
    let dir = tempfile::tempdir().unwrap();
    let opts = ChainOptions {
        base_dir: dir.path().to_path_buf(),
        mode: OpenMode::ReadWrite,
        flags: ChainFlags::new(Network::Regtest),
        tree_interval: TREE_INTERVAL,
    };
    let db = ChainDb::open(opts, genesis_block()).unwrap();
    (dir, db)
}

pub fn plain_output(value: Amount, address: &[u8]) -> Output {
    Output { value, address: address.to_vec(), covenant: Covenant::new(CovenantType::None) }
}

pub fn spend(outpoint: Outpoint, outputs: Vec<Output>) -> Transaction {
    Transaction { inputs: vec![Input { prevout: outpoint }], outputs }
}

pub fn coinbase(outputs: Vec<Output>) -> Transaction {
    Transaction { inputs: Vec::new(), outputs }
}
