//! ChainDB: the persistence and state-management core of a name-aware
//! UTXO chain node. Owns block/header storage, the UTXO set, an
//! authenticated name-state Merkle tree, and the atomic connect,
//! reconnect, disconnect, reset, prune, and tree-compaction operations
//! that keep them in sync (`spec.md` §1).
//!
//! Validation, networking, and mempool logic live outside this crate;
//! callers hand ChainDB already-validated blocks and coin views.

pub mod batch;
pub mod bitfield;
pub mod blobs;
pub mod block;
pub mod cache;
pub mod coins;
pub mod engine;
pub mod entry;
pub mod error;
pub mod kv;
pub mod layout;
pub mod names;
pub mod read;
pub mod state;
pub mod tree;
pub mod types;
pub mod validator;

mod apply;

#[cfg(test)]
mod testutils;

pub use batch::Batch;
pub use block::{Block, BlockHeader, Covenant, Input, Output, Transaction, TXMeta};
pub use coins::{CoinEntry, CoinView, UndoCoin, UndoCoins};
pub use engine::{ChainDb, ChainOptions};
pub use entry::ChainEntry;
pub use error::{ChainDbError, Result};
pub use names::{NameDelta, NameState, NameUndo};
pub use read::{BlockRef, NameStatus};
pub use state::{ChainFlags, ChainState, Deployment, Deployments, Network, TreeState};
pub use tree::Proof;
pub use types::{Amount, CovenantType, Hash, Height, Outpoint};
pub use validator::{Finding, StoreValidator};
