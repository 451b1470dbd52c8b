use crate::types::Hash;

/// Errors returned by caller-facing [`crate::ChainDb`] operations.
///
/// Corruption-class failures (missing invariant data, undo-stream
/// inconsistency) are not represented here: they are asserted, the same way
/// the teacher's GC and store-validator code treats a broken on-disk
/// invariant as a bug rather than an input to handle.
#[derive(Debug, thiserror::Error)]
pub enum ChainDbError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage engine error: {0}")]
    Storage(#[from] rocksdb::Error),

    #[error(
        "database version {got} incompatible with expected {want}; run a migration or use an older build"
    )]
    VersionMismatch { got: u32, want: u32 },

    #[error("chain flags on disk do not match the flags this node was started with")]
    FlagsMismatch,

    #[error("a batch is already active")]
    BatchAlreadyActive,

    #[error("no batch is active")]
    NoActiveBatch,

    #[error("reset target {0:?} is not on the main chain")]
    NotMainChain(Hash),

    #[error("cannot reset while pruning is enabled")]
    ResetWhilePruned,

    #[error("cannot reset a tree that has already been compacted")]
    ResetWhileCompacted,

    #[error("already pruned")]
    AlreadyPruned,

    #[error("prune height range is empty")]
    NothingToPrune,

    #[error("tree is already compacted at root {0:?}")]
    AlreadyCompacted(Hash),

    #[error("lookup and prove are not available in SPV mode")]
    SpvModeUnsupported,

    #[error("tx index is disabled (indexTX=false)")]
    TxIndexDisabled,

    #[error("address index is disabled (indexAddress=false)")]
    AddressIndexDisabled,

    #[error("entry not found: {0:?}")]
    EntryNotFound(Hash),

    #[error("block not found: {0:?}")]
    BlockNotFound(Hash),

    #[error("parent of entry {0:?} is not the current tip")]
    NotTipChild(Hash),

    #[error("undo data missing for block {0:?}")]
    MissingUndo(Hash),
}

pub type Result<T> = std::result::Result<T, ChainDbError>;

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn io_errors_convert_via_from() {
        fn fails() -> Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "boom"))?;
            Ok(())
        }
        assert_matches!(fails(), Err(ChainDbError::Io(_)));
    }

    #[test]
    fn entry_not_found_carries_the_hash() {
        let err = ChainDbError::EntryNotFound(Hash::ZERO);
        assert_matches!(err, ChainDbError::EntryNotFound(h) if h == Hash::ZERO);
    }
}
