//! `chaindb-undo`: disconnects the current tip by one block, store-only
//! (no network/consensus involvement), for manual recovery. Grounded in
//! the teacher's `tools/undo-block/src/cli.rs`.

use std::path::PathBuf;

use chaindb::kv::OpenMode;
use chaindb::{ChainDb, ChainOptions};
use clap::Parser;

#[derive(Parser)]
#[command(name = "chaindb-undo", about = "Disconnect the current chain tip by one block")]
struct Args {
    /// Directory containing the chain database.
    #[arg(long)]
    base_dir: PathBuf,

    /// Tree-node-commit interval, must match the value the database was
    /// created with.
    #[arg(long, default_value_t = 2016)]
    tree_interval: u32,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let (genesis, flags) = ChainDb::peek_genesis(&args.base_dir)?;
    let mut db = ChainDb::open(
        ChainOptions { base_dir: args.base_dir, mode: OpenMode::ReadWrite, flags, tree_interval: args.tree_interval },
        genesis,
    )?;

    let tip = db.get_tip()?;
    if tip.is_genesis() {
        anyhow::bail!("tip is genesis; nothing to undo");
    }
    let block = db.get_block(&tip.hash)?.ok_or_else(|| anyhow::anyhow!("block body for tip missing"))?;
    db.disconnect(&tip, &block)?;
    tracing::info!(undone = ?tip.hash, new_tip = ?db.state().tip, "undid chain tip");
    Ok(())
}
