//! `chaindb-validate`: walks every invariant in `spec.md` §8 against an
//! on-disk database and reports pass/fail counts. Grounded in the
//! teacher's `test-utils/store-validator/src/main.rs`.

use std::path::PathBuf;
use std::process;

use chaindb::kv::OpenMode;
use chaindb::validator::StoreValidator;
use chaindb::{ChainDb, ChainOptions};
use clap::Parser;

#[derive(Parser)]
#[command(name = "chaindb-validate", about = "Check a chain database against its invariants")]
struct Args {
    /// Directory containing the chain database.
    #[arg(long)]
    base_dir: PathBuf,

    #[arg(long, default_value_t = 2016)]
    tree_interval: u32,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let (genesis, flags) = ChainDb::peek_genesis(&args.base_dir)?;
    let mut db = ChainDb::open(
        ChainOptions { base_dir: args.base_dir, mode: OpenMode::ReadOnly, flags, tree_interval: args.tree_interval },
        genesis,
    )?;

    let mut validator = StoreValidator::new(&mut db);
    validator.validate()?;

    println!("conditions validated: {}", validator.checks_run);
    for finding in &validator.findings {
        println!("{}  {}", finding.check, finding.detail);
    }

    if validator.is_failed() {
        println!("errors found: {}", validator.findings.len());
        process::exit(1);
    }
    println!("no errors found");
    Ok(())
}
