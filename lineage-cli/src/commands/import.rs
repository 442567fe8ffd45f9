use std::path::PathBuf;

use anyhow::Context;
use clap::Args;

use lineage_core::store::{MemoryLineageStore, SqliteLineageStore};

#[derive(Args, Debug)]
pub struct ImportArgs {
    /// JSON lineage snapshot
    pub snapshot: PathBuf,

    /// SQLite database to create or update
    #[arg(long, env = "LINEAGE_DB")]
    pub db: PathBuf,
}

pub fn run(args: &ImportArgs) -> anyhow::Result<()> {
    // Loading through the memory store rejects duplicate ids and batch numbers
    // before anything is written.
    let snapshot = MemoryLineageStore::load_json(&args.snapshot)
        .with_context(|| format!("Cannot load snapshot {}", args.snapshot.display()))?
        .snapshot();

    let store = SqliteLineageStore::open(&args.db)
        .with_context(|| format!("Cannot open database {}", args.db.display()))?;
    store
        .import_snapshot(&snapshot)
        .with_context(|| format!("Import into {} failed", args.db.display()))?;

    println!(
        "Imported {} batches and {} links into {} ({} batches, {} links total)",
        snapshot.batches.len(),
        snapshot.links.len(),
        args.db.display(),
        store.batch_count()?,
        store.link_count()?
    );
    Ok(())
}
