pub mod classify;
pub mod decide;
pub mod import;
pub mod link;
pub mod recall;
pub mod trace;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Args, Subcommand};
use tokio_util::sync::CancellationToken;

use lineage_core::config::ConfigHandle;
use lineage_core::engine::TraceabilityEngine;
use lineage_core::store::{MemoryLineageStore, SqliteLineageStore};

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show the upstream/downstream chain of a batch
    Trace(trace::TraceArgs),
    /// Compute the recall impact of an implicated batch
    Recall(recall::RecallArgs),
    /// Classify a hazard from likelihood and severity scores
    Classify(classify::ClassifyArgs),
    /// Walk the CCP decision tree with a sequence of yes/no answers
    Decide(decide::DecideArgs),
    /// Import a JSON lineage snapshot into a SQLite database
    Import(import::ImportArgs),
    /// Record a new lineage link in a SQLite database
    Link(link::LinkArgs),
}

pub async fn run(cmd: Command) -> anyhow::Result<()> {
    match cmd {
        Command::Trace(args) => trace::run(args).await,
        Command::Recall(args) => recall::run(args).await,
        Command::Classify(args) => classify::run(&args),
        Command::Decide(args) => decide::run(&args),
        Command::Import(args) => import::run(&args),
        Command::Link(args) => link::run(args).await,
    }
}

/// Where lineage data and configuration come from.
#[derive(Args, Debug)]
pub struct SourceArgs {
    /// JSON lineage snapshot to load into memory
    #[arg(long, conflicts_with = "db")]
    pub snapshot: Option<PathBuf>,

    /// SQLite lineage database
    #[arg(long, env = "LINEAGE_DB")]
    pub db: Option<PathBuf>,

    #[command(flatten)]
    pub config: ConfigArgs,
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Configuration file (lineage.toml)
    #[arg(long = "config", env = "LINEAGE_CONFIG")]
    pub path: Option<PathBuf>,
}

impl ConfigArgs {
    pub fn load(&self) -> anyhow::Result<ConfigHandle> {
        match &self.path {
            Some(path) => ConfigHandle::from_path(path)
                .with_context(|| format!("Cannot load config from {}", path.display())),
            None => Ok(ConfigHandle::default()),
        }
    }
}

impl SourceArgs {
    /// Build an engine over whichever store was selected.
    pub fn open_engine(&self) -> anyhow::Result<TraceabilityEngine> {
        let config = self.config.load()?;
        match (&self.snapshot, &self.db) {
            (Some(path), _) => {
                let store = MemoryLineageStore::load_json(path)
                    .with_context(|| format!("Cannot load snapshot {}", path.display()))?;
                tracing::debug!(
                    batches = store.batch_count(),
                    links = store.link_count(),
                    "Loaded snapshot"
                );
                Ok(TraceabilityEngine::over_store(Arc::new(store), config))
            }
            (None, Some(path)) => {
                let store = open_existing_db(path)?;
                Ok(TraceabilityEngine::over_store(Arc::new(store), config))
            }
            (None, None) => bail!("No lineage source: pass --snapshot <FILE> or --db <FILE>"),
        }
    }
}

pub fn open_existing_db(path: &Path) -> anyhow::Result<SqliteLineageStore> {
    if !path.exists() {
        bail!("Database not found: {}", path.display());
    }
    SqliteLineageStore::open(path)
        .with_context(|| format!("Cannot open database {}", path.display()))
}

/// Token cancelled on Ctrl-C, so an interrupted request stops its fetches.
pub fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling request");
            child.cancel();
        }
    });
    token
}

/// Format a quantity without trailing zeros.
pub fn fmt_quantity(value: f64) -> String {
    let s = format!("{value:.3}");
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantities_drop_trailing_zeros() {
        assert_eq!(fmt_quantity(50.0), "50");
        assert_eq!(fmt_quantity(12.5), "12.5");
        assert_eq!(fmt_quantity(0.3333), "0.333");
    }
}
