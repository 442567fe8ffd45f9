use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::NaiveDate;
use clap::Args;

use lineage_core::engine::TraceabilityEngine;
use lineage_core::types::{LinkType, NewLink};

use super::{ConfigArgs, open_existing_db};

#[derive(Args, Debug)]
pub struct LinkArgs {
    /// Batch number of the consumed (source) batch
    #[arg(long)]
    pub source: String,

    /// Batch number of the produced (target) batch
    #[arg(long)]
    pub target: String,

    /// Quantity of the source used, in the source batch's unit
    #[arg(long, allow_hyphen_values = true)]
    pub quantity: f64,

    /// Link type: ingredient, product or process
    #[arg(long = "type", default_value = "ingredient")]
    pub link_type: LinkType,

    /// Process step name
    #[arg(long, default_value = "")]
    pub step: String,

    /// Process date (YYYY-MM-DD), defaults to today
    #[arg(long)]
    pub date: Option<NaiveDate>,

    /// Only check the link, do not record it
    #[arg(long)]
    pub dry_run: bool,

    /// SQLite lineage database
    #[arg(long, env = "LINEAGE_DB")]
    pub db: PathBuf,

    #[command(flatten)]
    pub config: ConfigArgs,
}

pub async fn run(args: LinkArgs) -> anyhow::Result<()> {
    let store = Arc::new(open_existing_db(&args.db)?);
    let engine = TraceabilityEngine::over_store(store, args.config.load()?);

    let source = engine
        .find_batch(&args.source)
        .await
        .with_context(|| format!("Cannot resolve source batch {}", args.source))?;
    let target = engine
        .find_batch(&args.target)
        .await
        .with_context(|| format!("Cannot resolve target batch {}", args.target))?;

    let link = NewLink {
        source_batch_id: source.id,
        target_batch_id: target.id,
        link_type: args.link_type,
        quantity_used: args.quantity,
        process_step: args.step,
        process_date: args
            .date
            .unwrap_or_else(|| chrono::Local::now().date_naive()),
    };

    let warnings = if args.dry_run {
        engine.validate_link(&link).await?
    } else {
        let recorded = engine.record_link(&link).await?;
        println!(
            "Recorded link {}: {} -> {}",
            recorded.id, source.batch_number, target.batch_number
        );
        recorded.warnings
    };
    for w in &warnings {
        println!("warning: {}", serde_json::to_string(w)?);
    }
    if args.dry_run && warnings.is_empty() {
        println!("Link {} -> {} is consistent", source.batch_number, target.batch_number);
    }
    Ok(())
}
