use std::fmt::Write as _;

use anyhow::Context;
use clap::Args;

use lineage_core::recall::ImpactReport;
use lineage_core::risk::HazardAssessment;

use super::{SourceArgs, fmt_quantity, interrupt_token};

#[derive(Args, Debug)]
pub struct RecallArgs {
    /// Batch number of the implicated batch
    pub batch: String,

    /// Maximum downstream hops (defaults to traversal.recall_depth)
    #[arg(long, allow_hyphen_values = true)]
    pub depth: Option<i64>,

    /// Hazard likelihood score, 1-5
    #[arg(long, requires = "severity")]
    pub likelihood: Option<u8>,

    /// Hazard severity score, 1-5
    #[arg(long, requires = "likelihood")]
    pub severity: Option<u8>,

    /// Output format: text or json
    #[arg(long, default_value = "text")]
    pub format: String,

    #[command(flatten)]
    pub source: SourceArgs,
}

pub async fn run(args: RecallArgs) -> anyhow::Result<()> {
    let hazard = match (args.likelihood, args.severity) {
        (Some(likelihood), Some(severity)) => Some(HazardAssessment::new(likelihood, severity)?),
        _ => None,
    };
    let engine = args.source.open_engine()?;
    let root = engine
        .find_batch(&args.batch)
        .await
        .with_context(|| format!("Cannot resolve batch {}", args.batch))?;

    let cancel = interrupt_token();
    let report = engine
        .compute_recall_impact(root.id, args.depth, hazard, &cancel)
        .await
        .with_context(|| format!("Recall impact of {} failed", root.batch_number))?;

    match args.format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        _ => print!("{}", render_text(&report)),
    }
    Ok(())
}

pub fn render_text(report: &ImpactReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Recall impact of {} ({}), depth {}",
        report.root.batch_number, report.root.product_name, report.depth_bound
    );
    let _ = writeln!(
        out,
        "Affected batches: {}, quantity: {} {}",
        report.total_affected_batches,
        fmt_quantity(report.total_affected_quantity),
        report.quantity_unit
    );
    if report.incomparable_batches > 0 {
        let _ = writeln!(
            out,
            "Excluded from total (incomparable units): {}",
            report.incomparable_batches
        );
    }
    let escalated = if report.escalated { " (escalated)" } else { "" };
    let _ = writeln!(out, "Risk: {}{escalated}", report.risk_level);
    if let Some(h) = &report.hazard {
        let _ = writeln!(
            out,
            "Hazard: likelihood {} x severity {} = {} -> {}",
            h.likelihood, h.severity, h.score, h.strategy
        );
    }

    if !report.affected.is_empty() {
        out.push_str("\nAffected:\n");
        for a in &report.affected {
            let normalized = match a.normalized_quantity {
                Some(q) => format!("{} {}", fmt_quantity(q), report.quantity_unit),
                None => "not comparable".to_string(),
            };
            let _ = writeln!(
                out,
                "  L{} {} ({}) [{}] fraction {:.3}, {} {} of {} {} ({normalized}), {} path(s)",
                a.level,
                a.batch.batch_number,
                a.batch.product_name,
                a.batch.status,
                a.fraction,
                fmt_quantity(a.affected_quantity),
                a.batch.unit,
                fmt_quantity(a.batch.quantity),
                a.batch.unit,
                a.path_count
            );
        }
    }

    if !report.recommended_actions.is_empty() {
        out.push_str("\nRecommended actions:\n");
        for action in &report.recommended_actions {
            if action.batches.is_empty() {
                let _ = writeln!(out, "  - {}", action.detail);
            } else {
                let _ = writeln!(out, "  - {}: {}", action.detail, action.batches.join(", "));
            }
        }
    }

    if !report.warnings.is_empty() {
        out.push_str("\nWarnings:\n");
        for w in &report.warnings {
            let _ = writeln!(out, "  - {}", serde_json::to_string(w).unwrap_or_default());
        }
    }
    if report.truncated {
        out.push_str("\nTRUNCATED: some affected batches may be missing\n");
    }
    out
}
