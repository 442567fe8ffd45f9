use std::fmt::Write as _;

use anyhow::Context;
use clap::Args;

use lineage_core::trace::{TraceNode, TraceTree};
use lineage_core::types::TraceDirection;

use super::{SourceArgs, fmt_quantity, interrupt_token};

#[derive(Args, Debug)]
pub struct TraceArgs {
    /// Batch number of the root batch
    pub batch: String,

    /// Direction: forward (downstream), backward (upstream) or full
    #[arg(short, long, default_value = "forward")]
    pub direction: TraceDirection,

    /// Maximum hops from the root (defaults to traversal.default_depth)
    #[arg(long, allow_hyphen_values = true)]
    pub depth: Option<i64>,

    /// Output format: text or json
    #[arg(long, default_value = "text")]
    pub format: String,

    #[command(flatten)]
    pub source: SourceArgs,
}

pub async fn run(args: TraceArgs) -> anyhow::Result<()> {
    let engine = args.source.open_engine()?;
    let root = engine
        .find_batch(&args.batch)
        .await
        .with_context(|| format!("Cannot resolve batch {}", args.batch))?;

    let cancel = interrupt_token();
    let tree = engine
        .resolve_trace(root.id, args.direction, args.depth, &cancel)
        .await
        .with_context(|| format!("Trace of {} failed", root.batch_number))?;

    match args.format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&tree)?),
        _ => print!("{}", render_text(&tree)),
    }
    Ok(())
}

pub fn render_text(tree: &TraceTree) -> String {
    let mut out = String::new();
    let root = &tree.root;
    let _ = writeln!(
        out,
        "{} ({}) [{}, {}] {} {}",
        root.batch_number,
        root.product_name,
        root.batch_type,
        root.status,
        fmt_quantity(root.quantity),
        root.unit
    );
    let _ = writeln!(out, "Direction: {}, depth {}", tree.direction, tree.depth_bound);

    let sections = match tree.direction {
        TraceDirection::Forward => vec![("Downstream", &tree.downstream)],
        TraceDirection::Backward => vec![("Upstream", &tree.upstream)],
        TraceDirection::Full => vec![("Downstream", &tree.downstream), ("Upstream", &tree.upstream)],
    };
    for (title, nodes) in sections {
        let _ = writeln!(out, "\n{title}:");
        if nodes.is_empty() {
            out.push_str("  (none)\n");
        }
        for node in nodes {
            render_node(&mut out, node, 1);
        }
    }

    if !tree.warnings.is_empty() {
        out.push_str("\nWarnings:\n");
        for w in &tree.warnings {
            let _ = writeln!(out, "  - {}", serde_json::to_string(w).unwrap_or_default());
        }
    }
    if tree.truncated {
        out.push_str("\nTRUNCATED: the chain may be incomplete\n");
    }
    out
}

fn render_node(out: &mut String, node: &TraceNode, indent: usize) {
    let b = &node.batch;
    let mut flags = Vec::new();
    if node.shared {
        flags.push("shared".to_string());
    }
    for anomaly in &node.anomalies {
        let name = serde_json::to_value(anomaly)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        flags.push(name);
    }
    let flags = if flags.is_empty() {
        String::new()
    } else {
        format!(" [{}]", flags.join(", "))
    };
    let _ = writeln!(
        out,
        "{:width$}L{} {} ({}) {} {}  fraction {:.3}, {} {} via link {} ({}, {}){}",
        "",
        node.level,
        b.batch_number,
        b.product_name,
        fmt_quantity(b.quantity),
        b.unit,
        node.fraction,
        fmt_quantity(node.attributed_quantity),
        node.quantity_unit,
        node.link.id,
        node.link.link_type,
        node.link.process_date,
        flags,
        width = indent * 2
    );
    for child in &node.children {
        render_node(out, child, indent + 1);
    }
}
