//! Lineage traversal: the bounded subgraph builder and the trace resolver that
//! turns the subgraph into an ordered, presentable tree.

pub mod builder;
pub mod resolver;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::types::{
    Batch, BatchId, BatchStatus, BatchType, EdgeDirection, LineageLink, LinkId, TraceDirection,
};

pub use builder::{FetchLimits, GraphRequest, LineageGraphBuilder, LineageSubgraph};
pub use resolver::{TraceRequest, TraceResolver};

/// The batch fields a trace view needs, copied out of the registry record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub id: BatchId,
    pub batch_number: String,
    pub product_name: String,
    #[serde(rename = "type")]
    pub batch_type: BatchType,
    pub status: BatchStatus,
    pub quantity: f64,
    pub unit: String,
}

impl From<&Batch> for BatchSummary {
    fn from(b: &Batch) -> Self {
        Self {
            id: b.id,
            batch_number: b.batch_number.clone(),
            product_name: b.product_name.clone(),
            batch_type: b.batch_type,
            status: b.status,
            quantity: b.quantity,
            unit: b.unit.clone(),
        }
    }
}

/// Irregularities in the stored lineage that a node was reached through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TraceAnomaly {
    /// The batch and its parent have links in both directions between them.
    MutualLink,
    /// The per-hop ratio could not be computed (incomparable units) and 1.0 was assumed.
    RatioAssumed,
}

/// One traversed link, seen from the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceNode {
    pub batch: BatchSummary,
    /// Hop distance from the root (1 = direct neighbor).
    pub level: u32,
    pub direction: EdgeDirection,
    /// The link that produced this node.
    pub link: LineageLink,
    /// Share of the downstream batch's content traceable to the upstream end of
    /// the path, multiplied hop by hop. Never increases with depth.
    pub fraction: f64,
    /// Quantity traceable along this path, in `quantity_unit`: for downstream
    /// nodes the part of this batch made from the root, for upstream nodes the
    /// part of the root made from this batch.
    pub attributed_quantity: f64,
    pub quantity_unit: String,
    /// The batch is expanded at another node of this tree; this occurrence
    /// records the extra path only and carries no children.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub shared: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub anomalies: Vec<TraceAnomaly>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TraceNode>,
}

impl TraceNode {
    fn walk<'a>(&'a self, out: &mut Vec<&'a TraceNode>) {
        out.push(self);
        for child in &self.children {
            child.walk(out);
        }
    }
}

/// Non-fatal conditions encountered while tracing or aggregating.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum TraceWarning {
    /// These batches form a cycle; traversal stopped at the revisit.
    CycleDetected { batches: Vec<BatchId> },
    /// The depth bound was reached while these batches still had unexplored links.
    DepthExceeded {
        direction: EdgeDirection,
        depth: u32,
        boundary: Vec<BatchId>,
    },
    /// The resolver stopped emitting nodes after this many.
    NodeLimitReached { limit: usize },
    /// Path enumeration for attribution stopped after this many paths.
    PathLimitReached { limit: usize },
    /// `batch` and `neighbor` are linked in both directions.
    MutualLink { batch: BatchId, neighbor: BatchId },
    /// A hop ratio could not be computed because the link's units don't convert.
    RatioAssumed { link: LinkId },
    /// The batch's quantity has no conversion to the root unit and is excluded from totals.
    UnitIncomparable {
        batch: BatchId,
        unit: String,
        root_unit: String,
    },
    /// Several paths reaching the batch share links; the largest was used.
    OverlappingPaths { batch: BatchId },
}

impl TraceWarning {
    /// Warnings that mean the result may be missing batches.
    pub fn marks_incomplete(&self) -> bool {
        matches!(
            self,
            Self::CycleDetected { .. }
                | Self::DepthExceeded { .. }
                | Self::NodeLimitReached { .. }
                | Self::PathLimitReached { .. }
        )
    }
}

/// The traceability chain for one root batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceTree {
    pub root: BatchSummary,
    pub direction: TraceDirection,
    pub depth_bound: u32,
    /// Products made from the root, ordered by (process date, batch number).
    pub downstream: Vec<TraceNode>,
    /// Ingredients of the root, same ordering.
    pub upstream: Vec<TraceNode>,
    /// The tree may be incomplete (depth bound, cycle, or node budget).
    pub truncated: bool,
    pub warnings: Vec<TraceWarning>,
}

impl TraceTree {
    /// All nodes in presentation order: downstream pre-order, then upstream.
    pub fn flatten(&self) -> Vec<&TraceNode> {
        let mut out = Vec::new();
        for node in self.downstream.iter().chain(&self.upstream) {
            node.walk(&mut out);
        }
        out
    }

    pub fn node_count(&self) -> usize {
        self.flatten().len()
    }

    /// Distinct batches reached in one direction.
    pub fn batches_in(&self, direction: EdgeDirection) -> BTreeSet<BatchId> {
        self.flatten()
            .into_iter()
            .filter(|n| n.direction == direction)
            .map(|n| n.batch.id)
            .collect()
    }

    pub fn has_cycle(&self) -> bool {
        self.warnings
            .iter()
            .any(|w| matches!(w, TraceWarning::CycleDetected { .. }))
    }

    pub fn depth_exceeded(&self) -> bool {
        self.warnings
            .iter()
            .any(|w| matches!(w, TraceWarning::DepthExceeded { .. }))
    }
}
