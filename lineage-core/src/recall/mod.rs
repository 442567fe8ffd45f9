//! Recall impact: the affected downstream set, quantity accounting and risk.

pub mod attribution;
pub mod calculator;
pub mod rules;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::risk::{HazardClassification, RiskLevel};
use crate::trace::{BatchSummary, TraceWarning};
use crate::types::BatchId;

pub use calculator::{RecallImpactCalculator, RecallRequest};
pub use rules::{ActionKind, RecallRules, RecommendedAction, StandardRecallRules};

/// One downstream batch considered for recall.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AffectedBatch {
    pub batch: BatchSummary,
    /// Hops on the shortest path from the root.
    pub level: u32,
    /// Root-to-batch paths found.
    pub path_count: usize,
    /// Share of this batch traceable to the root, in `[0, 1]`.
    pub fraction: f64,
    /// `fraction` × batch quantity, in the batch's own unit.
    pub affected_quantity: f64,
    /// `affected_quantity` in the root batch's unit; `None` when not comparable.
    pub normalized_quantity: Option<f64>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub unit_incomparable: bool,
    /// Paths sharing links were found; only the largest of them was counted.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub overlapping_paths: bool,
    /// A hop on some path had no computable ratio and counted as 1.0.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub ratio_assumed: bool,
}

/// Result of a recall impact computation. Contains no timestamps or random
/// identifiers: identical inputs serialize identically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactReport {
    pub root: BatchSummary,
    pub depth_bound: u32,
    /// Ordered by (level, batch number, id).
    pub affected: Vec<AffectedBatch>,
    pub total_affected_batches: usize,
    /// Sum of comparable affected quantities, in `quantity_unit` (the root's unit).
    pub total_affected_quantity: f64,
    pub quantity_unit: String,
    /// Raw affected quantities per reported unit, including incomparable ones.
    pub totals_by_unit: BTreeMap<String, f64>,
    /// Batches left out of `total_affected_quantity` for lack of a unit conversion.
    pub incomparable_batches: usize,
    /// The hazard classification the risk was derived from, if any.
    pub hazard: Option<HazardClassification>,
    pub risk_level: RiskLevel,
    /// The risk was raised one level for the scale of the recall.
    pub escalated: bool,
    /// Some affected batches may be missing (depth bound, cycle, path budget).
    pub truncated: bool,
    pub warnings: Vec<TraceWarning>,
    pub recommended_actions: Vec<RecommendedAction>,
}

impl ImpactReport {
    pub fn affected_batch(&self, id: BatchId) -> Option<&AffectedBatch> {
        self.affected.iter().find(|a| a.batch.id == id)
    }
}
