// Recall impact computation.
//
// Traces downstream from the implicated batch, attributes each descendant's
// content to the root across all paths, normalizes quantities into the root's
// unit and derives the recall risk from the hazard classification plus a
// one-level bump for large-scale recalls.

use std::collections::{BTreeMap, HashMap};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::EscalationSection;
use crate::risk::{HazardAssessment, HazardClassification, RiskClassifier, RiskLevel};
use crate::trace::resolver::home_links;
use crate::trace::{
    BatchSummary, LineageSubgraph, TraceRequest, TraceResolver, TraceTree, TraceWarning,
};
use crate::types::{BatchId, EdgeDirection, LinkId, TraceDirection};
use crate::units::{UnitConverter, normalize_unit};

use super::attribution::{AttributionOutcome, attribute, hop_ratio};
use super::rules::RecallRules;
use super::{AffectedBatch, ImpactReport};

/// A recall query with a checked depth bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecallRequest {
    pub root: BatchId,
    pub depth: u32,
    /// Likelihood/severity from the hazard assessment, if one was made.
    pub hazard: Option<HazardAssessment>,
}

pub struct RecallImpactCalculator<'a> {
    resolver: TraceResolver<'a>,
    units: &'a dyn UnitConverter,
    classifier: &'a dyn RiskClassifier,
    rules: &'a dyn RecallRules,
    escalation: EscalationSection,
    max_paths: usize,
}

impl std::fmt::Debug for RecallImpactCalculator<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecallImpactCalculator")
            .field("resolver", &self.resolver)
            .field("escalation", &self.escalation)
            .field("max_paths", &self.max_paths)
            .finish_non_exhaustive()
    }
}

impl<'a> RecallImpactCalculator<'a> {
    pub fn new(
        resolver: TraceResolver<'a>,
        units: &'a dyn UnitConverter,
        classifier: &'a dyn RiskClassifier,
        rules: &'a dyn RecallRules,
    ) -> Self {
        Self {
            resolver,
            units,
            classifier,
            rules,
            escalation: EscalationSection::default(),
            max_paths: 50_000,
        }
    }

    #[must_use]
    pub fn with_escalation(mut self, escalation: EscalationSection) -> Self {
        self.escalation = escalation;
        self
    }

    #[must_use]
    pub fn with_max_paths(mut self, max_paths: usize) -> Self {
        self.max_paths = max_paths.max(1);
        self
    }

    /// Compute the impact of recalling `request.root`.
    ///
    /// The hazard assessment is classified before any traversal so bad scores
    /// fail fast. Cancellation or a store failure discards the partial result.
    pub async fn compute(
        &self,
        request: &RecallRequest,
        cancel: &CancellationToken,
    ) -> crate::error::Result<ImpactReport> {
        let hazard = request
            .hazard
            .map(|h| self.classifier.classify(h.likelihood, h.severity))
            .transpose()?;

        let (tree, graph) = self
            .resolver
            .resolve_with_graph(
                &TraceRequest {
                    root: request.root,
                    direction: TraceDirection::Forward,
                    depth: request.depth,
                },
                cancel,
            )
            .await?;

        let report = self.evaluate(&tree, &graph, hazard);
        info!(
            root = %request.root,
            depth = request.depth,
            affected = report.total_affected_batches,
            quantity = report.total_affected_quantity,
            unit = %report.quantity_unit,
            risk = %report.risk_level,
            truncated = report.truncated,
            "Computed recall impact"
        );
        Ok(report)
    }

    /// Build the report from a resolved forward trace and its subgraph.
    pub fn evaluate(
        &self,
        tree: &TraceTree,
        graph: &LineageSubgraph,
        hazard: Option<HazardClassification>,
    ) -> ImpactReport {
        let root = graph.root_batch();
        let outcome = attribute(graph, self.units, self.max_paths);

        // The presentation node budget doesn't limit the report.
        let mut warnings: Vec<TraceWarning> = tree
            .warnings
            .iter()
            .filter(|w| !matches!(w, TraceWarning::NodeLimitReached { .. }))
            .cloned()
            .collect();
        if outcome.path_limit_reached {
            warn!(root = %root.id, limit = self.max_paths, "Attribution path budget exhausted");
            warnings.push(TraceWarning::PathLimitReached {
                limit: self.max_paths,
            });
        }
        warnings.extend(
            outcome
                .assumed_links
                .iter()
                .map(|&link| TraceWarning::RatioAssumed { link }),
        );

        let mut affected = self.affected_batches(graph, &outcome);
        affected.sort_by(|a, b| {
            a.level
                .cmp(&b.level)
                .then_with(|| a.batch.batch_number.cmp(&b.batch.batch_number))
                .then_with(|| a.batch.id.cmp(&b.batch.id))
        });

        let mut totals_by_unit: BTreeMap<String, f64> = BTreeMap::new();
        let mut total = 0.0;
        let mut incomparable = 0;
        for a in &affected {
            *totals_by_unit
                .entry(normalize_unit(&a.batch.unit))
                .or_default() += a.affected_quantity;
            match a.normalized_quantity {
                Some(q) => total += q,
                None => {
                    incomparable += 1;
                    warn!(
                        batch = %a.batch.id,
                        unit = %a.batch.unit,
                        root_unit = %root.unit,
                        "Affected quantity not comparable with root unit"
                    );
                    warnings.push(TraceWarning::UnitIncomparable {
                        batch: a.batch.id,
                        unit: a.batch.unit.clone(),
                        root_unit: root.unit.clone(),
                    });
                }
            }
            if a.overlapping_paths {
                warnings.push(TraceWarning::OverlappingPaths { batch: a.batch.id });
            }
        }

        let hazard_level = hazard.map_or(RiskLevel::Low, |h| h.level);
        let large_scale = affected.len() > self.escalation.large_scale_batches
            || self
                .escalation
                .large_scale_quantity
                .is_some_and(|limit| total > limit);
        let risk_level = if large_scale {
            hazard_level.escalate()
        } else {
            hazard_level
        };

        warnings.sort();
        warnings.dedup();

        let mut report = ImpactReport {
            root: BatchSummary::from(root),
            depth_bound: graph.max_depth(),
            total_affected_batches: affected.len(),
            affected,
            total_affected_quantity: total,
            quantity_unit: root.unit.clone(),
            totals_by_unit,
            incomparable_batches: incomparable,
            hazard,
            risk_level,
            escalated: risk_level > hazard_level,
            truncated: warnings.iter().any(TraceWarning::marks_incomplete),
            warnings,
            recommended_actions: Vec::new(),
        };
        let mut actions = self.rules.recommend(&report);
        actions.sort();
        report.recommended_actions = actions;
        report
    }

    fn affected_batches(
        &self,
        graph: &LineageSubgraph,
        outcome: &AttributionOutcome,
    ) -> Vec<AffectedBatch> {
        let root = graph.root_batch();
        let home = home_links(graph, EdgeDirection::Outgoing);

        let mut affected = Vec::new();
        for id in graph.batch_ids() {
            if id == root.id {
                continue;
            }
            let Some(batch) = graph.batch(id) else {
                continue;
            };
            let (fraction, path_count, overlapping_paths, ratio_assumed, level) =
                match outcome.batches.get(&id) {
                    Some(a) => (a.fraction, a.path_count, a.overlapping, a.ratio_assumed, a.min_level),
                    // Not reached before the path budget ran out: fall back
                    // to the shortest path the trace expanded it through.
                    None => {
                        let (fraction, assumed) = self.home_path_fraction(graph, &home, id);
                        let level = home.get(&id).map_or(0, |&(_, level)| level);
                        (fraction, 1, false, assumed, level)
                    }
                };

            let affected_quantity = fraction * batch.quantity;
            let normalized_quantity = self
                .units
                .convert(affected_quantity, &batch.unit, &root.unit);
            affected.push(AffectedBatch {
                batch: BatchSummary::from(batch),
                level,
                path_count,
                fraction,
                affected_quantity,
                normalized_quantity,
                unit_incomparable: normalized_quantity.is_none(),
                overlapping_paths,
                ratio_assumed,
            });
        }
        affected
    }

    fn home_path_fraction(
        &self,
        graph: &LineageSubgraph,
        home: &HashMap<BatchId, (LinkId, u32)>,
        id: BatchId,
    ) -> (f64, bool) {
        let mut fraction = 1.0;
        let mut assumed = false;
        let mut current = id;
        while let Some(&(link_id, _)) = home.get(&current) {
            let Some(link) = graph
                .links(current, EdgeDirection::Incoming)
                .into_iter()
                .find(|l| l.id == link_id)
            else {
                break;
            };
            let ratio = match (graph.batch(link.source_batch_id), graph.batch(current)) {
                (Some(source), Some(target)) => hop_ratio(link, source, target, self.units),
                _ => None,
            };
            fraction *= ratio.unwrap_or_else(|| {
                assumed = true;
                1.0
            });
            current = link.source_batch_id;
        }
        (fraction, assumed)
    }
}
