use serde::{Deserialize, Serialize};

use crate::risk::RiskLevel;
use crate::trace::BatchSummary;
use crate::types::BatchStatus;

use super::ImpactReport;

/// Kinds of follow-up a recall may call for, in the order they are listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    NotifyAuthority,
    RetrieveFromMarket,
    Quarantine,
    /// Batches already recalled or disposed; listed for the record only.
    AlreadyWithdrawn,
    VerifyQuantity,
    ExtendTrace,
}

/// A follow-up step derived from a computed report.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecommendedAction {
    pub kind: ActionKind,
    /// Batch numbers the action applies to, sorted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub batches: Vec<String>,
    pub detail: String,
}

impl RecommendedAction {
    fn new(kind: ActionKind, mut batches: Vec<String>, detail: impl Into<String>) -> Self {
        batches.sort();
        batches.dedup();
        Self {
            kind,
            batches,
            detail: detail.into(),
        }
    }
}

/// Turns an impact report into recommended actions.
pub trait RecallRules: Send + Sync {
    fn recommend(&self, report: &ImpactReport) -> Vec<RecommendedAction>;
}

/// Default recall policy, keyed on batch status and report flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardRecallRules;

impl RecallRules for StandardRecallRules {
    fn recommend(&self, report: &ImpactReport) -> Vec<RecommendedAction> {
        let mut actions = Vec::new();

        if report.risk_level >= RiskLevel::High {
            actions.push(RecommendedAction::new(
                ActionKind::NotifyAuthority,
                vec![report.root.batch_number.clone()],
                format!("{} risk recall; notify the competent authority", report.risk_level),
            ));
        }

        // The implicated batch itself is handled like any affected batch.
        let all: Vec<&BatchSummary> = std::iter::once(&report.root)
            .chain(report.affected.iter().map(|a| &a.batch))
            .collect();
        let numbers_with = |pred: fn(BatchStatus) -> bool| -> Vec<String> {
            all.iter()
                .filter(|b| pred(b.status))
                .map(|b| b.batch_number.clone())
                .collect()
        };

        let released = numbers_with(|s| s == BatchStatus::Released);
        if !released.is_empty() {
            actions.push(RecommendedAction::new(
                ActionKind::RetrieveFromMarket,
                released,
                "released to market; retrieve and hold",
            ));
        }

        let on_site = numbers_with(|s| {
            matches!(
                s,
                BatchStatus::InProduction | BatchStatus::Completed | BatchStatus::Quarantined
            )
        });
        if !on_site.is_empty() {
            actions.push(RecommendedAction::new(
                ActionKind::Quarantine,
                on_site,
                "still on site; quarantine pending investigation",
            ));
        }

        let withdrawn = numbers_with(|s| matches!(s, BatchStatus::Recalled | BatchStatus::Disposed));
        if !withdrawn.is_empty() {
            actions.push(RecommendedAction::new(
                ActionKind::AlreadyWithdrawn,
                withdrawn,
                "already recalled or disposed; no action needed",
            ));
        }

        let incomparable: Vec<String> = report
            .affected
            .iter()
            .filter(|a| a.unit_incomparable || a.ratio_assumed)
            .map(|a| a.batch.batch_number.clone())
            .collect();
        if !incomparable.is_empty() {
            actions.push(RecommendedAction::new(
                ActionKind::VerifyQuantity,
                incomparable,
                format!(
                    "quantity not comparable with {}; verify affected amounts manually",
                    report.quantity_unit
                ),
            ));
        }

        if report.truncated {
            actions.push(RecommendedAction::new(
                ActionKind::ExtendTrace,
                Vec::new(),
                format!(
                    "trace incomplete at depth {}; extend the trace or review cycles",
                    report.depth_bound
                ),
            ));
        }

        actions.sort();
        actions
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::recall::AffectedBatch;
    use crate::types::{BatchId, BatchType};

    fn summary(id: i64, status: BatchStatus) -> BatchSummary {
        BatchSummary {
            id: BatchId(id),
            batch_number: format!("B{id}"),
            product_name: String::new(),
            batch_type: BatchType::FinalProduct,
            status,
            quantity: 10.0,
            unit: "kg".into(),
        }
    }

    fn affected(id: i64, status: BatchStatus) -> AffectedBatch {
        AffectedBatch {
            batch: summary(id, status),
            level: 1,
            path_count: 1,
            fraction: 1.0,
            affected_quantity: 10.0,
            normalized_quantity: Some(10.0),
            unit_incomparable: false,
            overlapping_paths: false,
            ratio_assumed: false,
        }
    }

    fn report(risk: RiskLevel, affected: Vec<AffectedBatch>) -> ImpactReport {
        ImpactReport {
            root: summary(0, BatchStatus::Completed),
            depth_bound: 10,
            total_affected_batches: affected.len(),
            affected,
            total_affected_quantity: 0.0,
            quantity_unit: "kg".into(),
            totals_by_unit: BTreeMap::new(),
            incomparable_batches: 0,
            hazard: None,
            risk_level: risk,
            escalated: false,
            truncated: false,
            warnings: Vec::new(),
            recommended_actions: Vec::new(),
        }
    }

    fn kinds(actions: &[RecommendedAction]) -> Vec<ActionKind> {
        actions.iter().map(|a| a.kind).collect()
    }

    #[test]
    fn low_risk_on_site_only_quarantines() {
        let r = report(RiskLevel::Low, vec![affected(1, BatchStatus::InProduction)]);
        let actions = StandardRecallRules.recommend(&r);
        assert_eq!(kinds(&actions), [ActionKind::Quarantine]);
        assert_eq!(actions[0].batches, ["B0", "B1"]);
    }

    #[test]
    fn high_risk_released_batches_go_to_authority_and_market() {
        let r = report(
            RiskLevel::High,
            vec![
                affected(2, BatchStatus::Released),
                affected(1, BatchStatus::Released),
                affected(3, BatchStatus::Disposed),
            ],
        );
        let actions = StandardRecallRules.recommend(&r);
        assert_eq!(
            kinds(&actions),
            [
                ActionKind::NotifyAuthority,
                ActionKind::RetrieveFromMarket,
                ActionKind::Quarantine,
                ActionKind::AlreadyWithdrawn,
            ]
        );
        assert_eq!(actions[1].batches, ["B1", "B2"]);
        assert_eq!(actions[3].batches, ["B3"]);
    }

    #[test]
    fn flags_add_verification_and_extension() {
        let mut odd = affected(1, BatchStatus::Recalled);
        odd.unit_incomparable = true;
        let mut r = report(RiskLevel::Medium, vec![odd]);
        r.truncated = true;
        let actions = StandardRecallRules.recommend(&r);
        assert!(kinds(&actions).contains(&ActionKind::VerifyQuantity));
        assert_eq!(kinds(&actions).last(), Some(&ActionKind::ExtendTrace));
    }
}
