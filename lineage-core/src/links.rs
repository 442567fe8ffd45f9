// Checks applied to a link before it is handed to the link store.
//
// Hard problems reject the link. Soft ones are reported as warnings and the
// link is still recorded: the store owns its data and the operator may be
// recording a correction.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::LineageError;
use crate::types::{Batch, BatchStatus, LinkId, NewLink};
use crate::units::UnitConverter;

/// Tolerance for quantity comparisons, in the source unit.
const QUANTITY_EPSILON: f64 = 1e-9;

/// A non-fatal problem with a proposed link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum LinkWarning {
    /// More is used than the source has left after its existing links.
    ExceedsRemaining {
        requested: f64,
        remaining: f64,
        unit: String,
    },
    /// Source and target quantities can't be compared, so attribution through
    /// this link will assume the full ratio.
    UnitMismatch {
        source_unit: String,
        target_unit: String,
    },
    /// The link is dated before the source batch was produced.
    BeforeSourceProduction {
        process_date: NaiveDate,
        production_date: NaiveDate,
    },
    /// The source batch has already been recalled or disposed.
    SourceWithdrawn { status: BatchStatus },
}

/// Outcome of recording a link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedLink {
    pub id: LinkId,
    pub warnings: Vec<LinkWarning>,
}

/// Reject malformed links before any lookup.
pub fn check_shape(link: &NewLink) -> crate::error::Result<()> {
    if !link.quantity_used.is_finite() || link.quantity_used <= 0.0 {
        return Err(LineageError::invalid(format!(
            "quantity_used must be a positive number, got {}",
            link.quantity_used
        )));
    }
    if link.is_self_loop() {
        return Err(LineageError::invalid(format!(
            "batch {} cannot be linked to itself",
            link.source_batch_id
        )));
    }
    Ok(())
}

/// Soft checks against the two endpoint batches. `already_used` is the sum of
/// `quantity_used` over the source's existing outgoing links.
pub fn check_against(
    link: &NewLink,
    source: &Batch,
    target: &Batch,
    already_used: f64,
    units: &dyn UnitConverter,
) -> Vec<LinkWarning> {
    let mut warnings = Vec::new();

    let remaining = (source.quantity - already_used).max(0.0);
    if link.quantity_used > remaining + QUANTITY_EPSILON {
        warnings.push(LinkWarning::ExceedsRemaining {
            requested: link.quantity_used,
            remaining,
            unit: source.unit.clone(),
        });
    }
    if units.factor(&source.unit, &target.unit).is_none() {
        warnings.push(LinkWarning::UnitMismatch {
            source_unit: source.unit.clone(),
            target_unit: target.unit.clone(),
        });
    }
    if link.process_date < source.production_date {
        warnings.push(LinkWarning::BeforeSourceProduction {
            process_date: link.process_date,
            production_date: source.production_date,
        });
    }
    if matches!(source.status, BatchStatus::Recalled | BatchStatus::Disposed) {
        warnings.push(LinkWarning::SourceWithdrawn {
            status: source.status,
        });
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BatchId, BatchType, LinkType, QualityStatus};
    use crate::units::UnitTable;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, day).unwrap()
    }

    fn batch(id: i64, quantity: f64, unit: &str) -> Batch {
        Batch {
            id: BatchId(id),
            batch_number: format!("B{id}"),
            batch_type: BatchType::RawMaterial,
            status: BatchStatus::Completed,
            product_name: String::new(),
            quantity,
            unit: unit.into(),
            production_date: date(10),
            expiry_date: None,
            lot_number: None,
            quality_status: QualityStatus::Pending,
        }
    }

    fn new_link(used: f64, day: u32) -> NewLink {
        NewLink {
            source_batch_id: BatchId(1),
            target_batch_id: BatchId(2),
            link_type: LinkType::Ingredient,
            quantity_used: used,
            process_step: "blend".into(),
            process_date: date(day),
        }
    }

    #[test]
    fn shape_rejects_bad_quantities_and_self_links() {
        assert!(check_shape(&new_link(1.0, 12)).is_ok());
        assert!(matches!(
            check_shape(&new_link(0.0, 12)),
            Err(LineageError::InvalidInput(_))
        ));
        assert!(check_shape(&new_link(f64::NAN, 12)).is_err());
        let mut looped = new_link(1.0, 12);
        looped.target_batch_id = BatchId(1);
        assert!(check_shape(&looped).is_err());
    }

    #[test]
    fn clean_link_has_no_warnings() {
        let units = UnitTable::standard();
        let w = check_against(&new_link(5.0, 12), &batch(1, 10.0, "kg"), &batch(2, 8.0, "kg"), 5.0, &units);
        assert!(w.is_empty(), "{w:?}");
    }

    #[test]
    fn over_use_and_early_date_warn() {
        let units = UnitTable::standard();
        let w = check_against(&new_link(6.0, 9), &batch(1, 10.0, "kg"), &batch(2, 8.0, "g"), 5.0, &units);
        assert_eq!(
            w,
            vec![
                LinkWarning::ExceedsRemaining {
                    requested: 6.0,
                    remaining: 5.0,
                    unit: "kg".into(),
                },
                LinkWarning::BeforeSourceProduction {
                    process_date: date(9),
                    production_date: date(10),
                },
            ]
        );
    }

    #[test]
    fn incomparable_units_and_withdrawn_source_warn() {
        let units = UnitTable::standard();
        let mut source = batch(1, 10.0, "kg");
        source.status = BatchStatus::Recalled;
        let w = check_against(&new_link(1.0, 12), &source, &batch(2, 3.0, "pcs"), 0.0, &units);
        assert!(w.contains(&LinkWarning::UnitMismatch {
            source_unit: "kg".into(),
            target_unit: "pcs".into(),
        }));
        assert!(w.contains(&LinkWarning::SourceWithdrawn {
            status: BatchStatus::Recalled
        }));
    }
}
