// Quantity attribution along lineage paths.
//
// A hop ratio is the share of the target batch's content made from the source
// batch. The fraction of a descendant traceable to the root along one path is
// the product of its hop ratios, so it can only shrink with depth. Several
// paths to the same descendant are combined by summing edge-disjoint paths and
// taking the largest of paths that share a link.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::trace::LineageSubgraph;
use crate::types::{Batch, BatchId, EdgeDirection, LineageLink, LinkId};
use crate::units::UnitConverter;

/// Share of `target` made from `source` through `link`, in `[0, 1]`.
///
/// The used quantity is capped at the source batch's recorded quantity and
/// converted into the target's unit. A target with no positive quantity is
/// attributed entirely. Returns `None` when the units don't convert or the
/// stored numbers are not finite.
pub fn hop_ratio(
    link: &LineageLink,
    source: &Batch,
    target: &Batch,
    units: &dyn UnitConverter,
) -> Option<f64> {
    if !link.quantity_used.is_finite() || !source.quantity.is_finite() {
        return None;
    }
    if target.quantity <= 0.0 {
        return Some(1.0);
    }
    let used = if source.quantity > 0.0 {
        link.quantity_used.min(source.quantity)
    } else {
        link.quantity_used
    };
    let used_in_target_unit = units.convert(used, &source.unit, &target.unit)?;
    let ratio = used_in_target_unit / target.quantity;
    ratio.is_finite().then(|| ratio.clamp(0.0, 1.0))
}

/// Per-descendant result of combining every root-to-descendant path.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribution {
    /// Combined fraction, capped at 1.0.
    pub fraction: f64,
    /// Distinct paths found.
    pub path_count: usize,
    /// Some paths shared links with a larger path and were not added.
    pub overlapping: bool,
    /// Hop count of the shortest path.
    pub min_level: u32,
    /// Some path crossed a link whose ratio was assumed to be 1.0.
    pub ratio_assumed: bool,
}

/// Attribution for every descendant of a forward subgraph.
#[derive(Debug, Clone, Default)]
pub struct AttributionOutcome {
    pub batches: BTreeMap<BatchId, Attribution>,
    /// Path enumeration stopped at the configured budget.
    pub path_limit_reached: bool,
    /// Links whose ratio could not be computed; 1.0 was used for them.
    pub assumed_links: Vec<LinkId>,
}

struct Path {
    links: Vec<LinkId>,
    fraction: f64,
}

struct PathWalker<'a> {
    graph: &'a LineageSubgraph,
    ratios: HashMap<LinkId, f64>,
    assumed: Vec<LinkId>,
    paths: BTreeMap<BatchId, Vec<Path>>,
    found: usize,
    max_paths: usize,
    limit_hit: bool,
}

impl PathWalker<'_> {
    fn ratio(&mut self, link: &LineageLink, units: &dyn UnitConverter) -> f64 {
        if let Some(&r) = self.ratios.get(&link.id) {
            return r;
        }
        let computed = match (
            self.graph.batch(link.source_batch_id),
            self.graph.batch(link.target_batch_id),
        ) {
            (Some(source), Some(target)) => hop_ratio(link, source, target, units),
            _ => None,
        };
        let r = computed.unwrap_or_else(|| {
            self.assumed.push(link.id);
            1.0
        });
        self.ratios.insert(link.id, r);
        r
    }

    fn walk(
        &mut self,
        at: BatchId,
        fraction: f64,
        on_path: &mut Vec<BatchId>,
        links: &mut Vec<LinkId>,
        units: &dyn UnitConverter,
    ) {
        let graph = self.graph;
        let max_hops = graph.max_depth() as usize;
        for link in graph.links(at, EdgeDirection::Outgoing) {
            if self.limit_hit {
                return;
            }
            let next = link.target_batch_id;
            if on_path.contains(&next) {
                continue;
            }
            let f = fraction * self.ratio(link, units);

            links.push(link.id);
            on_path.push(next);

            self.paths.entry(next).or_default().push(Path {
                links: links.clone(),
                fraction: f,
            });
            self.found += 1;
            if self.found >= self.max_paths {
                self.limit_hit = true;
            } else if on_path.len() <= max_hops {
                self.walk(next, f, on_path, links, units);
            }

            on_path.pop();
            links.pop();
        }
    }
}

/// Enumerate root-to-descendant paths of a forward subgraph (at most
/// `max_paths`, each at most the subgraph's depth bound long) and combine them
/// per descendant.
pub fn attribute(
    graph: &LineageSubgraph,
    units: &dyn UnitConverter,
    max_paths: usize,
) -> AttributionOutcome {
    let mut walker = PathWalker {
        graph,
        ratios: HashMap::new(),
        assumed: Vec::new(),
        paths: BTreeMap::new(),
        found: 0,
        max_paths: max_paths.max(1),
        limit_hit: false,
    };
    let root = graph.root();
    // `on_path` holds the root plus one entry per hop taken.
    let mut on_path = vec![root];
    walker.walk(root, 1.0, &mut on_path, &mut Vec::new(), units);

    let mut assumed_links = walker.assumed;
    assumed_links.sort();
    let assumed: HashSet<LinkId> = assumed_links.iter().copied().collect();

    let batches = walker
        .paths
        .into_iter()
        .map(|(batch, paths)| (batch, combine(paths, &assumed)))
        .collect();

    AttributionOutcome {
        batches,
        path_limit_reached: walker.limit_hit,
        assumed_links,
    }
}

/// Largest path first; each further path is added only if it shares no link
/// with a path already counted.
fn combine(mut paths: Vec<Path>, assumed: &HashSet<LinkId>) -> Attribution {
    paths.sort_by(|a, b| {
        b.fraction
            .total_cmp(&a.fraction)
            .then_with(|| a.links.len().cmp(&b.links.len()))
            .then_with(|| a.links.cmp(&b.links))
    });

    let mut used: HashSet<LinkId> = HashSet::new();
    let mut fraction = 0.0;
    let mut overlapping = false;
    for path in &paths {
        if path.links.iter().any(|l| used.contains(l)) {
            overlapping = true;
            continue;
        }
        used.extend(path.links.iter().copied());
        fraction += path.fraction;
    }

    let min_level = paths.iter().map(|p| p.links.len()).min().unwrap_or(0);
    Attribution {
        fraction: fraction.min(1.0),
        path_count: paths.len(),
        overlapping,
        min_level: u32::try_from(min_level).unwrap_or(u32::MAX),
        ratio_assumed: paths
            .iter()
            .any(|p| p.links.iter().any(|l| assumed.contains(l))),
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::types::{BatchStatus, BatchType, LinkType, QualityStatus};
    use crate::units::UnitTable;

    fn batch(id: i64, quantity: f64, unit: &str) -> Batch {
        Batch {
            id: BatchId(id),
            batch_number: format!("B{id}"),
            batch_type: BatchType::Intermediate,
            status: BatchStatus::Completed,
            product_name: String::new(),
            quantity,
            unit: unit.into(),
            production_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            expiry_date: None,
            lot_number: None,
            quality_status: QualityStatus::Passed,
        }
    }

    fn link(id: i64, source: i64, target: i64, used: f64) -> LineageLink {
        LineageLink {
            id: LinkId(id),
            source_batch_id: BatchId(source),
            target_batch_id: BatchId(target),
            link_type: LinkType::Ingredient,
            quantity_used: used,
            process_step: String::new(),
            process_date: NaiveDate::from_ymd_opt(2025, 1, 2).unwrap(),
        }
    }

    fn graph(batches: Vec<Batch>, links: Vec<LineageLink>, depth: u32) -> LineageSubgraph {
        let mut iter = batches.into_iter();
        let mut g = LineageSubgraph::new(iter.next().unwrap(), depth);
        for b in iter {
            g.insert_batch(b);
        }
        for l in links {
            g.add_link(l);
        }
        g
    }

    #[test]
    fn ratio_is_share_of_target() {
        let units = UnitTable::standard();
        let r = hop_ratio(&link(1, 1, 2, 30.0), &batch(1, 100.0, "kg"), &batch(2, 120.0, "kg"), &units);
        assert_eq!(r, Some(0.25));
    }

    #[test]
    fn ratio_caps_at_source_quantity_and_one() {
        let units = UnitTable::standard();
        // Uses more than the source holds; target is smaller than the use.
        let r = hop_ratio(&link(1, 1, 2, 500.0), &batch(1, 100.0, "kg"), &batch(2, 50.0, "kg"), &units);
        assert_eq!(r, Some(1.0));
    }

    #[test]
    fn ratio_converts_source_unit() {
        let units = UnitTable::standard();
        let r = hop_ratio(&link(1, 1, 2, 500.0), &batch(1, 1000.0, "g"), &batch(2, 2.0, "kg"), &units)
            .unwrap();
        assert!((r - 0.25).abs() < 1e-12);
    }

    #[test]
    fn ratio_unknown_without_conversion() {
        let units = UnitTable::standard();
        let r = hop_ratio(&link(1, 1, 2, 5.0), &batch(1, 10.0, "kg"), &batch(2, 10.0, "pcs"), &units);
        assert_eq!(r, None);
    }

    #[test]
    fn empty_target_is_fully_attributed() {
        let units = UnitTable::standard();
        let r = hop_ratio(&link(1, 1, 2, 5.0), &batch(1, 10.0, "kg"), &batch(2, 0.0, "pcs"), &units);
        assert_eq!(r, Some(1.0));
    }

    #[test]
    fn disjoint_paths_sum_and_cap() {
        // 1 -> 2 -> 4 and 1 -> 3 -> 4, each contributing 0.6 of batch 4.
        let g = graph(
            vec![
                batch(1, 100.0, "kg"),
                batch(2, 60.0, "kg"),
                batch(3, 60.0, "kg"),
                batch(4, 100.0, "kg"),
            ],
            vec![
                link(1, 1, 2, 60.0),
                link(2, 1, 3, 60.0),
                link(3, 2, 4, 60.0),
                link(4, 3, 4, 60.0),
            ],
            5,
        );
        let out = attribute(&g, &UnitTable::standard(), 100);
        let a = &out.batches[&BatchId(4)];
        assert_eq!(a.path_count, 2);
        assert!(!a.overlapping);
        assert_eq!(a.fraction, 1.0);
        assert_eq!(a.min_level, 2);
    }

    #[test]
    fn disjoint_paths_sum_below_cap() {
        let g = graph(
            vec![
                batch(1, 100.0, "kg"),
                batch(2, 20.0, "kg"),
                batch(3, 20.0, "kg"),
                batch(4, 100.0, "kg"),
            ],
            vec![
                link(1, 1, 2, 20.0),
                link(2, 1, 3, 20.0),
                link(3, 2, 4, 20.0),
                link(4, 3, 4, 30.0),
            ],
            5,
        );
        let out = attribute(&g, &UnitTable::standard(), 100);
        // 0.2 via batch 2, 0.2 via batch 3 (30 kg used, capped at 20 kg held).
        assert!((out.batches[&BatchId(4)].fraction - 0.4).abs() < 1e-12);
    }

    #[test]
    fn overlapping_paths_take_the_largest() {
        // 1 -> 2, then 2 -> 3 twice (two links) and 3 -> 4: both paths to 4
        // share link 1.
        let g = graph(
            vec![
                batch(1, 100.0, "kg"),
                batch(2, 100.0, "kg"),
                batch(3, 100.0, "kg"),
                batch(4, 100.0, "kg"),
            ],
            vec![
                link(1, 1, 2, 100.0),
                link(2, 2, 3, 30.0),
                link(3, 2, 3, 50.0),
                link(4, 3, 4, 100.0),
            ],
            5,
        );
        let out = attribute(&g, &UnitTable::standard(), 100);
        let a = &out.batches[&BatchId(3)];
        assert_eq!(a.path_count, 2);
        assert!(a.overlapping);
        assert!((a.fraction - 0.5).abs() < 1e-12);
        assert!(out.batches[&BatchId(4)].overlapping);
    }

    #[test]
    fn cycles_do_not_loop() {
        let g = graph(
            vec![batch(1, 10.0, "kg"), batch(2, 10.0, "kg"), batch(3, 10.0, "kg")],
            vec![link(1, 1, 2, 10.0), link(2, 2, 3, 10.0), link(3, 3, 1, 10.0), link(4, 3, 2, 10.0)],
            20,
        );
        let out = attribute(&g, &UnitTable::standard(), 1000);
        assert_eq!(out.batches.len(), 2);
        assert!(!out.path_limit_reached);
    }

    #[test]
    fn path_budget_is_reported() {
        let g = graph(
            vec![batch(1, 10.0, "kg"), batch(2, 10.0, "kg"), batch(3, 10.0, "kg")],
            vec![link(1, 1, 2, 1.0), link(2, 1, 3, 1.0), link(3, 2, 3, 1.0)],
            5,
        );
        let out = attribute(&g, &UnitTable::standard(), 2);
        assert!(out.path_limit_reached);
    }

    #[test]
    fn incomparable_units_assume_full_ratio() {
        let g = graph(
            vec![batch(1, 10.0, "kg"), batch(2, 12.0, "pcs")],
            vec![link(7, 1, 2, 1.0)],
            5,
        );
        let out = attribute(&g, &UnitTable::standard(), 10);
        assert_eq!(out.batches[&BatchId(2)].fraction, 1.0);
        assert_eq!(out.assumed_links, vec![LinkId(7)]);
        assert!(out.batches[&BatchId(2)].ratio_assumed);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(200))]

            /// Along a chain the fraction reaching a later batch never exceeds
            /// the fraction reaching an earlier one.
            #[test]
            fn chain_fraction_is_non_increasing(
                hops in proptest::collection::vec((0.1f64..500.0, 0.1f64..500.0), 1..8)
            ) {
                let mut batches = vec![batch(0, 100.0, "kg")];
                let mut links = Vec::new();
                for (i, (quantity, used)) in hops.iter().enumerate() {
                    let id = i as i64 + 1;
                    batches.push(batch(id, *quantity, "kg"));
                    links.push(link(id, id - 1, id, *used));
                }
                let g = graph(batches, links, 20);
                let out = attribute(&g, &UnitTable::standard(), 1000);
                let mut previous = 1.0;
                for i in 1..=hops.len() as i64 {
                    let f = out.batches[&BatchId(i)].fraction;
                    prop_assert!(f <= previous + 1e-12);
                    prop_assert!((0.0..=1.0).contains(&f));
                    previous = f;
                }
            }
        }
    }
}
