// Trace tree assembly.
//
// The resolver walks a built subgraph depth-first from the root and emits one
// node per traversed link. Every batch is expanded exactly once per direction,
// at its shortest distance from the root; further links reaching it are kept
// as leaf `shared` nodes so every path stays visible without repeating whole
// subtrees. In a full trace a neighbor linked both ways to its parent appears
// once, under the downstream side.

use std::collections::{BTreeSet, HashMap, HashSet};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::recall::attribution::hop_ratio;
use crate::types::{BatchId, EdgeDirection, LineageLink, LinkId, TraceDirection};
use crate::units::UnitConverter;

use super::builder::{GraphRequest, LineageGraphBuilder, LineageSubgraph};
use super::{BatchSummary, TraceAnomaly, TraceNode, TraceTree, TraceWarning};

/// A trace query with a checked depth bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceRequest {
    pub root: BatchId,
    pub direction: TraceDirection,
    pub depth: u32,
}

/// Builds the bounded subgraph for a request and turns it into a [`TraceTree`].
pub struct TraceResolver<'a> {
    builder: LineageGraphBuilder<'a>,
    units: &'a dyn UnitConverter,
    max_nodes: usize,
}

impl std::fmt::Debug for TraceResolver<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceResolver")
            .field("builder", &self.builder)
            .field("max_nodes", &self.max_nodes)
            .finish_non_exhaustive()
    }
}

impl<'a> TraceResolver<'a> {
    pub fn new(
        builder: LineageGraphBuilder<'a>,
        units: &'a dyn UnitConverter,
        max_nodes: usize,
    ) -> Self {
        Self {
            builder,
            units,
            max_nodes: max_nodes.max(1),
        }
    }

    pub async fn resolve(
        &self,
        request: &TraceRequest,
        cancel: &CancellationToken,
    ) -> crate::error::Result<TraceTree> {
        Ok(self.resolve_with_graph(request, cancel).await?.0)
    }

    /// Resolve and also hand back the explored subgraph for further analysis.
    pub async fn resolve_with_graph(
        &self,
        request: &TraceRequest,
        cancel: &CancellationToken,
    ) -> crate::error::Result<(TraceTree, LineageSubgraph)> {
        let graph = self
            .builder
            .build(
                &GraphRequest {
                    root: request.root,
                    direction: request.direction,
                    max_depth: request.depth,
                },
                cancel,
            )
            .await?;

        let tree = assemble(&graph, request.direction, self.units, self.max_nodes);

        info!(
            root = %request.root,
            direction = %request.direction,
            depth = request.depth,
            nodes = tree.node_count(),
            batches = graph.batch_count(),
            truncated = tree.truncated,
            "Resolved trace"
        );
        Ok((tree, graph))
    }
}

/// Shortest-distance spanning tree of one direction: for every reachable
/// batch, the link through which it is expanded. Siblings are taken in
/// presentation order so the choice is stable across runs.
pub(crate) fn home_links(
    graph: &LineageSubgraph,
    direction: EdgeDirection,
) -> HashMap<BatchId, (LinkId, u32)> {
    let mut home = HashMap::new();
    let mut visited: HashSet<BatchId> = HashSet::from([graph.root()]);
    let mut frontier = vec![graph.root()];

    for level in 1..=graph.max_depth() {
        let mut next = Vec::new();
        for &batch in &frontier {
            for link in ordered_links(graph, batch, direction) {
                let neighbor = link.neighbor(direction);
                if visited.insert(neighbor) {
                    home.insert(neighbor, (link.id, level));
                    next.push(neighbor);
                }
            }
        }
        if next.is_empty() {
            break;
        }
        frontier = next;
    }
    home
}

/// Links of `batch` ordered by (process date, neighbor batch number, link id).
fn ordered_links<'g>(
    graph: &'g LineageSubgraph,
    batch: BatchId,
    direction: EdgeDirection,
) -> Vec<&'g LineageLink> {
    let mut links = graph.links(batch, direction);
    links.sort_by(|a, b| {
        let number = |l: &LineageLink| {
            graph
                .batch(l.neighbor(direction))
                .map(|b| b.batch_number.as_str())
        };
        a.process_date
            .cmp(&b.process_date)
            .then_with(|| number(a).cmp(&number(b)))
            .then_with(|| a.id.cmp(&b.id))
    });
    links
}

struct Assembly<'g> {
    graph: &'g LineageSubgraph,
    units: &'g dyn UnitConverter,
    max_nodes: usize,
    emitted: usize,
    node_limit_hit: bool,
    mutual: BTreeSet<(BatchId, BatchId)>,
    /// Mutual pairs emitted by the downstream pass of a full trace.
    shown_downstream: BTreeSet<(BatchId, BatchId)>,
    assumed: BTreeSet<LinkId>,
}

impl Assembly<'_> {
    fn descend(
        &mut self,
        parent: BatchId,
        level: u32,
        parent_fraction: f64,
        direction: EdgeDirection,
        home: &HashMap<BatchId, (LinkId, u32)>,
        path: &mut Vec<BatchId>,
    ) -> Vec<TraceNode> {
        let graph = self.graph;
        let root = graph.root_batch();
        let mut nodes = Vec::new();

        for link in ordered_links(graph, parent, direction) {
            let neighbor = link.neighbor(direction);
            // Revisiting the root or an ancestor is a cycle; stop here.
            if path.contains(&neighbor) {
                continue;
            }
            let pair = (parent.min(neighbor), parent.max(neighbor));
            let expands = home.get(&neighbor).is_some_and(|&(id, _)| id == link.id);
            let (Some(source), Some(target), Some(batch)) = (
                graph.batch(link.source_batch_id),
                graph.batch(link.target_batch_id),
                graph.batch(neighbor),
            ) else {
                continue;
            };

            // The pair is already a single anomalous node downstream. Its own
            // ingredients still belong upstream, so they are lifted here.
            if direction == EdgeDirection::Incoming && self.shown_downstream.contains(&pair) {
                let ratio = hop_ratio(link, source, target, self.units).unwrap_or_else(|| {
                    self.assumed.insert(link.id);
                    1.0
                });
                if expands && level < graph.max_depth() {
                    path.push(neighbor);
                    let lifted = self.descend(
                        neighbor,
                        level + 1,
                        parent_fraction * ratio,
                        direction,
                        home,
                        path,
                    );
                    path.pop();
                    nodes.extend(lifted);
                }
                continue;
            }

            if self.emitted >= self.max_nodes {
                self.node_limit_hit = true;
                break;
            }
            self.emitted += 1;

            let mut anomalies = Vec::new();
            if graph.has_link(link.target_batch_id, link.source_batch_id) {
                anomalies.push(TraceAnomaly::MutualLink);
                self.mutual.insert(pair);
            }
            let ratio = hop_ratio(link, source, target, self.units).unwrap_or_else(|| {
                anomalies.push(TraceAnomaly::RatioAssumed);
                self.assumed.insert(link.id);
                1.0
            });
            let fraction = parent_fraction * ratio;
            let (attributed_quantity, quantity_unit) = match direction {
                EdgeDirection::Outgoing => (fraction * batch.quantity, batch.unit.clone()),
                EdgeDirection::Incoming => (fraction * root.quantity, root.unit.clone()),
            };

            let children = if expands && level < graph.max_depth() {
                path.push(neighbor);
                let children = self.descend(neighbor, level + 1, fraction, direction, home, path);
                path.pop();
                children
            } else {
                Vec::new()
            };

            nodes.push(TraceNode {
                batch: BatchSummary::from(batch),
                level,
                direction,
                link: link.clone(),
                fraction,
                attributed_quantity,
                quantity_unit,
                shared: !expands,
                anomalies,
                children,
            });
        }
        nodes
    }
}

/// Turn a built subgraph into a trace tree. Pure: the same subgraph always
/// yields the same tree.
pub fn assemble(
    graph: &LineageSubgraph,
    direction: TraceDirection,
    units: &dyn UnitConverter,
    max_nodes: usize,
) -> TraceTree {
    let mut assembly = Assembly {
        graph,
        units,
        max_nodes,
        emitted: 0,
        node_limit_hit: false,
        mutual: BTreeSet::new(),
        shown_downstream: BTreeSet::new(),
        assumed: BTreeSet::new(),
    };
    let mut warnings = Vec::new();
    let mut downstream = Vec::new();
    let mut upstream = Vec::new();

    for &edge_dir in direction.edge_directions() {
        let home = home_links(graph, edge_dir);
        let mut path = vec![graph.root()];
        let nodes = assembly.descend(graph.root(), 1, 1.0, edge_dir, &home, &mut path);
        match edge_dir {
            EdgeDirection::Outgoing => {
                downstream = nodes;
                assembly.shown_downstream = assembly.mutual.clone();
            }
            EdgeDirection::Incoming => upstream = nodes,
        }

        let boundary = graph.boundary(edge_dir);
        if !boundary.is_empty() {
            warnings.push(TraceWarning::DepthExceeded {
                direction: edge_dir,
                depth: graph.max_depth(),
                boundary: boundary.to_vec(),
            });
        }
    }

    for batches in graph.cycles() {
        warn!(root = %graph.root(), ?batches, "Lineage cycle detected");
        warnings.push(TraceWarning::CycleDetected { batches });
    }
    if assembly.node_limit_hit {
        warn!(root = %graph.root(), limit = max_nodes, "Trace node budget exhausted");
        warnings.push(TraceWarning::NodeLimitReached { limit: max_nodes });
    }
    warnings.extend(
        assembly
            .mutual
            .iter()
            .map(|&(batch, neighbor)| TraceWarning::MutualLink { batch, neighbor }),
    );
    warnings.extend(
        assembly
            .assumed
            .iter()
            .map(|&link| TraceWarning::RatioAssumed { link }),
    );
    warnings.sort();
    warnings.dedup();

    TraceTree {
        root: BatchSummary::from(graph.root_batch()),
        direction,
        depth_bound: graph.max_depth(),
        downstream,
        upstream,
        truncated: warnings.iter().any(TraceWarning::marks_incomplete),
        warnings,
    }
}
