// Bounded lineage subgraph construction.
//
// Breadth-first expansion from a root, one hop per round. Each round fetches
// the links of the whole frontier in chunked, paged batch calls that run
// concurrently and are fully joined before the next round starts. A visited
// set per direction guarantees termination on cyclic data.

use std::collections::{BTreeMap, HashMap, HashSet};

use futures::future::try_join_all;
use petgraph::Direction;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{LineageError, StoreError};
use crate::store::{BatchRegistry, GraphSource};
use crate::types::{
    Batch, BatchId, EdgeDirection, LineageLink, LinkId, PageRequest, TraceDirection,
};

/// How edge lookups are batched against the link store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchLimits {
    /// Frontier batch ids per `edges_of` call.
    pub chunk_size: usize,
    /// Links per page.
    pub page_size: u32,
}

impl Default for FetchLimits {
    fn default() -> Self {
        Self {
            chunk_size: 64,
            page_size: 500,
        }
    }
}

/// What to explore around a root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphRequest {
    pub root: BatchId,
    pub direction: TraceDirection,
    pub max_depth: u32,
}

/// The explored part of the lineage graph around one root.
///
/// Read-only once built; traversal state lives in the resolvers, so one
/// subgraph can back several traversals at once.
#[derive(Debug, Clone)]
pub struct LineageSubgraph {
    root: BatchId,
    graph: DiGraph<BatchId, LineageLink>,
    index: HashMap<BatchId, NodeIndex>,
    batches: HashMap<BatchId, Batch>,
    link_ids: HashSet<LinkId>,
    boundary: BTreeMap<EdgeDirection, Vec<BatchId>>,
    max_depth: u32,
}

impl LineageSubgraph {
    pub fn new(root: Batch, max_depth: u32) -> Self {
        let mut graph = DiGraph::new();
        let root_id = root.id;
        let idx = graph.add_node(root_id);
        Self {
            root: root_id,
            graph,
            index: HashMap::from([(root_id, idx)]),
            batches: HashMap::from([(root_id, root)]),
            link_ids: HashSet::new(),
            boundary: BTreeMap::new(),
            max_depth,
        }
    }

    pub fn root(&self) -> BatchId {
        self.root
    }

    pub fn root_batch(&self) -> &Batch {
        &self.batches[&self.root]
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    pub fn batch(&self, id: BatchId) -> Option<&Batch> {
        self.batches.get(&id)
    }

    /// Batch ids in the subgraph, ascending.
    pub fn batch_ids(&self) -> Vec<BatchId> {
        let mut ids: Vec<BatchId> = self.index.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn batch_count(&self) -> usize {
        self.index.len()
    }

    pub fn link_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Record a link. Returns false if it was already present.
    pub fn add_link(&mut self, link: LineageLink) -> bool {
        if !self.link_ids.insert(link.id) {
            return false;
        }
        let src = self.node(link.source_batch_id);
        let tgt = self.node(link.target_batch_id);
        self.graph.add_edge(src, tgt, link);
        true
    }

    fn node(&mut self, id: BatchId) -> NodeIndex {
        *self
            .index
            .entry(id)
            .or_insert_with(|| self.graph.add_node(id))
    }

    pub fn insert_batch(&mut self, batch: Batch) {
        self.batches.insert(batch.id, batch);
    }

    /// Ids present as link endpoints without a batch record yet.
    pub fn missing_batches(&self) -> Vec<BatchId> {
        let mut missing: Vec<BatchId> = self
            .index
            .keys()
            .filter(|id| !self.batches.contains_key(id))
            .copied()
            .collect();
        missing.sort();
        missing
    }

    /// Links of `id` in `direction`, ordered by link id.
    pub fn links(&self, id: BatchId, direction: EdgeDirection) -> Vec<&LineageLink> {
        let Some(&idx) = self.index.get(&id) else {
            return Vec::new();
        };
        let petgraph_dir = match direction {
            EdgeDirection::Outgoing => Direction::Outgoing,
            EdgeDirection::Incoming => Direction::Incoming,
        };
        let mut links: Vec<&LineageLink> = self
            .graph
            .edges_directed(idx, petgraph_dir)
            .map(|e| e.weight())
            .collect();
        links.sort_by_key(|l| l.id);
        links
    }

    /// Whether any stored link runs from `source` to `target`.
    pub fn has_link(&self, source: BatchId, target: BatchId) -> bool {
        match (self.index.get(&source), self.index.get(&target)) {
            (Some(&s), Some(&t)) => self.graph.find_edge(s, t).is_some(),
            _ => false,
        }
    }

    /// Batches left with unexplored links when the depth bound was hit.
    pub fn boundary(&self, direction: EdgeDirection) -> &[BatchId] {
        self.boundary.get(&direction).map_or(&[], Vec::as_slice)
    }

    /// The depth bound cut off at least one direction.
    pub fn is_truncated(&self) -> bool {
        self.boundary.values().any(|b| !b.is_empty())
    }

    /// Strongly connected groups that form cycles (including self-loops),
    /// each sorted, in ascending order of their smallest member.
    pub fn cycles(&self) -> Vec<Vec<BatchId>> {
        let mut cycles: Vec<Vec<BatchId>> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| {
                scc.len() > 1 || self.graph.find_edge(scc[0], scc[0]).is_some()
            })
            .map(|scc| {
                let mut ids: Vec<BatchId> = scc.into_iter().map(|i| self.graph[i]).collect();
                ids.sort();
                ids
            })
            .collect();
        cycles.sort();
        cycles
    }
}

/// Builds a [`LineageSubgraph`] from the registry and link store.
pub struct LineageGraphBuilder<'a> {
    registry: &'a dyn BatchRegistry,
    source: &'a dyn GraphSource,
    limits: FetchLimits,
}

impl std::fmt::Debug for LineageGraphBuilder<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineageGraphBuilder")
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl<'a> LineageGraphBuilder<'a> {
    pub fn new(
        registry: &'a dyn BatchRegistry,
        source: &'a dyn GraphSource,
        limits: FetchLimits,
    ) -> Self {
        Self {
            registry,
            source,
            limits: FetchLimits {
                chunk_size: limits.chunk_size.max(1),
                page_size: limits.page_size.max(1),
            },
        }
    }

    /// Explore up to `max_depth` hops from the root in the requested directions.
    ///
    /// Fails with `NotFound` if the root or any reached batch is unknown to the
    /// registry, `DependencyUnavailable` if a store call fails, and `Cancelled`
    /// if `cancel` fires at a hop boundary or during a fetch.
    pub async fn build(
        &self,
        request: &GraphRequest,
        cancel: &CancellationToken,
    ) -> crate::error::Result<LineageSubgraph> {
        if request.max_depth == 0 {
            return Err(LineageError::invalid("depth bound must be at least 1"));
        }
        let root = self
            .registry
            .get_batch(request.root)
            .await?
            .ok_or_else(|| LineageError::NotFound(format!("batch {}", request.root)))?;

        let mut subgraph = LineageSubgraph::new(root, request.max_depth);
        for &direction in request.direction.edge_directions() {
            self.expand(&mut subgraph, direction, request.max_depth, cancel)
                .await?;
        }
        self.load_batches(&mut subgraph, cancel).await?;

        debug!(
            root = %request.root,
            direction = %request.direction,
            batches = subgraph.batch_count(),
            links = subgraph.link_count(),
            truncated = subgraph.is_truncated(),
            "Built lineage subgraph"
        );
        Ok(subgraph)
    }

    async fn expand(
        &self,
        subgraph: &mut LineageSubgraph,
        direction: EdgeDirection,
        max_depth: u32,
        cancel: &CancellationToken,
    ) -> crate::error::Result<()> {
        let mut visited: HashSet<BatchId> = HashSet::from([subgraph.root()]);
        let mut frontier = vec![subgraph.root()];

        for level in 1..=max_depth {
            let links = self.fetch_level(&frontier, direction, cancel).await?;
            let fetched = links.len();

            let mut next = Vec::new();
            for link in links {
                let neighbor = link.neighbor(direction);
                subgraph.add_link(link);
                if visited.insert(neighbor) {
                    next.push(neighbor);
                }
            }
            next.sort();

            debug!(
                level,
                direction = direction.as_str(),
                frontier = frontier.len(),
                links = fetched,
                discovered = next.len(),
                "Expanded lineage level"
            );

            frontier = next;
            if frontier.is_empty() {
                return Ok(());
            }
        }

        // Depth bound reached with a live frontier: look one hop further to
        // tell "complete" from "cut off".
        if self.has_pending_links(&frontier, direction, cancel).await? {
            subgraph.boundary.insert(direction, frontier);
        }
        Ok(())
    }

    /// All links touching `frontier`, sorted by id. Chunks run concurrently;
    /// the whole level is joined before returning.
    async fn fetch_level(
        &self,
        frontier: &[BatchId],
        direction: EdgeDirection,
        cancel: &CancellationToken,
    ) -> crate::error::Result<Vec<LineageLink>> {
        if cancel.is_cancelled() {
            return Err(LineageError::Cancelled);
        }
        let fetches = frontier
            .chunks(self.limits.chunk_size)
            .map(|chunk| self.fetch_all_pages(chunk, direction));

        let pages = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(LineageError::Cancelled),
            result = try_join_all(fetches) => result?,
        };

        let mut links: Vec<LineageLink> = pages.into_iter().flatten().collect();
        links.sort_by_key(|l| l.id);
        links.dedup_by_key(|l| l.id);
        Ok(links)
    }

    async fn fetch_all_pages(
        &self,
        chunk: &[BatchId],
        direction: EdgeDirection,
    ) -> crate::error::Result<Vec<LineageLink>> {
        let mut links = Vec::new();
        let mut page = PageRequest::first(self.limits.page_size);
        loop {
            let result = self.source.edges_of(chunk, direction, page).await?;
            links.extend(result.links);
            match result.next_offset {
                Some(next) if next > page.offset => page.offset = next,
                Some(next) => {
                    return Err(StoreError::Corrupt(format!(
                        "link store returned non-advancing page offset {next} after {}",
                        page.offset
                    ))
                    .into());
                }
                None => return Ok(links),
            }
        }
    }

    async fn has_pending_links(
        &self,
        frontier: &[BatchId],
        direction: EdgeDirection,
        cancel: &CancellationToken,
    ) -> crate::error::Result<bool> {
        let probes = frontier.chunks(self.limits.chunk_size).map(|chunk| {
            self.source
                .edges_of(chunk, direction, PageRequest::first(1))
        });
        let pages = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(LineageError::Cancelled),
            result = try_join_all(probes) => result?,
        };
        Ok(pages.iter().any(|p| !p.links.is_empty()))
    }

    async fn load_batches(
        &self,
        subgraph: &mut LineageSubgraph,
        cancel: &CancellationToken,
    ) -> crate::error::Result<()> {
        let wanted = subgraph.missing_batches();
        if wanted.is_empty() {
            return Ok(());
        }
        let lookups = wanted
            .chunks(self.limits.chunk_size)
            .map(|chunk| self.registry.get_batches(chunk));
        let found = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(LineageError::Cancelled),
            result = try_join_all(lookups) => result?,
        };
        for batch in found.into_iter().flatten() {
            subgraph.insert_batch(batch);
        }

        let dangling = subgraph.missing_batches();
        if let Some(first) = dangling.first() {
            let link = subgraph
                .graph
                .edge_references()
                .map(|e| e.weight())
                .filter(|l| l.source_batch_id == *first || l.target_batch_id == *first)
                .map(|l| l.id)
                .min();
            return Err(LineageError::NotFound(match link {
                Some(link) => format!("batch {first} referenced by link {link}"),
                None => format!("batch {first}"),
            }));
        }
        Ok(())
    }
}
