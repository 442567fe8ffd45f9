use crate::types::{Batch, BatchId, EdgeDirection, LinkId, LinkPage, NewLink, PageRequest};

/// Authoritative source of batch records. The engine only reads from it.
#[async_trait::async_trait]
pub trait BatchRegistry: Send + Sync {
    /// Get a batch by its ID.
    async fn get_batch(&self, id: BatchId) -> crate::error::Result<Option<Batch>>;

    /// Get a batch by its human-readable batch number.
    async fn get_batch_by_number(&self, number: &str) -> crate::error::Result<Option<Batch>>;

    /// Batched lookup. Unknown ids are omitted from the result; order is unspecified.
    async fn get_batches(&self, ids: &[BatchId]) -> crate::error::Result<Vec<Batch>>;
}

/// Read access to the directed "used-in" edges.
///
/// Lookups are batched over many anchor batches and paged, so a BFS level
/// costs one call per chunk and page instead of one per node.
#[async_trait::async_trait]
pub trait GraphSource: Send + Sync {
    /// Links touching any of `batch_ids` in `direction`: `Outgoing` returns links
    /// whose source is in the set, `Incoming` those whose target is. Pages are
    /// ordered by link id.
    async fn edges_of(
        &self,
        batch_ids: &[BatchId],
        direction: EdgeDirection,
        page: PageRequest,
    ) -> crate::error::Result<LinkPage>;
}

/// The link store's own write path. The engine delegates link creation here
/// and never writes storage directly.
#[async_trait::async_trait]
pub trait LinkWriter: Send + Sync {
    /// Persist a new link. Returns the assigned ID.
    async fn record_link(&self, link: &NewLink) -> crate::error::Result<LinkId>;
}
