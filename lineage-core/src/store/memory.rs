use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::RwLock;

use crate::error::{LineageError, StoreError};
use crate::types::{
    Batch, BatchId, EdgeDirection, LineageLink, LineageSnapshot, LinkId, LinkPage, NewLink,
    PageRequest,
};

use super::traits::{BatchRegistry, GraphSource, LinkWriter};

#[derive(Debug, Default)]
struct Inner {
    batches: BTreeMap<BatchId, Batch>,
    by_number: HashMap<String, BatchId>,
    links: BTreeMap<LinkId, LineageLink>,
}

/// In-memory batch registry and link store, seeded from a [`LineageSnapshot`].
#[derive(Debug, Default)]
pub struct MemoryLineageStore {
    inner: RwLock<Inner>,
}

impl MemoryLineageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a snapshot, rejecting duplicate ids and batch numbers.
    pub fn from_snapshot(snapshot: LineageSnapshot) -> crate::error::Result<Self> {
        let store = Self::new();
        for batch in snapshot.batches {
            store.insert_batch(batch)?;
        }
        for link in snapshot.links {
            store.insert_link(link)?;
        }
        Ok(store)
    }

    pub fn from_json_str(json: &str) -> crate::error::Result<Self> {
        let snapshot: LineageSnapshot = serde_json::from_str(json).map_err(StoreError::from)?;
        Self::from_snapshot(snapshot)
    }

    /// Load a JSON snapshot file.
    pub fn load_json(path: &Path) -> crate::error::Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            LineageError::NotFound(format!("snapshot {}: {e}", path.display()))
        })?;
        Self::from_json_str(&text)
    }

    pub fn insert_batch(&self, batch: Batch) -> crate::error::Result<()> {
        let mut inner = self.inner.write().expect("lineage store lock poisoned");
        if inner.batches.contains_key(&batch.id) {
            return Err(LineageError::InvalidInput(format!(
                "duplicate batch id {}",
                batch.id
            )));
        }
        if inner.by_number.contains_key(&batch.batch_number) {
            return Err(LineageError::InvalidInput(format!(
                "duplicate batch number {}",
                batch.batch_number
            )));
        }
        inner.by_number.insert(batch.batch_number.clone(), batch.id);
        inner.batches.insert(batch.id, batch);
        Ok(())
    }

    /// Insert a link that already carries its id (snapshot import).
    pub fn insert_link(&self, link: LineageLink) -> crate::error::Result<()> {
        let mut inner = self.inner.write().expect("lineage store lock poisoned");
        if inner.links.contains_key(&link.id) {
            return Err(LineageError::InvalidInput(format!(
                "duplicate link id {}",
                link.id
            )));
        }
        inner.links.insert(link.id, link);
        Ok(())
    }

    /// Copy out everything currently stored, ordered by id.
    pub fn snapshot(&self) -> LineageSnapshot {
        let inner = self.inner.read().expect("lineage store lock poisoned");
        LineageSnapshot {
            batches: inner.batches.values().cloned().collect(),
            links: inner.links.values().cloned().collect(),
        }
    }

    pub fn batch_count(&self) -> usize {
        self.inner.read().expect("lineage store lock poisoned").batches.len()
    }

    pub fn link_count(&self) -> usize {
        self.inner.read().expect("lineage store lock poisoned").links.len()
    }
}

#[async_trait::async_trait]
impl BatchRegistry for MemoryLineageStore {
    async fn get_batch(&self, id: BatchId) -> crate::error::Result<Option<Batch>> {
        let inner = self.inner.read().expect("lineage store lock poisoned");
        Ok(inner.batches.get(&id).cloned())
    }

    async fn get_batch_by_number(&self, number: &str) -> crate::error::Result<Option<Batch>> {
        let inner = self.inner.read().expect("lineage store lock poisoned");
        Ok(inner
            .by_number
            .get(number)
            .and_then(|id| inner.batches.get(id))
            .cloned())
    }

    async fn get_batches(&self, ids: &[BatchId]) -> crate::error::Result<Vec<Batch>> {
        let inner = self.inner.read().expect("lineage store lock poisoned");
        Ok(ids
            .iter()
            .collect::<HashSet<_>>()
            .into_iter()
            .filter_map(|id| inner.batches.get(id).cloned())
            .collect())
    }
}

#[async_trait::async_trait]
impl GraphSource for MemoryLineageStore {
    async fn edges_of(
        &self,
        batch_ids: &[BatchId],
        direction: EdgeDirection,
        page: PageRequest,
    ) -> crate::error::Result<LinkPage> {
        let wanted: HashSet<BatchId> = batch_ids.iter().copied().collect();
        let inner = self.inner.read().expect("lineage store lock poisoned");

        let offset = usize::try_from(page.offset).unwrap_or(usize::MAX);
        let limit = page.limit as usize;
        let mut matching = inner
            .links
            .values()
            .filter(|l| wanted.contains(&l.anchor(direction)))
            .skip(offset);

        let links: Vec<LineageLink> = matching.by_ref().take(limit).cloned().collect();
        let next_offset = matching
            .next()
            .map(|_| page.offset + links.len() as u64);
        Ok(LinkPage { links, next_offset })
    }
}

#[async_trait::async_trait]
impl LinkWriter for MemoryLineageStore {
    async fn record_link(&self, link: &NewLink) -> crate::error::Result<LinkId> {
        let mut inner = self.inner.write().expect("lineage store lock poisoned");
        let id = LinkId(inner.links.keys().next_back().map_or(1, |last| last.0 + 1));
        inner.links.insert(id, link.clone().with_id(id));
        Ok(id)
    }
}
