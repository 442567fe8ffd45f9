// Integration test utilities and lineage fixtures.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::NaiveDate;

use lineage_core::config::{ConfigHandle, LineageConfig};
use lineage_core::engine::TraceabilityEngine;
use lineage_core::error::{LineageError, StoreError};
use lineage_core::store::{BatchRegistry, GraphSource, MemoryLineageStore, SqliteLineageStore};
use lineage_core::types::{
    Batch, BatchId, BatchStatus, BatchType, EdgeDirection, LineageLink, LineageSnapshot, LinkId,
    LinkPage, LinkType, PageRequest, QualityStatus,
};

/// Day `day` of March 2025.
pub fn date(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, day).expect("valid fixture date")
}

/// Builds a lineage snapshot batch by batch. Batches are addressed by number;
/// ids and link ids are assigned in insertion order.
#[derive(Debug, Default, Clone)]
pub struct LineageFixture {
    snapshot: LineageSnapshot,
    ids: HashMap<String, BatchId>,
}

impl LineageFixture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a completed intermediate batch.
    #[must_use]
    pub fn batch(self, number: &str, quantity: f64, unit: &str) -> Self {
        self.batch_as(number, quantity, unit, BatchType::Intermediate, BatchStatus::Completed)
    }

    #[must_use]
    pub fn batch_as(
        mut self,
        number: &str,
        quantity: f64,
        unit: &str,
        batch_type: BatchType,
        status: BatchStatus,
    ) -> Self {
        let id = BatchId(self.snapshot.batches.len() as i64 + 1);
        self.ids.insert(number.to_string(), id);
        self.snapshot.batches.push(Batch {
            id,
            batch_number: number.to_string(),
            batch_type,
            status,
            product_name: format!("product {number}"),
            quantity,
            unit: unit.to_string(),
            production_date: date(1),
            expiry_date: None,
            lot_number: None,
            quality_status: QualityStatus::Passed,
        });
        self
    }

    /// `used` of `source` went into `target`, processed on day 2.
    #[must_use]
    pub fn link(self, source: &str, target: &str, used: f64) -> Self {
        self.link_on(source, target, used, 2)
    }

    #[must_use]
    pub fn link_on(mut self, source: &str, target: &str, used: f64, day: u32) -> Self {
        let id = LinkId(self.snapshot.links.len() as i64 + 1);
        let source_batch_id = self.id(source);
        let target_batch_id = self.id(target);
        self.snapshot.links.push(LineageLink {
            id,
            source_batch_id,
            target_batch_id,
            link_type: LinkType::Ingredient,
            quantity_used: used,
            process_step: format!("step {id}"),
            process_date: date(day),
        });
        self
    }

    /// Id of the batch with `number`. Panics on unknown numbers.
    pub fn id(&self, number: &str) -> BatchId {
        self.ids
            .get(number)
            .copied()
            .unwrap_or_else(|| panic!("fixture has no batch {number}"))
    }

    pub fn snapshot(&self) -> LineageSnapshot {
        self.snapshot.clone()
    }

    pub fn memory_store(&self) -> Arc<MemoryLineageStore> {
        Arc::new(MemoryLineageStore::from_snapshot(self.snapshot()).expect("fixture snapshot is valid"))
    }

    /// The fixture imported into a SQLite file under `dir`.
    pub fn sqlite_store(&self, dir: &tempfile::TempDir) -> Arc<SqliteLineageStore> {
        let store = SqliteLineageStore::open(&dir.path().join("lineage.db")).expect("open sqlite store");
        store.import_snapshot(&self.snapshot).expect("import fixture");
        Arc::new(store)
    }

    pub fn engine(&self) -> TraceabilityEngine {
        self.engine_with(LineageConfig::default())
    }

    pub fn engine_with(&self, config: LineageConfig) -> TraceabilityEngine {
        TraceabilityEngine::over_store(self.memory_store(), ConfigHandle::new(config))
    }

    // ── Scenarios ──────────────────────────────────────────────────

    /// R (100 kg) -> B1 (40 kg, uses 40) -> B2 (10 kg, uses 10).
    pub fn chain() -> Self {
        Self::new()
            .batch_as("R", 100.0, "kg", BatchType::RawMaterial, BatchStatus::Completed)
            .batch("B1", 40.0, "kg")
            .batch_as("B2", 10.0, "kg", BatchType::FinalProduct, BatchStatus::Released)
            .link("R", "B1", 40.0)
            .link("B1", "B2", 10.0)
    }

    /// A feeds B and C, which both feed D: D is reached by two link-disjoint
    /// paths carrying 30% and 20% of its content.
    pub fn diamond() -> Self {
        Self::new()
            .batch_as("A", 100.0, "kg", BatchType::RawMaterial, BatchStatus::Completed)
            .batch("B", 50.0, "kg")
            .batch("C", 50.0, "kg")
            .batch_as("D", 100.0, "kg", BatchType::FinalProduct, BatchStatus::Released)
            .link("A", "B", 50.0)
            .link("A", "C", 50.0)
            .link_on("B", "D", 30.0, 3)
            .link_on("C", "D", 20.0, 3)
    }

    /// A -> B -> C -> A, entered by mistake.
    pub fn cycle() -> Self {
        Self::new()
            .batch("A", 10.0, "kg")
            .batch("B", 10.0, "kg")
            .batch("C", 10.0, "kg")
            .link("A", "B", 10.0)
            .link("B", "C", 10.0)
            .link("C", "A", 10.0)
    }

    /// Milk in litres, a tank in kilograms, and jars counted in pieces.
    pub fn mixed_units() -> Self {
        Self::new()
            .batch_as("M", 1000.0, "l", BatchType::RawMaterial, BatchStatus::Completed)
            .batch("T", 500.0, "kg")
            .batch_as("J", 2000.0, "pcs", BatchType::FinalProduct, BatchStatus::Released)
            .batch_as("Y", 200_000.0, "ml", BatchType::FinalProduct, BatchStatus::Released)
            .link("M", "T", 500.0)
            .link("M", "Y", 200.0)
            .link_on("T", "J", 500.0, 3)
    }

    /// One root feeding `width` batches, each feeding one product of its own.
    pub fn star(width: usize) -> Self {
        let mut fixture = Self::new().batch("ROOT", 1000.0, "kg");
        for i in 0..width {
            fixture = fixture
                .batch(&format!("MID-{i:04}"), 10.0, "kg")
                .batch(&format!("END-{i:04}"), 10.0, "kg")
                .link("ROOT", &format!("MID-{i:04}"), 10.0)
                .link_on(&format!("MID-{i:04}"), &format!("END-{i:04}"), 10.0, 3);
        }
        fixture
    }
}

// ── Instrumented collaborators ─────────────────────────────────────

/// Wraps a memory store and counts collaborator calls.
#[derive(Debug)]
pub struct CountingStore {
    inner: Arc<MemoryLineageStore>,
    edge_calls: AtomicUsize,
    batch_calls: AtomicUsize,
    largest_request: AtomicUsize,
}

impl CountingStore {
    pub fn new(inner: Arc<MemoryLineageStore>) -> Self {
        Self {
            inner,
            edge_calls: AtomicUsize::new(0),
            batch_calls: AtomicUsize::new(0),
            largest_request: AtomicUsize::new(0),
        }
    }

    /// `edges_of` calls so far.
    pub fn edge_calls(&self) -> usize {
        self.edge_calls.load(Ordering::SeqCst)
    }

    /// Registry calls of any kind so far.
    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    /// Most ids passed to a single batched call.
    pub fn largest_request(&self) -> usize {
        self.largest_request.load(Ordering::SeqCst)
    }

    fn note_request(&self, ids: usize) {
        self.largest_request.fetch_max(ids, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl BatchRegistry for CountingStore {
    async fn get_batch(&self, id: BatchId) -> lineage_core::error::Result<Option<Batch>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.get_batch(id).await
    }

    async fn get_batch_by_number(&self, number: &str) -> lineage_core::error::Result<Option<Batch>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.get_batch_by_number(number).await
    }

    async fn get_batches(&self, ids: &[BatchId]) -> lineage_core::error::Result<Vec<Batch>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        self.note_request(ids.len());
        self.inner.get_batches(ids).await
    }
}

#[async_trait::async_trait]
impl GraphSource for CountingStore {
    async fn edges_of(
        &self,
        batch_ids: &[BatchId],
        direction: EdgeDirection,
        page: PageRequest,
    ) -> lineage_core::error::Result<LinkPage> {
        self.edge_calls.fetch_add(1, Ordering::SeqCst);
        self.note_request(batch_ids.len());
        self.inner.edges_of(batch_ids, direction, page).await
    }
}

/// A link store that cannot be reached.
#[derive(Debug, Default)]
pub struct UnreachableSource;

#[async_trait::async_trait]
impl GraphSource for UnreachableSource {
    async fn edges_of(
        &self,
        _batch_ids: &[BatchId],
        _direction: EdgeDirection,
        _page: PageRequest,
    ) -> lineage_core::error::Result<LinkPage> {
        Err(LineageError::DependencyUnavailable(StoreError::Unreachable(
            "connection refused".into(),
        )))
    }
}

/// Delegates to a memory store after sleeping `delay` per call.
#[derive(Debug)]
pub struct SlowSource {
    inner: Arc<MemoryLineageStore>,
    delay: Duration,
}

impl SlowSource {
    pub fn new(inner: Arc<MemoryLineageStore>, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

#[async_trait::async_trait]
impl GraphSource for SlowSource {
    async fn edges_of(
        &self,
        batch_ids: &[BatchId],
        direction: EdgeDirection,
        page: PageRequest,
    ) -> lineage_core::error::Result<LinkPage> {
        tokio::time::sleep(self.delay).await;
        self.inner.edges_of(batch_ids, direction, page).await
    }
}
