// Request-level facade over the lineage core.
//
// Each call snapshots the configuration once, validates its inputs before any
// store access, and runs under the configured request timeout plus the
// caller's cancellation token. The engine holds no per-request state, so one
// instance serves any number of concurrent requests.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{ConfigHandle, LineageConfig};
use crate::error::{LineageError, StoreError};
use crate::links::{self, LinkWarning, RecordedLink};
use crate::recall::{ImpactReport, RecallImpactCalculator, RecallRequest, RecallRules, StandardRecallRules};
use crate::risk::{HazardAssessment, HazardClassification, RiskClassifier, ThresholdClassifier};
use crate::store::{BatchRegistry, GraphSource, LinkWriter};
use crate::trace::{FetchLimits, LineageGraphBuilder, TraceRequest, TraceResolver, TraceTree};
use crate::types::{Batch, BatchId, EdgeDirection, NewLink, PageRequest, TraceDirection};
use crate::units::{UnitConverter, UnitTable};

/// Traceability operations over injected collaborators.
#[derive(Clone)]
pub struct TraceabilityEngine {
    registry: Arc<dyn BatchRegistry>,
    source: Arc<dyn GraphSource>,
    writer: Option<Arc<dyn LinkWriter>>,
    units: Arc<dyn UnitConverter>,
    classifier: Arc<dyn RiskClassifier>,
    rules: Arc<dyn RecallRules>,
    config: ConfigHandle,
}

impl std::fmt::Debug for TraceabilityEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceabilityEngine")
            .field("config", &self.config)
            .field("writable", &self.writer.is_some())
            .finish_non_exhaustive()
    }
}

/// Assembles a [`TraceabilityEngine`]. Unset collaborators get defaults: the
/// built-in unit table extended from configuration, threshold classification
/// from the `[risk]` section, and [`StandardRecallRules`].
pub struct EngineBuilder {
    registry: Arc<dyn BatchRegistry>,
    source: Arc<dyn GraphSource>,
    writer: Option<Arc<dyn LinkWriter>>,
    units: Option<Arc<dyn UnitConverter>>,
    classifier: Option<Arc<dyn RiskClassifier>>,
    rules: Option<Arc<dyn RecallRules>>,
    config: ConfigHandle,
}

impl std::fmt::Debug for EngineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineBuilder")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl EngineBuilder {
    #[must_use]
    pub fn link_writer(mut self, writer: Arc<dyn LinkWriter>) -> Self {
        self.writer = Some(writer);
        self
    }

    #[must_use]
    pub fn units(mut self, units: Arc<dyn UnitConverter>) -> Self {
        self.units = Some(units);
        self
    }

    #[must_use]
    pub fn classifier(mut self, classifier: Arc<dyn RiskClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    #[must_use]
    pub fn rules(mut self, rules: Arc<dyn RecallRules>) -> Self {
        self.rules = Some(rules);
        self
    }

    #[must_use]
    pub fn config(mut self, config: ConfigHandle) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> TraceabilityEngine {
        let config = self.config;
        let units: Arc<dyn UnitConverter> = match self.units {
            Some(units) => units,
            None => Arc::new(UnitTable::from_config(&config.snapshot().units)),
        };
        let classifier: Arc<dyn RiskClassifier> = match self.classifier {
            Some(classifier) => classifier,
            None => Arc::new(ThresholdClassifier::new(config.clone())),
        };
        let rules: Arc<dyn RecallRules> = match self.rules {
            Some(rules) => rules,
            None => Arc::new(StandardRecallRules),
        };
        TraceabilityEngine {
            registry: self.registry,
            source: self.source,
            writer: self.writer,
            units,
            classifier,
            rules,
            config,
        }
    }
}

impl TraceabilityEngine {
    pub fn builder(registry: Arc<dyn BatchRegistry>, source: Arc<dyn GraphSource>) -> EngineBuilder {
        EngineBuilder {
            registry,
            source,
            writer: None,
            units: None,
            classifier: None,
            rules: None,
            config: ConfigHandle::default(),
        }
    }

    /// Engine over a single store serving batches, links and link writes.
    pub fn over_store<S>(store: Arc<S>, config: ConfigHandle) -> Self
    where
        S: BatchRegistry + GraphSource + LinkWriter + 'static,
    {
        Self::builder(store.clone(), store.clone())
            .link_writer(store)
            .config(config)
            .build()
    }

    pub fn config(&self) -> &ConfigHandle {
        &self.config
    }

    /// Ordered traceability chain for `batch_id`. `depth` defaults to
    /// `traversal.default_depth` and must lie within `1..=traversal.max_depth`.
    pub async fn resolve_trace(
        &self,
        batch_id: BatchId,
        direction: TraceDirection,
        depth: Option<i64>,
        cancel: &CancellationToken,
    ) -> crate::error::Result<TraceTree> {
        let config = self.config.snapshot();
        let depth = config
            .traversal
            .depth_bound(depth, config.traversal.default_depth)?;
        let request = TraceRequest {
            root: batch_id,
            direction,
            depth,
        };
        let resolver = self.resolver(&config);
        with_deadline(
            config.traversal.request_timeout(),
            resolver.resolve(&request, cancel),
        )
        .await
    }

    /// Downstream recall impact for `batch_id`. `depth` defaults to
    /// `traversal.recall_depth`.
    pub async fn compute_recall_impact(
        &self,
        batch_id: BatchId,
        depth: Option<i64>,
        hazard: Option<HazardAssessment>,
        cancel: &CancellationToken,
    ) -> crate::error::Result<ImpactReport> {
        let config = self.config.snapshot();
        let depth = config
            .traversal
            .depth_bound(depth, config.traversal.recall_depth)?;
        if let Some(h) = &hazard {
            h.validate()?;
        }
        let request = RecallRequest {
            root: batch_id,
            depth,
            hazard,
        };
        let calculator = RecallImpactCalculator::new(
            self.resolver(&config),
            self.units.as_ref(),
            self.classifier.as_ref(),
            self.rules.as_ref(),
        )
        .with_escalation(config.escalation.clone())
        .with_max_paths(config.traversal.max_paths);
        with_deadline(
            config.traversal.request_timeout(),
            calculator.compute(&request, cancel),
        )
        .await
    }

    /// Pass-through to the injected classifier.
    pub fn classify_hazard(
        &self,
        likelihood: u8,
        severity: u8,
    ) -> crate::error::Result<HazardClassification> {
        self.classifier.classify(likelihood, severity)
    }

    /// Resolve a human-readable batch number.
    pub async fn find_batch(&self, batch_number: &str) -> crate::error::Result<Batch> {
        let number = batch_number.trim();
        if number.is_empty() {
            return Err(LineageError::invalid("batch number must not be empty"));
        }
        self.registry
            .get_batch_by_number(number)
            .await?
            .ok_or_else(|| LineageError::NotFound(format!("batch number {number}")))
    }

    /// Check a proposed link without recording it.
    pub async fn validate_link(&self, link: &NewLink) -> crate::error::Result<Vec<LinkWarning>> {
        links::check_shape(link)?;
        let source = self.require_batch(link.source_batch_id).await?;
        let target = self.require_batch(link.target_batch_id).await?;
        let already_used = self.used_quantity(source.id).await?;

        let warnings = links::check_against(link, &source, &target, already_used, self.units.as_ref());
        for w in &warnings {
            warn!(
                source = %link.source_batch_id,
                target = %link.target_batch_id,
                warning = ?w,
                "Link check"
            );
        }
        Ok(warnings)
    }

    /// Validate and hand the link to the store's write path.
    pub async fn record_link(&self, link: &NewLink) -> crate::error::Result<RecordedLink> {
        let Some(writer) = &self.writer else {
            return Err(StoreError::Unreachable("no link writer configured".into()).into());
        };
        let warnings = self.validate_link(link).await?;
        let id = writer.record_link(link).await?;
        info!(
            link = %id,
            source = %link.source_batch_id,
            target = %link.target_batch_id,
            warnings = warnings.len(),
            "Recorded lineage link"
        );
        Ok(RecordedLink { id, warnings })
    }

    fn resolver(&self, config: &LineageConfig) -> TraceResolver<'_> {
        let limits = FetchLimits {
            chunk_size: config.traversal.fetch_chunk_size,
            page_size: config.traversal.page_size,
        };
        let builder = LineageGraphBuilder::new(self.registry.as_ref(), self.source.as_ref(), limits);
        TraceResolver::new(builder, self.units.as_ref(), config.traversal.max_trace_nodes)
    }

    async fn require_batch(&self, id: BatchId) -> crate::error::Result<Batch> {
        self.registry
            .get_batch(id)
            .await?
            .ok_or_else(|| LineageError::NotFound(format!("batch {id}")))
    }

    /// Sum of `quantity_used` over the batch's existing outgoing links.
    async fn used_quantity(&self, id: BatchId) -> crate::error::Result<f64> {
        let page_size = self.config.snapshot().traversal.page_size;
        let mut page = PageRequest::first(page_size);
        let mut used = 0.0;
        loop {
            let result = self
                .source
                .edges_of(&[id], EdgeDirection::Outgoing, page)
                .await?;
            used += result.links.iter().map(|l| l.quantity_used).sum::<f64>();
            match result.next_offset {
                Some(next) if next > page.offset => page.offset = next,
                Some(_) => {
                    return Err(StoreError::Corrupt("link store returned a non-advancing page".into()).into());
                }
                None => return Ok(used),
            }
        }
    }
}

/// Run `fut` under `timeout`. Dropping the future on expiry cancels every
/// in-flight fetch it owns.
async fn with_deadline<T>(
    timeout: Duration,
    fut: impl Future<Output = crate::error::Result<T>>,
) -> crate::error::Result<T> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(LineageError::TimedOut(timeout)),
    }
}
