use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ConfigError, LineageError};

/// Top-level lineage configuration, matching `lineage.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LineageConfig {
    #[serde(default)]
    pub traversal: TraversalSection,
    #[serde(default)]
    pub risk: RiskSection,
    #[serde(default)]
    pub escalation: EscalationSection,
    #[serde(default)]
    pub units: UnitsSection,
}

impl LineageConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Parse(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.traversal.validate()?;
        self.risk.validate()?;
        self.escalation.validate()?;
        self.units.validate()
    }
}

// ── Traversal ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraversalSection {
    /// Depth used by trace requests that don't name one.
    pub default_depth: u32,
    /// Hard cap on any requested depth.
    pub max_depth: u32,
    /// Depth used by recall computations that don't name one.
    pub recall_depth: u32,
    /// Frontier batch ids per batched edge fetch.
    pub fetch_chunk_size: usize,
    /// Links requested per page from the link store.
    pub page_size: u32,
    /// Trace nodes emitted before the resolver stops and marks the tree truncated.
    pub max_trace_nodes: usize,
    /// Root-to-descendant paths enumerated before attribution stops.
    pub max_paths: usize,
    pub request_timeout_ms: u64,
}

impl Default for TraversalSection {
    fn default() -> Self {
        Self {
            default_depth: 5,
            max_depth: 20,
            recall_depth: 10,
            fetch_chunk_size: 64,
            page_size: 500,
            max_trace_nodes: 10_000,
            max_paths: 50_000,
            request_timeout_ms: 30_000,
        }
    }
}

impl TraversalSection {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Turn a caller-supplied depth into a checked bound, falling back to
    /// `fallback` when none was given.
    pub fn depth_bound(&self, requested: Option<i64>, fallback: u32) -> Result<u32, LineageError> {
        let Some(depth) = requested else {
            return Ok(fallback.min(self.max_depth));
        };
        if depth < 1 {
            return Err(LineageError::invalid(format!(
                "depth bound must be at least 1, got {depth}"
            )));
        }
        if depth > i64::from(self.max_depth) {
            return Err(LineageError::invalid(format!(
                "depth bound {depth} exceeds the maximum of {}",
                self.max_depth
            )));
        }
        // Bounded by max_depth above.
        Ok(u32::try_from(depth).unwrap_or(self.max_depth))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_depth == 0 {
            return Err(ConfigError::Invalid("traversal.max_depth must be positive".into()));
        }
        for (name, value) in [
            ("default_depth", self.default_depth),
            ("recall_depth", self.recall_depth),
        ] {
            if value == 0 || value > self.max_depth {
                return Err(ConfigError::Invalid(format!(
                    "traversal.{name} must be within 1..={}, got {value}",
                    self.max_depth
                )));
            }
        }
        if self.fetch_chunk_size == 0 || self.page_size == 0 {
            return Err(ConfigError::Invalid(
                "traversal.fetch_chunk_size and traversal.page_size must be positive".into(),
            ));
        }
        if self.max_trace_nodes == 0 || self.max_paths == 0 {
            return Err(ConfigError::Invalid(
                "traversal.max_trace_nodes and traversal.max_paths must be positive".into(),
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "traversal.request_timeout_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}

// ── Risk thresholds ────────────────────────────────────────────────

/// Cutoffs on likelihood × severity (1..=25). Scores above `high_max` are critical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskSection {
    pub low_max: u8,
    pub medium_max: u8,
    pub high_max: u8,
}

impl Default for RiskSection {
    fn default() -> Self {
        Self {
            low_max: 4,
            medium_max: 8,
            high_max: 15,
        }
    }
}

impl RiskSection {
    fn validate(&self) -> Result<(), ConfigError> {
        let ascending = self.low_max >= 1
            && self.low_max < self.medium_max
            && self.medium_max < self.high_max
            && self.high_max <= 25;
        if ascending {
            Ok(())
        } else {
            Err(ConfigError::Invalid(format!(
                "risk thresholds must satisfy 1 <= low_max < medium_max < high_max <= 25, got {}/{}/{}",
                self.low_max, self.medium_max, self.high_max
            )))
        }
    }
}

// ── Scale escalation ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationSection {
    /// Affected batch count above which the recall risk is escalated one level.
    pub large_scale_batches: usize,
    /// Affected quantity (root batch unit) above which the risk is escalated.
    pub large_scale_quantity: Option<f64>,
}

impl Default for EscalationSection {
    fn default() -> Self {
        Self {
            large_scale_batches: 25,
            large_scale_quantity: None,
        }
    }
}

impl EscalationSection {
    fn validate(&self) -> Result<(), ConfigError> {
        match self.large_scale_quantity {
            Some(q) if !q.is_finite() || q <= 0.0 => Err(ConfigError::Invalid(format!(
                "escalation.large_scale_quantity must be a positive number, got {q}"
            ))),
            _ => Ok(()),
        }
    }
}

// ── Units ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnitsSection {
    /// Conversions added on top of the built-in mass/volume table.
    #[serde(default)]
    pub conversions: Vec<UnitConversion>,
}

/// `1 from = factor to`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitConversion {
    pub from: String,
    pub to: String,
    pub factor: f64,
}

impl UnitsSection {
    fn validate(&self) -> Result<(), ConfigError> {
        for c in &self.conversions {
            if c.from.trim().is_empty() || c.to.trim().is_empty() {
                return Err(ConfigError::Invalid("unit names must not be empty".into()));
            }
            if !c.factor.is_finite() || c.factor <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "conversion {} -> {} has non-positive factor {}",
                    c.from, c.to, c.factor
                )));
            }
        }
        Ok(())
    }
}

// ── Hot-reloadable handle ──────────────────────────────────────────

/// Shared, hot-reloadable view of the active configuration.
///
/// Requests call [`ConfigHandle::snapshot`] once and keep that `Arc` for their
/// whole lifetime, so a reload only affects requests started afterwards.
#[derive(Debug, Clone)]
pub struct ConfigHandle {
    current: Arc<ArcSwap<LineageConfig>>,
    path: Option<PathBuf>,
}

impl ConfigHandle {
    pub fn new(config: LineageConfig) -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(config)),
            path: None,
        }
    }

    /// Load from a file and remember the path for [`ConfigHandle::reload`].
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let config = LineageConfig::load(path)?;
        Ok(Self {
            current: Arc::new(ArcSwap::from_pointee(config)),
            path: Some(path.to_path_buf()),
        })
    }

    pub fn snapshot(&self) -> Arc<LineageConfig> {
        self.current.load_full()
    }

    /// Validate and swap in a new configuration.
    pub fn replace(&self, config: LineageConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.current.store(Arc::new(config));
        Ok(())
    }

    /// Re-read the file this handle was created from. A failed reload keeps
    /// the previous configuration active.
    pub fn reload(&self) -> Result<(), ConfigError> {
        let Some(path) = &self.path else {
            return Err(ConfigError::NotFound(
                "configuration was not loaded from a file".into(),
            ));
        };
        let config = LineageConfig::load(path)?;
        self.current.store(Arc::new(config));
        info!(path = %path.display(), "Reloaded lineage configuration");
        Ok(())
    }
}

impl Default for ConfigHandle {
    fn default() -> Self {
        Self::new(LineageConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = LineageConfig::default();
        config.validate().unwrap();
        assert_eq!(config.traversal.default_depth, 5);
        assert_eq!(config.traversal.max_depth, 20);
        assert_eq!(config.risk.high_max, 15);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config = LineageConfig::from_toml_str(
            r#"
            [traversal]
            recall_depth = 12

            [escalation]
            large_scale_batches = 3

            [[units.conversions]]
            from = "crate"
            to = "kg"
            factor = 12.5
            "#,
        )
        .unwrap();
        assert_eq!(config.traversal.recall_depth, 12);
        assert_eq!(config.traversal.default_depth, 5);
        assert_eq!(config.escalation.large_scale_batches, 3);
        assert_eq!(config.units.conversions.len(), 1);
        assert_eq!(config.risk, RiskSection::default());
    }

    #[test]
    fn non_ascending_thresholds_rejected() {
        let err = LineageConfig::from_toml_str("[risk]\nlow_max = 8\nmedium_max = 8\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn malformed_toml_is_parse_error() {
        let err = LineageConfig::from_toml_str("[traversal\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn depth_bound_checks_range() {
        let t = TraversalSection::default();
        assert_eq!(t.depth_bound(None, t.default_depth).unwrap(), 5);
        assert_eq!(t.depth_bound(Some(20), t.default_depth).unwrap(), 20);
        assert!(matches!(
            t.depth_bound(Some(-1), t.default_depth),
            Err(LineageError::InvalidInput(_))
        ));
        assert!(matches!(
            t.depth_bound(Some(0), t.default_depth),
            Err(LineageError::InvalidInput(_))
        ));
        assert!(matches!(
            t.depth_bound(Some(21), t.default_depth),
            Err(LineageError::InvalidInput(_))
        ));
    }

    #[test]
    fn handle_reload_swaps_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lineage.toml");
        std::fs::write(&path, "[escalation]\nlarge_scale_batches = 10\n").unwrap();

        let handle = ConfigHandle::from_path(&path).unwrap();
        let before = handle.snapshot();
        assert_eq!(before.escalation.large_scale_batches, 10);

        std::fs::write(&path, "[escalation]\nlarge_scale_batches = 2\n").unwrap();
        handle.reload().unwrap();
        assert_eq!(handle.snapshot().escalation.large_scale_batches, 2);
        // Earlier snapshots are unaffected.
        assert_eq!(before.escalation.large_scale_batches, 10);
    }

    #[test]
    fn failed_reload_keeps_previous_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lineage.toml");
        std::fs::write(&path, "[risk]\nhigh_max = 20\n").unwrap();
        let handle = ConfigHandle::from_path(&path).unwrap();

        std::fs::write(&path, "[risk]\nhigh_max = 2\n").unwrap();
        assert!(handle.reload().is_err());
        assert_eq!(handle.snapshot().risk.high_max, 20);
    }

    #[test]
    fn replace_validates() {
        let handle = ConfigHandle::default();
        let mut bad = LineageConfig::default();
        bad.traversal.page_size = 0;
        assert!(handle.replace(bad).is_err());
        assert_eq!(handle.snapshot().traversal.page_size, 500);
    }
}
