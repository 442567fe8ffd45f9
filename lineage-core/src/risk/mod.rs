//! Risk classification boundary.
//!
//! Hazard risk is an input to this crate: a [`RiskClassifier`] maps
//! likelihood × severity onto a [`RiskLevel`] and a control strategy. The
//! recall calculator only consumes the level it returns.

pub mod decision_tree;

use serde::{Deserialize, Serialize};

use crate::config::{ConfigHandle, LineageConfig, RiskSection};
use crate::error::LineageError;

/// Qualitative risk, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// One level more severe, saturating at `Critical`.
    pub fn escalate(self) -> Self {
        match self {
            Self::Low => Self::Medium,
            Self::Medium => Self::High,
            Self::High | Self::Critical => Self::Critical,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Food-safety control classification recommended for a hazard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlStrategy {
    /// Prerequisite programme.
    Prp,
    /// Operational prerequisite programme.
    Oprp,
    /// Critical control point.
    Ccp,
}

impl ControlStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Prp => "PRP",
            Self::Oprp => "OPRP",
            Self::Ccp => "CCP",
        }
    }
}

impl std::fmt::Display for ControlStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Likelihood and severity scores from the hazard assessment workflow, 1..=5 each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HazardAssessment {
    pub likelihood: u8,
    pub severity: u8,
}

impl HazardAssessment {
    pub fn new(likelihood: u8, severity: u8) -> crate::error::Result<Self> {
        let assessment = Self {
            likelihood,
            severity,
        };
        assessment.validate()?;
        Ok(assessment)
    }

    pub fn validate(&self) -> crate::error::Result<()> {
        for (name, value) in [("likelihood", self.likelihood), ("severity", self.severity)] {
            if !(1..=5).contains(&value) {
                return Err(LineageError::invalid(format!(
                    "{name} must be within 1..=5, got {value}"
                )));
            }
        }
        Ok(())
    }

    /// Likelihood × severity. Saturates for values that skipped [`validate`](Self::validate).
    pub fn score(&self) -> u8 {
        self.likelihood.saturating_mul(self.severity)
    }
}

/// What a classifier returns for one assessment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HazardClassification {
    pub likelihood: u8,
    pub severity: u8,
    pub score: u8,
    pub level: RiskLevel,
    pub strategy: ControlStrategy,
}

/// Injected hazard classification.
pub trait RiskClassifier: Send + Sync {
    /// Classify a likelihood/severity pair. Both must be within 1..=5.
    fn classify(&self, likelihood: u8, severity: u8) -> crate::error::Result<HazardClassification>;
}

/// Score thresholds read from the `[risk]` configuration section.
///
/// Holds a [`ConfigHandle`], so reloaded thresholds apply to the next call.
#[derive(Debug, Clone, Default)]
pub struct ThresholdClassifier {
    config: ConfigHandle,
}

impl ThresholdClassifier {
    pub fn new(config: ConfigHandle) -> Self {
        Self { config }
    }

    /// A classifier with fixed thresholds.
    pub fn fixed(risk: RiskSection) -> crate::error::Result<Self> {
        let config = LineageConfig {
            risk,
            ..LineageConfig::default()
        };
        config.validate()?;
        Ok(Self::new(ConfigHandle::new(config)))
    }

    /// Level for a raw likelihood × severity score.
    pub fn level_for(thresholds: &RiskSection, score: u8) -> RiskLevel {
        if score <= thresholds.low_max {
            RiskLevel::Low
        } else if score <= thresholds.medium_max {
            RiskLevel::Medium
        } else if score <= thresholds.high_max {
            RiskLevel::High
        } else {
            RiskLevel::Critical
        }
    }

    pub fn strategy_for(level: RiskLevel) -> ControlStrategy {
        match level {
            RiskLevel::Low => ControlStrategy::Prp,
            RiskLevel::Medium => ControlStrategy::Oprp,
            RiskLevel::High | RiskLevel::Critical => ControlStrategy::Ccp,
        }
    }
}

impl RiskClassifier for ThresholdClassifier {
    fn classify(&self, likelihood: u8, severity: u8) -> crate::error::Result<HazardClassification> {
        let assessment = HazardAssessment::new(likelihood, severity)?;
        let score = assessment.score();
        let level = Self::level_for(&self.config.snapshot().risk, score);
        Ok(HazardClassification {
            likelihood,
            severity,
            score,
            level,
            strategy: Self::strategy_for(level),
        })
    }
}
