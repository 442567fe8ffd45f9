use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::LineageError;

// ── Typed ID wrappers ──────────────────────────────────────────────

macro_rules! typed_id {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name(pub i64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }
    };
}

typed_id!(BatchId);
typed_id!(LinkId);

// ── String-backed enums ────────────────────────────────────────────

/// Generates `as_str`, `Display` and `FromStr` for a unit-only enum whose
/// serde representation is kebab-case.
macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub const ALL: &[Self] = &[$(Self::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = LineageError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_lowercase().as_str() {
                    $($text => Ok(Self::$variant),)+
                    other => Err(LineageError::InvalidInput(format!(
                        "unknown {} '{other}'",
                        stringify!($name)
                    ))),
                }
            }
        }
    };
}

/// What kind of material a batch holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BatchType {
    RawMaterial,
    Additive,
    Culture,
    Packaging,
    FinalProduct,
    Intermediate,
}

string_enum!(BatchType {
    RawMaterial => "raw-material",
    Additive => "additive",
    Culture => "culture",
    Packaging => "packaging",
    FinalProduct => "final-product",
    Intermediate => "intermediate",
});

/// Production lifecycle state of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BatchStatus {
    InProduction,
    Completed,
    Quarantined,
    Released,
    Recalled,
    Disposed,
}

string_enum!(BatchStatus {
    InProduction => "in-production",
    Completed => "completed",
    Quarantined => "quarantined",
    Released => "released",
    Recalled => "recalled",
    Disposed => "disposed",
});

/// Outcome of quality control for a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum QualityStatus {
    #[default]
    Pending,
    Passed,
    Failed,
}

string_enum!(QualityStatus {
    Pending => "pending",
    Passed => "passed",
    Failed => "failed",
});

/// How a source batch relates to the batch it was used in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LinkType {
    /// Source is an ingredient of the target.
    Ingredient,
    /// Target is a product (re)packed from the source.
    Product,
    /// Target is the same material after a process step.
    Process,
}

string_enum!(LinkType {
    Ingredient => "ingredient",
    Product => "product",
    Process => "process",
});

// ── Batches and links ──────────────────────────────────────────────

/// A discrete, identifiable quantity of material tracked through production.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub id: BatchId,
    /// Unique, human-readable number printed on labels.
    pub batch_number: String,
    #[serde(rename = "type")]
    pub batch_type: BatchType,
    pub status: BatchStatus,
    pub product_name: String,
    pub quantity: f64,
    pub unit: String,
    pub production_date: NaiveDate,
    #[serde(default)]
    pub expiry_date: Option<NaiveDate>,
    #[serde(default)]
    pub lot_number: Option<String>,
    #[serde(default)]
    pub quality_status: QualityStatus,
}

/// A recorded "used-in" edge: `quantity_used` of the source went into the target.
///
/// Links are never edited; corrections are recorded as new links.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineageLink {
    pub id: LinkId,
    pub source_batch_id: BatchId,
    pub target_batch_id: BatchId,
    pub link_type: LinkType,
    /// Quantity of the source consumed, in the source batch's unit.
    pub quantity_used: f64,
    #[serde(default)]
    pub process_step: String,
    pub process_date: NaiveDate,
}

impl LineageLink {
    /// The endpoint on the far side when walking this link in `direction`.
    pub fn neighbor(&self, direction: EdgeDirection) -> BatchId {
        match direction {
            EdgeDirection::Outgoing => self.target_batch_id,
            EdgeDirection::Incoming => self.source_batch_id,
        }
    }

    /// The endpoint the walk starts from.
    pub fn anchor(&self, direction: EdgeDirection) -> BatchId {
        self.neighbor(direction.opposite())
    }
}

/// A link not yet persisted. The store assigns its id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLink {
    pub source_batch_id: BatchId,
    pub target_batch_id: BatchId,
    pub link_type: LinkType,
    pub quantity_used: f64,
    #[serde(default)]
    pub process_step: String,
    pub process_date: NaiveDate,
}

impl NewLink {
    pub fn is_self_loop(&self) -> bool {
        self.source_batch_id == self.target_batch_id
    }

    pub fn with_id(self, id: LinkId) -> LineageLink {
        LineageLink {
            id,
            source_batch_id: self.source_batch_id,
            target_batch_id: self.target_batch_id,
            link_type: self.link_type,
            quantity_used: self.quantity_used,
            process_step: self.process_step,
            process_date: self.process_date,
        }
    }
}

// ── Directions ─────────────────────────────────────────────────────

/// Direction of a link relative to the batch being expanded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeDirection {
    /// Links whose target is the batch: its ingredients (upstream).
    Incoming,
    /// Links whose source is the batch: what it was used in (downstream).
    Outgoing,
}

impl EdgeDirection {
    pub fn opposite(self) -> Self {
        match self {
            Self::Incoming => Self::Outgoing,
            Self::Outgoing => Self::Incoming,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Incoming => "incoming",
            Self::Outgoing => "outgoing",
        }
    }
}

/// Which side of the root a trace explores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceDirection {
    /// Downstream: products made from the root.
    Forward,
    /// Upstream: ingredients of the root.
    Backward,
    /// Both sides.
    Full,
}

impl TraceDirection {
    /// Edge directions expanded for this trace, downstream first.
    pub fn edge_directions(self) -> &'static [EdgeDirection] {
        match self {
            Self::Forward => &[EdgeDirection::Outgoing],
            Self::Backward => &[EdgeDirection::Incoming],
            Self::Full => &[EdgeDirection::Outgoing, EdgeDirection::Incoming],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Forward => "forward",
            Self::Backward => "backward",
            Self::Full => "full",
        }
    }
}

impl std::fmt::Display for TraceDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TraceDirection {
    type Err = LineageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "forward" | "downstream" | "outgoing" => Ok(Self::Forward),
            "backward" | "upstream" | "incoming" => Ok(Self::Backward),
            "full" | "both" => Ok(Self::Full),
            other => Err(LineageError::InvalidInput(format!(
                "unknown trace direction '{other}'"
            ))),
        }
    }
}

// ── Paging ─────────────────────────────────────────────────────────

/// One page of an edge lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub offset: u64,
    pub limit: u32,
}

impl PageRequest {
    pub fn first(limit: u32) -> Self {
        Self { offset: 0, limit }
    }
}

/// Links returned for one page, with the offset of the next page if any.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkPage {
    pub links: Vec<LineageLink>,
    pub next_offset: Option<u64>,
}

// ── Snapshots ──────────────────────────────────────────────────────

/// A self-contained dump of batches and links, used to seed stores.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LineageSnapshot {
    #[serde(default)]
    pub batches: Vec<Batch>,
    #[serde(default)]
    pub links: Vec<LineageLink>,
}

// ── Tests ──────────────────────────────────────────────────────────
