//! Lineage core library — batch lineage graph, trace resolution, recall impact.
//!
//! The main entry point is [`engine::TraceabilityEngine`], which answers trace,
//! recall and hazard classification requests over an injected
//! [`store::BatchRegistry`] and [`store::GraphSource`].

pub mod config;
pub mod engine;
pub mod error;
pub mod links;
pub mod recall;
pub mod risk;
pub mod store;
pub mod trace;
pub mod types;
pub mod units;
