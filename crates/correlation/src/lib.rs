//! Heuristic cross-source event correlation.

pub mod engine;
pub mod keys;
pub mod scoring;

pub use engine::{CorrelationEngine, CorrelationReport, CorrelationStatistics};
pub use keys::correlation_keys;
pub use scoring::{score_group, GroupScore};
