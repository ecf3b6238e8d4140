//! Error fingerprinting and confidence scoring.

pub mod analyzer;
pub mod fingerprint;
pub mod templates;

pub use analyzer::{PatternAnalyzer, RemediationTrigger, SweepReport};
pub use fingerprint::Fingerprint;
