//! Document-store abstractions for patterns, fixes, events and audit records.
//!
//! Each store is a trait with an in-memory implementation that keeps the
//! indexes the document collections declare: unique signature on patterns,
//! pattern id and status on fixes, timestamp / source / correlation id on
//! events.

pub mod audit;
pub mod events;
pub mod fixes;
pub mod patterns;

pub use audit::{AuditStore, ChainVerification, InMemoryAuditStore};
pub use events::{EventStore, InMemoryEventStore};
pub use fixes::{FixStore, InMemoryFixStore};
pub use patterns::{InMemoryPatternStore, PatternStore};
