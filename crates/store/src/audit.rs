//! Tamper-evident audit trail with SHA-256 hash chaining.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use healwatch_core::types::{AuditCategory, AuditEvent};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

const GENESIS_HASH: &str = "genesis";

/// Append-only audit record collection.
pub trait AuditStore: Send + Sync {
    /// Chain and persist an event; returns it with sequence and hashes set.
    fn record(&self, event: AuditEvent) -> AuditEvent;

    /// Newest first, optionally filtered by category and time.
    fn query(
        &self,
        category: Option<AuditCategory>,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Vec<AuditEvent>;

    fn verify_chain(&self) -> ChainVerification;

    fn count(&self) -> usize;

    /// Convenience wrapper deriving the category from `event_type`.
    fn log(&self, event_type: &str, actor: &str, data: serde_json::Value) -> AuditEvent {
        self.record(AuditEvent::new(event_type, actor, data))
    }
}

/// Result of verifying the audit chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainVerification {
    pub total_events: usize,
    pub valid_events: usize,
    pub tampered_sequences: Vec<u64>,
    pub chain_intact: bool,
}

pub struct InMemoryAuditStore {
    events: DashMap<u64, AuditEvent>,
    // sequence and last hash advance together
    head: parking_lot::Mutex<(u64, String)>,
}

impl Default for InMemoryAuditStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self {
            events: DashMap::new(),
            head: parking_lot::Mutex::new((0, GENESIS_HASH.to_string())),
        }
    }

    fn content_hash(event: &AuditEvent) -> String {
        let content = format!(
            "{}:{}:{:?}:{}:{}:{}:{}",
            event.sequence,
            event.event_type,
            event.category,
            event.actor,
            event.data,
            event.timestamp.to_rfc3339(),
            event.previous_hash,
        );
        sha256_hex(&content)
    }

    #[cfg(test)]
    fn tamper(&self, sequence: u64, actor: &str) {
        if let Some(mut event) = self.events.get_mut(&sequence) {
            event.actor = actor.to_string();
        }
    }
}

impl AuditStore for InMemoryAuditStore {
    fn record(&self, mut event: AuditEvent) -> AuditEvent {
        let mut head = self.head.lock();
        head.0 += 1;
        event.sequence = head.0;
        event.previous_hash = head.1.clone();
        event.event_hash = Self::content_hash(&event);
        head.1 = event.event_hash.clone();
        self.events.insert(event.sequence, event.clone());
        drop(head);

        debug!(
            sequence = event.sequence,
            event_type = %event.event_type,
            category = ?event.category,
            "Audit event recorded"
        );
        event
    }

    fn query(
        &self,
        category: Option<AuditCategory>,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Vec<AuditEvent> {
        let mut results: Vec<AuditEvent> = self
            .events
            .iter()
            .filter(|e| category.map_or(true, |c| e.category == c))
            .filter(|e| since.map_or(true, |s| e.timestamp >= s))
            .map(|e| e.value().clone())
            .collect();
        results.sort_by(|a, b| b.sequence.cmp(&a.sequence));
        results.truncate(limit);
        results
    }

    fn verify_chain(&self) -> ChainVerification {
        let mut events: Vec<AuditEvent> = self.events.iter().map(|e| e.value().clone()).collect();
        events.sort_by_key(|e| e.sequence);

        let total = events.len();
        let mut valid = 0;
        let mut tampered = Vec::new();
        let mut expected_prev = GENESIS_HASH.to_string();

        for event in &events {
            if event.previous_hash == expected_prev && Self::content_hash(event) == event.event_hash
            {
                valid += 1;
            } else {
                tampered.push(event.sequence);
            }
            expected_prev = event.event_hash.clone();
        }

        ChainVerification {
            total_events: total,
            valid_events: valid,
            tampered_sequences: tampered,
            chain_intact: valid == total,
        }
    }

    fn count(&self) -> usize {
        self.events.len()
    }
}

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_chain_links_events() {
        let store = InMemoryAuditStore::new();
        let first = store.log("pattern_created", "pattern-analyzer", json!({"id": "p1"}));
        let second = store.log("fix_applied", "remediation-engine", json!({"id": "f1"}));

        assert_eq!(first.sequence, 1);
        assert_eq!(first.previous_hash, "genesis");
        assert_eq!(second.previous_hash, first.event_hash);
        assert_eq!(second.category, AuditCategory::Remediation);
        assert!(store.verify_chain().chain_intact);
    }

    #[test]
    fn test_tampering_detected() {
        let store = InMemoryAuditStore::new();
        store.log("fix_applied", "remediation-engine", json!({}));
        store.log("fix_tested", "remediation-engine", json!({}));
        store.tamper(1, "someone-else");

        let verification = store.verify_chain();
        assert!(!verification.chain_intact);
        assert_eq!(verification.tampered_sequences, vec![1]);
        assert_eq!(verification.valid_events, 1);
    }

    #[test]
    fn test_query_filters_by_category() {
        let store = InMemoryAuditStore::new();
        store.log("token_refreshed", "token-gateway", json!({}));
        store.log("fix_failed", "remediation-engine", json!({}));
        store.log("fix_applied", "remediation-engine", json!({}));

        let remediation = store.query(Some(AuditCategory::Remediation), None, 10);
        assert_eq!(remediation.len(), 2);
        assert_eq!(remediation[0].event_type, "fix_applied");
        assert_eq!(store.query(None, None, 1).len(), 1);
    }
}
