//! Periodic cross-source correlation pass.
//!
//! Events sharing any weak key form a candidate group. Candidates are visited
//! in a fixed order (confidence desc, key asc); the first promoted group to
//! reach an event claims it for the pass, and later overlapping groups only
//! relabel their unclaimed members. A candidate whose members are all claimed
//! is skipped. Summaries are upserted by correlation id, so rerunning a pass
//! over the same events creates nothing new.

use chrono::{DateTime, Duration, Utc};
use healwatch_core::config::CorrelationConfig;
use healwatch_core::error::MonitorResult;
use healwatch_core::types::{CorrelationGroup, EventSource, MonitoringEvent};
use healwatch_core::CorrelationEcho;
use healwatch_store::{AuditStore, EventStore};
use md5::{Digest, Md5};
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::keys::correlation_keys;
use crate::scoring::{score_group, GroupScore};

const ACTOR: &str = "correlation-engine";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CorrelationReport {
    pub events_scanned: usize,
    pub candidate_groups: usize,
    pub promoted: usize,
    pub summaries_created: usize,
    pub events_updated: usize,
    pub overlapping_events: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CorrelationStatistics {
    pub total_correlations: usize,
    pub average_confidence: f64,
    pub total_correlated_events: u64,
}

struct Candidate<'a> {
    key: String,
    members: Vec<&'a MonitoringEvent>,
    score: GroupScore,
}

pub struct CorrelationEngine {
    config: CorrelationConfig,
    events: Arc<dyn EventStore>,
    audit: Arc<dyn AuditStore>,
    echoes: Vec<Arc<dyn CorrelationEcho>>,
    pass: tokio::sync::Mutex<()>,
}

impl CorrelationEngine {
    pub fn new(
        config: CorrelationConfig,
        events: Arc<dyn EventStore>,
        audit: Arc<dyn AuditStore>,
    ) -> Self {
        Self {
            config,
            events,
            audit,
            echoes: Vec::new(),
            pass: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_echo(mut self, echo: Arc<dyn CorrelationEcho>) -> Self {
        self.echoes.push(echo);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Correlate the configured trailing window. A window too large to
    /// represent covers every stored event.
    pub async fn correlate(&self) -> MonitorResult<CorrelationReport> {
        let window = self.config.window_minutes;
        let since = Duration::try_minutes(window)
            .and_then(|w| Utc::now().checked_sub_signed(w))
            .unwrap_or_else(|| {
                warn!(window_minutes = window, "Correlation window out of range, scanning all events");
                DateTime::<Utc>::MIN_UTC
            });
        self.correlate_since(since).await
    }

    pub async fn correlate_since(&self, since: DateTime<Utc>) -> MonitorResult<CorrelationReport> {
        let _pass = self.pass.lock().await;

        let events: Vec<MonitoringEvent> = self
            .events
            .since(since)?
            .into_iter()
            .filter(|e| e.source != EventSource::Correlation)
            .collect();
        let candidates = build_candidates(&events);

        let mut report = CorrelationReport {
            events_scanned: events.len(),
            candidate_groups: candidates.len(),
            ..Default::default()
        };
        let mut claimed: HashSet<&str> = HashSet::new();

        for candidate in &candidates {
            if candidate.score.confidence < self.config.promotion_threshold {
                debug!(
                    key = %candidate.key,
                    confidence = candidate.score.confidence,
                    "Group below promotion threshold"
                );
                continue;
            }
            let unclaimed: Vec<&MonitoringEvent> = candidate
                .members
                .iter()
                .copied()
                .filter(|e| !claimed.contains(e.id.as_str()))
                .collect();
            if unclaimed.is_empty() {
                debug!(key = %candidate.key, "Group subsumed by an earlier promotion");
                continue;
            }

            let correlation_id = unified_correlation_id(&candidate.key, &unclaimed);
            let trace_id = best_trace_id(&candidate.members);
            for event in &unclaimed {
                let relabel = event.correlation_id.as_deref() != Some(correlation_id.as_str());
                let fill_trace = event.trace_id.is_none() && trace_id.is_some();
                if relabel || fill_trace {
                    self.events
                        .set_correlation(&event.id, &correlation_id, trace_id)?;
                    report.events_updated += 1;
                }
                claimed.insert(event.id.as_str());
            }

            let overlapping = candidate.members.len() - unclaimed.len();
            let group = CorrelationGroup {
                key: self.summary_key(&candidate.key, &correlation_id)?,
                correlation_id: correlation_id.clone(),
                member_event_ids: candidate.members.iter().map(|e| e.id.clone()).collect(),
                confidence_score: candidate.score.confidence,
                sources: candidate.score.sources.clone(),
                services: candidate.score.services.clone(),
                time_span_minutes: candidate.score.span_minutes,
                overlapping_members: overlapping,
            };
            let created = self.events.upsert(&group.to_summary_event())?;

            report.promoted += 1;
            report.overlapping_events += overlapping;
            if created {
                report.summaries_created += 1;
                metrics::counter!("correlation.promoted").increment(1);
                self.audit.log(
                    "correlation_promoted",
                    ACTOR,
                    json!({
                        "correlation_id": correlation_id,
                        "key": group.key,
                        "members": group.member_event_ids.len(),
                        "confidence": group.confidence_score,
                        "overlapping_members": overlapping,
                    }),
                );
                info!(
                    correlation_id = %correlation_id,
                    key = %group.key,
                    members = group.member_event_ids.len(),
                    confidence = group.confidence_score,
                    overlapping,
                    "Correlation group promoted"
                );
            }

            let members: Vec<MonitoringEvent> =
                candidate.members.iter().map(|e| (*e).clone()).collect();
            self.echo(&group, trace_id, &members).await;
        }

        info!(
            scanned = report.events_scanned,
            candidates = report.candidate_groups,
            promoted = report.promoted,
            created = report.summaries_created,
            "Correlation pass complete"
        );
        Ok(report)
    }

    /// Once members carry the unified id they also share a
    /// `correlation:<id>` key; a summary keeps the key it was promoted under.
    fn summary_key(&self, key: &str, correlation_id: &str) -> MonitorResult<String> {
        if key.strip_prefix("correlation:") != Some(correlation_id) {
            return Ok(key.to_string());
        }
        let existing = self.events.get(&format!("summary-{correlation_id}"))?;
        Ok(existing
            .and_then(|summary| summary.tags.get("correlationKey").cloned())
            .unwrap_or_else(|| key.to_string()))
    }

    async fn echo(&self, group: &CorrelationGroup, trace_id: Option<&str>, members: &[MonitoringEvent]) {
        for echo in &self.echoes {
            if let Err(e) = echo.echo(group, trace_id, members).await {
                metrics::counter!("correlation.echo_failed").increment(1);
                warn!(
                    echo = echo.name(),
                    correlation_id = %group.correlation_id,
                    error = %e,
                    "Correlation echo failed"
                );
            }
        }
    }

    /// Totals over summary events stored since `since`.
    pub fn statistics(&self, since: DateTime<Utc>) -> MonitorResult<CorrelationStatistics> {
        let summaries = self.events.by_source_since(EventSource::Correlation, since)?;
        if summaries.is_empty() {
            return Ok(CorrelationStatistics::default());
        }
        let confidence_sum: f64 = summaries
            .iter()
            .filter_map(|s| s.metrics.get("confidenceScore").and_then(|v| v.as_f64()))
            .sum();
        let total_correlated_events = summaries
            .iter()
            .filter_map(|s| s.metrics.get("correlatedEventCount").and_then(|v| v.as_f64()))
            .map(|n| n as u64)
            .sum();
        Ok(CorrelationStatistics {
            total_correlations: summaries.len(),
            average_confidence: confidence_sum / summaries.len() as f64,
            total_correlated_events,
        })
    }

    pub fn correlated_events(&self, correlation_id: &str) -> MonitorResult<Vec<MonitoringEvent>> {
        Ok(self
            .events
            .by_correlation_id(correlation_id)?
            .into_iter()
            .filter(|e| e.source != EventSource::Correlation)
            .collect())
    }
}

fn build_candidates(events: &[MonitoringEvent]) -> Vec<Candidate<'_>> {
    let mut by_key: BTreeMap<String, Vec<&MonitoringEvent>> = BTreeMap::new();
    for event in events {
        for key in correlation_keys(event) {
            by_key.entry(key).or_default().push(event);
        }
    }

    let mut candidates: Vec<Candidate<'_>> = by_key
        .into_iter()
        .filter(|(_, members)| members.len() > 1)
        .map(|(key, members)| {
            let score = score_group(&members);
            Candidate { key, members, score }
        })
        .collect();
    candidates.sort_by(|a, b| {
        b.score
            .confidence
            .total_cmp(&a.score.confidence)
            .then_with(|| a.key.cmp(&b.key))
    });
    candidates
}

/// Reuse the id every labelled member already shares; otherwise derive one
/// from the key and the earliest member.
fn unified_correlation_id(key: &str, members: &[&MonitoringEvent]) -> String {
    let existing: BTreeSet<&str> = members
        .iter()
        .filter_map(|e| e.correlation_id.as_deref())
        .collect();
    if existing.len() == 1 {
        if let Some(id) = existing.into_iter().next() {
            return id.to_string();
        }
    }

    let digest = hex::encode(Md5::digest(key.as_bytes()));
    let earliest = members
        .iter()
        .map(|e| e.timestamp.timestamp_millis())
        .min()
        .unwrap_or_default();
    format!("unified-{}-{}", &digest[..8], earliest.rem_euclid(1_000_000))
}

/// First OpenTelemetry trace id, else any trace id.
fn best_trace_id<'a>(members: &[&'a MonitoringEvent]) -> Option<&'a str> {
    members
        .iter()
        .filter(|e| e.source == EventSource::OpenTelemetry)
        .find_map(|e| e.trace_id.as_deref())
        .or_else(|| members.iter().find_map(|e| e.trace_id.as_deref()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use healwatch_core::error::MonitorError;
    use healwatch_core::types::Severity;
    use healwatch_store::{InMemoryAuditStore, InMemoryEventStore};
    use parking_lot::Mutex;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn event(source: EventSource, service: &str, offset_secs: i64) -> MonitoringEvent {
        MonitoringEvent::new(source, "error", Severity::High, service)
            .with_timestamp(base() + Duration::seconds(offset_secs))
    }

    fn engine(events: Arc<InMemoryEventStore>) -> CorrelationEngine {
        CorrelationEngine::new(
            CorrelationConfig::default(),
            events,
            Arc::new(InMemoryAuditStore::new()),
        )
    }

    fn summaries(store: &InMemoryEventStore) -> Vec<MonitoringEvent> {
        store
            .by_source_since(EventSource::Correlation, DateTime::<Utc>::MIN_UTC)
            .unwrap()
    }

    fn session_incident(store: &InMemoryEventStore) -> Vec<String> {
        let events = [
            event(EventSource::AppDynamics, "product-service", 0).with_business_context("sessionId", "S1"),
            event(EventSource::OpenTelemetry, "product-service", 60)
                .with_business_context("sessionId", "S1")
                .with_trace("trace-9", Some("span-1".into())),
            event(EventSource::Frontend, "web-frontend", 120).with_business_context("sessionId", "S1"),
        ];
        events
            .iter()
            .map(|e| {
                store.insert(e).unwrap();
                e.id.clone()
            })
            .collect()
    }

    #[derive(Default)]
    struct RecordingEcho {
        calls: Mutex<Vec<(String, Option<String>)>>,
    }

    #[async_trait]
    impl CorrelationEcho for RecordingEcho {
        fn name(&self) -> &'static str {
            "recording"
        }
        async fn echo(
            &self,
            group: &CorrelationGroup,
            trace_id: Option<&str>,
            _members: &[MonitoringEvent],
        ) -> MonitorResult<()> {
            self.calls
                .lock()
                .push((group.correlation_id.clone(), trace_id.map(str::to_string)));
            Ok(())
        }
    }

    struct FailingEcho;

    #[async_trait]
    impl CorrelationEcho for FailingEcho {
        fn name(&self) -> &'static str {
            "failing"
        }
        async fn echo(&self, _: &CorrelationGroup, _: Option<&str>, _: &[MonitoringEvent]) -> MonitorResult<()> {
            Err(MonitorError::ExternalIntegration("collector unreachable".into()))
        }
    }

    #[tokio::test]
    async fn test_session_incident_is_promoted_once() {
        let store = Arc::new(InMemoryEventStore::new());
        let ids = session_incident(&store);
        let report = engine(store.clone())
            .correlate_since(base() - Duration::hours(1))
            .await
            .unwrap();

        assert_eq!(report.events_scanned, 3);
        assert_eq!(report.summaries_created, 1);
        let cids: BTreeSet<String> = ids
            .iter()
            .map(|id| store.get(id).unwrap().unwrap().correlation_id.unwrap())
            .collect();
        assert_eq!(cids.len(), 1);
        let cid = cids.into_iter().next().unwrap();
        assert!(cid.starts_with("unified-"));

        let summaries = summaries(&store);
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].id, format!("summary-{cid}"));
        assert_eq!(summaries[0].tags.get("correlationKey").map(String::as_str), Some("session:S1"));

        // the trace id of the OpenTelemetry member is propagated
        let first = store.get(&ids[0]).unwrap().unwrap();
        assert_eq!(first.trace_id.as_deref(), Some("trace-9"));
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let store = Arc::new(InMemoryEventStore::new());
        let ids = session_incident(&store);
        let engine = engine(store.clone());
        let since = base() - Duration::hours(1);

        engine.correlate_since(since).await.unwrap();
        let cid = store.get(&ids[0]).unwrap().unwrap().correlation_id;
        let second = engine.correlate_since(since).await.unwrap();

        assert_eq!(second.summaries_created, 0);
        assert_eq!(second.events_updated, 0);
        assert_eq!(summaries(&store).len(), 1);
        assert_eq!(store.get(&ids[2]).unwrap().unwrap().correlation_id, cid);
    }

    #[tokio::test]
    async fn test_rerun_keeps_original_summary_key() {
        let store = Arc::new(InMemoryEventStore::new());
        session_incident(&store);
        let engine = engine(store.clone());
        let since = base() - Duration::hours(1);

        for _ in 0..3 {
            engine.correlate_since(since).await.unwrap();
            let summaries = summaries(&store);
            assert_eq!(summaries.len(), 1);
            assert_eq!(summaries[0].tags.get("correlationKey").map(String::as_str), Some("session:S1"));
        }
    }

    #[tokio::test]
    async fn test_unrepresentable_window_scans_everything() {
        let store = Arc::new(InMemoryEventStore::new());
        session_incident(&store);
        let config = CorrelationConfig {
            window_minutes: i64::MAX,
            ..Default::default()
        };
        let engine = CorrelationEngine::new(config, store.clone(), Arc::new(InMemoryAuditStore::new()));

        let report = engine.correlate().await.unwrap();
        assert_eq!(report.events_scanned, 3);
        assert_eq!(report.promoted, 1);
    }

    #[tokio::test]
    async fn test_group_below_threshold_is_not_promoted() {
        let store = Arc::new(InMemoryEventStore::new());
        let a = event(EventSource::LoadTest, "checkout", 0).with_trace("t-1", None);
        let b = event(EventSource::LoadTest, "checkout", 180).with_trace("t-1", None);
        store.insert(&a).unwrap();
        store.insert(&b).unwrap();

        let report = engine(store.clone())
            .correlate_since(base() - Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(report.candidate_groups, 1);
        assert_eq!(report.promoted, 0);
        assert!(store.get(&a.id).unwrap().unwrap().correlation_id.is_none());
        assert!(summaries(&store).is_empty());
    }

    #[tokio::test]
    async fn test_overlapping_groups_keep_first_claim() {
        let store = Arc::new(InMemoryEventStore::new());
        let e1 = event(EventSource::AppDynamics, "order-service", 0).with_business_context("sessionId", "S1");
        let e2 = event(EventSource::OpenTelemetry, "payment-service", 30)
            .with_business_context("sessionId", "S1")
            .with_trace("T", None);
        let e3 = event(EventSource::Frontend, "web-frontend", 60)
            .with_business_context("cartId", "c-7")
            .with_trace("T", None);
        for e in [&e1, &e2, &e3] {
            store.insert(e).unwrap();
        }
        let engine = engine(store.clone());
        let since = base() - Duration::hours(1);

        let report = engine.correlate_since(since).await.unwrap();
        assert_eq!(report.promoted, 2);
        assert_eq!(report.overlapping_events, 1);

        let cid = |id: &str| store.get(id).unwrap().unwrap().correlation_id.unwrap();
        assert_eq!(cid(&e1.id), cid(&e2.id));
        assert_ne!(cid(&e2.id), cid(&e3.id));

        let trace_summary = store.get(&format!("summary-{}", cid(&e3.id))).unwrap().unwrap();
        assert_eq!(trace_summary.metrics.get("overlappingMembers").and_then(|v| v.as_f64()), Some(1.0));

        let again = engine.correlate_since(since).await.unwrap();
        assert_eq!(again.summaries_created, 0);
        assert_eq!(again.events_updated, 0);
        assert_eq!(summaries(&store).len(), 2);
    }

    #[tokio::test]
    async fn test_echo_failures_do_not_abort_pass() {
        let store = Arc::new(InMemoryEventStore::new());
        session_incident(&store);
        let recording = Arc::new(RecordingEcho::default());
        let engine = engine(store.clone())
            .with_echo(Arc::new(FailingEcho))
            .with_echo(recording.clone());

        let report = engine.correlate_since(base() - Duration::hours(1)).await.unwrap();
        assert_eq!(report.promoted, 1);
        let calls = recording.calls.lock().clone();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1.as_deref(), Some("trace-9"));
    }

    #[tokio::test]
    async fn test_statistics() {
        let store = Arc::new(InMemoryEventStore::new());
        session_incident(&store);
        let engine = engine(store.clone());
        assert_eq!(
            engine.statistics(DateTime::<Utc>::MIN_UTC).unwrap(),
            CorrelationStatistics::default()
        );
        engine.correlate_since(base() - Duration::hours(1)).await.unwrap();

        let stats = engine.statistics(DateTime::<Utc>::MIN_UTC).unwrap();
        assert_eq!(stats.total_correlations, 1);
        assert_eq!(stats.total_correlated_events, 3);
        assert!(stats.average_confidence > 0.9);
    }

    #[test]
    fn test_unified_id_reuses_shared_label() {
        let mut a = event(EventSource::Frontend, "web", 0);
        a.correlation_id = Some("c-1".into());
        let b = event(EventSource::Frontend, "web", 10);
        assert_eq!(unified_correlation_id("session:S1", &[&a, &b]), "c-1");

        let mut c = event(EventSource::Frontend, "web", 20);
        c.correlation_id = Some("c-2".into());
        let generated = unified_correlation_id("session:S1", &[&a, &c]);
        assert!(generated.starts_with("unified-"));
        assert_eq!(generated, unified_correlation_id("session:S1", &[&c, &a]));
    }
}
