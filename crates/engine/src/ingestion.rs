//! Ingestion entry point for every monitoring adapter.

use chrono::{DateTime, Utc};
use healwatch_core::error::{MonitorError, MonitorResult};
use healwatch_core::event_bus::{Alert, AlertChannel, AlertSink};
use healwatch_core::types::{EventSource, MonitoringEvent, Severity};
use healwatch_patterns::PatternAnalyzer;
use healwatch_store::EventStore;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const MAX_SERVICE_NAME_LEN: usize = 256;
pub const MAX_DESCRIPTION_LEN: usize = 4096;

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub accepted: usize,
    pub rejected: usize,
    pub errors: Vec<String>,
}

/// Per-service counts over a window.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServiceHealth {
    pub service_name: String,
    pub total_events: usize,
    pub error_events: usize,
    pub critical_events: usize,
    pub auto_fixed_events: usize,
}

pub struct IngestionService {
    events: Arc<dyn EventStore>,
    analyzer: Arc<PatternAnalyzer>,
    alerts: Arc<dyn AlertSink>,
}

impl IngestionService {
    pub fn new(
        events: Arc<dyn EventStore>,
        analyzer: Arc<PatternAnalyzer>,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            events,
            analyzer,
            alerts,
        }
    }

    /// Validate, store and analyze one event. Remediation is only queued,
    /// never awaited.
    pub fn ingest(&self, event: MonitoringEvent) -> MonitorResult<MonitoringEvent> {
        if let Err(e) = validate(&event) {
            metrics::counter!("ingest.rejected").increment(1);
            warn!(event_id = %event.id, source = %event.source, error = %e, "Event rejected");
            return Err(e);
        }
        self.events.insert(&event)?;
        metrics::counter!("ingest.accepted").increment(1);
        debug!(
            event_id = %event.id,
            source = %event.source,
            service = %event.service_name,
            event_type = %event.event_type,
            "Event stored"
        );

        if event.is_error() && (event.stack_trace.is_some() || event.error_signature.is_some()) {
            match self.analyzer.analyze(&event) {
                Ok(pattern) => debug!(
                    event_id = %event.id,
                    pattern_id = %pattern.id,
                    occurrences = pattern.occurrence_count,
                    "Event matched pattern"
                ),
                Err(e) => warn!(event_id = %event.id, error = %e, "Pattern analysis failed"),
            }
        }

        if event.severity >= Severity::High {
            self.alerts.publish(
                Alert::new(
                    AlertChannel::Alerts,
                    event.severity,
                    format!("{} in {}", event.event_type, event.service_name),
                    event.description.clone(),
                )
                .for_service(&event.service_name)
                .with_data(json!({ "event_id": event.id, "source": event.source })),
            );
        }
        Ok(event)
    }

    pub fn ingest_batch(&self, events: Vec<MonitoringEvent>) -> IngestReport {
        let mut report = IngestReport::default();
        for event in events {
            let id = event.id.clone();
            match self.ingest(event) {
                Ok(_) => report.accepted += 1,
                Err(e) => {
                    report.rejected += 1;
                    report.errors.push(format!("{id}: {e}"));
                }
            }
        }
        if report.rejected > 0 {
            info!(
                accepted = report.accepted,
                rejected = report.rejected,
                "Batch ingested with rejections"
            );
        }
        report
    }

    pub fn get(&self, id: &str) -> MonitorResult<MonitoringEvent> {
        self.events
            .get(id)?
            .ok_or_else(|| MonitorError::NotFound(format!("event {id}")))
    }

    pub fn by_correlation_id(&self, correlation_id: &str) -> MonitorResult<Vec<MonitoringEvent>> {
        self.events.by_correlation_id(correlation_id)
    }

    pub fn by_trace_id(&self, trace_id: &str) -> MonitorResult<Vec<MonitoringEvent>> {
        self.events.by_trace_id(trace_id)
    }

    pub fn by_service(
        &self,
        service: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> MonitorResult<Vec<MonitoringEvent>> {
        self.events.by_service(service, from, to)
    }

    /// Share of a service's events since `since` that are errors.
    pub fn error_rate(&self, service: &str, since: DateTime<Utc>) -> MonitorResult<f64> {
        let events = self.events.by_service(service, since, Utc::now())?;
        if events.is_empty() {
            return Ok(0.0);
        }
        let errors = events.iter().filter(|e| e.is_error()).count();
        Ok(errors as f64 / events.len() as f64)
    }

    /// Counts per service since `since`, sorted by service name. Correlation
    /// summaries are not counted.
    pub fn health_summary(&self, since: DateTime<Utc>) -> MonitorResult<Vec<ServiceHealth>> {
        let mut by_service: BTreeMap<String, ServiceHealth> = BTreeMap::new();
        for event in self.events.since(since)? {
            if event.source == EventSource::Correlation {
                continue;
            }
            let entry = by_service
                .entry(event.service_name.clone())
                .or_insert_with(|| ServiceHealth {
                    service_name: event.service_name.clone(),
                    ..Default::default()
                });
            entry.total_events += 1;
            if event.is_error() {
                entry.error_events += 1;
            }
            if event.severity == Severity::Critical {
                entry.critical_events += 1;
            }
            if event.auto_fixed {
                entry.auto_fixed_events += 1;
            }
        }
        Ok(by_service.into_values().collect())
    }

    pub fn mark_auto_fixed(
        &self,
        event_id: &str,
        commit_id: &str,
        resolution: &str,
    ) -> MonitorResult<MonitoringEvent> {
        let event = self.events.mark_auto_fixed(event_id, commit_id, resolution)?;
        info!(event_id = %event_id, commit = %commit_id, "Event marked auto-fixed");
        Ok(event)
    }

    pub fn event_count(&self) -> usize {
        self.events.count()
    }
}

fn validate(event: &MonitoringEvent) -> MonitorResult<()> {
    if event.source == EventSource::Correlation {
        return Err(MonitorError::Ingestion(
            "correlation summaries are produced internally".into(),
        ));
    }
    let service = event.service_name.trim();
    if service.is_empty() {
        return Err(MonitorError::Ingestion("service name is required".into()));
    }
    if service.len() > MAX_SERVICE_NAME_LEN {
        return Err(MonitorError::Ingestion(format!(
            "service name exceeds {MAX_SERVICE_NAME_LEN} characters"
        )));
    }
    if event.description.len() > MAX_DESCRIPTION_LEN {
        return Err(MonitorError::Ingestion(format!(
            "description exceeds {MAX_DESCRIPTION_LEN} characters"
        )));
    }
    if event.event_type.trim().is_empty() {
        return Err(MonitorError::Ingestion("event type is required".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use healwatch_core::config::PatternConfig;
    use healwatch_core::event_bus::capture_sink;
    use healwatch_core::types::ErrorPattern;
    use healwatch_patterns::RemediationTrigger;
    use healwatch_store::{InMemoryAuditStore, InMemoryEventStore, InMemoryFixStore, InMemoryPatternStore, PatternStore};

    struct Refuse;

    impl RemediationTrigger for Refuse {
        fn request(&self, _pattern: &ErrorPattern) -> bool {
            false
        }
    }

    struct Fixture {
        service: IngestionService,
        patterns: Arc<InMemoryPatternStore>,
        alerts: Arc<healwatch_core::event_bus::CaptureSink>,
    }

    fn fixture() -> Fixture {
        let patterns = Arc::new(InMemoryPatternStore::new());
        let analyzer = Arc::new(PatternAnalyzer::new(
            PatternConfig::default(),
            patterns.clone(),
            Arc::new(InMemoryFixStore::new()),
            Arc::new(InMemoryAuditStore::new()),
            Arc::new(Refuse),
        ));
        let alerts = capture_sink();
        Fixture {
            service: IngestionService::new(Arc::new(InMemoryEventStore::new()), analyzer, alerts.clone()),
            patterns,
            alerts,
        }
    }

    fn npe(service: &str) -> MonitoringEvent {
        MonitoringEvent::error(EventSource::AppDynamics, Severity::High, service, "NullPointerException")
            .with_code_location("ProductController.getProduct")
    }

    #[test]
    fn test_error_event_is_stored_and_analyzed() {
        let f = fixture();
        let stored = f.service.ingest(npe("product-service")).unwrap();
        assert_eq!(f.service.get(&stored.id).unwrap().service_name, "product-service");
        assert_eq!(f.patterns.count(), 1);
        assert_eq!(f.alerts.count_channel(AlertChannel::Alerts), 1);
    }

    #[test]
    fn test_error_without_stack_or_signature_is_not_analyzed() {
        let f = fixture();
        let beacon = MonitoringEvent::new(EventSource::Frontend, "error", Severity::High, "web-frontend");
        f.service.ingest(beacon).unwrap();
        assert_eq!(f.service.event_count(), 1);
        assert_eq!(f.patterns.count(), 0);

        let traced = MonitoringEvent::new(EventSource::Frontend, "error", Severity::High, "web-frontend")
            .with_stack_trace("java.lang.NullPointerException\n\tat com.shop.CartController.add(CartController.java:42)");
        f.service.ingest(traced).unwrap();
        assert_eq!(f.patterns.count(), 1);
    }

    #[test]
    fn test_malformed_events_are_rejected_and_not_stored() {
        let f = fixture();
        let missing = npe("  ");
        assert!(matches!(f.service.ingest(missing), Err(MonitorError::Ingestion(_))));

        let long = npe("product-service").with_description("x".repeat(MAX_DESCRIPTION_LEN + 1));
        assert!(matches!(f.service.ingest(long), Err(MonitorError::Ingestion(_))));
        let summary = MonitoringEvent::new(EventSource::Correlation, "correlation", Severity::Info, "svc");
        assert!(matches!(f.service.ingest(summary), Err(MonitorError::Ingestion(_))));
        assert_eq!(f.service.event_count(), 0);
        assert_eq!(f.patterns.count(), 0);
    }

    #[test]
    fn test_batch_counts_rejections() {
        let f = fixture();
        let report = f.service.ingest_batch(vec![npe("a"), npe(""), npe("b")]);
        assert_eq!(report.accepted, 2);
        assert_eq!(report.rejected, 1);
        assert_eq!(report.errors.len(), 1);
    }

    #[test]
    fn test_health_summary_and_error_rate() {
        let f = fixture();
        let since = Utc::now() - Duration::minutes(5);
        f.service.ingest(npe("cart-service")).unwrap();
        f.service
            .ingest(MonitoringEvent::new(EventSource::Frontend, "page_view", Severity::Info, "cart-service"))
            .unwrap();
        let critical = MonitoringEvent::error(EventSource::OpenTelemetry, Severity::Critical, "order-service", "TimeoutException");
        let critical = f.service.ingest(critical).unwrap();
        f.service.mark_auto_fixed(&critical.id, "abc123", "null guard").unwrap();

        let summary = f.service.health_summary(since).unwrap();
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].service_name, "cart-service");
        assert_eq!((summary[0].total_events, summary[0].error_events), (2, 1));
        assert_eq!((summary[1].critical_events, summary[1].auto_fixed_events), (1, 1));

        let rate = f.service.error_rate("cart-service", since).unwrap();
        assert!((rate - 0.5).abs() < 1e-9);
        assert_eq!(f.service.error_rate("missing", since).unwrap(), 0.0);
    }
}
