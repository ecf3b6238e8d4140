use healwatch_core::types::{EventSource, MonitoringEvent};
use std::collections::BTreeSet;

/// Score inputs and result for one candidate group.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupScore {
    pub confidence: f64,
    pub sources: Vec<EventSource>,
    pub services: Vec<String>,
    /// Whole minutes between the earliest and latest member.
    pub span_minutes: i64,
    pub business_context_ratio: f64,
}

/// `min(sources*0.2, 0.4) + proximity*0.3 + context_ratio*0.2 + 0.1` when
/// more than one service is involved.
pub fn score_group(members: &[&MonitoringEvent]) -> GroupScore {
    let sources: BTreeSet<EventSource> = members.iter().map(|e| e.source).collect();
    let services: BTreeSet<&str> = members.iter().map(|e| e.service_name.as_str()).collect();

    let span_minutes = match (
        members.iter().map(|e| e.timestamp).min(),
        members.iter().map(|e| e.timestamp).max(),
    ) {
        (Some(first), Some(last)) => (last - first).num_minutes(),
        _ => 0,
    };
    let proximity = (1.0 - span_minutes as f64 / 60.0).max(0.0);

    let with_context = members.iter().filter(|e| e.has_business_context()).count();
    let business_context_ratio = if members.is_empty() {
        0.0
    } else {
        with_context as f64 / members.len() as f64
    };

    let mut confidence = (sources.len() as f64 * 0.2).min(0.4);
    confidence += proximity * 0.3;
    confidence += business_context_ratio * 0.2;
    if services.len() > 1 {
        confidence += 0.1;
    }

    GroupScore {
        confidence: confidence.min(1.0),
        sources: sources.into_iter().collect(),
        services: services.into_iter().map(str::to_string).collect(),
        span_minutes,
        business_context_ratio,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use healwatch_core::types::Severity;

    fn event(source: EventSource, service: &str, offset_secs: i64, context: bool) -> MonitoringEvent {
        let base = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let e = MonitoringEvent::new(source, "error", Severity::High, service)
            .with_timestamp(base + Duration::seconds(offset_secs));
        if context {
            e.with_business_context("sessionId", "S1")
        } else {
            e
        }
    }

    #[test]
    fn test_three_sources_two_services_within_two_minutes() {
        let events = [
            event(EventSource::AppDynamics, "product-service", 0, true),
            event(EventSource::OpenTelemetry, "product-service", 60, true),
            event(EventSource::Frontend, "web-frontend", 120, true),
        ];
        let members: Vec<&MonitoringEvent> = events.iter().collect();
        let score = score_group(&members);
        assert_eq!(score.span_minutes, 2);
        assert_eq!(score.sources.len(), 3);
        let expected = 0.4 + (1.0 - 2.0 / 60.0) * 0.3 + 0.2 + 0.1;
        assert!((score.confidence - expected).abs() < 1e-9);
        assert!(score.confidence >= 0.7);
    }

    #[test]
    fn test_single_source_stale_group_stays_low() {
        let events = [
            event(EventSource::LoadTest, "api", 0, false),
            event(EventSource::LoadTest, "api", 90 * 60, false),
        ];
        let members: Vec<&MonitoringEvent> = events.iter().collect();
        let score = score_group(&members);
        assert_eq!(score.span_minutes, 90);
        assert!((score.confidence - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_span_truncates_to_whole_minutes() {
        let events = [
            event(EventSource::Frontend, "web", 0, true),
            event(EventSource::Frontend, "web", 119, false),
        ];
        let members: Vec<&MonitoringEvent> = events.iter().collect();
        let score = score_group(&members);
        assert_eq!(score.span_minutes, 1);
        assert!((score.business_context_ratio - 0.5).abs() < 1e-9);
    }
}
