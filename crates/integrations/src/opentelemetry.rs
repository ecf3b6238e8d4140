use async_trait::async_trait;
use healwatch_core::config::OpenTelemetryConfig;
use healwatch_core::error::{MonitorError, MonitorResult};
use healwatch_core::types::{CorrelationGroup, EventSource, MonitoringEvent};
use healwatch_core::CorrelationEcho;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use crate::appdynamics::{correlation_data, CORRELATION_EVENT_TYPE};

/// Sends correlation metadata to the OpenTelemetry collector for groups whose
/// trace carries a span.
pub struct OpenTelemetryEcho {
    client: reqwest::Client,
    endpoint: String,
}

impl OpenTelemetryEcho {
    pub fn new(config: &OpenTelemetryConfig) -> MonitorResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| MonitorError::Config(format!("opentelemetry client: {e}")))?;
        Ok(Self {
            client,
            endpoint: format!("{}/v1/logs", config.collector_endpoint.trim_end_matches('/')),
        })
    }
}

/// Span of the member carrying `trace_id`, OpenTelemetry members first.
fn span_for<'a>(trace_id: &str, members: &'a [MonitoringEvent]) -> Option<&'a str> {
    let on_trace = |e: &&'a MonitoringEvent| e.trace_id.as_deref() == Some(trace_id);
    members
        .iter()
        .filter(on_trace)
        .filter(|e| e.source == EventSource::OpenTelemetry)
        .find_map(|e| e.span_id.as_deref())
        .or_else(|| members.iter().filter(on_trace).find_map(|e| e.span_id.as_deref()))
}

#[async_trait]
impl CorrelationEcho for OpenTelemetryEcho {
    fn name(&self) -> &'static str {
        "opentelemetry"
    }

    async fn echo(
        &self,
        group: &CorrelationGroup,
        trace_id: Option<&str>,
        members: &[MonitoringEvent],
    ) -> MonitorResult<()> {
        let Some(trace_id) = trace_id else {
            return Ok(());
        };
        let Some(span_id) = span_for(trace_id, members) else {
            debug!(correlation_id = %group.correlation_id, trace_id, "No span to attach correlation to");
            return Ok(());
        };

        let body = json!({
            "eventType": CORRELATION_EVENT_TYPE,
            "traceId": trace_id,
            "spanId": span_id,
            "correlationData": correlation_data(group),
            "timestamp": chrono::Utc::now().timestamp_millis(),
        });
        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| MonitorError::ExternalIntegration(format!("opentelemetry echo: {e}")))?;
        if !response.status().is_success() {
            return Err(MonitorError::ExternalIntegration(format!(
                "collector returned {}",
                response.status()
            )));
        }
        debug!(correlation_id = %group.correlation_id, trace_id, span_id, "Correlation sent to collector");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use healwatch_core::types::Severity;

    fn member(source: EventSource, trace: &str, span: Option<&str>) -> MonitoringEvent {
        MonitoringEvent::new(source, "span", Severity::Medium, "order-service")
            .with_trace(trace, span.map(str::to_string))
    }

    #[test]
    fn test_span_prefers_opentelemetry_member() {
        let members = vec![
            member(EventSource::AppDynamics, "t-1", Some("apm-span")),
            member(EventSource::OpenTelemetry, "t-1", Some("otel-span")),
            member(EventSource::OpenTelemetry, "t-2", Some("other")),
        ];
        assert_eq!(span_for("t-1", &members), Some("otel-span"));
        assert_eq!(span_for("t-2", &members), Some("other"));
        assert_eq!(span_for("t-3", &members), None);
    }

    #[tokio::test]
    async fn test_without_trace_or_span_is_noop() {
        let echo = OpenTelemetryEcho::new(&OpenTelemetryConfig::default()).unwrap();
        let group = CorrelationGroup {
            correlation_id: "c".into(),
            key: "trace:t-1".into(),
            member_event_ids: vec![],
            confidence_score: 0.8,
            sources: vec![],
            services: vec![],
            time_span_minutes: 0,
            overlapping_members: 0,
        };
        assert!(echo.echo(&group, None, &[]).await.is_ok());
        let members = vec![member(EventSource::Frontend, "t-1", None)];
        assert!(echo.echo(&group, Some("t-1"), &members).await.is_ok());
    }
}
