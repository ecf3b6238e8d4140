use async_trait::async_trait;
use healwatch_core::config::AppDynamicsConfig;
use healwatch_core::error::{MonitorError, MonitorResult};
use healwatch_core::types::{CorrelationGroup, MonitoringEvent};
use healwatch_core::CorrelationEcho;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::token::TokenGateway;

pub(crate) const CORRELATION_EVENT_TYPE: &str = "Intelligent_Monitoring_Correlation";

/// Correlation payload shared by the echo adapters.
pub(crate) fn correlation_data(group: &CorrelationGroup) -> Value {
    json!({
        "correlationId": group.correlation_id,
        "correlationKey": group.key,
        "confidenceScore": group.confidence_score,
        "eventCount": group.member_event_ids.len(),
        "sources": group.sources,
        "services": group.services,
        "timeSpanMinutes": group.time_span_minutes,
    })
}

/// Posts promoted correlations back to the AppDynamics controller as custom
/// events.
pub struct AppDynamicsEcho {
    client: reqwest::Client,
    events_url: String,
    tokens: Arc<TokenGateway>,
}

impl AppDynamicsEcho {
    pub fn new(config: &AppDynamicsConfig, tokens: Arc<TokenGateway>) -> MonitorResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| MonitorError::Config(format!("appdynamics client: {e}")))?;
        Ok(Self {
            client,
            events_url: format!(
                "{}/controller/rest/applications/{}/events",
                tokens.base_url(),
                config.application_name
            ),
            tokens,
        })
    }

    pub fn events_url(&self) -> &str {
        &self.events_url
    }
}

#[async_trait]
impl CorrelationEcho for AppDynamicsEcho {
    fn name(&self) -> &'static str {
        "appdynamics"
    }

    async fn echo(
        &self,
        group: &CorrelationGroup,
        trace_id: Option<&str>,
        _members: &[MonitoringEvent],
    ) -> MonitorResult<()> {
        let authorization = self.tokens.authorization_header().await?;
        let body = json!({
            "eventType": CORRELATION_EVENT_TYPE,
            "traceId": trace_id,
            "correlationData": correlation_data(group),
            "timestamp": chrono::Utc::now().timestamp_millis(),
        });
        let response = self
            .client
            .post(&self.events_url)
            .header(reqwest::header::AUTHORIZATION, authorization)
            .json(&body)
            .send()
            .await
            .map_err(|e| MonitorError::ExternalIntegration(format!("appdynamics echo: {e}")))?;
        if !response.status().is_success() {
            return Err(MonitorError::ExternalIntegration(format!(
                "appdynamics echo returned {}",
                response.status()
            )));
        }
        debug!(correlation_id = %group.correlation_id, trace_id, "Correlation sent to AppDynamics");
        Ok(())
    }
}
