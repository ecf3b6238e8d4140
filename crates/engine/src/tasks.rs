//! Built-in periodic tasks.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use healwatch_core::error::MonitorResult;
use healwatch_core::event_bus::{Alert, AlertChannel, AlertSink};
use healwatch_core::types::{FixStatus, Severity};
use healwatch_correlation::CorrelationEngine;
use healwatch_integrations::TokenGateway;
use healwatch_patterns::PatternAnalyzer;
use healwatch_remediation::{RemediationEngine, ReviewBoard};
use healwatch_store::FixStore;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::health::{HealthSnapshot, HealthState};
use crate::ingestion::IngestionService;
use crate::scheduler::ScheduledTask;

pub const CORRELATION_TASK: &str = "correlation";
pub const PATTERN_SWEEP_TASK: &str = "pattern-sweep";
pub const HEALTH_CHECK_TASK: &str = "health-check";
pub const MONITORING_REPORT_TASK: &str = "monitoring-report";
pub const REVIEW_TIMEOUT_TASK: &str = "review-timeouts";

pub struct CorrelationTask {
    engine: Arc<CorrelationEngine>,
}

impl CorrelationTask {
    pub fn new(engine: Arc<CorrelationEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl ScheduledTask for CorrelationTask {
    fn name(&self) -> &'static str {
        CORRELATION_TASK
    }

    async fn run(&self) -> MonitorResult<()> {
        if !self.engine.is_enabled() {
            debug!("Correlation disabled");
            return Ok(());
        }
        self.engine.correlate().await.map(|_| ())
    }
}

pub struct PatternSweepTask {
    analyzer: Arc<PatternAnalyzer>,
}

impl PatternSweepTask {
    pub fn new(analyzer: Arc<PatternAnalyzer>) -> Self {
        Self { analyzer }
    }
}

#[async_trait]
impl ScheduledTask for PatternSweepTask {
    fn name(&self) -> &'static str {
        PATTERN_SWEEP_TASK
    }

    async fn run(&self) -> MonitorResult<()> {
        self.analyzer.sweep().map(|_| ())
    }
}

/// Auto-approves stale reviews and publishes their pull requests.
pub struct ReviewTimeoutTask {
    board: Arc<ReviewBoard>,
    remediation: Arc<RemediationEngine>,
}

impl ReviewTimeoutTask {
    pub fn new(board: Arc<ReviewBoard>, remediation: Arc<RemediationEngine>) -> Self {
        Self { board, remediation }
    }
}

#[async_trait]
impl ScheduledTask for ReviewTimeoutTask {
    fn name(&self) -> &'static str {
        REVIEW_TIMEOUT_TASK
    }

    async fn run(&self) -> MonitorResult<()> {
        let approved = self.board.expire_timed_out(Utc::now());
        if !approved.is_empty() {
            info!(count = approved.len(), "Timed-out reviews approved");
        }
        for review in approved {
            if let Err(e) = self.remediation.release(&review).await {
                warn!(review_id = %review.id, error = %e, "Could not release auto-approved fix");
            }
        }
        Ok(())
    }
}

/// Configuration problems plus a live token validation when the AppDynamics
/// integration is enabled.
pub struct HealthCheckTask {
    tokens: Option<Arc<TokenGateway>>,
    config_problems: Vec<String>,
    state: Arc<HealthState>,
    alerts: Arc<dyn AlertSink>,
}

impl HealthCheckTask {
    pub fn new(
        tokens: Option<Arc<TokenGateway>>,
        config_problems: Vec<String>,
        state: Arc<HealthState>,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            tokens,
            config_problems,
            state,
            alerts,
        }
    }
}

#[async_trait]
impl ScheduledTask for HealthCheckTask {
    fn name(&self) -> &'static str {
        HEALTH_CHECK_TASK
    }

    async fn run(&self) -> MonitorResult<()> {
        let mut problems = self.config_problems.clone();
        let token_valid = match &self.tokens {
            None => None,
            Some(tokens) if !tokens.is_configured() => {
                problems.push("appdynamics OAuth2 credentials are not configured".into());
                Some(false)
            }
            Some(tokens) => {
                let valid = tokens.validate().await;
                if !valid {
                    problems.push("appdynamics access token was not accepted".into());
                }
                Some(valid)
            }
        };

        let was_healthy = self.state.is_healthy();
        let snapshot = HealthSnapshot {
            checked_at: Some(Utc::now()),
            healthy: problems.is_empty(),
            token_valid,
            problems,
        };
        if !snapshot.healthy {
            warn!(problems = ?snapshot.problems, "Health check failed");
            if was_healthy {
                self.alerts.publish(
                    Alert::new(
                        AlertChannel::Status,
                        Severity::High,
                        "Monitoring health degraded",
                        snapshot.problems.join("; "),
                    )
                    .with_data(json!({ "problems": snapshot.problems })),
                );
            }
        } else if !was_healthy {
            info!("Health check recovered");
            self.alerts.publish(Alert::new(
                AlertChannel::Status,
                Severity::Info,
                "Monitoring health recovered",
                "all checks passing",
            ));
        }
        self.state.record(snapshot);
        Ok(())
    }
}

/// Periodic digest of service health, fix outcomes and correlations.
pub struct MonitoringReportTask {
    ingestion: Arc<IngestionService>,
    fixes: Arc<dyn FixStore>,
    correlation: Arc<CorrelationEngine>,
    alerts: Arc<dyn AlertSink>,
    window: Duration,
}

impl MonitoringReportTask {
    pub fn new(
        ingestion: Arc<IngestionService>,
        fixes: Arc<dyn FixStore>,
        correlation: Arc<CorrelationEngine>,
        alerts: Arc<dyn AlertSink>,
        window: std::time::Duration,
    ) -> Self {
        Self {
            ingestion,
            fixes,
            correlation,
            alerts,
            window: Duration::seconds(window.as_secs() as i64),
        }
    }
}

#[async_trait]
impl ScheduledTask for MonitoringReportTask {
    fn name(&self) -> &'static str {
        MONITORING_REPORT_TASK
    }

    async fn run(&self) -> MonitorResult<()> {
        let since = Utc::now() - self.window;
        let services = self.ingestion.health_summary(since)?;
        let correlations = self.correlation.statistics(since)?;
        let tested = self.fixes.by_status(FixStatus::Tested)?.len();
        let failed = self.fixes.by_status(FixStatus::Failed)?.len();
        let total_errors: usize = services.iter().map(|s| s.error_events).sum();

        info!(
            services = services.len(),
            errors = total_errors,
            fixes_tested = tested,
            fixes_failed = failed,
            correlations = correlations.total_correlations,
            "Monitoring report"
        );
        self.alerts.publish(
            Alert::new(
                AlertChannel::Status,
                Severity::Info,
                "Monitoring report",
                format!(
                    "{} services, {} errors, {} fixes tested, {} failed, {} correlations",
                    services.len(),
                    total_errors,
                    tested,
                    failed,
                    correlations.total_correlations
                ),
            )
            .with_data(json!({
                "services": services,
                "fixes": { "tested": tested, "failed": failed },
                "correlations": correlations,
            })),
        );
        Ok(())
    }
}
