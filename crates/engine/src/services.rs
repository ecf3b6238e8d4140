//! Wires stores, analyzer, remediation, review, correlation and the
//! scheduler from one `AppConfig`.

use healwatch_core::config::AppConfig;
use healwatch_core::error::MonitorResult;
use healwatch_core::event_bus::AlertSink;
use healwatch_core::types::AutomatedFix;
use healwatch_correlation::CorrelationEngine;
use healwatch_integrations::{AppDynamicsEcho, OpenTelemetryEcho, TokenGateway};
use healwatch_patterns::PatternAnalyzer;
use healwatch_remediation::{
    CommandTestRunner, DisabledPullRequestHost, GitCliGateway, GitHubPullRequestHost, PullRequestHost,
    FixReview, RemediationEngine, ReviewBoard, TestRunner, VersionControlGateway,
};
use serde::Serialize;
use healwatch_store::{
    AuditStore, EventStore, FixStore, InMemoryAuditStore, InMemoryEventStore, InMemoryFixStore,
    InMemoryPatternStore, PatternStore,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

use crate::dispatcher::RemediationDispatcher;
use crate::health::HealthState;
use crate::ingestion::IngestionService;
use crate::notifier::Notifier;
use crate::scheduler::Scheduler;
use crate::tasks::{
    CorrelationTask, HealthCheckTask, MonitoringReportTask, PatternSweepTask, ReviewTimeoutTask,
};

/// A review after a decision, with the fix it released if any.
#[derive(Debug, Clone, Serialize)]
pub struct ReviewResult {
    pub review: FixReview,
    pub released_fix: Option<AutomatedFix>,
}

pub struct Services {
    pub config: AppConfig,
    pub events: Arc<dyn EventStore>,
    pub patterns: Arc<dyn PatternStore>,
    pub fixes: Arc<dyn FixStore>,
    pub audit: Arc<dyn AuditStore>,
    pub notifier: Arc<Notifier>,
    pub analyzer: Arc<PatternAnalyzer>,
    pub remediation: Arc<RemediationEngine>,
    pub reviews: Arc<ReviewBoard>,
    pub dispatcher: Arc<RemediationDispatcher>,
    pub ingestion: Arc<IngestionService>,
    pub correlation: Arc<CorrelationEngine>,
    pub tokens: Option<Arc<TokenGateway>>,
    pub health: Arc<HealthState>,
    pub scheduler: Arc<Scheduler>,
    dispatcher_handle: JoinHandle<()>,
}

impl Services {
    /// Production wiring: git CLI, the configured test command and the
    /// GitHub pull request host when one is configured. Must be called
    /// inside a tokio runtime.
    pub fn build(config: AppConfig) -> MonitorResult<Self> {
        let timeout = Duration::from_secs(config.remediation.git_timeout_secs);
        let host: Arc<dyn PullRequestHost> =
            match GitHubPullRequestHost::from_config(&config.remediation.pull_request, timeout)? {
                Some(host) => Arc::new(host),
                None => Arc::new(DisabledPullRequestHost),
            };
        let vcs = Arc::new(GitCliGateway::new(&config.remediation, host));
        let tests = Arc::new(CommandTestRunner::new(&config.remediation));
        let tokens = if config.appdynamics.enabled {
            Some(Arc::new(TokenGateway::from_config(&config.appdynamics)?))
        } else {
            None
        };
        Self::with_collaborators(config, vcs, tests, tokens)
    }

    /// Wiring with caller-supplied git and test collaborators.
    pub fn with_collaborators(
        config: AppConfig,
        vcs: Arc<dyn VersionControlGateway>,
        tests: Arc<dyn TestRunner>,
        tokens: Option<Arc<TokenGateway>>,
    ) -> MonitorResult<Self> {
        let events: Arc<dyn EventStore> = Arc::new(InMemoryEventStore::new());
        let patterns: Arc<dyn PatternStore> = Arc::new(InMemoryPatternStore::new());
        let fixes: Arc<dyn FixStore> = Arc::new(InMemoryFixStore::new());
        let audit: Arc<dyn AuditStore> = Arc::new(InMemoryAuditStore::new());
        let notifier = Arc::new(Notifier::new(&config.notifications));
        let alerts: Arc<dyn AlertSink> = notifier.clone();

        let reviews = Arc::new(ReviewBoard::new(config.review.clone(), audit.clone(), alerts.clone()));
        let remediation = Arc::new(
            RemediationEngine::new(
                &config.remediation,
                fixes.clone(),
                audit.clone(),
                alerts.clone(),
                vcs,
                tests,
            )
            .with_review_board(reviews.clone()),
        );
        let (dispatcher, dispatcher_handle) = RemediationDispatcher::spawn(remediation.clone(), &config.remediation);
        let dispatcher = Arc::new(dispatcher);

        let analyzer = Arc::new(
            PatternAnalyzer::new(
                config.patterns.clone(),
                patterns.clone(),
                fixes.clone(),
                audit.clone(),
                dispatcher.clone(),
            )
            .with_retry_failed_fixes(config.scheduler.retry_failed_fixes),
        );
        let ingestion = Arc::new(IngestionService::new(events.clone(), analyzer.clone(), alerts.clone()));

        let mut correlation = CorrelationEngine::new(config.correlation.clone(), events.clone(), audit.clone());
        if let Some(tokens) = &tokens {
            correlation = correlation.with_echo(Arc::new(AppDynamicsEcho::new(&config.appdynamics, tokens.clone())?));
        }
        if config.opentelemetry.enabled {
            correlation = correlation.with_echo(Arc::new(OpenTelemetryEcho::new(&config.opentelemetry)?));
        }
        let correlation = Arc::new(correlation);

        let config_problems = config.validation_errors();
        let health = Arc::new(HealthState::new(config_problems.clone()));

        let mut scheduler = Scheduler::new();
        scheduler.register(
            Duration::from_secs(config.correlation.interval_secs),
            Arc::new(CorrelationTask::new(correlation.clone())),
        );
        scheduler.register(
            Duration::from_secs(config.scheduler.pattern_sweep_interval_secs),
            Arc::new(PatternSweepTask::new(analyzer.clone())),
        );
        scheduler.register(
            Duration::from_secs(config.scheduler.health_check_interval_secs),
            Arc::new(HealthCheckTask::new(
                tokens.clone(),
                config_problems,
                health.clone(),
                alerts.clone(),
            )),
        );
        let report_interval = Duration::from_secs(config.scheduler.report_interval_secs);
        scheduler.register(
            report_interval,
            Arc::new(MonitoringReportTask::new(
                ingestion.clone(),
                fixes.clone(),
                correlation.clone(),
                alerts,
                report_interval,
            )),
        );

        if reviews.is_enabled() {
            scheduler.register(
                Duration::from_secs(config.review.sweep_interval_secs),
                Arc::new(ReviewTimeoutTask::new(reviews.clone(), remediation.clone())),
            );
        }

        info!(
            node_id = %config.node_id,
            correlation = config.correlation.enabled,
            appdynamics = config.appdynamics.enabled,
            opentelemetry = config.opentelemetry.enabled,
            review = config.review.enabled,
            "Services wired"
        );
        Ok(Self {
            config,
            events,
            patterns,
            fixes,
            audit,
            notifier,
            analyzer,
            remediation,
            reviews,
            dispatcher,
            ingestion,
            correlation,
            tokens,
            health,
            scheduler: Arc::new(scheduler),
            dispatcher_handle,
        })
    }

    /// Approve a review and, once it is fully approved, open its pull
    /// request.
    pub async fn approve_review(&self, review_id: &str, reviewer: &str, comments: &str) -> MonitorResult<ReviewResult> {
        let review = self.reviews.approve(review_id, reviewer, comments)?;
        let released_fix = if review.status.is_approved() {
            Some(self.remediation.release(&review).await?)
        } else {
            None
        };
        Ok(ReviewResult { review, released_fix })
    }

    pub fn start(&self) {
        self.scheduler.start();
    }

    /// Stop timers and the dispatcher, then revoke the AppDynamics token.
    pub async fn shutdown(&self) {
        self.scheduler.stop();
        self.dispatcher_handle.abort();
        if let Some(tokens) = &self.tokens {
            tokens.revoke().await;
        }
        info!("Services stopped");
    }
}
