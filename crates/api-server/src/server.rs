//! API server: the REST router and the Prometheus exporter.

use crate::rest::{self, AppState};
use axum::routing::{get, post};
use axum::Router;
use healwatch_core::config::AppConfig;
use healwatch_engine::Services;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Build the router over an already-wired set of services.
pub fn router(state: AppState) -> Router {
    Router::new()
        // Ingestion
        .route("/api/v1/events", post(rest::ingest_event))
        .route("/api/v1/events/batch", post(rest::ingest_batch))
        .route("/api/v1/events/:id", get(rest::get_event))
        // Patterns and fixes
        .route("/api/v1/patterns", get(rest::list_patterns))
        .route("/api/v1/patterns/attention", get(rest::patterns_requiring_attention))
        .route("/api/v1/patterns/:id/validate", post(rest::validate_pattern))
        .route("/api/v1/patterns/:id/reset", post(rest::reset_pattern))
        .route("/api/v1/fixes", get(rest::list_fixes))
        // Fix reviews
        .route("/api/v1/reviews/pending", get(rest::pending_reviews))
        .route("/api/v1/reviews/history", get(rest::review_history))
        .route("/api/v1/reviews/statistics", get(rest::review_statistics))
        .route("/api/v1/reviews/:id", get(rest::get_review))
        .route("/api/v1/reviews/:id/approve", post(rest::approve_review))
        .route("/api/v1/reviews/:id/reject", post(rest::reject_review))
        .route("/api/v1/reviews/:id/request-modifications", post(rest::request_modifications))
        // Correlation
        .route("/api/v1/correlations/stats", get(rest::correlation_stats))
        .route("/api/v1/correlations/:id", get(rest::correlated_events))
        // Scheduler
        .route("/api/v1/scheduler", get(rest::scheduler_status))
        .route("/api/v1/scheduler/:task/run", post(rest::run_task))
        // Operational endpoints
        .route("/api/v1/health/summary", get(rest::health_summary))
        .route("/health", get(rest::health_check))
        .route("/ready", get(rest::readiness))
        .route("/live", get(rest::liveness))
        // Middleware
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub struct ApiServer {
    config: AppConfig,
    services: Arc<Services>,
}

impl ApiServer {
    pub fn new(config: AppConfig, services: Arc<Services>) -> Self {
        Self { config, services }
    }

    /// Serve the REST API until the listener fails.
    pub async fn start_http(&self) -> anyhow::Result<()> {
        let state = AppState {
            services: self.services.clone(),
            node_id: self.config.node_id.clone(),
            start_time: Instant::now(),
        };
        let app = router(state);

        let addr = SocketAddr::new(self.config.api.host.parse()?, self.config.api.http_port);
        info!(addr = %addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;
        Ok(())
    }

    /// Start the Prometheus exporter on its own port.
    pub fn start_metrics(&self) -> anyhow::Result<()> {
        let addr = SocketAddr::new(self.config.api.host.parse()?, self.config.api.metrics_port);
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()?;
        info!(port = self.config.api.metrics_port, "Metrics exporter started");
        Ok(())
    }
}
