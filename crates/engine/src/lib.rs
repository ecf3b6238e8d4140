//! Runtime services: ingestion, remediation dispatch, notifications, the
//! periodic scheduler and the wiring that ties them together.

pub mod dispatcher;
pub mod health;
pub mod ingestion;
pub mod notifier;
pub mod scheduler;
pub mod services;
pub mod tasks;

pub use dispatcher::RemediationDispatcher;
pub use health::{HealthSnapshot, HealthState};
pub use ingestion::{IngestReport, IngestionService, ServiceHealth};
pub use notifier::{Escalator, LoggingEscalator, Notifier};
pub use scheduler::{ScheduledTask, Scheduler, TaskStatus, TriggerOutcome};
pub use services::{ReviewResult, Services};
pub use tasks::{
    CorrelationTask, HealthCheckTask, MonitoringReportTask, PatternSweepTask, ReviewTimeoutTask,
};
