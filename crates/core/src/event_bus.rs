//! Alert bus: trait for publishing operator alerts from any component.
//!
//! Components accept an `Arc<dyn AlertSink>`; the engine's notifier fans
//! alerts out to broadcast subscribers and escalates critical ones.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::types::Severity;

/// Named broadcast channel an alert is published on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertChannel {
    Alerts,
    Status,
    Fixes,
}

impl AlertChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertChannel::Alerts => "alerts",
            AlertChannel::Status => "status",
            AlertChannel::Fixes => "fixes",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub channel: AlertChannel,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    pub service_name: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    pub fn new(
        channel: AlertChannel,
        severity: Severity,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            channel,
            severity,
            title: title.into(),
            message: message.into(),
            service_name: None,
            data: serde_json::Value::Null,
            timestamp: Utc::now(),
        }
    }

    pub fn for_service(mut self, service_name: impl Into<String>) -> Self {
        self.service_name = Some(service_name.into());
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

/// Trait for publishing alerts. Implementations must not block and must
/// swallow delivery failures.
pub trait AlertSink: Send + Sync {
    fn publish(&self, alert: Alert);
}

/// No-op sink for tests and wiring without notifications.
pub struct NoOpSink;

impl AlertSink for NoOpSink {
    fn publish(&self, _alert: Alert) {}
}

/// In-memory sink that captures alerts for testing.
#[derive(Default)]
pub struct CaptureSink {
    alerts: Mutex<Vec<Alert>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.alerts.lock().len()
    }

    pub fn count_channel(&self, channel: AlertChannel) -> usize {
        self.alerts
            .lock()
            .iter()
            .filter(|a| a.channel == channel)
            .count()
    }

    pub fn clear(&self) {
        self.alerts.lock().clear();
    }
}

impl AlertSink for CaptureSink {
    fn publish(&self, alert: Alert) {
        self.alerts.lock().push(alert);
    }
}

pub fn noop_sink() -> Arc<dyn AlertSink> {
    Arc::new(NoOpSink)
}

pub fn capture_sink() -> Arc<CaptureSink> {
    Arc::new(CaptureSink::new())
}
