//! Alert fan-out over broadcast channels, with escalation of critical alerts.

use healwatch_core::config::NotificationConfig;
use healwatch_core::event_bus::{Alert, AlertChannel, AlertSink};
use healwatch_core::types::Severity;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Out-of-band delivery for critical alerts (email, SMS).
pub trait Escalator: Send + Sync {
    fn escalate(&self, alert: &Alert, recipients: &[String]);
}

/// Escalator that only records the escalation in the log.
pub struct LoggingEscalator;

impl Escalator for LoggingEscalator {
    fn escalate(&self, alert: &Alert, recipients: &[String]) {
        warn!(
            title = %alert.title,
            service = alert.service_name.as_deref().unwrap_or("-"),
            recipients = recipients.join(","),
            "Critical alert escalated"
        );
    }
}

pub struct Notifier {
    enabled: bool,
    recipients: Vec<String>,
    alerts: broadcast::Sender<Alert>,
    status: broadcast::Sender<Alert>,
    fixes: broadcast::Sender<Alert>,
    escalator: Arc<dyn Escalator>,
}

impl Notifier {
    pub fn new(config: &NotificationConfig) -> Self {
        let capacity = config.channel_capacity.max(1);
        Self {
            enabled: config.enabled,
            recipients: config.alert_recipients.clone(),
            alerts: broadcast::channel(capacity).0,
            status: broadcast::channel(capacity).0,
            fixes: broadcast::channel(capacity).0,
            escalator: Arc::new(LoggingEscalator),
        }
    }

    pub fn with_escalator(mut self, escalator: Arc<dyn Escalator>) -> Self {
        self.escalator = escalator;
        self
    }

    fn sender(&self, channel: AlertChannel) -> &broadcast::Sender<Alert> {
        match channel {
            AlertChannel::Alerts => &self.alerts,
            AlertChannel::Status => &self.status,
            AlertChannel::Fixes => &self.fixes,
        }
    }

    pub fn subscribe(&self, channel: AlertChannel) -> broadcast::Receiver<Alert> {
        self.sender(channel).subscribe()
    }

    pub fn subscriber_count(&self, channel: AlertChannel) -> usize {
        self.sender(channel).receiver_count()
    }
}

impl AlertSink for Notifier {
    fn publish(&self, alert: Alert) {
        if !self.enabled {
            return;
        }
        metrics::counter!("notifications.published").increment(1);
        if alert.severity == Severity::Critical {
            self.escalator.escalate(&alert, &self.recipients);
        }
        let channel = alert.channel;
        // no subscribers is not an error
        if self.sender(channel).send(alert).is_err() {
            debug!(channel = channel.as_str(), "No subscribers for alert");
        }
    }
}
