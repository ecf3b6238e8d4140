use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

/// Outcome of the latest health check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthSnapshot {
    pub checked_at: Option<DateTime<Utc>>,
    pub healthy: bool,
    /// `None` when the AppDynamics integration is disabled.
    pub token_valid: Option<bool>,
    pub problems: Vec<String>,
}

/// Shared between the health-check task and the API.
#[derive(Default)]
pub struct HealthState {
    latest: RwLock<HealthSnapshot>,
}

impl HealthState {
    /// Seed with static configuration problems found at startup.
    pub fn new(config_problems: Vec<String>) -> Self {
        Self {
            latest: RwLock::new(HealthSnapshot {
                checked_at: None,
                healthy: config_problems.is_empty(),
                token_valid: None,
                problems: config_problems,
            }),
        }
    }

    pub fn record(&self, snapshot: HealthSnapshot) {
        *self.latest.write() = snapshot;
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        self.latest.read().clone()
    }

    pub fn is_healthy(&self) -> bool {
        self.latest.read().healthy
    }
}
