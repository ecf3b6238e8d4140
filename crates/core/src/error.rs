use thiserror::Error;

pub type MonitorResult<T> = Result<T, MonitorError>;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Ingestion error: {0}")]
    Ingestion(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Fix analysis error: {0}")]
    FixAnalysis(String),

    #[error("Test execution error: {0}")]
    TestExecution(String),

    #[error("External integration error: {0}")]
    ExternalIntegration(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl MonitorError {
    /// Short machine-readable category, used for audit records and API errors.
    pub fn category(&self) -> &'static str {
        match self {
            MonitorError::Ingestion(_) => "ingestion",
            MonitorError::Persistence(_) => "persistence",
            MonitorError::FixAnalysis(_) => "fix_analysis",
            MonitorError::TestExecution(_) => "test_execution",
            MonitorError::ExternalIntegration(_) => "external_integration",
            MonitorError::Auth(_) => "auth",
            MonitorError::Config(_) => "config",
            MonitorError::NotFound(_) => "not_found",
            MonitorError::InvalidTransition(_) => "invalid_transition",
            MonitorError::Serialization(_) => "serialization",
            MonitorError::Io(_) => "io",
            MonitorError::Internal(_) => "internal",
        }
    }
}

impl From<config::ConfigError> for MonitorError {
    fn from(err: config::ConfigError) -> Self {
        MonitorError::Config(err.to_string())
    }
}
