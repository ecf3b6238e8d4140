use serde::Deserialize;

/// Root application configuration. Loaded from an optional TOML file and
/// environment variables with the prefix `HEALWATCH__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub patterns: PatternConfig,
    #[serde(default)]
    pub remediation: RemediationConfig,
    #[serde(default)]
    pub correlation: CorrelationConfig,
    #[serde(default)]
    pub appdynamics: AppDynamicsConfig,
    #[serde(default)]
    pub opentelemetry: OpenTelemetryConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub review: ReviewConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PatternConfig {
    #[serde(default = "default_initial_confidence")]
    pub initial_confidence: f64,
    #[serde(default = "default_fix_confidence_threshold")]
    pub fix_confidence_threshold: f64,
    #[serde(default = "default_min_occurrences_for_fix")]
    pub min_occurrences_for_fix: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemediationConfig {
    #[serde(default = "default_workspace_path")]
    pub workspace_path: String,
    #[serde(default)]
    pub repository_url: Option<String>,
    #[serde(default = "default_base_branch")]
    pub base_branch: String,
    #[serde(default = "default_git_author_name")]
    pub git_author_name: String,
    #[serde(default = "default_git_author_email")]
    pub git_author_email: String,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_test_timeout_secs")]
    pub test_timeout_secs: u64,
    #[serde(default = "default_git_timeout_secs")]
    pub git_timeout_secs: u64,
    #[serde(default = "default_test_command")]
    pub test_command: String,
    #[serde(default)]
    pub pull_request: PullRequestConfig,
}

/// Pull-request host settings. PR creation is disabled unless `api_url`
/// and `repository` are both set.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PullRequestConfig {
    #[serde(default)]
    pub api_url: Option<String>,
    /// `owner/name` of the repository on the host.
    #[serde(default)]
    pub repository: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CorrelationConfig {
    #[serde(default = "default_correlation_enabled")]
    pub enabled: bool,
    #[serde(default = "default_correlation_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_correlation_window_minutes")]
    pub window_minutes: i64,
    #[serde(default = "default_promotion_threshold")]
    pub promotion_threshold: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppDynamicsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub controller_host: String,
    #[serde(default = "default_controller_port")]
    pub controller_port: u16,
    #[serde(default = "default_application_name")]
    pub application_name: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "default_oauth_scope")]
    pub scope: String,
    #[serde(default = "default_token_buffer_minutes")]
    pub token_buffer_minutes: i64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenTelemetryConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_collector_endpoint")]
    pub collector_endpoint: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Human review of tested fixes before their pull request is opened.
#[derive(Debug, Clone, Deserialize)]
pub struct ReviewConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Pending reviews older than this are approved by the timeout sweep,
    /// unless they require explicit approval.
    #[serde(default = "default_auto_approve_timeout_hours")]
    pub auto_approve_timeout_hours: i64,
    /// Critical reviews need approvals from two distinct reviewers.
    #[serde(default)]
    pub require_multiple_reviewers: bool,
    #[serde(default = "default_critical_requires_approval")]
    pub critical_requires_approval: bool,
    #[serde(default = "default_review_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_pattern_sweep_interval_secs")]
    pub pattern_sweep_interval_secs: u64,
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,
    #[serde(default = "default_report_interval_secs")]
    pub report_interval_secs: u64,
    #[serde(default)]
    pub retry_failed_fixes: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
    #[serde(default = "default_notifications_enabled")]
    pub enabled: bool,
    #[serde(default = "default_alert_recipients")]
    pub alert_recipients: Vec<String>,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

// Default functions
fn default_node_id() -> String {
    "healwatch-01".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8085
}
fn default_metrics_port() -> u16 {
    9095
}
fn default_initial_confidence() -> f64 {
    0.3
}
fn default_fix_confidence_threshold() -> f64 {
    0.8
}
fn default_min_occurrences_for_fix() -> u64 {
    3
}
fn default_workspace_path() -> String {
    "/tmp/healwatch-workspace".to_string()
}
fn default_base_branch() -> String {
    "main".to_string()
}
fn default_git_author_name() -> String {
    "Intelligent Monitoring".to_string()
}
fn default_git_author_email() -> String {
    "monitoring@ecommerce.com".to_string()
}
fn default_workers() -> usize {
    2
}
fn default_queue_capacity() -> usize {
    64
}
fn default_test_timeout_secs() -> u64 {
    600
}
fn default_git_timeout_secs() -> u64 {
    120
}
fn default_test_command() -> String {
    "mvn".to_string()
}
fn default_correlation_enabled() -> bool {
    true
}
fn default_correlation_interval_secs() -> u64 {
    600
}
fn default_correlation_window_minutes() -> i64 {
    15
}
fn default_promotion_threshold() -> f64 {
    0.7
}
fn default_controller_port() -> u16 {
    443
}
fn default_application_name() -> String {
    "ecommerce".to_string()
}
fn default_oauth_scope() -> String {
    "read".to_string()
}
fn default_token_buffer_minutes() -> i64 {
    5
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_collector_endpoint() -> String {
    "http://localhost:4318".to_string()
}
fn default_pattern_sweep_interval_secs() -> u64 {
    3600
}
fn default_health_check_interval_secs() -> u64 {
    60
}
fn default_report_interval_secs() -> u64 {
    21600
}
fn default_auto_approve_timeout_hours() -> i64 {
    24
}
fn default_critical_requires_approval() -> bool {
    true
}
fn default_review_sweep_interval_secs() -> u64 {
    900
}
fn default_notifications_enabled() -> bool {
    true
}
fn default_alert_recipients() -> Vec<String> {
    vec!["alerts@ecommerce.com".to_string()]
}
fn default_channel_capacity() -> usize {
    256
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            initial_confidence: default_initial_confidence(),
            fix_confidence_threshold: default_fix_confidence_threshold(),
            min_occurrences_for_fix: default_min_occurrences_for_fix(),
        }
    }
}

impl Default for RemediationConfig {
    fn default() -> Self {
        Self {
            workspace_path: default_workspace_path(),
            repository_url: None,
            base_branch: default_base_branch(),
            git_author_name: default_git_author_name(),
            git_author_email: default_git_author_email(),
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            test_timeout_secs: default_test_timeout_secs(),
            git_timeout_secs: default_git_timeout_secs(),
            test_command: default_test_command(),
            pull_request: PullRequestConfig::default(),
        }
    }
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            enabled: default_correlation_enabled(),
            interval_secs: default_correlation_interval_secs(),
            window_minutes: default_correlation_window_minutes(),
            promotion_threshold: default_promotion_threshold(),
        }
    }
}

impl Default for AppDynamicsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            controller_host: String::new(),
            controller_port: default_controller_port(),
            application_name: default_application_name(),
            client_id: String::new(),
            client_secret: String::new(),
            scope: default_oauth_scope(),
            token_buffer_minutes: default_token_buffer_minutes(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for OpenTelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            collector_endpoint: default_collector_endpoint(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            pattern_sweep_interval_secs: default_pattern_sweep_interval_secs(),
            health_check_interval_secs: default_health_check_interval_secs(),
            report_interval_secs: default_report_interval_secs(),
            retry_failed_fixes: false,
        }
    }
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            auto_approve_timeout_hours: default_auto_approve_timeout_hours(),
            require_multiple_reviewers: false,
            critical_requires_approval: default_critical_requires_approval(),
            sweep_interval_secs: default_review_sweep_interval_secs(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: default_notifications_enabled(),
            alert_recipients: default_alert_recipients(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            api: ApiConfig::default(),
            patterns: PatternConfig::default(),
            remediation: RemediationConfig::default(),
            correlation: CorrelationConfig::default(),
            appdynamics: AppDynamicsConfig::default(),
            opentelemetry: OpenTelemetryConfig::default(),
            scheduler: SchedulerConfig::default(),
            notifications: NotificationConfig::default(),
            review: ReviewConfig::default(),
        }
    }
}

impl AppDynamicsConfig {
    /// Client credentials and controller host are all present.
    pub fn has_credentials(&self) -> bool {
        !self.client_id.trim().is_empty()
            && !self.client_secret.trim().is_empty()
            && !self.controller_host.trim().is_empty()
    }

    pub fn base_url(&self) -> String {
        format!("https://{}:{}", self.controller_host, self.controller_port)
    }
}

impl AppConfig {
    /// Load configuration from an optional TOML file and environment variables.
    /// Environment variables win over the file.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("HEALWATCH")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("notifications.alert_recipients"),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Configuration problems an operator must fix. Reported through the
    /// health check rather than aborting startup.
    pub fn validation_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.appdynamics.enabled && !self.appdynamics.has_credentials() {
            errors.push(
                "appdynamics is enabled but client_id, client_secret or controller_host is missing"
                    .to_string(),
            );
        }
        if !(0.0..=1.0).contains(&self.correlation.promotion_threshold) {
            errors.push("correlation.promotion_threshold must be within [0, 1]".to_string());
        }
        if !(0.0..=1.0).contains(&self.patterns.fix_confidence_threshold) {
            errors.push("patterns.fix_confidence_threshold must be within [0, 1]".to_string());
        }
        if self.review.auto_approve_timeout_hours < 1 {
            errors.push("review.auto_approve_timeout_hours must be at least 1".to_string());
        }
        if self.remediation.workers == 0 {
            errors.push("remediation.workers must be at least 1".to_string());
        }
        errors
    }
}
