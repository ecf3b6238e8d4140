use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::error::{MonitorError, MonitorResult};

/// Starting confidence for a freshly fingerprinted pattern.
pub const INITIAL_PATTERN_CONFIDENCE: f64 = 0.3;

// ─── Monitoring events ──────────────────────────────────────────────────

/// Monitoring source that produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    AppDynamics,
    OpenTelemetry,
    Frontend,
    LoadTest,
    Correlation,
}

impl EventSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventSource::AppDynamics => "appdynamics",
            EventSource::OpenTelemetry => "opentelemetry",
            EventSource::Frontend => "frontend",
            EventSource::LoadTest => "loadtest",
            EventSource::Correlation => "correlation",
        }
    }
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event / pattern severity. Ordered so that `Critical` is the highest.
///
/// Unknown strings deserialize to `Info`, the lowest rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Severity {
    #[default]
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "critical" => Severity::Critical,
            "high" => Severity::High,
            "medium" => Severity::Medium,
            "low" => Severity::Low,
            _ => Severity::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// High and critical patterns are eligible for automated remediation.
    pub fn is_remediable(&self) -> bool {
        *self >= Severity::High
    }
}

impl From<String> for Severity {
    fn from(value: String) -> Self {
        Severity::parse(&value)
    }
}

impl From<Severity> for String {
    fn from(value: Severity) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed value carried in event metrics and business context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Flag(bool),
    Number(f64),
    Timestamp(DateTime<Utc>),
    Text(String),
}

impl MetricValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetricValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetricValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Flag(b) => write!(f, "{b}"),
            MetricValue::Number(n) => write!(f, "{n}"),
            MetricValue::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339()),
            MetricValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for MetricValue {
    fn from(value: f64) -> Self {
        MetricValue::Number(value)
    }
}

impl From<usize> for MetricValue {
    fn from(value: usize) -> Self {
        MetricValue::Number(value as f64)
    }
}

impl From<bool> for MetricValue {
    fn from(value: bool) -> Self {
        MetricValue::Flag(value)
    }
}

impl From<&str> for MetricValue {
    fn from(value: &str) -> Self {
        MetricValue::Text(value.to_string())
    }
}

impl From<String> for MetricValue {
    fn from(value: String) -> Self {
        MetricValue::Text(value)
    }
}

impl From<DateTime<Utc>> for MetricValue {
    fn from(value: DateTime<Utc>) -> Self {
        MetricValue::Timestamp(value)
    }
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// A single error / performance / business event from any monitoring source.
///
/// Immutable after ingestion except for the correlation fields, which a
/// correlation pass may rewrite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringEvent {
    #[serde(default = "new_id")]
    pub id: String,
    pub source: EventSource,
    pub event_type: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub service_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub error_signature: Option<String>,
    #[serde(default)]
    pub stack_trace: Option<String>,
    #[serde(default)]
    pub code_location: Option<String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub span_id: Option<String>,
    #[serde(default)]
    pub metrics: BTreeMap<String, MetricValue>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub business_context: BTreeMap<String, MetricValue>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub resolution: Option<String>,
    #[serde(default)]
    pub auto_fixed: bool,
    #[serde(default)]
    pub fix_commit_id: Option<String>,
}

impl MonitoringEvent {
    pub fn new(
        source: EventSource,
        event_type: impl Into<String>,
        severity: Severity,
        service_name: impl Into<String>,
    ) -> Self {
        Self {
            id: new_id(),
            source,
            event_type: event_type.into(),
            severity,
            service_name: service_name.into(),
            description: String::new(),
            error_signature: None,
            stack_trace: None,
            code_location: None,
            correlation_id: None,
            trace_id: None,
            span_id: None,
            metrics: BTreeMap::new(),
            tags: BTreeMap::new(),
            business_context: BTreeMap::new(),
            timestamp: Utc::now(),
            resolution: None,
            auto_fixed: false,
            fix_commit_id: None,
        }
    }

    /// Convenience constructor for an error event.
    pub fn error(
        source: EventSource,
        severity: Severity,
        service_name: impl Into<String>,
        error_type: impl Into<String>,
    ) -> Self {
        let mut event = Self::new(source, "error", severity, service_name);
        event.error_signature = Some(error_type.into());
        event
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_stack_trace(mut self, stack_trace: impl Into<String>) -> Self {
        self.stack_trace = Some(stack_trace.into());
        self
    }

    pub fn with_code_location(mut self, location: impl Into<String>) -> Self {
        self.code_location = Some(location.into());
        self
    }

    pub fn with_trace(mut self, trace_id: impl Into<String>, span_id: Option<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self.span_id = span_id;
        self
    }

    pub fn with_business_context(mut self, key: impl Into<String>, value: impl Into<MetricValue>) -> Self {
        self.business_context.insert(key.into(), value.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn is_error(&self) -> bool {
        self.event_type.eq_ignore_ascii_case("error")
    }

    pub fn has_business_context(&self) -> bool {
        !self.business_context.is_empty()
    }
}

// ─── Error patterns ─────────────────────────────────────────────────────

/// A durable fingerprint of a recurring error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPattern {
    pub id: String,
    pub signature: String,
    pub error_type: String,
    pub service_name: String,
    pub class_name: Option<String>,
    pub method_name: Option<String>,
    pub line_number: Option<u32>,
    pub severity: Severity,
    pub occurrence_count: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub confidence_score: f64,
    pub has_automated_fix: bool,
    pub validated: bool,
    pub common_causes: Vec<String>,
    pub suggested_fixes: Vec<String>,
    pub fix_description: Option<String>,
    pub stack_trace_pattern: String,
    /// Set when the pattern has been handed to remediation; cleared only by
    /// an explicit operator reset.
    pub remediation_requested_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ErrorPattern {
    pub fn new(
        signature: impl Into<String>,
        error_type: impl Into<String>,
        service_name: impl Into<String>,
        seen_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: new_id(),
            signature: signature.into(),
            error_type: error_type.into(),
            service_name: service_name.into(),
            class_name: None,
            method_name: None,
            line_number: None,
            severity: Severity::Info,
            occurrence_count: 1,
            first_seen: seen_at,
            last_seen: seen_at,
            confidence_score: INITIAL_PATTERN_CONFIDENCE,
            has_automated_fix: false,
            validated: false,
            common_causes: Vec::new(),
            suggested_fixes: Vec::new(),
            fix_description: None,
            stack_trace_pattern: String::new(),
            remediation_requested_at: None,
            created_at: seen_at,
            updated_at: seen_at,
        }
    }

    /// Count another match of this pattern.
    pub fn record_occurrence(&mut self, seen_at: DateTime<Utc>) {
        self.occurrence_count += 1;
        if seen_at > self.last_seen {
            self.last_seen = seen_at;
        }
        self.updated_at = Utc::now();
    }

    /// Raise the confidence score. The score is clamped to [0, 1] and never
    /// decreases.
    pub fn raise_confidence(&mut self, score: f64) {
        let clamped = score.clamp(0.0, 1.0);
        if clamped > self.confidence_score {
            self.confidence_score = clamped;
        }
    }

    /// Raise severity; a lower incoming severity is ignored.
    pub fn escalate_severity(&mut self, severity: Severity) -> bool {
        if severity > self.severity {
            self.severity = severity;
            true
        } else {
            false
        }
    }

    pub fn is_high_confidence(&self, threshold: f64) -> bool {
        self.confidence_score >= threshold
    }

    pub fn is_critical(&self) -> bool {
        self.severity.is_remediable()
    }

    /// `Class.method` as recorded for the pattern.
    pub fn code_location(&self) -> String {
        match (&self.class_name, &self.method_name) {
            (Some(class), Some(method)) => format!("{class}.{method}"),
            (Some(class), None) => class.clone(),
            _ => "unknown.method".to_string(),
        }
    }
}

// ─── Automated fixes ────────────────────────────────────────────────────

/// Lifecycle of an automated fix: `Pending -> Applied -> Tested | Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FixStatus {
    Pending,
    Applied,
    Tested,
    Failed,
}

impl FixStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, FixStatus::Tested | FixStatus::Failed)
    }

    pub fn can_transition_to(&self, next: FixStatus) -> bool {
        matches!(
            (self, next),
            (FixStatus::Pending, FixStatus::Applied)
                | (FixStatus::Applied, FixStatus::Tested)
                | (FixStatus::Pending, FixStatus::Failed)
                | (FixStatus::Applied, FixStatus::Failed)
        )
    }
}

impl fmt::Display for FixStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FixStatus::Pending => "PENDING",
            FixStatus::Applied => "APPLIED",
            FixStatus::Tested => "TESTED",
            FixStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// A single remediation attempt against one error pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomatedFix {
    pub id: String,
    pub error_pattern_id: String,
    pub service_name: String,
    pub fix_type: String,
    pub description: String,
    pub status: FixStatus,
    pub branch_name: Option<String>,
    pub commit_id: Option<String>,
    pub file_path: Option<String>,
    pub original_code: Option<String>,
    pub fixed_code: Option<String>,
    pub changes: Vec<String>,
    pub tests_passed: bool,
    pub test_results: Option<String>,
    pub pull_request_url: Option<String>,
    pub failure_reason: Option<String>,
    /// Set when the fix is held for human review before its pull request.
    #[serde(default)]
    pub review_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub applied_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl AutomatedFix {
    pub fn new(
        error_pattern_id: impl Into<String>,
        service_name: impl Into<String>,
        fix_type: impl Into<String>,
    ) -> Self {
        Self {
            id: new_id(),
            error_pattern_id: error_pattern_id.into(),
            service_name: service_name.into(),
            fix_type: fix_type.into(),
            description: String::new(),
            status: FixStatus::Pending,
            branch_name: None,
            commit_id: None,
            file_path: None,
            original_code: None,
            fixed_code: None,
            changes: Vec::new(),
            tests_passed: false,
            test_results: None,
            pull_request_url: None,
            failure_reason: None,
            review_id: None,
            created_at: Utc::now(),
            applied_at: None,
            completed_at: None,
        }
    }

    fn transition(&mut self, next: FixStatus) -> MonitorResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(MonitorError::InvalidTransition(format!(
                "fix {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }

    pub fn mark_applied(
        &mut self,
        commit_id: impl Into<String>,
        branch_name: impl Into<String>,
    ) -> MonitorResult<()> {
        self.transition(FixStatus::Applied)?;
        self.commit_id = Some(commit_id.into());
        self.branch_name = Some(branch_name.into());
        self.applied_at = Some(Utc::now());
        Ok(())
    }

    pub fn mark_tested(&mut self, output: impl Into<String>) -> MonitorResult<()> {
        self.transition(FixStatus::Tested)?;
        self.tests_passed = true;
        self.test_results = Some(output.into());
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) -> MonitorResult<()> {
        self.transition(FixStatus::Failed)?;
        self.failure_reason = Some(reason.into());
        self.completed_at = Some(Utc::now());
        Ok(())
    }
}

// ─── Correlation ────────────────────────────────────────────────────────

/// A promoted group of correlated events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationGroup {
    pub correlation_id: String,
    pub key: String,
    pub member_event_ids: Vec<String>,
    pub confidence_score: f64,
    pub sources: Vec<EventSource>,
    pub services: Vec<String>,
    pub time_span_minutes: i64,
    /// Members already claimed by another group earlier in the same pass.
    pub overlapping_members: usize,
}

impl CorrelationGroup {
    /// Materialise the group as a summary event (source = correlation).
    pub fn to_summary_event(&self) -> MonitoringEvent {
        let mut summary = MonitoringEvent::new(
            EventSource::Correlation,
            "correlation",
            Severity::Info,
            "correlation-service",
        )
        .with_description("Cross-platform correlation summary");
        summary.id = format!("summary-{}", self.correlation_id);
        summary.correlation_id = Some(self.correlation_id.clone());

        summary
            .metrics
            .insert("correlatedEventCount".into(), self.member_event_ids.len().into());
        summary
            .metrics
            .insert("confidenceScore".into(), self.confidence_score.into());
        let sources: Vec<&str> = self.sources.iter().map(|s| s.as_str()).collect();
        summary.metrics.insert("sources".into(), sources.join(",").into());
        summary
            .metrics
            .insert("services".into(), self.services.join(",").into());
        summary
            .metrics
            .insert("timeSpanMinutes".into(), (self.time_span_minutes as f64).into());
        summary
            .metrics
            .insert("memberEventIds".into(), self.member_event_ids.join(",").into());
        summary
            .metrics
            .insert("overlappingMembers".into(), self.overlapping_members.into());

        summary.tags.insert("correlationType".into(), "cross-platform".into());
        summary.tags.insert("correlationKey".into(), self.key.clone());
        summary
            .tags
            .insert("confidence".into(), format!("{:.3}", self.confidence_score));
        summary
    }
}

// ─── Audit ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditCategory {
    Security,
    CodeFix,
    Monitoring,
    Remediation,
    Correlation,
    General,
}

impl AuditCategory {
    /// Derive a category from the event type when none is given.
    pub fn for_event_type(event_type: &str) -> Self {
        let lowered = event_type.to_ascii_lowercase();
        if lowered.starts_with("auth") || lowered.contains("security") || lowered.contains("token") {
            AuditCategory::Security
        } else if lowered.starts_with("code_fix") || lowered.contains("review") {
            AuditCategory::CodeFix
        } else if lowered.starts_with("fix") || lowered.contains("remediation") {
            AuditCategory::Remediation
        } else if lowered.contains("correlation") {
            AuditCategory::Correlation
        } else if lowered.contains("pattern") || lowered.contains("event") {
            AuditCategory::Monitoring
        } else {
            AuditCategory::General
        }
    }
}

/// An append-only audit record. Hash fields are filled in by the audit store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: String,
    pub sequence: u64,
    pub event_type: String,
    pub category: AuditCategory,
    pub severity: Severity,
    pub actor: String,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub event_hash: String,
    pub previous_hash: String,
}

impl AuditEvent {
    pub fn new(event_type: impl Into<String>, actor: impl Into<String>, data: serde_json::Value) -> Self {
        let event_type = event_type.into();
        Self {
            id: new_id(),
            sequence: 0,
            category: AuditCategory::for_event_type(&event_type),
            event_type,
            severity: Severity::Info,
            actor: actor.into(),
            data,
            timestamp: Utc::now(),
            event_hash: String::new(),
            previous_hash: String::new(),
        }
    }

    pub fn with_category(mut self, category: AuditCategory) -> Self {
        self.category = category;
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering_and_parse() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert_eq!(Severity::parse("CRITICAL"), Severity::Critical);
        assert_eq!(Severity::parse("bogus"), Severity::Info);
        assert!(Severity::High.is_remediable());
        assert!(!Severity::Medium.is_remediable());
    }

    #[test]
    fn test_severity_serde_accepts_unknown() {
        let s: Severity = serde_json::from_str("\"warning\"").unwrap();
        assert_eq!(s, Severity::Info);
        assert_eq!(serde_json::to_string(&Severity::High).unwrap(), "\"high\"");
    }

    #[test]
    fn test_metric_value_untagged() {
        let values: BTreeMap<String, MetricValue> =
            serde_json::from_str(r#"{"a": 1.5, "b": true, "c": "S1", "d": "2024-01-01T00:00:00Z"}"#)
                .unwrap();
        assert_eq!(values["a"], MetricValue::Number(1.5));
        assert_eq!(values["b"], MetricValue::Flag(true));
        assert_eq!(values["c"], MetricValue::Text("S1".into()));
        assert!(matches!(values["d"], MetricValue::Timestamp(_)));
    }

    #[test]
    fn test_event_deserialize_minimal() {
        let event: MonitoringEvent = serde_json::from_str(
            r#"{"source": "frontend", "event_type": "error", "service_name": "cart-service"}"#,
        )
        .unwrap();
        assert_eq!(event.source, EventSource::Frontend);
        assert!(!event.id.is_empty());
        assert!(event.is_error());
        assert!(event.metrics.is_empty());
    }

    #[test]
    fn test_pattern_confidence_never_decreases() {
        let mut pattern = ErrorPattern::new("sig", "NullPointerException", "svc", Utc::now());
        pattern.raise_confidence(0.2);
        assert_eq!(pattern.confidence_score, INITIAL_PATTERN_CONFIDENCE);
        pattern.raise_confidence(1.7);
        assert_eq!(pattern.confidence_score, 1.0);
    }

    #[test]
    fn test_pattern_severity_only_escalates() {
        let mut pattern = ErrorPattern::new("sig", "SQLException", "svc", Utc::now());
        pattern.severity = Severity::High;
        assert!(!pattern.escalate_severity(Severity::Low));
        assert_eq!(pattern.severity, Severity::High);
        assert!(pattern.escalate_severity(Severity::Critical));
        assert_eq!(pattern.severity, Severity::Critical);
    }

    #[test]
    fn test_fix_state_machine() {
        let mut fix = AutomatedFix::new("p1", "svc", "null_check");
        assert!(fix.mark_tested("ok").is_err());
        fix.mark_applied("abc123", "automated-fix/null_check-1").unwrap();
        assert_eq!(fix.status, FixStatus::Applied);
        fix.mark_tested("All tests passed").unwrap();
        assert!(fix.status.is_terminal());
        assert!(fix.tests_passed);
        assert!(fix.mark_failed("late").is_err());
    }

    #[test]
    fn test_fix_fails_from_pending() {
        let mut fix = AutomatedFix::new("p1", "svc", "retry_backoff");
        fix.mark_failed("source file not found").unwrap();
        assert_eq!(fix.status, FixStatus::Failed);
        assert_eq!(fix.failure_reason.as_deref(), Some("source file not found"));
    }

    #[test]
    fn test_summary_event_shape() {
        let group = CorrelationGroup {
            correlation_id: "unified-abc".into(),
            key: "session:S1".into(),
            member_event_ids: vec!["e1".into(), "e2".into()],
            confidence_score: 0.91,
            sources: vec![EventSource::AppDynamics, EventSource::Frontend],
            services: vec!["cart-service".into()],
            time_span_minutes: 2,
            overlapping_members: 0,
        };
        let summary = group.to_summary_event();
        assert_eq!(summary.source, EventSource::Correlation);
        assert_eq!(summary.id, "summary-unified-abc");
        assert_eq!(summary.metrics["correlatedEventCount"], MetricValue::Number(2.0));
        assert_eq!(summary.metrics["sources"], MetricValue::Text("appdynamics,frontend".into()));
    }

    #[test]
    fn test_audit_category_derivation() {
        assert_eq!(AuditCategory::for_event_type("token_refresh_failed"), AuditCategory::Security);
        assert_eq!(AuditCategory::for_event_type("fix_applied"), AuditCategory::Remediation);
        assert_eq!(AuditCategory::for_event_type("code_fix_approved"), AuditCategory::CodeFix);
        assert_eq!(AuditCategory::for_event_type("pattern_created"), AuditCategory::Monitoring);
        assert_eq!(AuditCategory::for_event_type("misc"), AuditCategory::General);
    }
}
