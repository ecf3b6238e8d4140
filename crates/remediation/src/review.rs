//! Human review of tested fixes.
//!
//! When the board is enabled a fix that passes its tests is held here
//! instead of being published. Approval, or the timeout sweep for reviews
//! that do not require an explicit approval, releases it to the
//! pull-request step. A rejected fix keeps its local branch and is never
//! published.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use healwatch_core::config::ReviewConfig;
use healwatch_core::error::{MonitorError, MonitorResult};
use healwatch_core::event_bus::{Alert, AlertChannel, AlertSink};
use healwatch_core::types::{AutomatedFix, ErrorPattern, Severity};
use healwatch_store::AuditStore;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

pub const AUTO_APPROVER: &str = "system-auto-approval";

const DEFAULT_TIMEOUT_HOURS: i64 = 24;
const SENSITIVE_SERVICES: [&str; 2] = ["gateway", "auth"];
const IMPORTANT_SERVICES: [&str; 2] = ["user", "order"];
const SENSITIVE_ERRORS: [&str; 3] = ["nullpointer", "security", "authentication"];
const CONFIG_EXTENSIONS: [&str; 5] = [".yml", ".yaml", ".properties", ".xml", ".json"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewStatus {
    Pending,
    Approved,
    Rejected,
    ModificationsRequested,
    AutoApproved,
}

impl ReviewStatus {
    /// Still waiting on a reviewer.
    pub fn is_open(&self) -> bool {
        matches!(self, ReviewStatus::Pending | ReviewStatus::ModificationsRequested)
    }

    pub fn is_approved(&self) -> bool {
        matches!(self, ReviewStatus::Approved | ReviewStatus::AutoApproved)
    }
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReviewStatus::Pending => "PENDING",
            ReviewStatus::Approved => "APPROVED",
            ReviewStatus::Rejected => "REJECTED",
            ReviewStatus::ModificationsRequested => "MODIFICATIONS_REQUESTED",
            ReviewStatus::AutoApproved => "AUTO_APPROVED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionKind {
    Approved,
    Rejected,
    ModificationsRequested,
    AutoApproved,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewDecision {
    pub reviewed_by: String,
    pub reviewed_at: DateTime<Utc>,
    pub kind: DecisionKind,
    pub comments: String,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

/// A tested fix waiting for (or past) human review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixReview {
    pub id: String,
    pub fix_id: String,
    pub pattern_id: String,
    pub service_name: String,
    pub error_type: String,
    pub fix_type: String,
    pub branch_name: Option<String>,
    pub submitted_by: String,
    pub submitted_at: DateTime<Utc>,
    pub status: ReviewStatus,
    pub severity: Severity,
    pub impact_score: u32,
    pub complexity_score: u32,
    pub requires_approval: bool,
    pub decisions: Vec<ReviewDecision>,
}

impl FixReview {
    fn distinct_approvers(&self) -> usize {
        self.decisions
            .iter()
            .filter(|d| d.kind == DecisionKind::Approved)
            .map(|d| d.reviewed_by.as_str())
            .collect::<BTreeSet<_>>()
            .len()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReviewStatistics {
    pub pending: usize,
    pub pending_by_severity: BTreeMap<String, usize>,
    pub oldest_pending_minutes: Option<i64>,
    pub recent_total: usize,
    pub recent_approved: usize,
    pub recent_auto_approved: usize,
    pub recent_rejected: usize,
    /// Percentage of recent reviews approved by a reviewer or the sweep.
    pub approval_rate: f64,
}

/// How much damage the underlying error does: frequency, service and
/// error type, capped at 10.
pub fn impact_score(pattern: &ErrorPattern) -> u32 {
    let mut score = match pattern.occurrence_count {
        c if c > 100 => 3,
        c if c > 50 => 2,
        c if c > 10 => 1,
        _ => 0,
    };
    let service = pattern.service_name.to_ascii_lowercase();
    score += if SENSITIVE_SERVICES.iter().any(|s| service.contains(s)) {
        3
    } else if IMPORTANT_SERVICES.iter().any(|s| service.contains(s)) {
        2
    } else {
        1
    };
    let error = pattern.error_type.to_ascii_lowercase();
    if SENSITIVE_ERRORS.iter().any(|e| error.contains(e)) {
        score += 2;
    }
    score.min(10)
}

/// Size and kind of the change, capped at 10. Generated fixes carry no
/// test cases of their own, which always adds 2.
pub fn complexity_score(fix: &AutomatedFix) -> u32 {
    let mut score = u32::from(fix.file_path.is_some());
    let changed = match (&fix.original_code, &fix.fixed_code) {
        (Some(original), Some(fixed)) => changed_lines(original, fixed),
        _ => 0,
    };
    score += match changed {
        n if n > 100 => 3,
        n if n > 50 => 2,
        n if n > 10 => 1,
        _ => 0,
    };
    if fix
        .file_path
        .as_deref()
        .is_some_and(|p| CONFIG_EXTENSIONS.iter().any(|ext| p.ends_with(ext)))
    {
        score += 1;
    }
    score += 2;
    score.min(10)
}

/// Lines present on one side only.
fn changed_lines(original: &str, fixed: &str) -> usize {
    let before: HashSet<&str> = original.lines().collect();
    let after: HashSet<&str> = fixed.lines().collect();
    after.difference(&before).count() + before.difference(&after).count()
}

fn review_severity(pattern: Severity, impact: u32, complexity: u32) -> Severity {
    if pattern == Severity::Critical || impact >= 8 || complexity >= 8 {
        Severity::Critical
    } else if pattern == Severity::High || impact >= 6 || complexity >= 6 {
        Severity::High
    } else if pattern == Severity::Medium || impact >= 4 || complexity >= 4 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

fn review_id(now: DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("REVIEW_{}_{}", now.timestamp_millis(), suffix[..8].to_ascii_uppercase())
}

pub struct ReviewBoard {
    config: ReviewConfig,
    timeout: Duration,
    reviews: DashMap<String, FixReview>,
    audit: Arc<dyn AuditStore>,
    alerts: Arc<dyn AlertSink>,
}

impl ReviewBoard {
    pub fn new(config: ReviewConfig, audit: Arc<dyn AuditStore>, alerts: Arc<dyn AlertSink>) -> Self {
        let timeout = Duration::try_hours(config.auto_approve_timeout_hours.max(1))
            .unwrap_or_else(|| Duration::hours(DEFAULT_TIMEOUT_HOURS));
        Self {
            config,
            timeout,
            reviews: DashMap::new(),
            audit,
            alerts,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Hold a tested fix for review and stamp it with the review id. The
    /// caller persists the fix.
    pub fn submit(&self, fix: &mut AutomatedFix, pattern: &ErrorPattern, submitted_by: &str) -> FixReview {
        let now = Utc::now();
        let impact = impact_score(pattern);
        let complexity = complexity_score(fix);
        let severity = review_severity(pattern.severity, impact, complexity);
        let service = pattern.service_name.to_ascii_lowercase();
        let requires_approval = (self.config.critical_requires_approval && severity == Severity::Critical)
            || SENSITIVE_SERVICES.iter().any(|s| service.contains(s))
            || complexity >= 7;

        let review = FixReview {
            id: review_id(now),
            fix_id: fix.id.clone(),
            pattern_id: pattern.id.clone(),
            service_name: fix.service_name.clone(),
            error_type: pattern.error_type.clone(),
            fix_type: fix.fix_type.clone(),
            branch_name: fix.branch_name.clone(),
            submitted_by: submitted_by.to_string(),
            submitted_at: now,
            status: ReviewStatus::Pending,
            severity,
            impact_score: impact,
            complexity_score: complexity,
            requires_approval,
            decisions: Vec::new(),
        };
        fix.review_id = Some(review.id.clone());
        self.reviews.insert(review.id.clone(), review.clone());

        metrics::counter!("review.submitted").increment(1);
        self.audit.log(
            "code_fix_submitted_for_review",
            submitted_by,
            json!({
                "review_id": review.id,
                "fix_id": review.fix_id,
                "service": review.service_name,
                "severity": review.severity,
                "requires_approval": review.requires_approval,
            }),
        );
        self.notify(&review, severity, "Fix awaiting review");
        info!(
            review_id = %review.id,
            fix_id = %review.fix_id,
            severity = %review.severity,
            requires_approval = review.requires_approval,
            "Fix submitted for review"
        );
        review
    }

    pub fn get(&self, review_id: &str) -> MonitorResult<FixReview> {
        self.reviews
            .get(review_id)
            .map(|r| r.clone())
            .ok_or_else(|| MonitorError::NotFound(format!("review {review_id}")))
    }

    /// Record an approval. The review is approved once enough distinct
    /// reviewers have approved it.
    pub fn approve(&self, review_id: &str, reviewer: &str, comments: &str) -> MonitorResult<FixReview> {
        let review = self.decide(review_id, reviewer, DecisionKind::Approved, comments, Vec::new(), |r| {
            let needed = if self.config.require_multiple_reviewers && r.severity == Severity::Critical {
                2
            } else {
                1
            };
            (r.distinct_approvers() >= needed).then_some(ReviewStatus::Approved)
        })?;
        if review.status == ReviewStatus::Approved {
            metrics::counter!("review.approved").increment(1);
            self.audit.log(
                "code_fix_approved",
                reviewer,
                json!({ "review_id": review.id, "fix_id": review.fix_id, "comments": comments }),
            );
            self.notify(&review, Severity::Info, "Fix approved");
            info!(review_id = %review.id, reviewer, "Fix approved");
        } else {
            info!(review_id = %review.id, reviewer, "Approval recorded; waiting for another reviewer");
        }
        Ok(review)
    }

    pub fn reject(
        &self,
        review_id: &str,
        reviewer: &str,
        reason: &str,
        suggestions: Vec<String>,
    ) -> MonitorResult<FixReview> {
        let review = self.decide(review_id, reviewer, DecisionKind::Rejected, reason, suggestions.clone(), |_| {
            Some(ReviewStatus::Rejected)
        })?;
        metrics::counter!("review.rejected").increment(1);
        self.audit.log(
            "code_fix_rejected",
            reviewer,
            json!({
                "review_id": review.id,
                "fix_id": review.fix_id,
                "reason": reason,
                "suggestions": suggestions,
            }),
        );
        self.notify(&review, Severity::Medium, "Fix rejected");
        warn!(review_id = %review.id, reviewer, reason, "Fix rejected");
        Ok(review)
    }

    pub fn request_modifications(
        &self,
        review_id: &str,
        reviewer: &str,
        request: &str,
        suggestions: Vec<String>,
    ) -> MonitorResult<FixReview> {
        let review = self.decide(
            review_id,
            reviewer,
            DecisionKind::ModificationsRequested,
            request,
            suggestions.clone(),
            |_| Some(ReviewStatus::ModificationsRequested),
        )?;
        self.audit.log(
            "code_fix_modifications_requested",
            reviewer,
            json!({
                "review_id": review.id,
                "fix_id": review.fix_id,
                "request": request,
                "suggestions": suggestions,
            }),
        );
        self.notify(&review, Severity::Low, "Fix modifications requested");
        info!(review_id = %review.id, reviewer, "Modifications requested");
        Ok(review)
    }

    /// Append a decision to an open review and apply the resulting status.
    fn decide(
        &self,
        review_id: &str,
        reviewer: &str,
        kind: DecisionKind,
        comments: &str,
        suggestions: Vec<String>,
        next: impl FnOnce(&FixReview) -> Option<ReviewStatus>,
    ) -> MonitorResult<FixReview> {
        if reviewer.trim().is_empty() {
            return Err(MonitorError::Ingestion("reviewer is required".into()));
        }
        let mut review = self
            .reviews
            .get_mut(review_id)
            .ok_or_else(|| MonitorError::NotFound(format!("review {review_id}")))?;
        if !review.status.is_open() {
            return Err(MonitorError::InvalidTransition(format!(
                "review {review_id} is already {}",
                review.status
            )));
        }
        review.decisions.push(ReviewDecision {
            reviewed_by: reviewer.to_string(),
            reviewed_at: Utc::now(),
            kind,
            comments: comments.to_string(),
            suggestions,
        });
        if let Some(status) = next(&*review) {
            review.status = status;
        }
        Ok(review.clone())
    }

    /// Open reviews, most severe first, oldest first within a severity.
    pub fn pending(&self) -> Vec<FixReview> {
        let mut open: Vec<FixReview> = self
            .reviews
            .iter()
            .filter(|r| r.status.is_open())
            .map(|r| r.clone())
            .collect();
        open.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then_with(|| a.submitted_at.cmp(&b.submitted_at))
        });
        open
    }

    /// Reviews submitted since `since`, newest first.
    pub fn history(&self, since: DateTime<Utc>) -> Vec<FixReview> {
        let mut recent: Vec<FixReview> = self
            .reviews
            .iter()
            .filter(|r| r.submitted_at >= since)
            .map(|r| r.clone())
            .collect();
        recent.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        recent
    }

    pub fn statistics(&self, since: DateTime<Utc>) -> ReviewStatistics {
        let pending = self.pending();
        let recent = self.history(since);
        let mut stats = ReviewStatistics {
            pending: pending.len(),
            oldest_pending_minutes: pending
                .iter()
                .map(|r| r.submitted_at)
                .min()
                .map(|oldest| (Utc::now() - oldest).num_minutes()),
            recent_total: recent.len(),
            ..Default::default()
        };
        for review in &pending {
            *stats
                .pending_by_severity
                .entry(review.severity.to_string())
                .or_default() += 1;
        }
        for review in &recent {
            match review.status {
                ReviewStatus::Approved => stats.recent_approved += 1,
                ReviewStatus::AutoApproved => stats.recent_auto_approved += 1,
                ReviewStatus::Rejected => stats.recent_rejected += 1,
                _ => {}
            }
        }
        if stats.recent_total > 0 {
            stats.approval_rate = (stats.recent_approved + stats.recent_auto_approved) as f64
                / stats.recent_total as f64
                * 100.0;
        }
        stats
    }

    /// Approve pending reviews older than the timeout that do not require
    /// an explicit approval. Returns the reviews approved by this call.
    pub fn expire_timed_out(&self, now: DateTime<Utc>) -> Vec<FixReview> {
        let Some(cutoff) = now.checked_sub_signed(self.timeout) else {
            return Vec::new();
        };
        let comments = format!(
            "Auto-approved after {} hours without review",
            self.timeout.num_hours()
        );
        let mut approved = Vec::new();
        for mut review in self.reviews.iter_mut() {
            if review.status != ReviewStatus::Pending || review.requires_approval || review.submitted_at > cutoff {
                continue;
            }
            review.decisions.push(ReviewDecision {
                reviewed_by: AUTO_APPROVER.to_string(),
                reviewed_at: now,
                kind: DecisionKind::AutoApproved,
                comments: comments.clone(),
                suggestions: Vec::new(),
            });
            review.status = ReviewStatus::AutoApproved;
            approved.push(review.clone());
        }

        for review in &approved {
            metrics::counter!("review.auto_approved").increment(1);
            self.audit.log(
                "code_fix_auto_approved",
                AUTO_APPROVER,
                json!({
                    "review_id": review.id,
                    "fix_id": review.fix_id,
                    "timeout_hours": self.timeout.num_hours(),
                }),
            );
            self.notify(review, Severity::Info, "Fix auto-approved");
            info!(review_id = %review.id, "Review auto-approved after timeout");
        }
        approved
    }

    fn notify(&self, review: &FixReview, severity: Severity, title: &str) {
        self.alerts.publish(
            Alert::new(
                AlertChannel::Fixes,
                severity,
                title,
                format!("{} fix for {} ({})", review.fix_type, review.error_type, review.status),
            )
            .for_service(&review.service_name)
            .with_data(json!({
                "review_id": review.id,
                "fix_id": review.fix_id,
                "status": review.status,
                "severity": review.severity,
            })),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use healwatch_core::event_bus::{capture_sink, CaptureSink};
    use healwatch_core::types::AuditCategory;
    use healwatch_store::InMemoryAuditStore;

    fn board(config: ReviewConfig) -> (ReviewBoard, Arc<InMemoryAuditStore>, Arc<CaptureSink>) {
        let audit = Arc::new(InMemoryAuditStore::new());
        let alerts = capture_sink();
        (ReviewBoard::new(config, audit.clone(), alerts.clone()), audit, alerts)
    }

    fn enabled() -> ReviewConfig {
        ReviewConfig {
            enabled: true,
            ..Default::default()
        }
    }

    fn pattern(service: &str, severity: Severity) -> ErrorPattern {
        let mut p = ErrorPattern::new("sig", "SQLException", service, Utc::now());
        p.severity = severity;
        p.occurrence_count = 3;
        p
    }

    fn tested_fix(service: &str) -> AutomatedFix {
        let mut fix = AutomatedFix::new("p1", service, "retry");
        fix.file_path = Some(format!("{service}/src/main/java/Repo.java"));
        fix.original_code = Some("class Repo {\n}\n".into());
        fix.fixed_code = Some("@Retryable\nclass Repo {\n}\n".into());
        fix.branch_name = Some("automated-fix/retry-20240101-000000".into());
        fix
    }

    #[test]
    fn test_scores_and_severity() {
        let p = pattern("order-service", Severity::High);
        // 3 occurrences, important service, non-sensitive error
        assert_eq!(impact_score(&p), 2);
        // one file, one changed line, no tests
        assert_eq!(complexity_score(&tested_fix("order-service")), 3);
        assert_eq!(review_severity(Severity::High, 2, 3), Severity::High);
        assert_eq!(review_severity(Severity::Low, 8, 0), Severity::Critical);
        assert_eq!(review_severity(Severity::Info, 1, 4), Severity::Medium);
        assert_eq!(review_severity(Severity::Info, 1, 3), Severity::Low);
    }

    #[test]
    fn test_submit_stamps_fix_and_audits_as_code_fix() {
        let (board, audit, alerts) = board(enabled());
        let mut fix = tested_fix("cart-service");
        let review = board.submit(&mut fix, &pattern("cart-service", Severity::High), "remediation-engine");

        assert_eq!(fix.review_id.as_deref(), Some(review.id.as_str()));
        assert!(review.id.starts_with("REVIEW_"));
        assert_eq!(review.status, ReviewStatus::Pending);
        assert!(!review.requires_approval);
        assert_eq!(board.pending().len(), 1);
        assert_eq!(alerts.count_channel(AlertChannel::Fixes), 1);

        let records = audit.query(Some(AuditCategory::CodeFix), None, 10);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event_type, "code_fix_submitted_for_review");
    }

    #[test]
    fn test_critical_or_sensitive_reviews_require_approval() {
        let (board, _, _) = board(enabled());
        let critical = board.submit(
            &mut tested_fix("cart-service"),
            &pattern("cart-service", Severity::Critical),
            "engine",
        );
        assert_eq!(critical.severity, Severity::Critical);
        assert!(critical.requires_approval);

        let gateway = board.submit(
            &mut tested_fix("api-gateway"),
            &pattern("api-gateway", Severity::High),
            "engine",
        );
        assert!(gateway.requires_approval);
    }

    #[test]
    fn test_decisions_close_review_once() {
        let (board, _, _) = board(enabled());
        let review = board.submit(&mut tested_fix("cart-service"), &pattern("cart-service", Severity::High), "engine");

        let approved = board.approve(&review.id, "alice", "looks right").unwrap();
        assert_eq!(approved.status, ReviewStatus::Approved);
        assert!(board.pending().is_empty());
        assert!(matches!(
            board.reject(&review.id, "bob", "too late", Vec::new()),
            Err(MonitorError::InvalidTransition(_))
        ));
        assert!(matches!(
            board.approve("REVIEW_missing", "alice", ""),
            Err(MonitorError::NotFound(_))
        ));
        assert!(matches!(
            board.approve(&review.id, " ", ""),
            Err(MonitorError::Ingestion(_))
        ));
    }

    #[test]
    fn test_critical_review_needs_two_distinct_approvers() {
        let config = ReviewConfig {
            require_multiple_reviewers: true,
            ..enabled()
        };
        let (board, _, _) = board(config);
        let review = board.submit(
            &mut tested_fix("cart-service"),
            &pattern("cart-service", Severity::Critical),
            "engine",
        );

        assert_eq!(board.approve(&review.id, "alice", "ok").unwrap().status, ReviewStatus::Pending);
        assert_eq!(board.approve(&review.id, "alice", "still ok").unwrap().status, ReviewStatus::Pending);
        assert_eq!(board.approve(&review.id, "bob", "ok").unwrap().status, ReviewStatus::Approved);
    }

    #[test]
    fn test_modifications_keep_review_open_until_decided() {
        let (board, _, _) = board(enabled());
        let review = board.submit(&mut tested_fix("cart-service"), &pattern("cart-service", Severity::High), "engine");

        let review = board
            .request_modifications(&review.id, "alice", "add a log line", vec!["log the id".into()])
            .unwrap();
        assert_eq!(review.status, ReviewStatus::ModificationsRequested);
        assert_eq!(board.pending().len(), 1);

        let review = board.reject(&review.id, "alice", "not addressed", Vec::new()).unwrap();
        assert_eq!(review.status, ReviewStatus::Rejected);
        assert_eq!(review.decisions.len(), 2);
        assert_eq!(review.decisions[0].suggestions, vec!["log the id".to_string()]);
    }

    #[test]
    fn test_timeout_sweep_skips_reviews_requiring_approval() {
        let (board, audit, _) = board(enabled());
        let routine = board.submit(&mut tested_fix("cart-service"), &pattern("cart-service", Severity::High), "engine");
        let critical = board.submit(
            &mut tested_fix("cart-service"),
            &pattern("cart-service", Severity::Critical),
            "engine",
        );

        assert!(board.expire_timed_out(Utc::now()).is_empty());

        let later = Utc::now() + Duration::hours(25);
        let approved = board.expire_timed_out(later);
        assert_eq!(approved.len(), 1);
        assert_eq!(approved[0].id, routine.id);
        assert_eq!(approved[0].decisions[0].reviewed_by, AUTO_APPROVER);
        assert_eq!(board.get(&routine.id).unwrap().status, ReviewStatus::AutoApproved);
        assert_eq!(board.get(&critical.id).unwrap().status, ReviewStatus::Pending);
        assert!(board.expire_timed_out(later).is_empty());

        let records = audit.query(Some(AuditCategory::CodeFix), None, 10);
        assert!(records.iter().any(|r| r.event_type == "code_fix_auto_approved"));
    }

    #[test]
    fn test_statistics_and_history() {
        let (board, _, _) = board(enabled());
        let since = Utc::now() - Duration::days(7);
        let a = board.submit(&mut tested_fix("cart-service"), &pattern("cart-service", Severity::High), "engine");
        let b = board.submit(
            &mut tested_fix("cart-service"),
            &pattern("cart-service", Severity::Critical),
            "engine",
        );
        board.submit(&mut tested_fix("cart-service"), &pattern("cart-service", Severity::High), "engine");
        board.approve(&a.id, "alice", "ok").unwrap();
        board.reject(&b.id, "alice", "no", Vec::new()).unwrap();

        let stats = board.statistics(since);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.pending_by_severity.get("high"), Some(&1));
        assert_eq!((stats.recent_total, stats.recent_approved, stats.recent_rejected), (3, 1, 1));
        assert!((stats.approval_rate - 100.0 / 3.0).abs() < 1e-9);
        assert_eq!(board.history(since).len(), 3);
        assert!(board.history(Utc::now() + Duration::minutes(1)).is_empty());
    }
}
