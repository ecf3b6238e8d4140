//! Pattern analyzer: fingerprints error events into durable patterns, scores
//! confidence and hands ready patterns to remediation exactly once.

use chrono::{DateTime, Utc};
use healwatch_core::config::PatternConfig;
use healwatch_core::error::{MonitorError, MonitorResult};
use healwatch_core::types::{ErrorPattern, FixStatus, MonitoringEvent, Severity};
use healwatch_store::{AuditStore, FixStore, PatternStore};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::fingerprint::Fingerprint;
use crate::templates;

const ACTOR: &str = "pattern-analyzer";
const VALIDATED_CONFIDENCE: f64 = 0.9;

/// Receives patterns that crossed the remediation threshold.
pub trait RemediationTrigger: Send + Sync {
    /// Queue a pattern for remediation. Must not block; returns `false` when
    /// the request could not be queued.
    fn request(&self, pattern: &ErrorPattern) -> bool;
}

/// `min(count/10, 0.7) + min(hours/24, 0.3)`, capped at 1.0. Hours are whole
/// hours since the pattern was first seen.
pub fn confidence_score(occurrence_count: u64, first_seen: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let occurrence_score = (occurrence_count as f64 / 10.0).min(0.7);
    let hours = (now - first_seen).num_hours().max(0) as f64;
    let time_score = (hours / 24.0).min(0.3);
    (occurrence_score + time_score).min(1.0)
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub confidence_raised: usize,
    pub rearmed: usize,
    pub triggered: usize,
}

pub struct PatternAnalyzer {
    config: PatternConfig,
    retry_failed_fixes: bool,
    patterns: Arc<dyn PatternStore>,
    fixes: Arc<dyn FixStore>,
    audit: Arc<dyn AuditStore>,
    trigger: Arc<dyn RemediationTrigger>,
}

impl PatternAnalyzer {
    pub fn new(
        config: PatternConfig,
        patterns: Arc<dyn PatternStore>,
        fixes: Arc<dyn FixStore>,
        audit: Arc<dyn AuditStore>,
        trigger: Arc<dyn RemediationTrigger>,
    ) -> Self {
        Self {
            config,
            retry_failed_fixes: false,
            patterns,
            fixes,
            audit,
            trigger,
        }
    }

    /// Let `sweep` re-arm unvalidated patterns whose latest fix failed.
    pub fn with_retry_failed_fixes(mut self, enabled: bool) -> Self {
        self.retry_failed_fixes = enabled;
        self
    }

    pub fn analyze(&self, event: &MonitoringEvent) -> MonitorResult<ErrorPattern> {
        self.analyze_at(event, Utc::now())
    }

    /// Fingerprint `event` and create or update its pattern as of `now`.
    pub fn analyze_at(&self, event: &MonitoringEvent, now: DateTime<Utc>) -> MonitorResult<ErrorPattern> {
        if event.service_name.trim().is_empty() {
            return Err(MonitorError::Ingestion(format!(
                "event {} has no service name",
                event.id
            )));
        }

        let fp = Fingerprint::of(event);
        let pattern = match self.patterns.find_by_signature(&fp.signature)? {
            Some(existing) => self.record_match(&existing.id, event.severity, now)?,
            None => {
                let candidate = self.new_pattern(&fp, event, now);
                if self.patterns.insert_if_absent(candidate.clone())? {
                    self.on_created(&candidate);
                    candidate
                } else {
                    // A concurrent insert won the signature.
                    let existing = self.patterns.find_by_signature(&fp.signature)?.ok_or_else(|| {
                        MonitorError::Persistence(format!("pattern {} vanished", fp.signature))
                    })?;
                    self.record_match(&existing.id, event.severity, now)?
                }
            }
        };

        let (pattern, _) = self.arm_if_ready(&pattern.id, now)?;
        Ok(pattern)
    }

    fn new_pattern(&self, fp: &Fingerprint, event: &MonitoringEvent, now: DateTime<Utc>) -> ErrorPattern {
        let mut pattern = ErrorPattern::new(&fp.signature, &fp.error_type, &event.service_name, now);
        pattern.class_name = fp.class_name.clone();
        pattern.method_name = fp.method_name.clone();
        pattern.line_number = fp.line_number;
        pattern.severity = event.severity;
        pattern.stack_trace_pattern = fp.stack_head.clone();
        pattern.confidence_score = self.config.initial_confidence.clamp(0.0, 1.0);
        if let Some(template) = templates::template_for(&fp.error_type) {
            template.apply(&mut pattern);
        }
        pattern
    }

    fn on_created(&self, pattern: &ErrorPattern) {
        metrics::counter!("patterns.created").increment(1);
        info!(
            signature = %pattern.signature,
            service = %pattern.service_name,
            error_type = %pattern.error_type,
            "Created new error pattern"
        );
        self.audit.log(
            "pattern_created",
            ACTOR,
            json!({
                "pattern_id": pattern.id,
                "signature": pattern.signature,
                "service": pattern.service_name,
                "error_type": pattern.error_type,
            }),
        );
    }

    fn record_match(&self, id: &str, severity: Severity, now: DateTime<Utc>) -> MonitorResult<ErrorPattern> {
        let pattern = self.patterns.update(id, &mut |p| {
            p.record_occurrence(now);
            p.raise_confidence(confidence_score(p.occurrence_count, p.first_seen, now));
            p.escalate_severity(severity);
        })?;
        debug!(
            signature = %pattern.signature,
            occurrences = pattern.occurrence_count,
            confidence = pattern.confidence_score,
            "Updated error pattern"
        );
        Ok(pattern)
    }

    /// Whether `pattern` meets every remediation precondition, ignoring the
    /// debounce latch.
    pub fn is_ready_for_remediation(&self, pattern: &ErrorPattern) -> bool {
        pattern.has_automated_fix
            && pattern.is_high_confidence(self.config.fix_confidence_threshold)
            && pattern.occurrence_count >= self.config.min_occurrences_for_fix
            && pattern.is_critical()
    }

    /// Set the latch and hand off when ready. The latch is set atomically
    /// with the readiness check so concurrent matches request at most once.
    fn arm_if_ready(&self, id: &str, now: DateTime<Utc>) -> MonitorResult<(ErrorPattern, bool)> {
        let mut armed = false;
        let pattern = self.patterns.update(id, &mut |p| {
            if p.remediation_requested_at.is_none() && self.is_ready_for_remediation(p) {
                p.remediation_requested_at = Some(now);
                armed = true;
            }
        })?;
        if !armed {
            return Ok((pattern, false));
        }

        if !self.trigger.request(&pattern) {
            warn!(pattern_id = %pattern.id, "Remediation queue rejected pattern; will retry on next match");
            let pattern = self
                .patterns
                .update(id, &mut |p| p.remediation_requested_at = None)?;
            return Ok((pattern, false));
        }

        metrics::counter!("remediation.triggered").increment(1);
        info!(
            pattern_id = %pattern.id,
            service = %pattern.service_name,
            error_type = %pattern.error_type,
            confidence = pattern.confidence_score,
            "Pattern handed to remediation"
        );
        self.audit.log(
            "remediation_requested",
            ACTOR,
            json!({
                "pattern_id": pattern.id,
                "confidence": pattern.confidence_score,
                "occurrences": pattern.occurrence_count,
            }),
        );
        Ok((pattern, true))
    }

    pub fn get(&self, id: &str) -> MonitorResult<ErrorPattern> {
        self.patterns
            .get(id)?
            .ok_or_else(|| MonitorError::NotFound(format!("pattern {id}")))
    }

    pub fn list(&self) -> MonitorResult<Vec<ErrorPattern>> {
        self.patterns.list()
    }

    /// Same service and the same error type or class, excluding `pattern`.
    pub fn find_similar_patterns(&self, pattern: &ErrorPattern) -> MonitorResult<Vec<ErrorPattern>> {
        Ok(self
            .patterns
            .list()?
            .into_iter()
            .filter(|p| p.id != pattern.id && p.service_name == pattern.service_name)
            .filter(|p| {
                p.error_type == pattern.error_type
                    || (p.class_name.is_some() && p.class_name == pattern.class_name)
            })
            .collect())
    }

    /// High or critical patterns nobody has validated, most frequent first.
    pub fn patterns_requiring_attention(&self) -> MonitorResult<Vec<ErrorPattern>> {
        let mut patterns: Vec<ErrorPattern> = self
            .patterns
            .list()?
            .into_iter()
            .filter(|p| p.severity >= Severity::High && !p.validated)
            .collect();
        patterns.sort_by(|a, b| b.occurrence_count.cmp(&a.occurrence_count));
        Ok(patterns)
    }

    pub fn fixable_patterns(&self) -> MonitorResult<Vec<ErrorPattern>> {
        Ok(self
            .patterns
            .list()?
            .into_iter()
            .filter(|p| p.has_automated_fix && p.is_high_confidence(self.config.fix_confidence_threshold))
            .collect())
    }

    /// Human verdict on a pattern. A valid pattern is raised to at least 0.9
    /// confidence.
    pub fn validate_pattern(&self, id: &str, valid: bool) -> MonitorResult<ErrorPattern> {
        self.patterns.update(id, &mut |p| {
            p.validated = valid;
            if valid {
                p.raise_confidence(VALIDATED_CONFIDENCE);
            }
            p.updated_at = Utc::now();
        })?;
        self.audit.log(
            "pattern_validated",
            ACTOR,
            json!({ "pattern_id": id, "valid": valid }),
        );
        info!(pattern_id = %id, valid, "Pattern validated");
        let (pattern, _) = self.arm_if_ready(id, Utc::now())?;
        Ok(pattern)
    }

    /// Clear the debounce latch so the pattern may be remediated again.
    pub fn reset_remediation(&self, id: &str) -> MonitorResult<ErrorPattern> {
        self.patterns.update(id, &mut |p| {
            p.remediation_requested_at = None;
            p.updated_at = Utc::now();
        })?;
        self.audit.log("remediation_reset", "operator", json!({ "pattern_id": id }));
        info!(pattern_id = %id, "Remediation latch reset");
        let (pattern, _) = self.arm_if_ready(id, Utc::now())?;
        Ok(pattern)
    }

    pub fn sweep(&self) -> MonitorResult<SweepReport> {
        self.sweep_at(Utc::now())
    }

    /// Recompute time-based confidence for every pattern and re-evaluate the
    /// trigger.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> MonitorResult<SweepReport> {
        let mut report = SweepReport::default();
        for pattern in self.patterns.list()? {
            report.scanned += 1;
            let rearm = self.retry_failed_fixes
                && !pattern.validated
                && pattern.remediation_requested_at.is_some()
                && self
                    .fixes
                    .latest_for_pattern(&pattern.id)?
                    .is_some_and(|f| f.status == FixStatus::Failed);

            let before = pattern.confidence_score;
            let updated = self.patterns.update(&pattern.id, &mut |p| {
                p.raise_confidence(confidence_score(p.occurrence_count, p.first_seen, now));
                if rearm {
                    p.remediation_requested_at = None;
                }
            })?;
            if updated.confidence_score > before {
                report.confidence_raised += 1;
            }
            if rearm {
                report.rearmed += 1;
                debug!(pattern_id = %pattern.id, "Re-armed pattern after failed fix");
            }
            if self.arm_if_ready(&pattern.id, now)?.1 {
                report.triggered += 1;
            }
        }
        info!(
            scanned = report.scanned,
            raised = report.confidence_raised,
            rearmed = report.rearmed,
            triggered = report.triggered,
            "Pattern sweep complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use healwatch_core::types::{AutomatedFix, EventSource};
    use healwatch_store::{InMemoryAuditStore, InMemoryFixStore, InMemoryPatternStore};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct RecordingTrigger {
        requested: Mutex<Vec<String>>,
        accept: AtomicBool,
    }

    impl RecordingTrigger {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                requested: Mutex::new(Vec::new()),
                accept: AtomicBool::new(true),
            })
        }

        fn count(&self) -> usize {
            self.requested.lock().len()
        }
    }

    impl RemediationTrigger for RecordingTrigger {
        fn request(&self, pattern: &ErrorPattern) -> bool {
            if !self.accept.load(Ordering::SeqCst) {
                return false;
            }
            self.requested.lock().push(pattern.id.clone());
            true
        }
    }

    struct Harness {
        analyzer: PatternAnalyzer,
        trigger: Arc<RecordingTrigger>,
        fixes: Arc<InMemoryFixStore>,
        patterns: Arc<InMemoryPatternStore>,
    }

    fn harness(retry_failed_fixes: bool) -> Harness {
        let trigger = RecordingTrigger::new();
        let fixes = Arc::new(InMemoryFixStore::new());
        let patterns = Arc::new(InMemoryPatternStore::new());
        let analyzer = PatternAnalyzer::new(
            PatternConfig::default(),
            patterns.clone(),
            fixes.clone(),
            Arc::new(InMemoryAuditStore::new()),
            trigger.clone(),
        )
        .with_retry_failed_fixes(retry_failed_fixes);
        Harness {
            analyzer,
            trigger,
            fixes,
            patterns,
        }
    }

    fn npe(severity: Severity) -> MonitoringEvent {
        MonitoringEvent::error(EventSource::AppDynamics, severity, "product-service", "NullPointerException")
            .with_code_location("ProductController.getProduct")
            .with_stack_trace(
                "java.lang.NullPointerException\n\tat com.ecommerce.productservice.ProductController.getProduct(ProductController.java:42)",
            )
    }

    #[test]
    fn test_first_occurrence_creates_pattern() {
        let h = harness(false);
        let pattern = h.analyzer.analyze(&npe(Severity::High)).unwrap();
        assert_eq!(pattern.occurrence_count, 1);
        assert_eq!(pattern.confidence_score, 0.3);
        assert!(pattern.has_automated_fix);
        assert_eq!(pattern.class_name.as_deref(), Some("ProductController"));
        assert_eq!(pattern.method_name.as_deref(), Some("getProduct"));
        assert_eq!(h.trigger.count(), 0);
    }

    #[test]
    fn test_repeats_update_single_pattern() {
        let h = harness(false);
        let t0 = Utc::now();
        h.analyzer.analyze_at(&npe(Severity::High), t0).unwrap();
        let mut last = 1;
        for _ in 0..3 {
            let p = h.analyzer.analyze_at(&npe(Severity::High), t0 + Duration::hours(2)).unwrap();
            assert!(p.occurrence_count > last);
            last = p.occurrence_count;
        }
        assert_eq!(h.patterns.count(), 1);
        let p = h.analyzer.list().unwrap().remove(0);
        assert_eq!(p.occurrence_count, 4);
        assert!((p.confidence_score - (0.4 + 2.0 / 24.0)).abs() < 1e-9);
        assert_eq!(h.trigger.count(), 0);
    }

    #[test]
    fn test_confident_critical_pattern_triggers_once() {
        let h = harness(false);
        let t0 = Utc::now();
        h.analyzer.analyze_at(&npe(Severity::Critical), t0).unwrap();
        let mut last = None;
        for _ in 0..29 {
            last = Some(h.analyzer.analyze_at(&npe(Severity::Critical), t0 + Duration::hours(30)).unwrap());
        }
        let last = last.unwrap();
        assert_eq!(last.occurrence_count, 30);
        assert!((last.confidence_score - 1.0).abs() < 1e-9);
        assert!(last.remediation_requested_at.is_some());
        assert_eq!(h.trigger.count(), 1);
    }

    #[test]
    fn test_severity_never_lowered() {
        let h = harness(false);
        h.analyzer.analyze(&npe(Severity::Critical)).unwrap();
        let p = h.analyzer.analyze(&npe(Severity::Low)).unwrap();
        assert_eq!(p.severity, Severity::Critical);
    }

    #[test]
    fn test_rejected_request_clears_latch() {
        let h = harness(false);
        h.trigger.accept.store(false, Ordering::SeqCst);
        let t0 = Utc::now();
        h.analyzer.analyze_at(&npe(Severity::Critical), t0).unwrap();
        for _ in 0..5 {
            h.analyzer.analyze_at(&npe(Severity::Critical), t0 + Duration::hours(30)).unwrap();
        }
        let p = h.analyzer.list().unwrap().remove(0);
        assert!(p.remediation_requested_at.is_none());

        h.trigger.accept.store(true, Ordering::SeqCst);
        h.analyzer.analyze_at(&npe(Severity::Critical), t0 + Duration::hours(30)).unwrap();
        assert_eq!(h.trigger.count(), 1);
    }

    #[test]
    fn test_missing_service_rejected() {
        let h = harness(false);
        let mut event = npe(Severity::High);
        event.service_name = "  ".into();
        assert!(matches!(h.analyzer.analyze(&event), Err(MonitorError::Ingestion(_))));
        assert_eq!(h.patterns.count(), 0);
    }

    #[test]
    fn test_confidence_monotonic() {
        let t0 = Utc::now();
        let mut previous = 0.0;
        for count in 1..40 {
            let score = confidence_score(count, t0, t0 + Duration::hours(3));
            assert!(score >= previous);
            previous = score;
        }
        let mut previous = 0.0;
        for hours in 0..60 {
            let score = confidence_score(5, t0, t0 + Duration::hours(hours));
            assert!(score >= previous);
            previous = score;
        }
        assert!((confidence_score(30, t0, t0 + Duration::hours(30)) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_validate_and_reset() {
        let h = harness(false);
        let p = h.analyzer.analyze(&npe(Severity::Critical)).unwrap();
        for _ in 0..2 {
            h.analyzer.analyze(&npe(Severity::Critical)).unwrap();
        }
        // count 3 with low confidence: validation pushes it over the threshold
        let validated = h.analyzer.validate_pattern(&p.id, true).unwrap();
        assert!(validated.validated);
        assert!(validated.confidence_score >= 0.9);
        assert_eq!(h.trigger.count(), 1);

        // still latched
        h.analyzer.analyze(&npe(Severity::Critical)).unwrap();
        assert_eq!(h.trigger.count(), 1);

        h.analyzer.reset_remediation(&p.id).unwrap();
        assert_eq!(h.trigger.count(), 2);
    }

    #[test]
    fn test_sweep_rearms_failed_fix_when_enabled() {
        let h = harness(true);
        let t0 = Utc::now() - Duration::hours(30);
        h.analyzer.analyze_at(&npe(Severity::Critical), t0).unwrap();
        let mut pattern = None;
        for _ in 0..5 {
            pattern = Some(h.analyzer.analyze_at(&npe(Severity::Critical), Utc::now()).unwrap());
        }
        let pattern = pattern.unwrap();
        assert_eq!(h.trigger.count(), 1);

        let mut fix = AutomatedFix::new(&pattern.id, "product-service", "null_check");
        fix.mark_failed("tests failed").unwrap();
        h.fixes.save(&fix).unwrap();

        let report = h.analyzer.sweep().unwrap();
        assert_eq!(report.rearmed, 1);
        assert_eq!(report.triggered, 1);
        assert_eq!(h.trigger.count(), 2);
    }

    #[test]
    fn test_sweep_raises_time_confidence_without_retry() {
        let h = harness(false);
        let t0 = Utc::now();
        let p = h.analyzer.analyze_at(&npe(Severity::Medium), t0).unwrap();
        let report = h.analyzer.sweep_at(t0 + Duration::hours(48)).unwrap();
        assert_eq!(report.scanned, 1);
        assert_eq!(report.confidence_raised, 1);
        assert_eq!(report.rearmed, 0);
        let p = h.analyzer.get(&p.id).unwrap();
        assert!((p.confidence_score - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_similar_and_attention_queries() {
        let h = harness(false);
        let a = h.analyzer.analyze(&npe(Severity::Critical)).unwrap();
        let other_method = npe(Severity::High).with_code_location("ProductController.listProducts");
        let b = h.analyzer.analyze(&other_method).unwrap();
        h.analyzer.analyze(&other_method).unwrap();
        let unrelated = MonitoringEvent::error(EventSource::Frontend, Severity::Low, "cart-service", "TypeError");
        h.analyzer.analyze(&unrelated).unwrap();

        let similar = h.analyzer.find_similar_patterns(&a).unwrap();
        assert_eq!(similar.len(), 1);
        assert_eq!(similar[0].id, b.id);

        let attention = h.analyzer.patterns_requiring_attention().unwrap();
        assert_eq!(attention.len(), 2);
        assert_eq!(attention[0].id, b.id);

        assert!(h.analyzer.fixable_patterns().unwrap().is_empty());
    }
}
