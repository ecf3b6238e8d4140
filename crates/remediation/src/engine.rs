//! Remediation workflow: `PENDING -> APPLIED -> TESTED | FAILED`.
//!
//! A tested fix opens its pull request straight away, or waits on the
//! review board when one is enabled and is published by `release` once
//! approved.

use chrono::Utc;
use healwatch_core::config::RemediationConfig;
use healwatch_core::error::{MonitorError, MonitorResult};
use healwatch_core::event_bus::{Alert, AlertChannel, AlertSink};
use healwatch_core::types::{AutomatedFix, ErrorPattern, Severity};
use healwatch_store::{AuditStore, FixStore};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::collaborators::{TestRunner, VersionControlGateway};
use crate::java::JavaSource;
use crate::lock::PatternLocks;
use crate::review::{FixReview, ReviewBoard};
use crate::strategies::{PatchOutcome, PatchStrategy, PatchTarget, StrategyRegistry};

const ACTOR: &str = "remediation-engine";
const NO_CHANGE_REASON: &str = "could not apply automated fix";

#[derive(Debug, Clone)]
pub enum RemediationOutcome {
    /// The fix reached a terminal state.
    Completed(AutomatedFix),
    /// No strategy exists for the error type; nothing was recorded.
    NoAutomatedFix { error_type: String },
    /// Another fix for the pattern is in flight.
    AlreadyInFlight,
}

/// Source file of a pattern's class and the build module that owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub path: PathBuf,
    pub module: String,
}

pub struct RemediationEngine {
    workspace: PathBuf,
    fixes: Arc<dyn FixStore>,
    audit: Arc<dyn AuditStore>,
    alerts: Arc<dyn AlertSink>,
    vcs: Arc<dyn VersionControlGateway>,
    tests: Arc<dyn TestRunner>,
    strategies: StrategyRegistry,
    locks: PatternLocks,
    reviews: Option<Arc<ReviewBoard>>,
    // one checkout: branch, patch and test steps never interleave
    checkout: tokio::sync::Mutex<()>,
}

impl RemediationEngine {
    pub fn new(
        config: &RemediationConfig,
        fixes: Arc<dyn FixStore>,
        audit: Arc<dyn AuditStore>,
        alerts: Arc<dyn AlertSink>,
        vcs: Arc<dyn VersionControlGateway>,
        tests: Arc<dyn TestRunner>,
    ) -> Self {
        Self {
            workspace: PathBuf::from(&config.workspace_path),
            fixes,
            audit,
            alerts,
            vcs,
            tests,
            strategies: StrategyRegistry::with_defaults(),
            locks: PatternLocks::new(),
            reviews: None,
            checkout: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_strategies(mut self, strategies: StrategyRegistry) -> Self {
        self.strategies = strategies;
        self
    }

    pub fn with_review_board(mut self, reviews: Arc<ReviewBoard>) -> Self {
        self.reviews = Some(reviews);
        self
    }

    pub fn in_flight(&self) -> usize {
        self.locks.held_count()
    }

    pub fn supports(&self, error_type: &str) -> bool {
        self.strategies.get(error_type).is_some()
    }

    /// Run the full workflow for one pattern. Collaborator failures end in
    /// a FAILED fix record rather than an error.
    pub async fn remediate(&self, pattern: &ErrorPattern) -> MonitorResult<RemediationOutcome> {
        let Some(_guard) = self.locks.try_acquire(&pattern.id) else {
            info!(pattern_id = %pattern.id, "Fix already in flight; skipping");
            return Ok(RemediationOutcome::AlreadyInFlight);
        };
        if self
            .fixes
            .by_pattern(&pattern.id)?
            .iter()
            .any(|f| !f.status.is_terminal())
        {
            info!(pattern_id = %pattern.id, "Unfinished fix on record; skipping");
            return Ok(RemediationOutcome::AlreadyInFlight);
        }

        let Some(strategy) = self.strategies.get(&pattern.error_type) else {
            warn!(
                pattern_id = %pattern.id,
                error_type = %pattern.error_type,
                "No automated fix available"
            );
            return Ok(RemediationOutcome::NoAutomatedFix {
                error_type: pattern.error_type.clone(),
            });
        };

        let mut fix = AutomatedFix::new(&pattern.id, &pattern.service_name, strategy.fix_type());
        fix.description = format!(
            "Automated fix for {} in {}",
            pattern.error_type, pattern.service_name
        );
        self.fixes.save(&fix)?;
        self.audit.log(
            "fix_created",
            ACTOR,
            json!({ "fix_id": fix.id, "pattern_id": pattern.id, "fix_type": fix.fix_type }),
        );
        info!(
            fix_id = %fix.id,
            pattern_id = %pattern.id,
            service = %pattern.service_name,
            fix_type = %fix.fix_type,
            "Starting automated fix"
        );

        let checkout = self.checkout.lock().await;
        if let Err(e) = self.execute(&mut fix, pattern, strategy.as_ref()).await {
            self.fail(&mut fix, &e);
        }
        if let Err(e) = self.vcs.restore().await {
            warn!(fix_id = %fix.id, error = %e, "Failed to restore workspace");
        }
        drop(checkout);

        Ok(RemediationOutcome::Completed(fix))
    }

    async fn execute(
        &self,
        fix: &mut AutomatedFix,
        pattern: &ErrorPattern,
        strategy: &dyn PatchStrategy,
    ) -> MonitorResult<()> {
        let class_name = pattern
            .class_name
            .as_deref()
            .ok_or_else(|| MonitorError::FixAnalysis("pattern has no class name".into()))?;

        self.vcs.prepare().await?;
        let location = self.locate_source(&pattern.service_name, class_name)?;
        let original = tokio::fs::read_to_string(&location.path).await.map_err(|e| {
            MonitorError::FixAnalysis(format!("cannot read {}: {e}", location.path.display()))
        })?;
        let source = JavaSource::parse(original.as_str())?;

        let target = PatchTarget {
            service_name: &pattern.service_name,
            class_name,
            method_name: pattern.method_name.as_deref(),
        };
        let (patched, changes) = match strategy.apply(&source, &target)? {
            PatchOutcome::Patched { source, changes } => (source, changes),
            PatchOutcome::NoChange(detail) => {
                debug!(fix_id = %fix.id, detail = %detail, "Strategy made no change");
                return Err(MonitorError::FixAnalysis(NO_CHANGE_REASON.into()));
            }
        };

        tokio::fs::write(&location.path, &patched).await?;
        fix.file_path = Some(location.path.to_string_lossy().into_owned());
        fix.original_code = Some(original);
        fix.fixed_code = Some(patched);
        fix.changes = changes;

        let branch = format!(
            "automated-fix/{}-{}",
            fix.fix_type,
            Utc::now().format("%Y%m%d-%H%M%S")
        );
        self.vcs.create_branch(&branch).await?;
        let commit_id = self
            .vcs
            .commit(&commit_message(fix), std::slice::from_ref(&location.path))
            .await?;

        fix.mark_applied(&commit_id, &branch)?;
        self.record(fix, "fix_applied", Severity::Info, "Automated fix applied");

        let report = self.tests.run_tests(&location.module).await?;
        if !report.passed {
            fix.test_results = Some(report.output);
            return Err(MonitorError::TestExecution(
                "tests failed after applying fix".into(),
            ));
        }
        fix.mark_tested(report.output)?;
        self.record(fix, "fix_tested", Severity::Info, "Automated fix passed tests");

        if let Some(board) = self.reviews.as_ref().filter(|b| b.is_enabled()) {
            let review = board.submit(fix, pattern, ACTOR);
            self.save(fix);
            info!(fix_id = %fix.id, review_id = %review.id, "Pull request held for review");
            return Ok(());
        }
        self.publish(fix, &branch).await;
        Ok(())
    }

    async fn publish(&self, fix: &mut AutomatedFix, branch: &str) {
        let title = format!("Automated fix: {}", fix.description);
        match self
            .vcs
            .open_pull_request(branch, &title, &commit_message(fix))
            .await
        {
            Ok(Some(url)) => {
                info!(fix_id = %fix.id, url = %url, "Pull request opened");
                fix.pull_request_url = Some(url);
                self.save(fix);
            }
            Ok(None) => {}
            Err(e) => warn!(fix_id = %fix.id, error = %e, "Pull request failed"),
        }
    }

    /// Open the pull request of an approved review. Releasing a fix that
    /// already has a pull request does nothing.
    pub async fn release(&self, review: &FixReview) -> MonitorResult<AutomatedFix> {
        if !review.status.is_approved() {
            return Err(MonitorError::InvalidTransition(format!(
                "review {} is {} and cannot be released",
                review.id, review.status
            )));
        }
        let mut fix = self
            .fixes
            .get(&review.fix_id)?
            .ok_or_else(|| MonitorError::NotFound(format!("fix {}", review.fix_id)))?;
        if fix.pull_request_url.is_some() {
            return Ok(fix);
        }
        let branch = fix
            .branch_name
            .clone()
            .ok_or_else(|| MonitorError::FixAnalysis(format!("fix {} has no branch", fix.id)))?;

        let _checkout = self.checkout.lock().await;
        self.publish(&mut fix, &branch).await;
        self.audit.log(
            "fix_released",
            ACTOR,
            json!({ "fix_id": fix.id, "review_id": review.id, "pull_request": fix.pull_request_url }),
        );
        Ok(fix)
    }

    /// `{workspace}/{service}/src/main/java` or the same with dashes removed,
    /// walked for `{Class}.java`.
    pub fn locate_source(&self, service: &str, class_name: &str) -> MonitorResult<SourceLocation> {
        let file_name = format!("{class_name}.java");
        let compact = service.replace('-', "");
        let mut modules = vec![service.to_string()];
        if compact != service {
            modules.push(compact);
        }

        for module in modules {
            let root = self.workspace.join(&module).join("src").join("main").join("java");
            if !root.is_dir() {
                continue;
            }
            if let Some(path) = find_file(&root, &file_name) {
                return Ok(SourceLocation { path, module });
            }
        }
        Err(MonitorError::FixAnalysis(format!(
            "source file {file_name} not found for {service}"
        )))
    }

    fn fail(&self, fix: &mut AutomatedFix, cause: &MonitorError) {
        let reason = match cause {
            MonitorError::FixAnalysis(r) | MonitorError::TestExecution(r) => r.clone(),
            other => other.to_string(),
        };
        if let Err(e) = fix.mark_failed(&reason) {
            error!(fix_id = %fix.id, error = %e, "Could not mark fix failed");
            return;
        }
        metrics::counter!("remediation.failed").increment(1);
        error!(
            fix_id = %fix.id,
            pattern_id = %fix.error_pattern_id,
            category = cause.category(),
            reason = %reason,
            "Automated fix failed"
        );
        self.record(fix, "fix_failed", Severity::High, "Automated fix failed");
    }

    fn save(&self, fix: &AutomatedFix) {
        if let Err(e) = self.fixes.save(fix) {
            error!(fix_id = %fix.id, error = %e, "Failed to persist fix");
        }
    }

    /// Persist, audit and broadcast one transition.
    fn record(&self, fix: &AutomatedFix, event_type: &str, severity: Severity, title: &str) {
        self.save(fix);
        self.audit.log(
            event_type,
            ACTOR,
            json!({
                "fix_id": fix.id,
                "pattern_id": fix.error_pattern_id,
                "status": fix.status,
                "branch": fix.branch_name,
                "commit": fix.commit_id,
                "reason": fix.failure_reason,
            }),
        );
        let message = match &fix.failure_reason {
            Some(reason) => format!("{} ({}): {}", fix.description, fix.status, reason),
            None => format!("{} ({})", fix.description, fix.status),
        };
        self.alerts.publish(
            Alert::new(AlertChannel::Fixes, severity, title, message)
                .for_service(&fix.service_name)
                .with_data(json!({ "fix_id": fix.id, "status": fix.status })),
        );
    }
}

fn find_file(root: &Path, file_name: &str) -> Option<PathBuf> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .find(|entry| entry.file_type().is_file() && entry.file_name() == file_name)
        .map(|entry| entry.into_path())
}

fn commit_message(fix: &AutomatedFix) -> String {
    format!(
        "Automated fix: {}\n\nService: {}\nFix type: {}\nPattern id: {}\nFix id: {}",
        fix.description, fix.service_name, fix.fix_type, fix.error_pattern_id, fix.id
    )
}
