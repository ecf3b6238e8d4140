use dashmap::DashMap;
use healwatch_core::error::{MonitorError, MonitorResult};
use healwatch_core::types::{AutomatedFix, FixStatus};
use std::collections::BTreeSet;

/// Collection of fix records indexed by `error_pattern_id` and `status`.
pub trait FixStore: Send + Sync {
    fn get(&self, id: &str) -> MonitorResult<Option<AutomatedFix>>;

    /// Insert or replace a fix record, keeping both indexes current.
    fn save(&self, fix: &AutomatedFix) -> MonitorResult<()>;

    /// Fixes for one pattern, oldest first.
    fn by_pattern(&self, pattern_id: &str) -> MonitorResult<Vec<AutomatedFix>>;

    fn by_status(&self, status: FixStatus) -> MonitorResult<Vec<AutomatedFix>>;

    fn latest_for_pattern(&self, pattern_id: &str) -> MonitorResult<Option<AutomatedFix>> {
        Ok(self.by_pattern(pattern_id)?.into_iter().last())
    }

    fn list(&self) -> MonitorResult<Vec<AutomatedFix>>;
}

#[derive(Default)]
pub struct InMemoryFixStore {
    fixes: DashMap<String, AutomatedFix>,
    by_pattern: DashMap<String, BTreeSet<String>>,
    by_status: DashMap<FixStatus, BTreeSet<String>>,
}

impl InMemoryFixStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn collect(&self, ids: impl IntoIterator<Item = String>) -> Vec<AutomatedFix> {
        let mut fixes: Vec<AutomatedFix> = ids
            .into_iter()
            .filter_map(|id| self.fixes.get(&id).map(|f| f.value().clone()))
            .collect();
        fixes.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        fixes
    }
}

impl FixStore for InMemoryFixStore {
    fn get(&self, id: &str) -> MonitorResult<Option<AutomatedFix>> {
        Ok(self.fixes.get(id).map(|f| f.value().clone()))
    }

    fn save(&self, fix: &AutomatedFix) -> MonitorResult<()> {
        if fix.error_pattern_id.is_empty() {
            return Err(MonitorError::Persistence(format!(
                "fix {} has no error pattern id",
                fix.id
            )));
        }
        if let Some(previous) = self.fixes.insert(fix.id.clone(), fix.clone()) {
            if previous.status != fix.status {
                if let Some(mut ids) = self.by_status.get_mut(&previous.status) {
                    ids.remove(&fix.id);
                }
            }
        }
        self.by_pattern
            .entry(fix.error_pattern_id.clone())
            .or_default()
            .insert(fix.id.clone());
        self.by_status
            .entry(fix.status)
            .or_default()
            .insert(fix.id.clone());
        Ok(())
    }

    fn by_pattern(&self, pattern_id: &str) -> MonitorResult<Vec<AutomatedFix>> {
        let ids: Vec<String> = self
            .by_pattern
            .get(pattern_id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();
        Ok(self.collect(ids))
    }

    fn by_status(&self, status: FixStatus) -> MonitorResult<Vec<AutomatedFix>> {
        let ids: Vec<String> = self
            .by_status
            .get(&status)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();
        Ok(self.collect(ids))
    }

    fn list(&self) -> MonitorResult<Vec<AutomatedFix>> {
        let ids: Vec<String> = self.fixes.iter().map(|f| f.key().clone()).collect();
        Ok(self.collect(ids))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_index_follows_transitions() {
        let store = InMemoryFixStore::new();
        let mut fix = AutomatedFix::new("p1", "svc", "null_check");
        store.save(&fix).unwrap();
        assert_eq!(store.by_status(FixStatus::Pending).unwrap().len(), 1);

        fix.mark_applied("c1", "automated-fix/null_check-1").unwrap();
        store.save(&fix).unwrap();
        assert!(store.by_status(FixStatus::Pending).unwrap().is_empty());
        assert_eq!(store.by_status(FixStatus::Applied).unwrap().len(), 1);
    }

    #[test]
    fn test_by_pattern_and_latest() {
        let store = InMemoryFixStore::new();
        let mut first = AutomatedFix::new("p1", "svc", "null_check");
        first.mark_failed("no source").unwrap();
        store.save(&first).unwrap();
        let mut second = AutomatedFix::new("p1", "svc", "null_check");
        second.created_at = first.created_at + chrono::Duration::seconds(5);
        store.save(&second).unwrap();
        store.save(&AutomatedFix::new("p2", "svc", "retry_backoff")).unwrap();

        assert_eq!(store.by_pattern("p1").unwrap().len(), 2);
        assert_eq!(store.latest_for_pattern("p1").unwrap().unwrap().id, second.id);
        assert!(store.latest_for_pattern("p3").unwrap().is_none());
        assert_eq!(store.list().unwrap().len(), 3);
    }

    #[test]
    fn test_save_requires_pattern_id() {
        let store = InMemoryFixStore::new();
        let fix = AutomatedFix::new("", "svc", "null_check");
        assert!(matches!(store.save(&fix), Err(MonitorError::Persistence(_))));
    }
}
