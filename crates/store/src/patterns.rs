use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use healwatch_core::error::{MonitorError, MonitorResult};
use healwatch_core::types::ErrorPattern;

/// Collection of error patterns with a unique index on `signature`.
pub trait PatternStore: Send + Sync {
    fn get(&self, id: &str) -> MonitorResult<Option<ErrorPattern>>;

    fn find_by_signature(&self, signature: &str) -> MonitorResult<Option<ErrorPattern>>;

    /// Insert a new pattern. Returns `false` without writing when the
    /// signature is already indexed.
    fn insert_if_absent(&self, pattern: ErrorPattern) -> MonitorResult<bool>;

    /// Apply `mutate` to the stored pattern atomically and return the result.
    fn update(
        &self,
        id: &str,
        mutate: &mut dyn FnMut(&mut ErrorPattern),
    ) -> MonitorResult<ErrorPattern>;

    fn list(&self) -> MonitorResult<Vec<ErrorPattern>>;

    fn count(&self) -> usize;
}

#[derive(Default)]
pub struct InMemoryPatternStore {
    patterns: DashMap<String, ErrorPattern>,
    by_signature: DashMap<String, String>,
}

impl InMemoryPatternStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PatternStore for InMemoryPatternStore {
    fn get(&self, id: &str) -> MonitorResult<Option<ErrorPattern>> {
        Ok(self.patterns.get(id).map(|p| p.value().clone()))
    }

    fn find_by_signature(&self, signature: &str) -> MonitorResult<Option<ErrorPattern>> {
        let Some(id) = self.by_signature.get(signature).map(|id| id.value().clone()) else {
            return Ok(None);
        };
        self.get(&id)
    }

    fn insert_if_absent(&self, pattern: ErrorPattern) -> MonitorResult<bool> {
        match self.by_signature.entry(pattern.signature.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(pattern.id.clone());
                self.patterns.insert(pattern.id.clone(), pattern);
                Ok(true)
            }
        }
    }

    fn update(
        &self,
        id: &str,
        mutate: &mut dyn FnMut(&mut ErrorPattern),
    ) -> MonitorResult<ErrorPattern> {
        let mut entry = self
            .patterns
            .get_mut(id)
            .ok_or_else(|| MonitorError::NotFound(format!("pattern {id}")))?;
        let signature = entry.signature.clone();
        mutate(entry.value_mut());
        if entry.signature != signature {
            entry.signature = signature;
            return Err(MonitorError::Persistence(format!(
                "pattern {id}: signature is immutable"
            )));
        }
        Ok(entry.value().clone())
    }

    fn list(&self) -> MonitorResult<Vec<ErrorPattern>> {
        let mut patterns: Vec<ErrorPattern> =
            self.patterns.iter().map(|p| p.value().clone()).collect();
        patterns.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(patterns)
    }

    fn count(&self) -> usize {
        self.patterns.len()
    }
}
