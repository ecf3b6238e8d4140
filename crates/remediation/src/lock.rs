use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Keyed try-lock: at most one holder per pattern id.
#[derive(Default)]
pub struct PatternLocks {
    held: DashMap<String, ()>,
}

/// Releases the pattern lock when dropped.
pub struct PatternLockGuard<'a> {
    locks: &'a PatternLocks,
    key: String,
}

impl PatternLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` if another holder has the lock.
    pub fn try_acquire(&self, pattern_id: &str) -> Option<PatternLockGuard<'_>> {
        match self.held.entry(pattern_id.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(());
                Some(PatternLockGuard {
                    locks: self,
                    key: pattern_id.to_string(),
                })
            }
        }
    }

    pub fn is_held(&self, pattern_id: &str) -> bool {
        self.held.contains_key(pattern_id)
    }

    pub fn held_count(&self) -> usize {
        self.held.len()
    }
}

impl Drop for PatternLockGuard<'_> {
    fn drop(&mut self) {
        self.locks.held.remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_holder_per_key() {
        let locks = PatternLocks::new();
        let guard = locks.try_acquire("p1").unwrap();
        assert!(locks.try_acquire("p1").is_none());
        assert!(locks.try_acquire("p2").is_some());
        assert!(locks.is_held("p1"));
        drop(guard);
        assert!(!locks.is_held("p1"));
        assert!(locks.try_acquire("p1").is_some());
    }
}
