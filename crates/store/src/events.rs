use chrono::{DateTime, Utc};
use dashmap::DashMap;
use healwatch_core::error::{MonitorError, MonitorResult};
use healwatch_core::types::{EventSource, MonitoringEvent};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashSet};

/// Collection of monitoring, correlation and summary events, indexed by
/// timestamp, source, correlation id and trace id.
pub trait EventStore: Send + Sync {
    /// Insert a new event. Fails if the id is already present.
    fn insert(&self, event: &MonitoringEvent) -> MonitorResult<()>;

    /// Insert or replace by id. Returns `true` when the id was new.
    fn upsert(&self, event: &MonitoringEvent) -> MonitorResult<bool>;

    fn get(&self, id: &str) -> MonitorResult<Option<MonitoringEvent>>;

    /// Events with `timestamp >= since`, oldest first.
    fn since(&self, since: DateTime<Utc>) -> MonitorResult<Vec<MonitoringEvent>>;

    fn by_source_since(
        &self,
        source: EventSource,
        since: DateTime<Utc>,
    ) -> MonitorResult<Vec<MonitoringEvent>> {
        Ok(self
            .since(since)?
            .into_iter()
            .filter(|e| e.source == source)
            .collect())
    }

    fn by_correlation_id(&self, correlation_id: &str) -> MonitorResult<Vec<MonitoringEvent>>;

    fn by_trace_id(&self, trace_id: &str) -> MonitorResult<Vec<MonitoringEvent>>;

    /// Events of one service within `[from, to]`, oldest first.
    fn by_service(
        &self,
        service: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> MonitorResult<Vec<MonitoringEvent>> {
        Ok(self
            .since(from)?
            .into_iter()
            .filter(|e| e.service_name == service && e.timestamp <= to)
            .collect())
    }

    /// Rewrite the correlation fields of one event. `trace_id` is only set
    /// when the event has none.
    fn set_correlation(
        &self,
        event_id: &str,
        correlation_id: &str,
        trace_id: Option<&str>,
    ) -> MonitorResult<()>;

    fn mark_auto_fixed(
        &self,
        event_id: &str,
        commit_id: &str,
        resolution: &str,
    ) -> MonitorResult<MonitoringEvent>;

    fn count(&self) -> usize;
}

#[derive(Default)]
pub struct InMemoryEventStore {
    events: DashMap<String, MonitoringEvent>,
    by_time: RwLock<BTreeSet<(DateTime<Utc>, String)>>,
    by_correlation: DashMap<String, HashSet<String>>,
    by_trace: DashMap<String, HashSet<String>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn index(&self, event: &MonitoringEvent) {
        self.by_time
            .write()
            .insert((event.timestamp, event.id.clone()));
        if let Some(cid) = &event.correlation_id {
            self.by_correlation
                .entry(cid.clone())
                .or_default()
                .insert(event.id.clone());
        }
        if let Some(tid) = &event.trace_id {
            self.by_trace
                .entry(tid.clone())
                .or_default()
                .insert(event.id.clone());
        }
    }

    fn unindex(&self, event: &MonitoringEvent) {
        self.by_time.write().remove(&(event.timestamp, event.id.clone()));
        if let Some(cid) = &event.correlation_id {
            if let Some(mut ids) = self.by_correlation.get_mut(cid) {
                ids.remove(&event.id);
            }
        }
        if let Some(tid) = &event.trace_id {
            if let Some(mut ids) = self.by_trace.get_mut(tid) {
                ids.remove(&event.id);
            }
        }
    }

    fn resolve(&self, ids: Vec<String>) -> Vec<MonitoringEvent> {
        let mut events: Vec<MonitoringEvent> = ids
            .iter()
            .filter_map(|id| self.events.get(id).map(|e| e.value().clone()))
            .collect();
        events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        events
    }
}

impl EventStore for InMemoryEventStore {
    fn insert(&self, event: &MonitoringEvent) -> MonitorResult<()> {
        if self.events.contains_key(&event.id) {
            return Err(MonitorError::Persistence(format!(
                "event {} already stored",
                event.id
            )));
        }
        self.events.insert(event.id.clone(), event.clone());
        self.index(event);
        Ok(())
    }

    fn upsert(&self, event: &MonitoringEvent) -> MonitorResult<bool> {
        let previous = self.events.insert(event.id.clone(), event.clone());
        if let Some(previous) = &previous {
            self.unindex(previous);
        }
        self.index(event);
        Ok(previous.is_none())
    }

    fn get(&self, id: &str) -> MonitorResult<Option<MonitoringEvent>> {
        Ok(self.events.get(id).map(|e| e.value().clone()))
    }

    fn since(&self, since: DateTime<Utc>) -> MonitorResult<Vec<MonitoringEvent>> {
        let ids: Vec<String> = self
            .by_time
            .read()
            .range((since, String::new())..)
            .map(|(_, id)| id.clone())
            .collect();
        Ok(ids
            .iter()
            .filter_map(|id| self.events.get(id).map(|e| e.value().clone()))
            .collect())
    }

    fn by_correlation_id(&self, correlation_id: &str) -> MonitorResult<Vec<MonitoringEvent>> {
        let ids: Vec<String> = self
            .by_correlation
            .get(correlation_id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();
        Ok(self.resolve(ids))
    }

    fn by_trace_id(&self, trace_id: &str) -> MonitorResult<Vec<MonitoringEvent>> {
        let ids: Vec<String> = self
            .by_trace
            .get(trace_id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();
        Ok(self.resolve(ids))
    }

    fn set_correlation(
        &self,
        event_id: &str,
        correlation_id: &str,
        trace_id: Option<&str>,
    ) -> MonitorResult<()> {
        let mut entry = self
            .events
            .get_mut(event_id)
            .ok_or_else(|| MonitorError::NotFound(format!("event {event_id}")))?;
        let previous = entry.value().clone();
        entry.correlation_id = Some(correlation_id.to_string());
        if entry.trace_id.is_none() {
            entry.trace_id = trace_id.map(str::to_string);
        }
        let updated = entry.value().clone();
        drop(entry);

        self.unindex(&previous);
        self.index(&updated);
        Ok(())
    }

    fn mark_auto_fixed(
        &self,
        event_id: &str,
        commit_id: &str,
        resolution: &str,
    ) -> MonitorResult<MonitoringEvent> {
        let mut entry = self
            .events
            .get_mut(event_id)
            .ok_or_else(|| MonitorError::NotFound(format!("event {event_id}")))?;
        entry.auto_fixed = true;
        entry.fix_commit_id = Some(commit_id.to_string());
        entry.resolution = Some(resolution.to_string());
        Ok(entry.value().clone())
    }

    fn count(&self) -> usize {
        self.events.len()
    }
}
