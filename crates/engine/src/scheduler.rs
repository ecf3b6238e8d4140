//! Fixed-rate periodic tasks with start, stop and trigger-now.
//!
//! Each task has a busy flag: a tick or manual trigger arriving while the
//! task is still running is skipped rather than queued.

use async_trait::async_trait;
use healwatch_core::error::{MonitorError, MonitorResult};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

#[async_trait]
pub trait ScheduledTask: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self) -> MonitorResult<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    Completed,
    /// The task was already running.
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskStatus {
    pub name: &'static str,
    pub interval_secs: u64,
    pub running: bool,
    pub runs: u64,
    pub failures: u64,
}

/// Clears the busy flag however the run ends.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

struct Entry {
    task: Arc<dyn ScheduledTask>,
    interval: Duration,
    busy: AtomicBool,
    runs: AtomicU64,
    failures: AtomicU64,
}

impl Entry {
    async fn run_once(&self) -> TriggerOutcome {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(task = self.task.name(), "Task still running; skipping");
            return TriggerOutcome::Skipped;
        }
        let _busy = BusyGuard(&self.busy);
        let result = self.task.run().await;
        self.runs.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = result {
            self.failures.fetch_add(1, Ordering::SeqCst);
            metrics::counter!("scheduler.task_failed").increment(1);
            error!(task = self.task.name(), error = %e, "Scheduled task failed");
        }
        TriggerOutcome::Completed
    }
}

#[derive(Default)]
pub struct Scheduler {
    entries: Vec<Arc<Entry>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register before `start`; tasks added later are only reachable through
    /// `trigger_now`.
    pub fn register(&mut self, interval: Duration, task: Arc<dyn ScheduledTask>) {
        self.entries.push(Arc::new(Entry {
            task,
            interval: interval.max(Duration::from_millis(1)),
            busy: AtomicBool::new(false),
            runs: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }));
    }

    /// Spawn one timer loop per task. The first run happens one interval
    /// after start. Calling `start` on a running scheduler does nothing.
    pub fn start(&self) {
        let mut handles = self.handles.lock();
        if !handles.is_empty() {
            return;
        }
        for entry in &self.entries {
            let entry = entry.clone();
            handles.push(tokio::spawn(async move {
                let start = tokio::time::Instant::now() + entry.interval;
                let mut ticker = tokio::time::interval_at(start, entry.interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    ticker.tick().await;
                    let entry = entry.clone();
                    // detached; the busy flag skips ticks that overlap a run
                    tokio::spawn(async move {
                        entry.run_once().await;
                    });
                }
            }));
        }
        info!(tasks = self.entries.len(), "Scheduler started");
    }

    pub fn stop(&self) {
        let handles: Vec<JoinHandle<()>> = self.handles.lock().drain(..).collect();
        if handles.is_empty() {
            return;
        }
        for handle in handles {
            handle.abort();
        }
        info!("Scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        !self.handles.lock().is_empty()
    }

    /// Run a task immediately and wait for it. The run is detached from the
    /// caller: dropping the returned future does not cancel it.
    pub async fn trigger_now(&self, name: &str) -> MonitorResult<TriggerOutcome> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.task.name() == name)
            .cloned()
            .ok_or_else(|| MonitorError::NotFound(format!("scheduled task {name}")))?;
        info!(task = name, "Task triggered manually");
        tokio::spawn(async move { entry.run_once().await })
            .await
            .map_err(|e| MonitorError::Internal(anyhow::anyhow!("task {name} did not finish: {e}")))
    }

    pub fn task_names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|e| e.task.name()).collect()
    }

    pub fn status(&self) -> Vec<TaskStatus> {
        self.entries
            .iter()
            .map(|e| TaskStatus {
                name: e.task.name(),
                interval_secs: e.interval.as_secs(),
                running: e.busy.load(Ordering::SeqCst),
                runs: e.runs.load(Ordering::SeqCst),
                failures: e.failures.load(Ordering::SeqCst),
            })
            .collect()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        for handle in self.handles.get_mut().drain(..) {
            handle.abort();
        }
    }
}
