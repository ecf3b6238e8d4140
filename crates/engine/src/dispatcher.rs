//! Bounded hand-off from ingestion to remediation workers.
//!
//! `request` never waits: a full queue rejects the pattern and the analyzer
//! clears its latch so a later match can try again.

use healwatch_core::config::RemediationConfig;
use healwatch_core::types::ErrorPattern;
use healwatch_patterns::RemediationTrigger;
use healwatch_remediation::{RemediationEngine, RemediationOutcome};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub struct RemediationDispatcher {
    sender: mpsc::Sender<ErrorPattern>,
    queued: Arc<AtomicUsize>,
    active: Arc<AtomicUsize>,
}

impl RemediationDispatcher {
    /// Start the worker loop on the current runtime.
    pub fn spawn(engine: Arc<RemediationEngine>, config: &RemediationConfig) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let queued = Arc::new(AtomicUsize::new(0));
        let active = Arc::new(AtomicUsize::new(0));
        let workers = Arc::new(Semaphore::new(config.workers.max(1)));

        let handle = tokio::spawn(run(
            receiver,
            engine,
            workers,
            queued.clone(),
            active.clone(),
        ));
        info!(
            workers = config.workers.max(1),
            capacity = config.queue_capacity.max(1),
            "Remediation dispatcher started"
        );
        (
            Self {
                sender,
                queued,
                active,
            },
            handle,
        )
    }

    pub fn queue_depth(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

impl RemediationTrigger for RemediationDispatcher {
    fn request(&self, pattern: &ErrorPattern) -> bool {
        // counted before sending so a fast worker never decrements first
        self.queued.fetch_add(1, Ordering::SeqCst);
        let sent = self.sender.try_send(pattern.clone());
        if sent.is_err() {
            self.queued.fetch_sub(1, Ordering::SeqCst);
        }
        match sent {
            Ok(()) => {
                metrics::counter!("remediation.queued").increment(1);
                true
            }
            Err(TrySendError::Full(_)) => {
                metrics::counter!("remediation.dropped").increment(1);
                warn!(pattern_id = %pattern.id, "Remediation queue full");
                false
            }
            Err(TrySendError::Closed(_)) => {
                error!(pattern_id = %pattern.id, "Remediation dispatcher is not running");
                false
            }
        }
    }
}

async fn run(
    mut receiver: mpsc::Receiver<ErrorPattern>,
    engine: Arc<RemediationEngine>,
    workers: Arc<Semaphore>,
    queued: Arc<AtomicUsize>,
    active: Arc<AtomicUsize>,
) {
    while let Some(pattern) = receiver.recv().await {
        let Ok(permit) = workers.clone().acquire_owned().await else {
            break;
        };
        queued.fetch_sub(1, Ordering::SeqCst);
        active.fetch_add(1, Ordering::SeqCst);

        let engine = engine.clone();
        let active = active.clone();
        tokio::spawn(async move {
            let _permit = permit;
            match engine.remediate(&pattern).await {
                Ok(RemediationOutcome::Completed(fix)) => {
                    metrics::counter!("remediation.completed").increment(1);
                    info!(
                        pattern_id = %pattern.id,
                        fix_id = %fix.id,
                        status = %fix.status,
                        "Remediation finished"
                    );
                }
                Ok(RemediationOutcome::NoAutomatedFix { error_type }) => {
                    warn!(pattern_id = %pattern.id, error_type = %error_type, "No automated fix available");
                }
                Ok(RemediationOutcome::AlreadyInFlight) => {
                    debug!(pattern_id = %pattern.id, "Remediation already in flight");
                }
                Err(e) => {
                    error!(pattern_id = %pattern.id, error = %e, "Remediation aborted");
                }
            }
            active.fetch_sub(1, Ordering::SeqCst);
        });
    }
    debug!("Remediation dispatcher stopped");
}

