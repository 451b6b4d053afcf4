use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};

use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;

use crate::{
    artifacts::{ArtifactLedger, JobPaths},
    types::{GenerationRequest, JobId, JobStatus, Stage},
};

/// The state shared by everything working on one job. Travels inside every
/// domain event; only the id and request are serialized.
#[derive(Clone, Serialize)]
pub struct JobContext {
    pub id: JobId,
    pub request: GenerationRequest,
    #[serde(skip)]
    pub paths: JobPaths,
    #[serde(skip)]
    pub ledger: ArtifactLedger,
    #[serde(skip)]
    cancel: Arc<AtomicBool>,
    #[serde(skip)]
    status: Arc<watch::Sender<JobStatus>>,
}

impl JobContext {
    pub fn new(
        id: JobId,
        request: GenerationRequest,
        paths: JobPaths,
        cancel: Arc<AtomicBool>,
        status: Arc<watch::Sender<JobStatus>>,
    ) -> Self {
        let ledger = ArtifactLedger::new();
        ledger.track_dir(&paths.dir);
        Self {
            id,
            request,
            paths,
            ledger,
            cancel,
            status,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn status(&self) -> JobStatus {
        self.status.borrow().clone()
    }

    /// Whether a terminal status has already been recorded.
    pub fn is_finished(&self) -> bool {
        self.status.borrow().is_terminal()
    }

    pub fn set_status(&self, status: JobStatus) {
        debug!(job_id = %self.id, ?status, "status");
        self.status.send_replace(status);
    }

    pub fn mark_running(&self, stage: Stage) {
        self.set_status(JobStatus::Running { stage });
    }
}

/// The single-job slot: holds the id of the job in flight, if any.
#[derive(Clone, Default)]
pub struct ActiveSlot {
    inner: Arc<Mutex<Option<JobId>>>,
}

impl ActiveSlot {
    fn lock(&self) -> std::sync::MutexGuard<'_, Option<JobId>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn current(&self) -> Option<JobId> {
        *self.lock()
    }

    /// Claim the slot for `id`, or report the job that holds it.
    pub fn claim(&self, id: JobId) -> Result<(), JobId> {
        let mut slot = self.lock();
        match *slot {
            Some(active) => Err(active),
            None => {
                *slot = Some(id);
                Ok(())
            }
        }
    }

    /// Free the slot if `id` holds it.
    pub fn release(&self, id: JobId) {
        let mut slot = self.lock();
        if *slot == Some(id) {
            *slot = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_admits_one_job_at_a_time() {
        let slot = ActiveSlot::default();
        let first = JobId::new();
        let second = JobId::new();

        assert!(slot.claim(first).is_ok());
        assert_eq!(slot.claim(second), Err(first));

        slot.release(second);
        assert_eq!(slot.current(), Some(first));

        slot.release(first);
        assert!(slot.claim(second).is_ok());
    }
}
