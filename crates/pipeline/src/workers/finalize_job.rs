use std::sync::Arc;

use reelsmith_core::{
    EnrichedEvent, EventBus, StageFailed, Worker,
    events::downcast_ref,
    queues::QueueKind,
    workers::{InputSpec, SubscriptionSpec},
};
use tokio::fs;
use tracing::{debug, error, info, warn};

use crate::{
    artifacts::format_file_size,
    config::PipelineConfig,
    error::{ErrorKind, PipelineError},
    types::{JobOutput, JobStatus, Stage},
    workers::{
        ActiveSlot, JobContext, stage_for,
        events::{JobCancelled, JobCompleted, job_of},
    },
};

/// Ends every job: cleanup, then the slot, then the terminal status, so that
/// whoever observes the status also sees the files gone and the slot free.
pub struct JobFinalizer {
    slot: ActiveSlot,
    config: Arc<PipelineConfig>,
}

impl JobFinalizer {
    pub fn new(slot: ActiveSlot, config: Arc<PipelineConfig>) -> Self {
        Self { slot, config }
    }

    async fn finish(&self, job: &JobContext, status: JobStatus) {
        // An abandoned stage may still report after the job was ended; only
        // sweep whatever it wrote since.
        if job.is_finished() {
            let report = job.ledger.cleanup().await;
            debug!(job_id = %job.id, ?status, removed = report.removed, "job already finished, swept late artifacts");
            return;
        }
        let report = job.ledger.cleanup().await;
        if !report.failed.is_empty() {
            warn!(job_id = %job.id, failed = report.failed.len(), "some artifacts could not be removed");
        }
        self.slot.release(job.id);
        info!(job_id = %job.id, ?status, "job finished");
        job.set_status(status);
    }

    async fn completed(&self, done: &JobCompleted) {
        let job = &done.job;

        // The last stage already ran; a cancel raised meanwhile is too late.
        if job.is_cancelled() {
            info!(job_id = %job.id, remote_id = ?done.remote_id, "cancel arrived after the final stage, keeping the result");
        }

        let file_size = fs::metadata(&done.video.path)
            .await
            .ok()
            .map(|m| format_file_size(m.len()));
        let keep = done.remote_id.is_none() || self.config.retain_published_video;
        if keep && !job.is_finished() {
            job.ledger.release(&done.video.path);
        }

        let output = JobOutput {
            video_path: keep.then(|| done.video.path.clone()),
            duration: done.video.duration,
            dimensions: done.video.dimensions,
            file_size,
            remote_id: done.remote_id.clone(),
        };
        self.finish(job, JobStatus::Succeeded(output)).await;
    }

    async fn failed(&self, failed: &StageFailed) {
        let Some(job) = job_of(&failed.parent) else {
            error!(stage = failed.stage, error = %failed.message, "failure outside any job");
            return;
        };

        let stage = stage_for(failed.stage).unwrap_or(Stage::Script);
        let (kind, cause) = match failed.cause::<PipelineError>() {
            Some(e) => (e.kind(), e.to_string()),
            None => (ErrorKind::Internal, failed.message.clone()),
        };
        warn!(job_id = %job.id, stage = %stage, ?kind, cause = %cause, "stage failed");
        self.finish(job, JobStatus::Failed { stage, kind, cause }).await;
    }
}

impl Worker for JobFinalizer {
    const SUBSCRIBER_ID: &'static str = "job.finalizer";

    fn subscription() -> SubscriptionSpec {
        SubscriptionSpec {
            subscriber_id: Self::SUBSCRIBER_ID,
            inputs: vec![
                InputSpec {
                    event_type: JobCompleted::EVENT_TYPE,
                    queue_kind: QueueKind::Isolated { output_buffer: 16 },
                },
                InputSpec {
                    event_type: JobCancelled::EVENT_TYPE,
                    queue_kind: QueueKind::Isolated { output_buffer: 16 },
                },
                InputSpec {
                    event_type: StageFailed::EVENT_TYPE,
                    queue_kind: QueueKind::Isolated { output_buffer: 16 },
                },
            ],
        }
    }

    /// Never fails: a failure here would loop back as another `StageFailed`.
    async fn handle(&mut self, event: Arc<EnrichedEvent>, _bus: &EventBus) -> anyhow::Result<()> {
        if let Some(done) = downcast_ref::<JobCompleted>(&event.event) {
            self.completed(done).await;
        } else if let Some(cancelled) = downcast_ref::<JobCancelled>(&event.event) {
            self.finish(&cancelled.job, JobStatus::Cancelled { stage: cancelled.stage })
                .await;
        } else if let Some(failed) = downcast_ref::<StageFailed>(&event.event) {
            self.failed(failed).await;
        }
        Ok(())
    }
}
