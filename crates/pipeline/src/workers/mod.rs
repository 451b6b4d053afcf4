//! Bus workers: one per stage, plus the finalizer that ends every job.

use std::sync::Arc;

use reelsmith_core::{EventBus, Worker};
use tracing::info;
use uuid::Uuid;

use crate::types::Stage;

pub mod derive_captions;
pub mod events;
pub mod finalize_job;
pub mod generate_script;
pub mod job;
pub mod locate_footage;
pub mod publish_video;
pub mod render_video;
pub mod synthesize_narration;

pub use derive_captions::DeriveCaptionsWorker;
pub use finalize_job::JobFinalizer;
pub use generate_script::GenerateScriptWorker;
pub use job::{ActiveSlot, JobContext};
pub use locate_footage::LocateFootageWorker;
pub use publish_video::PublishVideoWorker;
pub use render_video::RenderVideoWorker;
pub use synthesize_narration::SynthesizeNarrationWorker;

use events::JobCancelled;

/// Queue depth for stage inputs; one job is in flight at a time.
pub(crate) const STAGE_QUEUE_CAPACITY: usize = 4;

pub fn subscriber_for(stage: Stage) -> &'static str {
    match stage {
        Stage::Script => GenerateScriptWorker::SUBSCRIBER_ID,
        Stage::Footage => LocateFootageWorker::SUBSCRIBER_ID,
        Stage::Narration => SynthesizeNarrationWorker::SUBSCRIBER_ID,
        Stage::Subtitles => DeriveCaptionsWorker::SUBSCRIBER_ID,
        Stage::Render => RenderVideoWorker::SUBSCRIBER_ID,
        Stage::Publish => PublishVideoWorker::SUBSCRIBER_ID,
    }
}

pub fn stage_for(subscriber_id: &str) -> Option<Stage> {
    Stage::ALL
        .into_iter()
        .find(|stage| subscriber_for(*stage) == subscriber_id)
}

/// The stage-boundary check. Returns false, after announcing the
/// cancellation, if the job was cancelled before `stage` could begin.
pub(crate) fn enter_stage(job: &JobContext, stage: Stage, parent_event_id: Uuid, bus: &EventBus) -> bool {
    if job.is_cancelled() {
        info!(job_id = %job.id, stage = %stage, "cancelled before stage");
        bus.publish(Arc::new(JobCancelled::new(parent_event_id, job.clone(), stage)));
        return false;
    }
    info!(job_id = %job.id, stage = %stage, step = stage.ordinal(), "{}", stage.label());
    job.mark_running(stage);
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribers_map_back_to_stages() {
        for stage in Stage::ALL {
            assert_eq!(stage_for(subscriber_for(stage)), Some(stage));
        }
        assert_eq!(stage_for(JobFinalizer::SUBSCRIBER_ID), None);
    }
}
