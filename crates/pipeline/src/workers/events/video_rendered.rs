use crate::{
    types::{RenderedVideo, Script},
    workers::{JobContext, events::EventHeader},
};

/// Emitted only for jobs that publish; consumed by the publish stage.
#[derive(Clone, serde::Serialize)]
pub struct VideoRendered {
    pub header: EventHeader,
    pub job: JobContext,
    pub script: Script,
    pub video: RenderedVideo,
}

impl VideoRendered {
    pub fn new(parent_event_id: uuid::Uuid, job: JobContext, script: Script, video: RenderedVideo) -> Self {
        Self {
            header: EventHeader::child_of(parent_event_id),
            job,
            script,
            video,
        }
    }
}

job_event!(VideoRendered, "video.rendered");
