use crate::{
    types::RenderedVideo,
    workers::{JobContext, events::EventHeader},
};

#[derive(Clone, serde::Serialize)]
pub struct JobCompleted {
    pub header: EventHeader,
    pub job: JobContext,
    pub video: RenderedVideo,
    pub remote_id: Option<String>,
}

impl JobCompleted {
    pub fn new(
        parent_event_id: uuid::Uuid,
        job: JobContext,
        video: RenderedVideo,
        remote_id: Option<String>,
    ) -> Self {
        Self {
            header: EventHeader::child_of(parent_event_id),
            job,
            video,
            remote_id,
        }
    }
}

job_event!(JobCompleted, "job.completed");
