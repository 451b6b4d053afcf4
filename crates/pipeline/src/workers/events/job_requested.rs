use crate::workers::{JobContext, events::EventHeader};

/// Entry point of a job; consumed by the script stage.
#[derive(Clone, serde::Serialize)]
pub struct JobRequested {
    pub header: EventHeader,
    pub job: JobContext,
}

impl JobRequested {
    pub fn new(job: JobContext) -> Self {
        Self {
            header: EventHeader::root(),
            job,
        }
    }
}

job_event!(JobRequested, "job.requested");
