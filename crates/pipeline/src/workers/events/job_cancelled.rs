use crate::{
    types::Stage,
    workers::{JobContext, events::EventHeader},
};

/// A stage found the cancel flag set and did not begin, or the controller
/// abandoned the stage in flight.
#[derive(Clone, serde::Serialize)]
pub struct JobCancelled {
    pub header: EventHeader,
    pub job: JobContext,
    pub stage: Stage,
}

impl JobCancelled {
    pub fn new(parent_event_id: uuid::Uuid, job: JobContext, stage: Stage) -> Self {
        Self {
            header: EventHeader::child_of(parent_event_id),
            job,
            stage,
        }
    }

    /// Raised by the controller rather than a stage, e.g. at shutdown.
    pub fn abandoned(job: JobContext, stage: Stage) -> Self {
        Self {
            header: EventHeader::root(),
            job,
            stage,
        }
    }
}

job_event!(JobCancelled, "job.cancelled");
