use crate::{
    types::{Clip, Script},
    workers::{JobContext, events::EventHeader},
};

#[derive(Clone, serde::Serialize)]
pub struct FootageLocated {
    pub header: EventHeader,
    pub job: JobContext,
    pub script: Script,
    pub clips: Vec<Clip>,
}

impl FootageLocated {
    pub fn new(parent_event_id: uuid::Uuid, job: JobContext, script: Script, clips: Vec<Clip>) -> Self {
        Self {
            header: EventHeader::child_of(parent_event_id),
            job,
            script,
            clips,
        }
    }
}

job_event!(FootageLocated, "footage.located");
