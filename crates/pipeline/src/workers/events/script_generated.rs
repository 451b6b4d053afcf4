use crate::{
    types::Script,
    workers::{JobContext, events::EventHeader},
};

#[derive(Clone, serde::Serialize)]
pub struct ScriptGenerated {
    pub header: EventHeader,
    pub job: JobContext,
    pub script: Script,
}

impl ScriptGenerated {
    pub fn new(parent_event_id: uuid::Uuid, job: JobContext, script: Script) -> Self {
        Self {
            header: EventHeader::child_of(parent_event_id),
            job,
            script,
        }
    }
}

job_event!(ScriptGenerated, "script.generated");
