use crate::{
    types::{Clip, NarrationTrack, Script},
    workers::{JobContext, events::EventHeader},
};

#[derive(Clone, serde::Serialize)]
pub struct NarrationSynthesized {
    pub header: EventHeader,
    pub job: JobContext,
    pub script: Script,
    pub clips: Vec<Clip>,
    pub narration: NarrationTrack,
}

impl NarrationSynthesized {
    pub fn new(
        parent_event_id: uuid::Uuid,
        job: JobContext,
        script: Script,
        clips: Vec<Clip>,
        narration: NarrationTrack,
    ) -> Self {
        Self {
            header: EventHeader::child_of(parent_event_id),
            job,
            script,
            clips,
            narration,
        }
    }
}

job_event!(NarrationSynthesized, "narration.synthesized");
