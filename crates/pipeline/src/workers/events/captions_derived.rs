use std::path::PathBuf;

use crate::{
    types::{CaptionSegment, Clip, NarrationTrack, Script},
    workers::{JobContext, events::EventHeader},
};

#[derive(Clone, serde::Serialize)]
pub struct CaptionsDerived {
    pub header: EventHeader,
    pub job: JobContext,
    pub script: Script,
    pub clips: Vec<Clip>,
    pub narration: NarrationTrack,
    pub captions: Vec<CaptionSegment>,
    pub subtitles_path: PathBuf,
}

impl CaptionsDerived {
    pub fn new(
        parent: &super::NarrationSynthesized,
        captions: Vec<CaptionSegment>,
        subtitles_path: PathBuf,
    ) -> Self {
        Self {
            header: EventHeader::child_of(parent.header.event_id),
            job: parent.job.clone(),
            script: parent.script.clone(),
            clips: parent.clips.clone(),
            narration: parent.narration.clone(),
            captions,
            subtitles_path,
        }
    }
}

job_event!(CaptionsDerived, "captions.derived");
