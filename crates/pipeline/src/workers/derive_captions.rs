use std::sync::Arc;

use reelsmith_core::{
    EnrichedEvent, EventBus, Worker,
    events::expect,
    queues::QueueKind,
    workers::{InputSpec, SubscriptionSpec},
};

use crate::{
    stages::SubtitleDeriver,
    types::Stage,
    workers::{
        STAGE_QUEUE_CAPACITY, enter_stage,
        events::{CaptionsDerived, NarrationSynthesized},
    },
};

pub struct DeriveCaptionsWorker {
    deriver: SubtitleDeriver,
}

impl DeriveCaptionsWorker {
    pub fn new(deriver: SubtitleDeriver) -> Self {
        Self { deriver }
    }
}

impl Worker for DeriveCaptionsWorker {
    const SUBSCRIBER_ID: &'static str = "stage.subtitles";

    fn subscription() -> SubscriptionSpec {
        SubscriptionSpec {
            subscriber_id: Self::SUBSCRIBER_ID,
            inputs: vec![InputSpec {
                event_type: NarrationSynthesized::EVENT_TYPE,
                queue_kind: QueueKind::FifoDropOldest {
                    capacity: STAGE_QUEUE_CAPACITY,
                },
            }],
        }
    }

    async fn handle(&mut self, event: Arc<EnrichedEvent>, bus: &EventBus) -> anyhow::Result<()> {
        let req = expect::<NarrationSynthesized>(&event.event, NarrationSynthesized::EVENT_TYPE)?;
        let job = &req.job;
        if !enter_stage(job, Stage::Subtitles, req.header.event_id, bus) {
            return Ok(());
        }

        let (captions, subtitles_path) = self
            .deriver
            .derive(&req.script.narration, &req.narration, &job.ledger, &job.paths)
            .await?;

        bus.publish(Arc::new(CaptionsDerived::new(req, captions, subtitles_path)));
        Ok(())
    }
}
