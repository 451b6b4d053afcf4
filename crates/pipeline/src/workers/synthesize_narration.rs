use std::sync::Arc;

use reelsmith_core::{
    EnrichedEvent, EventBus, Worker,
    events::expect,
    queues::QueueKind,
    workers::{InputSpec, SubscriptionSpec},
};

use crate::{
    stages::NarrationSynthesizer,
    types::Stage,
    workers::{
        STAGE_QUEUE_CAPACITY, enter_stage,
        events::{FootageLocated, NarrationSynthesized},
    },
};

pub struct SynthesizeNarrationWorker {
    synthesizer: NarrationSynthesizer,
}

impl SynthesizeNarrationWorker {
    pub fn new(synthesizer: NarrationSynthesizer) -> Self {
        Self { synthesizer }
    }
}

impl Worker for SynthesizeNarrationWorker {
    const SUBSCRIBER_ID: &'static str = "stage.narration";

    fn subscription() -> SubscriptionSpec {
        SubscriptionSpec {
            subscriber_id: Self::SUBSCRIBER_ID,
            inputs: vec![InputSpec {
                event_type: FootageLocated::EVENT_TYPE,
                queue_kind: QueueKind::FifoDropOldest {
                    capacity: STAGE_QUEUE_CAPACITY,
                },
            }],
        }
    }

    async fn handle(&mut self, event: Arc<EnrichedEvent>, bus: &EventBus) -> anyhow::Result<()> {
        let req = expect::<FootageLocated>(&event.event, FootageLocated::EVENT_TYPE)?;
        let job = &req.job;
        if !enter_stage(job, Stage::Narration, req.header.event_id, bus) {
            return Ok(());
        }

        let narration = self
            .synthesizer
            .synthesize(&req.script.narration, job.request.voice, &job.ledger, &job.paths)
            .await?;

        bus.publish(Arc::new(NarrationSynthesized::new(
            req.header.event_id,
            job.clone(),
            req.script.clone(),
            req.clips.clone(),
            narration,
        )));
        Ok(())
    }
}
