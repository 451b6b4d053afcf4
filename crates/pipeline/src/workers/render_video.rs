use std::sync::Arc;

use reelsmith_core::{
    EnrichedEvent, EventBus, Worker,
    events::expect,
    queues::QueueKind,
    workers::{InputSpec, SubscriptionSpec},
};

use crate::{
    stages::VideoAssembler,
    types::Stage,
    workers::{
        STAGE_QUEUE_CAPACITY, enter_stage,
        events::{CaptionsDerived, JobCompleted, VideoRendered},
    },
};

pub struct RenderVideoWorker {
    assembler: VideoAssembler,
}

impl RenderVideoWorker {
    pub fn new(assembler: VideoAssembler) -> Self {
        Self { assembler }
    }
}

impl Worker for RenderVideoWorker {
    const SUBSCRIBER_ID: &'static str = "stage.render";

    fn subscription() -> SubscriptionSpec {
        SubscriptionSpec {
            subscriber_id: Self::SUBSCRIBER_ID,
            inputs: vec![InputSpec {
                event_type: CaptionsDerived::EVENT_TYPE,
                queue_kind: QueueKind::FifoDropOldest {
                    capacity: STAGE_QUEUE_CAPACITY,
                },
            }],
        }
    }

    async fn handle(&mut self, event: Arc<EnrichedEvent>, bus: &EventBus) -> anyhow::Result<()> {
        let req = expect::<CaptionsDerived>(&event.event, CaptionsDerived::EVENT_TYPE)?;
        let job = &req.job;
        if !enter_stage(job, Stage::Render, req.header.event_id, bus) {
            return Ok(());
        }

        let video = self
            .assembler
            .assemble(
                &req.clips,
                &req.narration,
                Some(req.subtitles_path.as_path()),
                &job.ledger,
                &job.paths,
            )
            .await?;

        if job.request.publish {
            bus.publish(Arc::new(VideoRendered::new(
                req.header.event_id,
                job.clone(),
                req.script.clone(),
                video,
            )));
        } else {
            bus.publish(Arc::new(JobCompleted::new(
                req.header.event_id,
                job.clone(),
                video,
                None,
            )));
        }
        Ok(())
    }
}
