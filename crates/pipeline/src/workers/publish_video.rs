use std::sync::Arc;

use reelsmith_core::{
    EnrichedEvent, EventBus, Worker,
    events::expect,
    queues::QueueKind,
    workers::{InputSpec, SubscriptionSpec},
};

use crate::{
    stages::Publisher,
    types::Stage,
    workers::{
        STAGE_QUEUE_CAPACITY, enter_stage,
        events::{JobCompleted, VideoRendered},
    },
};

pub struct PublishVideoWorker {
    publisher: Publisher,
}

impl PublishVideoWorker {
    pub fn new(publisher: Publisher) -> Self {
        Self { publisher }
    }
}

impl Worker for PublishVideoWorker {
    const SUBSCRIBER_ID: &'static str = "stage.publish";

    fn subscription() -> SubscriptionSpec {
        SubscriptionSpec {
            subscriber_id: Self::SUBSCRIBER_ID,
            inputs: vec![InputSpec {
                event_type: VideoRendered::EVENT_TYPE,
                queue_kind: QueueKind::FifoDropOldest {
                    capacity: STAGE_QUEUE_CAPACITY,
                },
            }],
        }
    }

    async fn handle(&mut self, event: Arc<EnrichedEvent>, bus: &EventBus) -> anyhow::Result<()> {
        let req = expect::<VideoRendered>(&event.event, VideoRendered::EVENT_TYPE)?;
        let job = &req.job;
        if !enter_stage(job, Stage::Publish, req.header.event_id, bus) {
            return Ok(());
        }

        let remote_id = self
            .publisher
            .publish(&req.video, &job.request.topic, &req.script)
            .await?;

        bus.publish(Arc::new(JobCompleted::new(
            req.header.event_id,
            job.clone(),
            req.video.clone(),
            Some(remote_id),
        )));
        Ok(())
    }
}
