use std::sync::Arc;

use reelsmith_core::{
    EnrichedEvent, EventBus, Worker,
    events::expect,
    queues::QueueKind,
    workers::{InputSpec, SubscriptionSpec},
};

use crate::{
    stages::ScriptGenerator,
    types::Stage,
    workers::{
        STAGE_QUEUE_CAPACITY, enter_stage,
        events::{JobRequested, ScriptGenerated},
    },
};

pub struct GenerateScriptWorker {
    generator: ScriptGenerator,
}

impl GenerateScriptWorker {
    pub fn new(generator: ScriptGenerator) -> Self {
        Self { generator }
    }
}

impl Worker for GenerateScriptWorker {
    const SUBSCRIBER_ID: &'static str = "stage.script";

    fn subscription() -> SubscriptionSpec {
        SubscriptionSpec {
            subscriber_id: Self::SUBSCRIBER_ID,
            inputs: vec![InputSpec {
                event_type: JobRequested::EVENT_TYPE,
                queue_kind: QueueKind::FifoDropOldest {
                    capacity: STAGE_QUEUE_CAPACITY,
                },
            }],
        }
    }

    async fn handle(&mut self, event: Arc<EnrichedEvent>, bus: &EventBus) -> anyhow::Result<()> {
        let req = expect::<JobRequested>(&event.event, JobRequested::EVENT_TYPE)?;
        let job = &req.job;
        if !enter_stage(job, Stage::Script, req.header.event_id, bus) {
            return Ok(());
        }

        let script = self
            .generator
            .generate(&job.request.topic, &job.ledger, &job.paths)
            .await?;

        bus.publish(Arc::new(ScriptGenerated::new(
            req.header.event_id,
            job.clone(),
            script,
        )));
        Ok(())
    }
}
