use std::sync::Arc;

use reelsmith_core::{
    EnrichedEvent, EventBus, Worker,
    events::expect,
    queues::QueueKind,
    workers::{InputSpec, SubscriptionSpec},
};

use crate::{
    stages::FootageLocator,
    types::Stage,
    workers::{
        STAGE_QUEUE_CAPACITY, enter_stage,
        events::{FootageLocated, ScriptGenerated},
    },
};

pub struct LocateFootageWorker {
    locator: FootageLocator,
}

impl LocateFootageWorker {
    pub fn new(locator: FootageLocator) -> Self {
        Self { locator }
    }
}

impl Worker for LocateFootageWorker {
    const SUBSCRIBER_ID: &'static str = "stage.footage";

    fn subscription() -> SubscriptionSpec {
        SubscriptionSpec {
            subscriber_id: Self::SUBSCRIBER_ID,
            inputs: vec![InputSpec {
                event_type: ScriptGenerated::EVENT_TYPE,
                queue_kind: QueueKind::FifoDropOldest {
                    capacity: STAGE_QUEUE_CAPACITY,
                },
            }],
        }
    }

    async fn handle(&mut self, event: Arc<EnrichedEvent>, bus: &EventBus) -> anyhow::Result<()> {
        let req = expect::<ScriptGenerated>(&event.event, ScriptGenerated::EVENT_TYPE)?;
        let job = &req.job;
        if !enter_stage(job, Stage::Footage, req.header.event_id, bus) {
            return Ok(());
        }

        let clips = self
            .locator
            .locate(&req.script.search_terms, &job.ledger, &job.paths)
            .await?;

        bus.publish(Arc::new(FootageLocated::new(
            req.header.event_id,
            job.clone(),
            req.script.clone(),
            clips,
        )));
        Ok(())
    }
}
