use std::sync::Arc;

use anyhow::Result;
use tokio::sync::broadcast;
use tracing::{Instrument, debug, info_span, warn};

use crate::{
    events::{EnrichedEvent, EventBus},
    workers::{StageFailed, SubscriptionSpec, WorkerInputs},
};

pub trait Worker: Send + Sized + 'static {
    const SUBSCRIBER_ID: &'static str;
    fn subscription() -> SubscriptionSpec;
    async fn handle(&mut self, event: Arc<EnrichedEvent>, bus: &EventBus) -> Result<()>;
    async fn run(
        mut self,
        mut inputs: WorkerInputs,
        bus: Arc<EventBus>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<()> {
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    debug!(subscriber = Self::SUBSCRIBER_ID, "worker stopped");
                    return Ok(());
                }
                (event_type, event) = inputs.next() => {
                    let parent = Arc::clone(&event.event);
                    let span = info_span!(
                        "worker",
                        subscriber = Self::SUBSCRIBER_ID,
                        event_type,
                        ingest_ns = event.ingest_ns
                    );
                    // A handler stuck on a collaborator must not outlive shutdown.
                    let outcome = tokio::select! {
                        outcome = self.handle(event, &bus).instrument(span) => outcome,
                        _ = shutdown.recv() => {
                            debug!(subscriber = Self::SUBSCRIBER_ID, event_type, "worker stopped mid-event");
                            return Ok(());
                        }
                    };
                    if let Err(e) = outcome {
                        warn!(subscriber = Self::SUBSCRIBER_ID, error = %e, "handler failed");
                        bus.publish(Arc::new(StageFailed::new(parent, Self::SUBSCRIBER_ID, e)));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        future::pending,
        time::{Duration, SystemTime},
    };

    use serde::Serialize;
    use uuid::Uuid;

    use super::*;
    use crate::{
        events::{BusConfig, Event, EventBusBuilder},
        queues::QueueKind,
        workers::InputSpec,
    };

    #[derive(Serialize)]
    struct Tick {
        id: Uuid,
    }

    impl Event for Tick {
        fn event_id(&self) -> Uuid {
            self.id
        }

        fn parent_ids(&self) -> &[Uuid] {
            &[]
        }

        fn event_type(&self) -> &'static str {
            "test.tick"
        }

        fn timestamp(&self) -> SystemTime {
            SystemTime::now()
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }

    struct Stuck;

    impl Worker for Stuck {
        const SUBSCRIBER_ID: &'static str = "stuck";

        fn subscription() -> SubscriptionSpec {
            SubscriptionSpec {
                subscriber_id: Self::SUBSCRIBER_ID,
                inputs: vec![InputSpec {
                    event_type: "test.tick",
                    queue_kind: QueueKind::FifoDropOldest { capacity: 1 },
                }],
            }
        }

        async fn handle(&mut self, _event: Arc<EnrichedEvent>, _bus: &EventBus) -> Result<()> {
            pending::<Result<()>>().await
        }
    }

    #[tokio::test]
    async fn shutdown_interrupts_a_stuck_handler() {
        let (bus, mut wiring, _tasks) = EventBusBuilder::new(BusConfig::default())
            .subscribe(Stuck::subscription())
            .build()
            .unwrap();
        let bus = Arc::new(bus);
        let (stop_tx, stop_rx) = broadcast::channel(1);
        let inputs = wiring.take(Stuck::SUBSCRIBER_ID).unwrap();
        let task = tokio::spawn(Stuck.run(inputs, Arc::clone(&bus), stop_rx));

        bus.publish(Arc::new(Tick { id: Uuid::new_v4() }));
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
        stop_tx.send(()).unwrap();

        let stopped = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("worker did not stop");
        assert!(matches!(stopped, Ok(Ok(()))));
    }
}
