use std::sync::Arc;

use tokio::sync::mpsc;

use crate::{events::EnrichedEvent, queues::FifoDropOldestReceiver};

pub enum FifoReceiver {
    FifoDropOldest(FifoDropOldestReceiver<Arc<EnrichedEvent>>),
    Isolated(mpsc::Receiver<Arc<EnrichedEvent>>),
}

pub struct FifoInput {
    pub event_type: &'static str,
    pub receiver: FifoReceiver,
}

pub struct WorkerInputs {
    pub fifos: Vec<FifoInput>,
    pub notify_any: Arc<tokio::sync::Notify>,
    pub fifo_index: usize,
}

impl WorkerInputs {
    /// Wait for the next event, polling inputs round-robin so one busy input
    /// cannot starve the others.
    pub async fn next(&mut self) -> (&'static str, Arc<EnrichedEvent>) {
        loop {
            if !self.fifos.is_empty() {
                let start = self.fifo_index;

                loop {
                    let i = self.fifo_index;
                    self.fifo_index = (self.fifo_index + 1) % self.fifos.len();
                    let fifo = &mut self.fifos[i];

                    let item = match fifo.receiver {
                        FifoReceiver::FifoDropOldest(ref mut r) => r.try_recv(),
                        FifoReceiver::Isolated(ref mut r) => r.try_recv().ok(),
                    };

                    if let Some(e) = item {
                        return (fifo.event_type, e);
                    }

                    if self.fifo_index == start {
                        break;
                    }
                }
            }
            self.notify_any.notified().await;
        }
    }
}
