use std::collections::HashMap;

use crate::{queues::QueueKind, workers::WorkerInputs};

/// What one worker listens to.
pub struct SubscriptionSpec {
    pub subscriber_id: &'static str,
    pub inputs: Vec<InputSpec>,
}

pub struct InputSpec {
    pub event_type: &'static str,
    pub queue_kind: QueueKind,
}

/// The receiving ends built for each subscriber, handed out once.
pub struct WorkerWiring {
    inputs: HashMap<&'static str, WorkerInputs>,
}

impl WorkerWiring {
    pub fn new(inputs: HashMap<&'static str, WorkerInputs>) -> Self {
        Self { inputs }
    }

    pub fn take(&mut self, subscriber_id: &'static str) -> Option<WorkerInputs> {
        self.inputs.remove(subscriber_id)
    }

    /// Subscribers whose inputs were never taken. Events routed to them are
    /// queued but never handled.
    pub fn unclaimed(&self) -> Vec<&'static str> {
        let mut ids: Vec<_> = self.inputs.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}
