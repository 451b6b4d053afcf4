use std::{any::Any, sync::Arc, time::SystemTime};

use serde::Serialize;
use uuid::Uuid;

use crate::events::Event;

/// Published by the worker loop when a handler returns an error.
///
/// `parent` is the event the failing worker was handling, so downstream
/// subscribers can recover whatever context it carried.
#[derive(Clone, Serialize)]
pub struct StageFailed {
    pub event_id: Uuid,
    pub ts: SystemTime,
    pub parents: [Uuid; 1],
    pub stage: &'static str,
    pub message: String,
    #[serde(skip)]
    pub parent: Arc<dyn Event>,
    #[serde(skip)]
    pub error: Arc<anyhow::Error>,
}

impl StageFailed {
    pub const EVENT_TYPE: &'static str = "stage.failed";

    pub fn new(parent: Arc<dyn Event>, subscriber_id: &'static str, error: anyhow::Error) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            ts: SystemTime::now(),
            parents: [parent.event_id()],
            stage: subscriber_id,
            message: format!("{error}"),
            parent,
            error: Arc::new(error),
        }
    }

    /// The typed error behind the failure, if it is (or wraps) an `E`.
    pub fn cause<E>(&self) -> Option<&E>
    where
        E: std::fmt::Display + std::fmt::Debug + Send + Sync + 'static,
    {
        self.error.downcast_ref::<E>()
    }
}

impl Event for StageFailed {
    fn event_id(&self) -> Uuid {
        self.event_id
    }

    fn parent_ids(&self) -> &[Uuid] {
        &self.parents
    }

    fn event_type(&self) -> &'static str {
        Self::EVENT_TYPE
    }

    fn timestamp(&self) -> SystemTime {
        self.ts
    }

    fn as_any(&self) -> &dyn Any {
        self as &dyn Any
    }
}
