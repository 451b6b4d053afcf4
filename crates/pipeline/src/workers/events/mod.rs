use std::{sync::Arc, time::SystemTime};

use reelsmith_core::{Event, StageFailed, events::downcast_ref};
use uuid::Uuid;

use crate::workers::JobContext;

/// Implements [`Event`] and [`JobEvent`] for a struct with `header` and `job` fields.
macro_rules! job_event {
    ($ty:ident, $event_type:literal) => {
        impl $ty {
            pub const EVENT_TYPE: &'static str = $event_type;
        }

        impl reelsmith_core::Event for $ty {
            fn event_id(&self) -> uuid::Uuid {
                self.header.event_id
            }

            fn parent_ids(&self) -> &[uuid::Uuid] {
                &self.header.parent_ids
            }

            fn event_type(&self) -> &'static str {
                Self::EVENT_TYPE
            }

            fn timestamp(&self) -> std::time::SystemTime {
                self.header.timestamp
            }

            fn as_any(&self) -> &dyn std::any::Any {
                self as &dyn std::any::Any
            }
        }

        impl crate::workers::events::JobEvent for $ty {
            fn job(&self) -> &crate::workers::JobContext {
                &self.job
            }
        }
    };
}

pub mod captions_derived;
pub mod footage_located;
pub mod job_cancelled;
pub mod job_completed;
pub mod job_requested;
pub mod narration_synthesized;
pub mod script_generated;
pub mod video_rendered;

pub use captions_derived::*;
pub use footage_located::*;
pub use job_cancelled::*;
pub use job_completed::*;
pub use job_requested::*;
pub use narration_synthesized::*;
pub use script_generated::*;
pub use video_rendered::*;

#[derive(Clone, Debug, serde::Serialize)]
pub struct EventHeader {
    pub event_id: Uuid,
    pub parent_ids: Vec<Uuid>,
    pub timestamp: SystemTime,
}

impl EventHeader {
    pub fn root() -> Self {
        Self {
            event_id: Uuid::new_v4(),
            parent_ids: Vec::new(),
            timestamp: SystemTime::now(),
        }
    }

    pub fn child_of(parent_event_id: Uuid) -> Self {
        Self {
            parent_ids: vec![parent_event_id],
            ..Self::root()
        }
    }
}

/// A domain event that belongs to a job.
pub trait JobEvent: Event {
    fn job(&self) -> &JobContext;
}

fn as_job_event<T: JobEvent>(event: &Arc<dyn Event>) -> Option<&JobContext> {
    downcast_ref::<T>(event).map(JobEvent::job)
}

/// The job an event belongs to, looking through `StageFailed` to the event
/// whose handler failed.
pub fn job_of(event: &Arc<dyn Event>) -> Option<&JobContext> {
    if let Some(failed) = downcast_ref::<StageFailed>(event) {
        return job_of(&failed.parent);
    }
    as_job_event::<JobRequested>(event)
        .or_else(|| as_job_event::<ScriptGenerated>(event))
        .or_else(|| as_job_event::<FootageLocated>(event))
        .or_else(|| as_job_event::<NarrationSynthesized>(event))
        .or_else(|| as_job_event::<CaptionsDerived>(event))
        .or_else(|| as_job_event::<VideoRendered>(event))
        .or_else(|| as_job_event::<JobCompleted>(event))
        .or_else(|| as_job_event::<JobCancelled>(event))
}
