//! Worker plumbing: subscriptions, wired inputs and the run loop.

pub mod events;
pub mod wiring;
pub mod worker;
pub mod worker_inputs;

pub use events::StageFailed;
pub use wiring::{InputSpec, SubscriptionSpec, WorkerWiring};
pub use worker::Worker;
pub use worker_inputs::{FifoInput, FifoReceiver, WorkerInputs};
