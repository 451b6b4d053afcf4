//! Reelsmith core plumbing.
//!
//! A small typed event bus with per-subscriber queues, the `Worker` loop that
//! drains them, and bounded retry helpers shared by every pipeline stage.

pub mod events;
pub mod queues;
pub mod retry;
pub mod routes;
pub mod workers;

pub use events::{BusConfig, EnrichedEvent, Event, EventBus, EventBusBuilder};
pub use retry::{
    Backoff, ConstantBackoff, ExponentialBackoff, NoBackoff, RetryPolicy, Retryable, retry_async,
};
pub use workers::{StageFailed, Worker};
