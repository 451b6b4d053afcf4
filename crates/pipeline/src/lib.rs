//! Topic-to-short-video pipeline.
//!
//! A [`Controller`] runs one [`GenerationRequest`] at a time through six
//! stages (script, footage, narration, subtitles, render, optional publish),
//! each a worker on the `reelsmith-core` event bus. Cancellation is
//! cooperative and observed at stage boundaries; every terminal outcome
//! removes the job's temporary artifacts.

pub mod artifacts;
pub mod collaborators;
pub mod config;
pub mod controller;
pub mod error;
pub mod provider;
pub mod stages;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod types;
pub mod workers;

pub use collaborators::Collaborators;
pub use config::{CaptionStrategy, PipelineConfig};
pub use controller::{Controller, JobHandle};
pub use error::{ControlError, ErrorKind, PipelineError, Result};
pub use provider::{Provider, ProviderConfig};
pub use types::{
    CancelAck, Dimensions, GenerationRequest, JobId, JobOutput, JobStatus, Stage, Voice,
};
