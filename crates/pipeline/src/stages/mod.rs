//! The six pipeline stages. Each one wraps its collaborators and knows
//! nothing about the bus; the workers in [`crate::workers`] drive them.

use std::fmt;

use reelsmith_core::Retryable;

use crate::error::{ErrorKind, PipelineError};

pub mod assembly;
pub mod captions;
pub mod footage;
pub mod narration;
pub mod publish;
pub mod script;

pub use assembly::VideoAssembler;
pub use captions::SubtitleDeriver;
pub use footage::FootageLocator;
pub use narration::NarrationSynthesizer;
pub use publish::Publisher;
pub use script::ScriptGenerator;

/// Retries only unusable content, for calls that already retry transient
/// collaborator failures on their own.
#[derive(Debug)]
pub(crate) struct ContentOnly(pub PipelineError);

impl Retryable for ContentOnly {
    fn is_retryable(&self) -> bool {
        self.0.kind() == ErrorKind::Content
    }
}

impl fmt::Display for ContentOnly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
