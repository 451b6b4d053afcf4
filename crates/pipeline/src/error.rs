use std::path::PathBuf;

use reelsmith_core::Retryable;
use serde::Serialize;
use thiserror::Error;

use crate::types::JobId;

/// Failure classes that decide whether an error is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad topic, voice, configuration or credentials. Never retried.
    Input,
    /// Transient network or API failure. Retried with backoff.
    Collaborator,
    /// A collaborator answered with something unusable. Retried with adjusted parameters.
    Content,
    /// Deterministic encoding failure. Never retried.
    Render,
    /// Local IO or serialization failure. Never retried.
    Internal,
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("Voice {voice} is not supported by {service}")]
    UnsupportedVoice { voice: String, service: &'static str },

    #[error("Missing API key: {env_var} environment variable is not set")]
    MissingApiKey { env_var: String },

    #[error("{service} request failed: {reason}")]
    Collaborator { service: &'static str, reason: String },

    #[error("{service} rejected the request (HTTP {status})")]
    Rejected { service: &'static str, status: u16 },

    #[error("{service} authentication failed, re-authenticate and try again")]
    AuthenticationFailed { service: &'static str },

    #[error("Script generation failed: {reason}")]
    GenerationFailure { reason: String },

    #[error("Insufficient footage: found {found} usable clips, {required} required")]
    InsufficientFootage { found: usize, required: usize },

    #[error("Speech synthesis failed: {reason}")]
    SynthesisFailure { reason: String },

    #[error("Caption derivation failed: {reason}")]
    CaptionFailure { reason: String },

    #[error("Render failed: {reason}")]
    RenderFailure { reason: String },

    #[error("Publish failed: {reason}")]
    PublishFailure { reason: String },

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("API request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::InvalidRequest { .. }
            | PipelineError::UnsupportedVoice { .. }
            | PipelineError::MissingApiKey { .. }
            | PipelineError::Rejected { .. }
            | PipelineError::AuthenticationFailed { .. } => ErrorKind::Input,
            PipelineError::Collaborator { .. }
            | PipelineError::PublishFailure { .. }
            | PipelineError::Http(_) => ErrorKind::Collaborator,
            PipelineError::GenerationFailure { .. }
            | PipelineError::InsufficientFootage { .. }
            | PipelineError::SynthesisFailure { .. }
            | PipelineError::CaptionFailure { .. }
            | PipelineError::Json(_) => ErrorKind::Content,
            PipelineError::RenderFailure { .. } => ErrorKind::Render,
            PipelineError::Io { .. } => ErrorKind::Internal,
        }
    }

    /// A missing or refused credential: every later call to the same
    /// service fails the same way.
    pub fn is_credential_failure(&self) -> bool {
        matches!(
            self,
            PipelineError::MissingApiKey { .. } | PipelineError::AuthenticationFailed { .. }
        )
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn collaborator(service: &'static str, reason: impl Into<String>) -> Self {
        Self::Collaborator {
            service,
            reason: reason.into(),
        }
    }

    /// Map an unsuccessful HTTP status to the matching error class.
    pub fn from_status(service: &'static str, status: reqwest::StatusCode) -> Self {
        match status.as_u16() {
            401 | 403 => Self::AuthenticationFailed { service },
            408 | 429 => Self::collaborator(service, format!("HTTP {}", status.as_u16())),
            code if status.is_server_error() => Self::collaborator(service, format!("HTTP {code}")),
            code => Self::Rejected {
                service,
                status: code,
            },
        }
    }
}

impl Retryable for PipelineError {
    fn is_retryable(&self) -> bool {
        // InsufficientFootage is only raised after every term was tried.
        matches!(self.kind(), ErrorKind::Collaborator | ErrorKind::Content)
            && !matches!(self, PipelineError::InsufficientFootage { .. })
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors of the operator control surface.
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("A job is already running ({active}); wait for it or cancel it first")]
    Busy { active: JobId },

    #[error("Unknown job {0}")]
    UnknownJob(JobId),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Pipeline is shut down")]
    ShutDown,
}
