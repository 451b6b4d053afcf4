//! Capability interfaces for the external services the pipeline drives,
//! plus their production implementations.

use std::{path::Path, sync::Arc};

use async_trait::async_trait;

use tracing::info;

use crate::{
    config::{CaptionStrategy, PipelineConfig},
    error::Result,
    provider::Provider,
    stages::assembly::RenderPlan,
    types::{Dimensions, FootageCandidate, PublishMetadata, RenderedVideo, TimedWord, Voice},
};

pub mod assemblyai;
pub mod chat;
pub mod ffmpeg;
pub mod pexels;
pub mod tiktok;
#[cfg(feature = "local-whisper")]
pub mod whisper;
pub mod youtube;

pub use assemblyai::AssemblyAi;
pub use chat::ChatModel;
pub use ffmpeg::Ffmpeg;
pub use pexels::Pexels;
pub use tiktok::TikTokTts;
#[cfg(feature = "local-whisper")]
pub use whisper::WhisperTranscriber;
pub use youtube::YouTube;

#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn name(&self) -> &'static str;
    async fn complete(&self, system: &str, prompt: &str) -> Result<String>;
}

#[async_trait]
pub trait FootageSearch: Send + Sync {
    async fn search(&self, query: &str, per_page: usize) -> Result<Vec<FootageCandidate>>;
    async fn download(&self, candidate: &FootageCandidate, dest: &Path) -> Result<()>;
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    fn name(&self) -> &'static str;

    fn supports(&self, _voice: Voice) -> bool {
        true
    }

    /// Encoded audio for `text`.
    async fn synthesize(&self, text: &str, voice: Voice) -> Result<Vec<u8>>;
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &Path) -> Result<Vec<TimedWord>>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MediaInfo {
    pub duration: f64,
    pub dimensions: Option<Dimensions>,
}

/// Probing and compositing, backed by a media library.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<MediaInfo>;
    async fn render(&self, plan: &RenderPlan) -> Result<()>;
}

#[async_trait]
pub trait VideoHost: Send + Sync {
    fn name(&self) -> &'static str;
    /// Upload and return the remote video id.
    async fn upload(&self, video: &RenderedVideo, metadata: &PublishMetadata) -> Result<String>;
}

/// The full set of collaborators a controller runs with.
#[derive(Clone)]
pub struct Collaborators {
    pub language_model: Arc<dyn LanguageModel>,
    pub footage: Arc<dyn FootageSearch>,
    pub speech: Arc<dyn SpeechSynthesizer>,
    pub transcriber: Option<Arc<dyn Transcriber>>,
    pub media: Arc<dyn MediaEngine>,
    pub video_host: Option<Arc<dyn VideoHost>>,
}

impl Collaborators {
    /// The production services, configured from environment credentials.
    /// Only the video host and the transcriber are optional.
    pub fn from_env(provider: Provider, config: &PipelineConfig) -> Result<Self> {
        let language_model = Arc::new(ChatModel::from_env(provider)?);
        let footage = Arc::new(Pexels::from_env()?);
        let speech = Arc::new(TikTokTts::from_env()?);

        let transcriber: Option<Arc<dyn Transcriber>> = match config.caption_strategy {
            CaptionStrategy::Heuristic => None,
            CaptionStrategy::Transcription => transcriber_from_env(),
        };

        let video_host: Option<Arc<dyn VideoHost>> = match YouTube::from_env() {
            Ok(host) => Some(Arc::new(host)),
            Err(_) => None,
        };
        info!(
            provider = provider.name(),
            transcriber = transcriber.is_some(),
            video_host = video_host.is_some(),
            "collaborators configured"
        );

        Ok(Self {
            language_model,
            footage,
            speech,
            transcriber,
            media: Arc::new(Ffmpeg::new()),
            video_host,
        })
    }
}

fn transcriber_from_env() -> Option<Arc<dyn Transcriber>> {
    match AssemblyAi::from_env() {
        Ok(assembly) => Some(Arc::new(assembly)),
        Err(_) => local_transcriber(),
    }
}

#[cfg(feature = "local-whisper")]
fn local_transcriber() -> Option<Arc<dyn Transcriber>> {
    Some(Arc::new(WhisperTranscriber::from_env()))
}

#[cfg(not(feature = "local-whisper"))]
fn local_transcriber() -> Option<Arc<dyn Transcriber>> {
    tracing::warn!("no transcription service configured");
    None
}

/// Trim a collaborator's error body to something safe to log.
pub(crate) fn excerpt(body: &str) -> String {
    const LIMIT: usize = 300;
    let body = body.trim();
    match body.char_indices().nth(LIMIT) {
        Some((idx, _)) => format!("{}…", &body[..idx]),
        None => body.to_string(),
    }
}
