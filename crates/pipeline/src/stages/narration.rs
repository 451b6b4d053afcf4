use std::sync::Arc;

use reelsmith_core::retry_async;
use tracing::info;

use crate::{
    artifacts::{ArtifactLedger, JobPaths},
    collaborators::{MediaEngine, SpeechSynthesizer},
    config::PipelineConfig,
    error::{PipelineError, Result},
    types::{NarrationTrack, Voice},
};

pub struct NarrationSynthesizer {
    speech: Arc<dyn SpeechSynthesizer>,
    media: Arc<dyn MediaEngine>,
    config: Arc<PipelineConfig>,
}

impl NarrationSynthesizer {
    pub fn new(
        speech: Arc<dyn SpeechSynthesizer>,
        media: Arc<dyn MediaEngine>,
        config: Arc<PipelineConfig>,
    ) -> Self {
        Self {
            speech,
            media,
            config,
        }
    }

    pub async fn synthesize(
        &self,
        text: &str,
        voice: Voice,
        ledger: &ArtifactLedger,
        paths: &JobPaths,
    ) -> Result<NarrationTrack> {
        let text = text.trim();
        if text.is_empty() {
            return Err(PipelineError::SynthesisFailure {
                reason: "narration text is empty".into(),
            });
        }
        if !self.speech.supports(voice) {
            return Err(PipelineError::UnsupportedVoice {
                voice: voice.id().to_string(),
                service: self.speech.name(),
            });
        }

        let audio = retry_async(&self.config.collaborator_retry, "narration.synthesize", |_| {
            self.speech.synthesize(text, voice)
        })
        .await?;
        if audio.is_empty() {
            return Err(PipelineError::SynthesisFailure {
                reason: format!("{} returned no audio", self.speech.name()),
            });
        }

        let path = paths.narration();
        ledger.write(&path, &audio).await?;

        let info = self.media.probe(&path).await?;
        if info.duration.is_nan() || info.duration <= 0.0 {
            return Err(PipelineError::SynthesisFailure {
                reason: "synthesized audio has no duration".into(),
            });
        }

        info!(
            service = self.speech.name(),
            voice = %voice,
            duration = info.duration,
            bytes = audio.len(),
            "narration synthesized"
        );
        Ok(NarrationTrack {
            path,
            duration: info.duration,
        })
    }
}
