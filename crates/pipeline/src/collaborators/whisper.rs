use std::path::{Path, PathBuf};

use async_trait::async_trait;
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use crate::{
    collaborators::{Ffmpeg, Transcriber},
    error::{PipelineError, Result},
    types::TimedWord,
};

pub const MODEL_ENV: &str = "WHISPER_MODEL_PATH";

/// Local transcription with a ggml whisper model.
pub struct WhisperTranscriber {
    model_path: PathBuf,
    use_gpu: bool,
    ffmpeg: Ffmpeg,
}

impl WhisperTranscriber {
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            use_gpu: cfg!(feature = "cuda"),
            ffmpeg: Ffmpeg::new(),
        }
    }

    /// Model from `WHISPER_MODEL_PATH`, else `<data dir>/reelsmith/ggml-base.en.bin`.
    pub fn from_env() -> Self {
        let model_path = std::env::var(MODEL_ENV).map(PathBuf::from).unwrap_or_else(|_| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("reelsmith")
                .join("ggml-base.en.bin")
        });
        Self::new(model_path)
    }

    fn failure(reason: impl std::fmt::Display) -> PipelineError {
        PipelineError::CaptionFailure {
            reason: format!("whisper: {reason}"),
        }
    }

    fn run(model_path: &Path, wav: &Path, use_gpu: bool) -> Result<Vec<TimedWord>> {
        let mut reader = hound::WavReader::open(wav).map_err(Self::failure)?;
        let samples = reader
            .samples::<i16>()
            .map(|s| s.map(|s| s as f32 / i16::MAX as f32))
            .collect::<std::result::Result<Vec<f32>, _>>()
            .map_err(Self::failure)?;

        let ctx_params = WhisperContextParameters {
            use_gpu,
            flash_attn: use_gpu,
            ..Default::default()
        };
        let model = model_path
            .to_str()
            .ok_or_else(|| Self::failure("model path is not valid UTF-8"))?;
        let ctx = WhisperContext::new_with_params(model, ctx_params).map_err(Self::failure)?;

        // One word per segment.
        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 5 });
        params.set_token_timestamps(true);
        params.set_split_on_word(true);
        params.set_max_len(1);
        params.set_print_progress(false);

        let mut state = ctx.create_state().map_err(Self::failure)?;
        state.full(params, &samples).map_err(Self::failure)?;

        let mut words = Vec::new();
        for segment in state.as_iter() {
            let Ok(text) = segment.to_str() else {
                continue;
            };
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            words.push(TimedWord {
                text: text.to_string(),
                start: segment.start_timestamp() as f64 / 100.0,
                end: segment.end_timestamp() as f64 / 100.0,
            });
        }
        Ok(words)
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, audio: &Path) -> Result<Vec<TimedWord>> {
        // Written next to the narration so it goes away with the job directory.
        let wav = audio.with_extension("wav");
        self.ffmpeg.to_wav(audio, &wav).await?;

        let model_path = self.model_path.clone();
        let use_gpu = self.use_gpu;
        tokio::task::spawn_blocking(move || Self::run(&model_path, &wav, use_gpu))
            .await
            .map_err(Self::failure)?
    }
}
