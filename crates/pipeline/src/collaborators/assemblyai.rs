use std::{path::Path, time::Duration};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::fs;
use tracing::debug;

use crate::{
    collaborators::{Transcriber, excerpt},
    error::{PipelineError, Result},
    types::TimedWord,
};

const SERVICE: &str = "AssemblyAI";
pub const API_KEY_ENV: &str = "ASSEMBLY_AI_API_KEY";

#[derive(Debug, Deserialize)]
struct UploadResponse {
    upload_url: String,
}

#[derive(Debug, Deserialize)]
struct TranscriptResponse {
    id: String,
    status: String,
    error: Option<String>,
    #[serde(default)]
    words: Option<Vec<Word>>,
}

/// Offsets are in milliseconds.
#[derive(Debug, Deserialize)]
struct Word {
    text: String,
    start: u64,
    end: u64,
}

impl From<Word> for TimedWord {
    fn from(w: Word) -> Self {
        TimedWord {
            text: w.text,
            start: w.start as f64 / 1000.0,
            end: w.end as f64 / 1000.0,
        }
    }
}

pub struct AssemblyAi {
    api_key: String,
    base_url: String,
    poll_interval: Duration,
    max_polls: u32,
    client: reqwest::Client,
}

impl AssemblyAi {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://api.assemblyai.com".to_string(),
            poll_interval: Duration::from_secs(3),
            max_polls: 200,
            client: reqwest::Client::new(),
        }
    }

    pub fn from_env() -> Result<Self> {
        std::env::var(API_KEY_ENV)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .map(Self::new)
            .ok_or_else(|| PipelineError::MissingApiKey {
                env_var: API_KEY_ENV.to_string(),
            })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        debug!(%status, body = %excerpt(&body), "transcription request rejected");
        Err(PipelineError::from_status(SERVICE, status))
    }

    async fn upload(&self, audio: &Path) -> Result<String> {
        let bytes = fs::read(audio).await.map_err(|e| PipelineError::io(audio, e))?;
        let response = self
            .client
            .post(format!("{}/v2/upload", self.base_url))
            .header("authorization", &self.api_key)
            .body(bytes)
            .send()
            .await?;
        let uploaded: UploadResponse = Self::check(response).await?.json().await?;
        Ok(uploaded.upload_url)
    }

    async fn submit(&self, audio_url: &str) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/v2/transcript", self.base_url))
            .header("authorization", &self.api_key)
            .json(&serde_json::json!({ "audio_url": audio_url }))
            .send()
            .await?;
        let submitted: TranscriptResponse = Self::check(response).await?.json().await?;
        Ok(submitted.id)
    }

    async fn poll(&self, id: &str) -> Result<TranscriptResponse> {
        let response = self
            .client
            .get(format!("{}/v2/transcript/{id}", self.base_url))
            .header("authorization", &self.api_key)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }
}

/// The final result of a transcript, or `None` while it is still queued or
/// processing. The service's error text only goes to the debug log.
fn settle(transcript: TranscriptResponse) -> Option<Result<Vec<TimedWord>>> {
    match transcript.status.as_str() {
        "completed" => {
            let words = transcript.words.unwrap_or_default();
            Some(Ok(words.into_iter().map(TimedWord::from).collect()))
        }
        "error" => {
            debug!(
                transcript_id = %transcript.id,
                error = %excerpt(transcript.error.as_deref().unwrap_or_default()),
                "transcription failed"
            );
            Some(Err(PipelineError::CaptionFailure {
                reason: "the transcription service could not transcribe the narration".into(),
            }))
        }
        _ => None,
    }
}

#[async_trait]
impl Transcriber for AssemblyAi {
    async fn transcribe(&self, audio: &Path) -> Result<Vec<TimedWord>> {
        let audio_url = self.upload(audio).await?;
        let id = self.submit(&audio_url).await?;
        debug!(transcript_id = %id, "transcription submitted");

        for _ in 0..self.max_polls {
            match settle(self.poll(&id).await?) {
                Some(outcome) => return outcome,
                None => tokio::time::sleep(self.poll_interval).await,
            }
        }

        Err(PipelineError::collaborator(
            SERVICE,
            format!("transcript {id} did not complete in time"),
        ))
    }
}
