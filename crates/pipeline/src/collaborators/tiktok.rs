use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use serde::Deserialize;
use tracing::debug;

use crate::{
    collaborators::SpeechSynthesizer,
    error::{PipelineError, Result},
    types::Voice,
};

const SERVICE: &str = "TikTok TTS";
pub const SESSION_ENV: &str = "TIKTOK_SESSION_ID";
/// The endpoint rejects longer requests.
const MAX_CHUNK_CHARS: usize = 300;

#[derive(Debug, Deserialize)]
struct InvokeResponse {
    status_code: i64,
    #[serde(default)]
    message: String,
    data: Option<InvokeData>,
}

#[derive(Debug, Deserialize)]
struct InvokeData {
    #[serde(default)]
    v_str: String,
}

pub struct TikTokTts {
    session_id: String,
    endpoint: String,
    client: reqwest::Client,
}

impl TikTokTts {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            endpoint: "https://api16-normal-v6.tiktokv.com/media/api/text/speech/invoke/".into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn from_env() -> Result<Self> {
        std::env::var(SESSION_ENV)
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(Self::new)
            .ok_or_else(|| PipelineError::MissingApiKey {
                env_var: SESSION_ENV.to_string(),
            })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    async fn invoke(&self, text: &str, voice: Voice) -> Result<Vec<u8>> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("User-Agent", "com.zhiliaoapp.musically/2022600030 (Linux; U; Android 7.1.2; es_ES; SM-G988N; Build/NRD90M;tt-ok/3.12.13.1)")
            .header("Cookie", format!("sessionid={}", self.session_id))
            .query(&[
                ("text_speaker", voice.id()),
                ("req_text", text),
                ("speaker_map_type", "0"),
                ("aid", "1233"),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::from_status(SERVICE, status));
        }

        let body: InvokeResponse = response.json().await?;
        match body.status_code {
            0 => {
                let encoded = body.data.map(|d| d.v_str).unwrap_or_default();
                if encoded.is_empty() {
                    return Err(PipelineError::SynthesisFailure {
                        reason: "the service returned no audio".into(),
                    });
                }
                STANDARD
                    .decode(encoded.as_bytes())
                    .map_err(|e| PipelineError::SynthesisFailure {
                        reason: format!("undecodable audio payload: {e}"),
                    })
            }
            1 | 5 => Err(PipelineError::AuthenticationFailed { service: SERVICE }),
            2 => Err(PipelineError::SynthesisFailure {
                reason: "text chunk too long".into(),
            }),
            4 => Err(PipelineError::UnsupportedVoice {
                voice: voice.id().to_string(),
                service: SERVICE,
            }),
            code => {
                debug!(code, message = %body.message, "synthesis rejected");
                Err(PipelineError::collaborator(SERVICE, format!("status code {code}")))
            }
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for TikTokTts {
    fn name(&self) -> &'static str {
        SERVICE
    }

    async fn synthesize(&self, text: &str, voice: Voice) -> Result<Vec<u8>> {
        let mut audio = Vec::new();
        // MP3 frames concatenate cleanly.
        for chunk in chunk_text(text, MAX_CHUNK_CHARS) {
            audio.extend(self.invoke(&chunk, voice).await?);
        }
        Ok(audio)
    }
}

/// Split on sentence boundaries, packing sentences into chunks of at most
/// `max_chars`. Sentences longer than the limit are split on whitespace.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    for sentence in split_sentences(text) {
        if sentence.chars().count() <= max_chars {
            pieces.push(sentence);
            continue;
        }
        let mut current = String::new();
        for word in sentence.split_whitespace() {
            if !current.is_empty() && current.chars().count() + 1 + word.chars().count() > max_chars {
                pieces.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
        }
        if !current.is_empty() {
            pieces.push(current);
        }
    }

    let mut chunks: Vec<String> = Vec::new();
    for piece in pieces {
        match chunks.last_mut() {
            Some(last) if last.chars().count() + 1 + piece.chars().count() <= max_chars => {
                last.push(' ');
                last.push_str(&piece);
            }
            _ => chunks.push(piece),
        }
    }
    chunks
}

pub(crate) fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        current.push(c);
        if matches!(c, '.' | '!' | '?') {
            let s = current.trim();
            if !s.is_empty() {
                sentences.push(s.to_string());
            }
            current.clear();
        }
    }
    let rest = current.trim();
    if !rest.is_empty() {
        sentences.push(rest.to_string());
    }
    sentences
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_sentences_under_limit() {
        let chunks = chunk_text("One two. Three four! Five six?", 20);
        assert_eq!(chunks, vec!["One two. Three four!", "Five six?"]);
    }

    #[test]
    fn splits_overlong_sentences_on_words() {
        let chunks = chunk_text("aaaa bbbb cccc dddd", 9);
        assert_eq!(chunks, vec!["aaaa bbbb", "cccc dddd"]);
        assert!(chunks.iter().all(|c| c.chars().count() <= 9));
    }

    #[test]
    fn keeps_trailing_fragment() {
        assert_eq!(split_sentences("Done. and then"), vec!["Done.", "and then"]);
    }
}
