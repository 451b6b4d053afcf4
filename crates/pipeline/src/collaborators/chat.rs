use async_trait::async_trait;
use tracing::debug;

use crate::{
    collaborators::{LanguageModel, excerpt},
    error::{PipelineError, Result},
    provider::Provider,
};

/// A chat-completions endpoint (OpenAI, xAI or Gemini's compatibility layer).
pub struct ChatModel {
    provider: Provider,
    api_key: String,
    api_url: String,
    model: String,
    temperature: f32,
    client: reqwest::Client,
}

impl ChatModel {
    pub fn new(provider: Provider, api_key: impl Into<String>) -> Self {
        let config = provider.config();
        Self {
            provider,
            api_key: api_key.into(),
            api_url: config.api_url.to_string(),
            model: config.model.to_string(),
            temperature: 0.7,
            client: reqwest::Client::new(),
        }
    }

    /// Build from the provider's API key environment variable.
    pub fn from_env(provider: Provider) -> Result<Self> {
        let api_key = provider.validate_api_key()?;
        Ok(Self::new(provider, api_key))
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }
}

#[async_trait]
impl LanguageModel for ChatModel {
    fn name(&self) -> &'static str {
        self.provider.name()
    }

    async fn complete(&self, system: &str, prompt: &str) -> Result<String> {
        let response = self
            .client
            .post(&self.api_url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&serde_json::json!({
                "model": self.model,
                "messages": [
                    { "role": "system", "content": system },
                    { "role": "user", "content": prompt },
                ],
                "temperature": self.temperature,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(provider = self.name(), %status, body = %excerpt(&body), "completion rejected");
            return Err(PipelineError::from_status(self.name(), status));
        }

        let response = response.json::<serde_json::Value>().await?;
        let choice = &response["choices"][0];

        if choice["finish_reason"].as_str() == Some("content_filter") {
            return Err(PipelineError::GenerationFailure {
                reason: format!("{} refused the prompt", self.name()),
            });
        }

        choice["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| PipelineError::GenerationFailure {
                reason: format!("{} returned no message content", self.name()),
            })
    }
}
