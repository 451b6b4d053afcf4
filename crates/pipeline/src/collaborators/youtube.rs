use async_trait::async_trait;
use serde::Deserialize;
use tokio::fs;
use tracing::{debug, info};

use crate::{
    collaborators::{VideoHost, excerpt},
    error::{PipelineError, Result},
    types::{PublishMetadata, RenderedVideo},
};

const SERVICE: &str = "YouTube";
pub const ACCESS_TOKEN_ENV: &str = "YOUTUBE_ACCESS_TOKEN";
/// People & Blogs.
const DEFAULT_CATEGORY: &str = "22";

#[derive(Debug, Deserialize)]
struct UploadedVideo {
    id: String,
}

/// Resumable uploads through the YouTube Data API.
pub struct YouTube {
    access_token: String,
    upload_url: String,
    privacy: String,
    client: reqwest::Client,
}

impl YouTube {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            upload_url: "https://www.googleapis.com/upload/youtube/v3/videos".to_string(),
            privacy: "private".to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn from_env() -> Result<Self> {
        std::env::var(ACCESS_TOKEN_ENV)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .map(Self::new)
            .ok_or_else(|| PipelineError::MissingApiKey {
                env_var: ACCESS_TOKEN_ENV.to_string(),
            })
    }

    pub fn with_upload_url(mut self, url: impl Into<String>) -> Self {
        self.upload_url = url.into();
        self
    }

    /// `private`, `unlisted` or `public`.
    pub fn with_privacy(mut self, privacy: impl Into<String>) -> Self {
        self.privacy = privacy.into();
        self
    }

    fn snippet(&self, metadata: &PublishMetadata) -> serde_json::Value {
        serde_json::json!({
            "snippet": {
                "title": metadata.title,
                "description": metadata.description,
                "tags": metadata.tags,
                "categoryId": DEFAULT_CATEGORY,
            },
            "status": {
                "privacyStatus": self.privacy,
                "selfDeclaredMadeForKids": false,
            },
        })
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        debug!(%status, body = %excerpt(&body), "upload rejected");
        Err(PipelineError::from_status(SERVICE, status))
    }
}

#[async_trait]
impl VideoHost for YouTube {
    fn name(&self) -> &'static str {
        SERVICE
    }

    async fn upload(&self, video: &RenderedVideo, metadata: &PublishMetadata) -> Result<String> {
        let bytes = fs::read(&video.path)
            .await
            .map_err(|e| PipelineError::io(&video.path, e))?;

        let session = self
            .client
            .post(&self.upload_url)
            .bearer_auth(&self.access_token)
            .query(&[("uploadType", "resumable"), ("part", "snippet,status")])
            .header("X-Upload-Content-Type", "video/mp4")
            .header("X-Upload-Content-Length", bytes.len().to_string())
            .json(&self.snippet(metadata))
            .send()
            .await?;
        let session = Self::check(session).await?;

        let location = session
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| PipelineError::PublishFailure {
                reason: "upload session returned no location".into(),
            })?;

        let response = self
            .client
            .put(&location)
            .bearer_auth(&self.access_token)
            .header("Content-Type", "video/mp4")
            .body(bytes)
            .send()
            .await?;
        let uploaded: UploadedVideo = Self::check(response).await?.json().await?;

        info!(video_id = %uploaded.id, title = %metadata.title, "video uploaded");
        Ok(uploaded.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snippet_carries_metadata_and_privacy() {
        let host = YouTube::new("token").with_privacy("unlisted");
        let metadata = PublishMetadata {
            title: "The History of Coffee".into(),
            description: "From Ethiopia to your cup.".into(),
            tags: vec!["coffee".into(), "history".into()],
        };
        let body = host.snippet(&metadata);

        assert_eq!(body["snippet"]["title"], "The History of Coffee");
        assert_eq!(body["snippet"]["tags"][1], "history");
        assert_eq!(body["status"]["privacyStatus"], "unlisted");
    }
}
