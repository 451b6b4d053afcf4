use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::{fs, io::AsyncWriteExt};
use tracing::debug;

use crate::{
    collaborators::{FootageSearch, excerpt},
    error::{PipelineError, Result},
    types::FootageCandidate,
};

const SERVICE: &str = "Pexels";
pub const API_KEY_ENV: &str = "PEXELS_API_KEY";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    videos: Vec<PexelsVideo>,
}

#[derive(Debug, Deserialize)]
struct PexelsVideo {
    id: u64,
    duration: f64,
    #[serde(default)]
    video_files: Vec<VideoFile>,
}

#[derive(Debug, Deserialize)]
struct VideoFile {
    link: String,
    width: Option<u32>,
    height: Option<u32>,
    file_type: Option<String>,
}

impl PexelsVideo {
    /// The largest mp4 rendition, which is what gets downloaded.
    fn into_candidate(self) -> Option<FootageCandidate> {
        let id = self.id;
        let duration = self.duration;
        self.video_files
            .into_iter()
            .filter(|f| f.file_type.as_deref().is_none_or(|t| t == "video/mp4"))
            .filter_map(|f| Some((f.width?, f.height?, f.link)))
            .max_by_key(|(w, h, _)| u64::from(*w) * u64::from(*h))
            .map(|(width, height, url)| FootageCandidate {
                id: id.to_string(),
                url,
                duration,
                width,
                height,
            })
    }
}

pub struct Pexels {
    api_key: String,
    base_url: String,
    orientation: Option<String>,
    client: reqwest::Client,
}

impl Pexels {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://api.pexels.com".to_string(),
            orientation: Some("portrait".to_string()),
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

    /// Search any orientation; vertical crops are taken from landscape clips.
    pub fn any_orientation(mut self) -> Self {
        self.orientation = None;
        self
    }
}

#[async_trait]
impl FootageSearch for Pexels {
    async fn search(&self, query: &str, per_page: usize) -> Result<Vec<FootageCandidate>> {
        let per_page = per_page.to_string();
        let mut params = vec![("query", query), ("per_page", per_page.as_str())];
        if let Some(orientation) = &self.orientation {
            params.push(("orientation", orientation.as_str()));
        }

        let response = self
            .client
            .get(format!("{}/videos/search", self.base_url))
            .header("Authorization", &self.api_key)
            .query(&params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(%status, query, body = %excerpt(&body), "search rejected");
            return Err(PipelineError::from_status(SERVICE, status));
        }

        let parsed: SearchResponse = response.json().await?;
        let candidates: Vec<FootageCandidate> = parsed
            .videos
            .into_iter()
            .filter_map(PexelsVideo::into_candidate)
            .collect();
        debug!(query, found = candidates.len(), "search complete");
        Ok(candidates)
    }

    async fn download(&self, candidate: &FootageCandidate, dest: &Path) -> Result<()> {
        let mut response = self.client.get(&candidate.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::from_status(SERVICE, status));
        }

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| PipelineError::io(parent, e))?;
        }
        let mut file = fs::File::create(dest)
            .await
            .map_err(|e| PipelineError::io(dest, e))?;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk)
                .await
                .map_err(|e| PipelineError::io(dest, e))?;
        }
        file.flush().await.map_err(|e| PipelineError::io(dest, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_largest_mp4_rendition() {
        let json = r#"{
            "videos": [{
                "id": 42,
                "duration": 12,
                "video_files": [
                    {"link": "https://v/sd.mp4", "width": 540, "height": 960, "file_type": "video/mp4"},
                    {"link": "https://v/hd.mp4", "width": 1080, "height": 1920, "file_type": "video/mp4"},
                    {"link": "https://v/hls", "width": 2160, "height": 3840, "file_type": "application/x-mpegURL"}
                ]
            }]
        }"#;
        let parsed: SearchResponse = serde_json::from_str(json).unwrap();
        let candidate = parsed
            .videos
            .into_iter()
            .next()
            .and_then(PexelsVideo::into_candidate)
            .unwrap();

        assert_eq!(candidate.id, "42");
        assert_eq!(candidate.url, "https://v/hd.mp4");
        assert_eq!((candidate.width, candidate.height), (1080, 1920));
        assert_eq!(candidate.duration, 12.0);
    }

    #[test]
    fn video_without_sized_files_is_dropped() {
        let video = PexelsVideo {
            id: 1,
            duration: 10.0,
            video_files: vec![VideoFile {
                link: "https://v/x.mp4".into(),
                width: None,
                height: None,
                file_type: Some("video/mp4".into()),
            }],
        };
        assert!(video.into_candidate().is_none());
    }
}
