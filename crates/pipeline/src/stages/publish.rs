use std::sync::Arc;

use reelsmith_core::retry_async;
use serde::Deserialize;
use tracing::{info, warn};

use crate::{
    collaborators::{LanguageModel, VideoHost},
    config::PipelineConfig,
    error::{ErrorKind, PipelineError, Result},
    stages::script::clean_narration,
    types::{PublishMetadata, RenderedVideo, Script},
};

const METADATA_PROMPT: &str = "You write upload metadata for short vertical videos. \
Answer with a single JSON object and nothing else: \
{\"title\": \"<at most 90 characters>\", \"description\": \"<two sentences>\", \"tags\": [\"<tag>\", ...]}.";

const MAX_TITLE_CHARS: usize = 100;
const MAX_DESCRIPTION_CHARS: usize = 4500;
const MAX_TAGS: usize = 15;

#[derive(Debug, Deserialize)]
struct RawMetadata {
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    tags: Vec<String>,
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect::<String>().trim().to_string()
}

fn title_case(topic: &str) -> String {
    topic
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn normalize_tags<'a>(tags: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for tag in tags {
        let tag = tag.trim().trim_start_matches('#').trim().to_lowercase();
        if !tag.is_empty() && !out.contains(&tag) {
            out.push(tag);
        }
        if out.len() == MAX_TAGS {
            break;
        }
    }
    out
}

/// Metadata built from the request alone, used when the model is unavailable.
pub fn fallback_metadata(topic: &str, script: &Script) -> PublishMetadata {
    let first_sentence = crate::collaborators::tiktok::split_sentences(&script.narration)
        .into_iter()
        .next()
        .unwrap_or_default();
    let tags = normalize_tags(
        script
            .search_terms
            .iter()
            .map(String::as_str)
            .chain(["shorts"]),
    );
    let hashtags = tags
        .iter()
        .map(|t| format!("#{}", t.replace(' ', "")))
        .collect::<Vec<_>>()
        .join(" ");

    PublishMetadata {
        title: truncate_chars(&title_case(topic), MAX_TITLE_CHARS),
        description: truncate_chars(&format!("{first_sentence}\n\n{hashtags}"), MAX_DESCRIPTION_CHARS),
        tags,
    }
}

fn parse_metadata(raw: &str) -> Option<PublishMetadata> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    let parsed: RawMetadata = serde_json::from_str(raw.get(start..=end)?).ok()?;
    let title = truncate_chars(&clean_narration(&parsed.title), MAX_TITLE_CHARS);
    if title.is_empty() {
        return None;
    }
    Some(PublishMetadata {
        title,
        description: truncate_chars(parsed.description.trim(), MAX_DESCRIPTION_CHARS),
        tags: normalize_tags(parsed.tags.iter().map(String::as_str)),
    })
}

pub struct Publisher {
    host: Option<Arc<dyn VideoHost>>,
    model: Arc<dyn LanguageModel>,
    config: Arc<PipelineConfig>,
}

impl Publisher {
    pub fn new(
        host: Option<Arc<dyn VideoHost>>,
        model: Arc<dyn LanguageModel>,
        config: Arc<PipelineConfig>,
    ) -> Self {
        Self {
            host,
            model,
            config,
        }
    }

    /// Title, description and tags from the model, or from the script when
    /// the model fails. Never fails itself.
    pub async fn metadata(&self, topic: &str, script: &Script) -> PublishMetadata {
        let prompt = format!("Topic: {topic}\n\nNarration: {}", script.narration);
        match self.model.complete(METADATA_PROMPT, &prompt).await {
            Ok(raw) => parse_metadata(&raw).unwrap_or_else(|| {
                warn!("unusable metadata from the model, using fallback");
                fallback_metadata(topic, script)
            }),
            Err(e) => {
                warn!(error = %e, "metadata generation failed, using fallback");
                fallback_metadata(topic, script)
            }
        }
    }

    /// Upload with bounded retries. Authentication failures are not retried.
    pub async fn publish(&self, video: &RenderedVideo, topic: &str, script: &Script) -> Result<String> {
        let host = self.host.as_ref().ok_or_else(|| PipelineError::PublishFailure {
            reason: "no video host is configured".into(),
        })?;
        let metadata = self.metadata(topic, script).await;

        let remote_id = retry_async(&self.config.publish_retry, "publish.upload", |_| {
            host.upload(video, &metadata)
        })
        .await
        .map_err(|e| match e.kind() {
            ErrorKind::Collaborator | ErrorKind::Content => PipelineError::PublishFailure {
                reason: e.to_string(),
            },
            _ => e,
        })?;

        info!(host = host.name(), remote_id = %remote_id, title = %metadata.title, "published");
        Ok(remote_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script() -> Script {
        Script {
            narration: "Coffee began in Ethiopia. It spread worldwide.".into(),
            search_terms: vec!["Coffee Beans".into(), "#ethiopia".into(), "coffee beans".into()],
        }
    }

    #[test]
    fn fallback_uses_topic_and_terms() {
        let metadata = fallback_metadata("history of coffee", &script());
        assert_eq!(metadata.title, "History Of Coffee");
        assert_eq!(metadata.tags, vec!["coffee beans", "ethiopia", "shorts"]);
        assert!(metadata.description.starts_with("Coffee began in Ethiopia."));
        assert!(metadata.description.contains("#coffeebeans"));
    }

    #[test]
    fn parses_model_metadata() {
        let raw = r#"Sure! {"title": "**Coffee**: a history", "description": "Short.", "tags": ["Coffee", "coffee", "History"]}"#;
        let metadata = parse_metadata(raw).unwrap();
        assert_eq!(metadata.title, "Coffee: a history");
        assert_eq!(metadata.tags, vec!["coffee", "history"]);
    }

    #[test]
    fn rejects_metadata_without_title() {
        assert!(parse_metadata(r#"{"title": "  "}"#).is_none());
        assert!(parse_metadata("no json").is_none());
    }
}
