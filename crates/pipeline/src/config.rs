//! Pipeline configuration.

use std::{path::PathBuf, str::FromStr, time::Duration};

use reelsmith_core::{ConstantBackoff, ExponentialBackoff, RetryPolicy};
use serde::{Deserialize, Serialize};

use crate::{artifacts::default_work_root, types::Dimensions};

/// How caption timings are derived from the narration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptionStrategy {
    /// Spread the text over the audio in proportion to its length.
    #[default]
    Heuristic,
    /// Group word timestamps from a transcription service.
    Transcription,
}

impl FromStr for CaptionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "heuristic" => Ok(CaptionStrategy::Heuristic),
            "transcription" => Ok(CaptionStrategy::Transcription),
            other => Err(format!("unknown caption strategy {other:?}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Parent of the per-job temp directories.
    pub work_root: PathBuf,
    /// Where rendered videos are written.
    pub output_dir: PathBuf,
    /// Clips required before rendering.
    pub clip_count: usize,
    /// Candidates shorter than this are skipped (seconds).
    pub min_clip_duration: f64,
    /// Candidates whose shorter side is below this are skipped (pixels).
    pub min_clip_short_side: u32,
    /// Longest stretch of a single clip in the final cut (seconds).
    pub max_segment_duration: f64,
    pub candidates_per_term: usize,
    /// Tried after the script's own search terms.
    pub fallback_terms: Vec<String>,
    pub target: Dimensions,
    pub frame_rate: u32,
    pub caption_strategy: CaptionStrategy,
    pub max_caption_chars: usize,
    /// Extra weight, in characters, given to a sentence end by the heuristic captioner.
    pub caption_pause_weight: f64,
    pub script_sentences: usize,
    pub min_script_chars: usize,
    /// Transient collaborator failures.
    pub collaborator_retry: RetryPolicy,
    /// Unusable collaborator output (empty script, malformed JSON).
    pub content_retry: RetryPolicy,
    pub publish_retry: RetryPolicy,
    pub retain_published_video: bool,
    /// Terminal statuses kept for `status` queries.
    pub status_history: usize,
    /// How long shutdown waits for the stage in flight before abandoning it.
    pub shutdown_grace: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            work_root: default_work_root(),
            output_dir: PathBuf::from("output"),
            clip_count: 5,
            min_clip_duration: 5.0,
            min_clip_short_side: 720,
            max_segment_duration: 5.0,
            candidates_per_term: 15,
            fallback_terms: ["nature", "city", "technology", "abstract", "motion"]
                .into_iter()
                .map(String::from)
                .collect(),
            target: Dimensions::VERTICAL_HD,
            frame_rate: 30,
            caption_strategy: CaptionStrategy::Heuristic,
            max_caption_chars: 32,
            caption_pause_weight: 6.0,
            script_sentences: 4,
            min_script_chars: 50,
            collaborator_retry: RetryPolicy::new(
                3,
                ExponentialBackoff {
                    base: Duration::from_millis(500),
                    max: Duration::from_secs(8),
                },
            ),
            content_retry: RetryPolicy::new(3, ConstantBackoff(Duration::from_secs(2))),
            publish_retry: RetryPolicy::new(
                4,
                ExponentialBackoff {
                    base: Duration::from_secs(1),
                    max: Duration::from_secs(30),
                },
            ),
            retain_published_video: false,
            status_history: 64,
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

impl PipelineConfig {
    /// Defaults overridden by `REELSMITH_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            work_root: env_parse("REELSMITH_WORK_DIR").unwrap_or(defaults.work_root),
            output_dir: env_parse("REELSMITH_OUTPUT_DIR").unwrap_or(defaults.output_dir),
            clip_count: env_parse("REELSMITH_CLIP_COUNT").unwrap_or(defaults.clip_count),
            min_clip_duration: env_parse("REELSMITH_MIN_CLIP_SECONDS")
                .unwrap_or(defaults.min_clip_duration),
            min_clip_short_side: env_parse("REELSMITH_MIN_CLIP_SHORT_SIDE")
                .unwrap_or(defaults.min_clip_short_side),
            max_segment_duration: env_parse("REELSMITH_MAX_SEGMENT_SECONDS")
                .unwrap_or(defaults.max_segment_duration),
            fallback_terms: std::env::var("REELSMITH_FALLBACK_TERMS")
                .ok()
                .map(|s| {
                    s.split(',')
                        .map(|t| t.trim().to_string())
                        .filter(|t| !t.is_empty())
                        .collect()
                })
                .unwrap_or(defaults.fallback_terms),
            target: env_parse("REELSMITH_TARGET_SIZE").unwrap_or(defaults.target),
            frame_rate: env_parse("REELSMITH_FRAME_RATE").unwrap_or(defaults.frame_rate),
            caption_strategy: env_parse("REELSMITH_CAPTIONS").unwrap_or(defaults.caption_strategy),
            max_caption_chars: env_parse("REELSMITH_MAX_CAPTION_CHARS")
                .unwrap_or(defaults.max_caption_chars),
            script_sentences: env_parse("REELSMITH_SCRIPT_SENTENCES")
                .unwrap_or(defaults.script_sentences),
            retain_published_video: env_parse("REELSMITH_KEEP_PUBLISHED")
                .unwrap_or(defaults.retain_published_video),
            shutdown_grace: env_parse("REELSMITH_SHUTDOWN_GRACE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.shutdown_grace),
            ..defaults
        }
    }

    /// Retry policies that never sleep, for tests and dry runs.
    pub fn without_backoff(mut self) -> Self {
        use reelsmith_core::NoBackoff;

        self.collaborator_retry = RetryPolicy::new(self.collaborator_retry.max_attempts, NoBackoff);
        self.content_retry = RetryPolicy::new(self.content_retry.max_attempts, NoBackoff);
        self.publish_retry = RetryPolicy::new(self.publish_retry.max_attempts, NoBackoff);
        self
    }
}
