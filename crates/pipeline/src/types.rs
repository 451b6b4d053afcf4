use std::{fmt, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ErrorKind, PipelineError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(JobId)
    }
}

/// Narration voices, identified by the speech service's voice ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Voice {
    #[default]
    #[serde(rename = "en_us_001")]
    EnUsFemale1,
    #[serde(rename = "en_us_002")]
    EnUsFemale2,
    #[serde(rename = "en_us_006")]
    EnUsMale1,
    #[serde(rename = "en_us_007")]
    EnUsMale2,
    #[serde(rename = "en_us_010")]
    EnUsMale4,
    #[serde(rename = "en_uk_001")]
    EnUkMale1,
    #[serde(rename = "en_uk_003")]
    EnUkMale2,
    #[serde(rename = "en_au_001")]
    EnAuFemale,
    #[serde(rename = "en_au_002")]
    EnAuMale,
    #[serde(rename = "fr_001")]
    FrMale1,
    #[serde(rename = "de_001")]
    DeFemale,
    #[serde(rename = "es_002")]
    EsMale,
}

impl Voice {
    pub const ALL: [Voice; 12] = [
        Voice::EnUsFemale1,
        Voice::EnUsFemale2,
        Voice::EnUsMale1,
        Voice::EnUsMale2,
        Voice::EnUsMale4,
        Voice::EnUkMale1,
        Voice::EnUkMale2,
        Voice::EnAuFemale,
        Voice::EnAuMale,
        Voice::FrMale1,
        Voice::DeFemale,
        Voice::EsMale,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            Voice::EnUsFemale1 => "en_us_001",
            Voice::EnUsFemale2 => "en_us_002",
            Voice::EnUsMale1 => "en_us_006",
            Voice::EnUsMale2 => "en_us_007",
            Voice::EnUsMale4 => "en_us_010",
            Voice::EnUkMale1 => "en_uk_001",
            Voice::EnUkMale2 => "en_uk_003",
            Voice::EnAuFemale => "en_au_001",
            Voice::EnAuMale => "en_au_002",
            Voice::FrMale1 => "fr_001",
            Voice::DeFemale => "de_001",
            Voice::EsMale => "es_002",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Voice::EnUsFemale1 => "English US, female",
            Voice::EnUsFemale2 => "English US, female (alt)",
            Voice::EnUsMale1 => "English US, male",
            Voice::EnUsMale2 => "English US, male (alt)",
            Voice::EnUsMale4 => "English US, male (deep)",
            Voice::EnUkMale1 => "English UK, male",
            Voice::EnUkMale2 => "English UK, male (alt)",
            Voice::EnAuFemale => "English AU, female",
            Voice::EnAuMale => "English AU, male",
            Voice::FrMale1 => "French, male",
            Voice::DeFemale => "German, female",
            Voice::EsMale => "Spanish, male",
        }
    }
}

impl fmt::Display for Voice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Voice {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Voice::ALL
            .into_iter()
            .find(|v| v.id() == s.trim())
            .ok_or_else(|| PipelineError::InvalidRequest {
                reason: format!("unknown voice id {s:?}"),
            })
    }
}

/// One end-to-end generation request. Immutable once accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub topic: String,
    pub voice: Voice,
    pub publish: bool,
}

impl GenerationRequest {
    pub const MAX_TOPIC_CHARS: usize = 200;

    pub fn new(topic: impl Into<String>, voice: Voice, publish: bool) -> Result<Self, PipelineError> {
        let request = Self {
            topic: topic.into().trim().to_string(),
            voice,
            publish,
        };
        request.validate()?;
        Ok(request)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        let topic = self.topic.trim();
        if topic.is_empty() {
            return Err(PipelineError::InvalidRequest {
                reason: "topic must not be empty".into(),
            });
        }
        if topic.chars().count() > Self::MAX_TOPIC_CHARS {
            return Err(PipelineError::InvalidRequest {
                reason: format!("topic is longer than {} characters", Self::MAX_TOPIC_CHARS),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Script,
    Footage,
    Narration,
    Subtitles,
    Render,
    Publish,
}

impl Stage {
    pub const COUNT: usize = 6;
    pub const ALL: [Stage; Stage::COUNT] = [
        Stage::Script,
        Stage::Footage,
        Stage::Narration,
        Stage::Subtitles,
        Stage::Render,
        Stage::Publish,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Script => "script",
            Stage::Footage => "footage",
            Stage::Narration => "narration",
            Stage::Subtitles => "subtitles",
            Stage::Render => "render",
            Stage::Publish => "publish",
        }
    }

    /// 1-based position in the pipeline.
    pub fn ordinal(&self) -> usize {
        match self {
            Stage::Script => 1,
            Stage::Footage => 2,
            Stage::Narration => 3,
            Stage::Subtitles => 4,
            Stage::Render => 5,
            Stage::Publish => 6,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Stage::Script => "Generating script",
            Stage::Footage => "Finding stock footage",
            Stage::Narration => "Synthesizing narration",
            Stage::Subtitles => "Deriving subtitles",
            Stage::Render => "Rendering video",
            Stage::Publish => "Uploading video",
        }
    }

    /// Short operator hints shown alongside a failure at this stage.
    pub fn suggestions(&self) -> &'static [&'static str] {
        match self {
            Stage::Script => &[
                "Try a simpler or more specific topic",
                "Check that the language model API key is valid",
            ],
            Stage::Footage => &[
                "Try a topic with more common, visual keywords",
                "Check your Pexels API key",
            ],
            Stage::Narration => &[
                "Check your TikTok session id",
                "Try a different voice",
            ],
            Stage::Subtitles => &["Switch the caption strategy to heuristic"],
            Stage::Render => &["Check that ffmpeg is installed and supports libx264"],
            Stage::Publish => &[
                "Refresh the YouTube access token",
                "Try again in a few minutes",
            ],
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Narration text plus visual search terms, as produced by the language model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Script {
    pub narration: String,
    pub search_terms: Vec<String>,
}

/// A stock-footage search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FootageCandidate {
    pub id: String,
    pub url: String,
    pub duration: f64,
    pub width: u32,
    pub height: u32,
}

impl FootageCandidate {
    pub fn short_side(&self) -> u32 {
        self.width.min(self.height)
    }
}

/// A downloaded clip owned by the job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clip {
    pub source_id: String,
    pub path: PathBuf,
    pub duration: f64,
    pub dimensions: Dimensions,
}

/// Synthesized narration on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrationTrack {
    pub path: PathBuf,
    pub duration: f64,
}

/// One timed caption, offsets in seconds from the start of the narration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptionSegment {
    pub text: String,
    pub start: f64,
    pub end: f64,
}

impl CaptionSegment {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// A word with its timing, as returned by a transcription service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedWord {
    pub text: String,
    pub start: f64,
    pub end: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub const VERTICAL_HD: Dimensions = Dimensions {
        width: 1080,
        height: 1920,
    };

    pub fn aspect(&self) -> f64 {
        self.width as f64 / self.height as f64
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Dimensions {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .split_once(['x', 'X'])
            .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {s:?}"))?;
        let width = w.trim().parse::<u32>().map_err(|e| e.to_string())?;
        let height = h.trim().parse::<u32>().map_err(|e| e.to_string())?;
        if width == 0 || height == 0 {
            return Err("dimensions must be non-zero".into());
        }
        Ok(Dimensions { width, height })
    }
}

/// Terminal artifact of the render stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedVideo {
    pub path: PathBuf,
    pub duration: f64,
    pub dimensions: Dimensions,
}

/// Title, description and tags sent along with an upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishMetadata {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
}

/// What a successful job leaves behind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOutput {
    /// Location of the rendered file, absent when it was removed after publishing.
    pub video_path: Option<PathBuf>,
    pub duration: f64,
    pub dimensions: Dimensions,
    pub file_size: Option<String>,
    pub remote_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running {
        stage: Stage,
    },
    Succeeded(JobOutput),
    /// `stage` is the stage that was not begun, or the final stage when the
    /// cancellation arrived while it was running.
    Cancelled {
        stage: Stage,
    },
    Failed {
        stage: Stage,
        kind: ErrorKind,
        cause: String,
    },
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded(_) | JobStatus::Cancelled { .. } | JobStatus::Failed { .. }
        )
    }

    pub fn stage(&self) -> Option<Stage> {
        match self {
            JobStatus::Queued | JobStatus::Succeeded(_) => None,
            JobStatus::Running { stage }
            | JobStatus::Cancelled { stage }
            | JobStatus::Failed { stage, .. } => Some(*stage),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelAck {
    /// The flag is set; the job stops at the next stage boundary.
    Requested,
    AlreadyFinished,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn voice_round_trips_through_its_id() {
        for voice in Voice::ALL {
            assert_eq!(voice.id().parse::<Voice>().unwrap(), voice);
        }
        assert!("en_us_999".parse::<Voice>().is_err());
    }

    #[test]
    fn voice_serializes_as_id() {
        let json = serde_json::to_string(&Voice::EnUkMale1).unwrap();
        assert_eq!(json, "\"en_uk_001\"");
    }

    #[test]
    fn request_rejects_blank_topic() {
        let err = GenerationRequest::new("   ", Voice::default(), false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Input);
    }

    #[test]
    fn request_trims_topic() {
        let request = GenerationRequest::new("  history of coffee ", Voice::default(), false).unwrap();
        assert_eq!(request.topic, "history of coffee");
    }

    #[test]
    fn parses_dimensions() {
        assert_eq!("1080x1920".parse::<Dimensions>().unwrap(), Dimensions::VERTICAL_HD);
        assert!("1080".parse::<Dimensions>().is_err());
        assert!("0x10".parse::<Dimensions>().is_err());
    }

    #[test]
    fn status_reports_stage() {
        let failed = JobStatus::Failed {
            stage: Stage::Footage,
            kind: ErrorKind::Content,
            cause: "none".into(),
        };
        assert!(failed.is_terminal());
        assert_eq!(failed.stage(), Some(Stage::Footage));
        assert!(!JobStatus::Running { stage: Stage::Render }.is_terminal());
    }
}
