use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use tokio::fs;
use tracing::{debug, info};

use crate::{
    artifacts::{ArtifactLedger, JobPaths},
    collaborators::MediaEngine,
    config::PipelineConfig,
    error::{PipelineError, Result},
    types::{Clip, Dimensions, NarrationTrack, RenderedVideo},
};

/// Segments shorter than this are dropped rather than rendered as a flash.
const MIN_SEGMENT_SECONDS: f64 = 0.05;

/// A source window in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crop {
    pub width: u32,
    pub height: u32,
    pub x: u32,
    pub y: u32,
}

/// The largest window of `source` with the aspect ratio of `target`,
/// centered on the frame. Fails on an empty frame.
pub fn center_crop(source: Dimensions, target: Dimensions) -> Result<Crop> {
    if source.width == 0 || source.height == 0 || target.width == 0 || target.height == 0 {
        return Err(PipelineError::RenderFailure {
            reason: format!("cannot crop a {source} frame to {target}"),
        });
    }
    let target_aspect = target.aspect();
    let crop = if source.aspect() > target_aspect {
        let width = ((source.height as f64 * target_aspect).round() as u32).clamp(1, source.width);
        Crop {
            width,
            height: source.height,
            x: (source.width - width) / 2,
            y: 0,
        }
    } else {
        let height = ((source.width as f64 / target_aspect).round() as u32).clamp(1, source.height);
        Crop {
            width: source.width,
            height,
            x: 0,
            y: (source.height - height) / 2,
        }
    };
    Ok(crop)
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderSegment {
    pub clip: PathBuf,
    /// Seconds taken from the start of the clip.
    pub duration: f64,
    pub crop: Crop,
}

/// Everything the media engine needs to produce the final file.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderPlan {
    pub segments: Vec<RenderSegment>,
    /// The sole audio stream.
    pub audio: PathBuf,
    pub subtitles: Option<PathBuf>,
    pub output: PathBuf,
    pub target: Dimensions,
    pub frame_rate: u32,
    pub duration: f64,
}

/// Cut the clips, cycling through them as often as needed, so that the
/// segments cover exactly `duration` seconds.
pub fn plan_segments(
    clips: &[Clip],
    duration: f64,
    max_segment: f64,
    target: Dimensions,
) -> Result<Vec<RenderSegment>> {
    let usable: Vec<&Clip> = clips.iter().filter(|c| c.duration >= MIN_SEGMENT_SECONDS).collect();
    if usable.is_empty() {
        return Err(PipelineError::RenderFailure {
            reason: "no clips to render".into(),
        });
    }

    let max_segment = max_segment.max(MIN_SEGMENT_SECONDS);
    let mut segments = Vec::new();
    let mut remaining = duration;

    for clip in usable.iter().cycle() {
        if remaining < MIN_SEGMENT_SECONDS {
            break;
        }
        let take = clip.duration.min(max_segment).min(remaining);
        segments.push(RenderSegment {
            clip: clip.path.clone(),
            duration: take,
            crop: center_crop(clip.dimensions, target)?,
        });
        remaining -= take;
    }

    // Fold a sub-threshold tail into the last segment.
    if remaining > 0.0
        && let Some(last) = segments.last_mut()
    {
        last.duration += remaining;
    }
    Ok(segments)
}

pub struct VideoAssembler {
    media: Arc<dyn MediaEngine>,
    config: Arc<PipelineConfig>,
}

impl VideoAssembler {
    pub fn new(media: Arc<dyn MediaEngine>, config: Arc<PipelineConfig>) -> Self {
        Self { media, config }
    }

    pub fn plan(
        &self,
        clips: &[Clip],
        narration: &NarrationTrack,
        subtitles: Option<&Path>,
        output: PathBuf,
    ) -> Result<RenderPlan> {
        if !narration.duration.is_finite() || narration.duration <= 0.0 {
            return Err(PipelineError::RenderFailure {
                reason: "narration has no duration".into(),
            });
        }
        let segments = plan_segments(
            clips,
            narration.duration,
            self.config.max_segment_duration,
            self.config.target,
        )?;
        Ok(RenderPlan {
            segments,
            audio: narration.path.clone(),
            subtitles: subtitles.map(Path::to_path_buf),
            output,
            target: self.config.target,
            frame_rate: self.config.frame_rate,
            duration: narration.duration,
        })
    }

    /// Render once; encoding failures are deterministic and not retried.
    pub async fn assemble(
        &self,
        clips: &[Clip],
        narration: &NarrationTrack,
        subtitles: Option<&Path>,
        ledger: &ArtifactLedger,
        paths: &JobPaths,
    ) -> Result<RenderedVideo> {
        let output = paths.output();
        let plan = self.plan(clips, narration, subtitles, output.clone())?;

        if let Some(dir) = output.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .await
                .map_err(|e| PipelineError::io(dir, e))?;
        }
        ledger.track(&output);

        debug!(segments = plan.segments.len(), duration = plan.duration, "rendering");
        self.media.render(&plan).await?;

        if !fs::try_exists(&output).await.unwrap_or(false) {
            return Err(PipelineError::RenderFailure {
                reason: "the media engine produced no output file".into(),
            });
        }

        info!(
            output = %output.display(),
            duration = plan.duration,
            dimensions = %plan.target,
            "video rendered"
        );
        Ok(RenderedVideo {
            path: output,
            duration: plan.duration,
            dimensions: plan.target,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clip(name: &str, duration: f64, width: u32, height: u32) -> Clip {
        Clip {
            source_id: name.into(),
            path: PathBuf::from(format!("/clips/{name}.mp4")),
            duration,
            dimensions: Dimensions { width, height },
        }
    }

    #[test]
    fn crops_landscape_to_vertical_center() {
        let crop = center_crop(Dimensions { width: 1920, height: 1080 }, Dimensions::VERTICAL_HD).unwrap();
        assert_eq!(crop, Crop { width: 608, height: 1080, x: 656, y: 0 });
    }

    #[test]
    fn crops_tall_sources_vertically() {
        let crop = center_crop(Dimensions { width: 1080, height: 2400 }, Dimensions::VERTICAL_HD).unwrap();
        assert_eq!(crop, Crop { width: 1080, height: 1920, x: 0, y: 240 });
    }

    #[test]
    fn empty_frames_are_a_render_failure() {
        let err = center_crop(Dimensions { width: 0, height: 1080 }, Dimensions::VERTICAL_HD).unwrap_err();
        assert!(matches!(err, PipelineError::RenderFailure { .. }));

        let clips = vec![clip("broken", 6.0, 1920, 0)];
        assert!(plan_segments(&clips, 5.0, 5.0, Dimensions::VERTICAL_HD).is_err());
    }

    #[test]
    fn segments_cover_the_narration_exactly() {
        let clips = vec![clip("a", 3.0, 1080, 1920), clip("b", 10.0, 1920, 1080)];
        let segments = plan_segments(&clips, 12.0, 5.0, Dimensions::VERTICAL_HD).unwrap();

        let total: f64 = segments.iter().map(|s| s.duration).sum();
        assert!((total - 12.0).abs() < 1e-9);
        assert!(segments.iter().all(|s| s.duration <= 5.0 + 1e-9));
    }

    #[test]
    fn loops_clips_when_footage_is_short() {
        let clips = vec![clip("a", 2.0, 1080, 1920), clip("b", 2.0, 1080, 1920)];
        let segments = plan_segments(&clips, 7.0, 5.0, Dimensions::VERTICAL_HD).unwrap();

        let names: Vec<_> = segments
            .iter()
            .map(|s| s.clip.file_stem().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, vec!["a", "b", "a", "b"]);
        assert!((segments[3].duration - 1.0).abs() < 1e-9);
    }

    #[test]
    fn no_clips_is_a_render_failure() {
        let err = plan_segments(&[], 5.0, 5.0, Dimensions::VERTICAL_HD).unwrap_err();
        assert!(matches!(err, PipelineError::RenderFailure { .. }));
    }
}
