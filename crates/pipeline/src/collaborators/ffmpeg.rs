use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use crate::{
    collaborators::{MediaEngine, MediaInfo, excerpt},
    error::{PipelineError, Result},
    stages::assembly::RenderPlan,
    types::Dimensions,
};

/// Caption look burned into the video.
const SUBTITLE_STYLE: &str = "FontName=Arial,FontSize=18,PrimaryColour=&H00FFFFFF,OutlineColour=&H00000000,BorderStyle=1,Outline=2,Shadow=0,Alignment=2,MarginV=60";

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

impl ProbeOutput {
    fn into_info(self) -> Option<MediaInfo> {
        let duration = self.format?.duration?.parse::<f64>().ok()?;
        let dimensions = self
            .streams
            .iter()
            .find_map(|s| Some(Dimensions { width: s.width?, height: s.height? }));
        Some(MediaInfo { duration, dimensions })
    }
}

/// Media engine backed by the `ffmpeg` and `ffprobe` binaries.
#[derive(Debug, Clone)]
pub struct Ffmpeg {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl Default for Ffmpeg {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }
}

impl Ffmpeg {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_binaries(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    /// Whether the ffmpeg binary can be launched.
    pub async fn available(&self) -> bool {
        Command::new(&self.ffmpeg)
            .arg("-version")
            .output()
            .await
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    /// Convert any audio file to 16 kHz mono wav.
    pub async fn to_wav(&self, input: &Path, output: &Path) -> Result<()> {
        let result = Command::new(&self.ffmpeg)
            .arg("-y")
            .arg("-i")
            .arg(input)
            .args(["-ar", "16000", "-ac", "1"])
            .arg(output)
            .output()
            .await
            .map_err(|e| PipelineError::RenderFailure {
                reason: format!("failed to launch ffmpeg: {e}"),
            })?;

        if !result.status.success() {
            debug!(status = %result.status, "audio conversion failed");
            return Err(tool_failed("ffmpeg", "convert the narration audio", &result.stderr));
        }
        Ok(())
    }
}

#[async_trait]
impl MediaEngine for Ffmpeg {
    async fn probe(&self, path: &Path) -> Result<MediaInfo> {
        let output = Command::new(&self.ffprobe)
            .args(["-v", "error", "-show_entries", "format=duration:stream=width,height"])
            .args(["-of", "json"])
            .arg(path)
            .output()
            .await
            .map_err(|e| PipelineError::RenderFailure {
                reason: format!("failed to launch ffprobe: {e}"),
            })?;

        if !output.status.success() {
            debug!(status = %output.status, path = %path.display(), "probe failed");
            return Err(tool_failed("ffprobe", "read a media file", &output.stderr));
        }

        let parsed: ProbeOutput = serde_json::from_slice(&output.stdout)?;
        parsed.into_info().ok_or_else(|| PipelineError::RenderFailure {
            reason: format!("ffprobe reported no duration for {}", path.display()),
        })
    }

    async fn render(&self, plan: &RenderPlan) -> Result<()> {
        let args = render_args(plan);
        debug!(segments = plan.segments.len(), output = %plan.output.display(), "running ffmpeg");

        let output = Command::new(&self.ffmpeg)
            .args(&args)
            .output()
            .await
            .map_err(|e| PipelineError::RenderFailure {
                reason: format!("failed to launch ffmpeg: {e}"),
            })?;

        if !output.status.success() {
            debug!(status = %output.status, "render failed");
            return Err(tool_failed("ffmpeg", "encode the video", &output.stderr));
        }
        Ok(())
    }
}

/// The tool's own output only goes to the debug log; the error carries a
/// fixed reason.
fn tool_failed(tool: &'static str, action: &str, stderr: &[u8]) -> PipelineError {
    debug!(tool, stderr = %excerpt(&String::from_utf8_lossy(stderr)), "tool output");
    PipelineError::RenderFailure {
        reason: format!("{tool} failed to {action}"),
    }
}

/// Escape a path for use inside a filtergraph option value.
fn escape_filter_path(path: &Path) -> String {
    path.to_string_lossy()
        .replace('\\', "/")
        .replace(':', "\\:")
        .replace('\'', "\\'")
}

fn filter_graph(plan: &RenderPlan) -> String {
    let target = plan.target;
    let mut graph = String::new();

    for (i, segment) in plan.segments.iter().enumerate() {
        let crop = segment.crop;
        graph.push_str(&format!(
            "[{i}:v]trim=duration={:.3},setpts=PTS-STARTPTS,crop={}:{}:{}:{},scale={}:{},setsar=1,fps={}[v{i}];",
            segment.duration,
            crop.width,
            crop.height,
            crop.x,
            crop.y,
            target.width,
            target.height,
            plan.frame_rate,
        ));
    }
    for i in 0..plan.segments.len() {
        graph.push_str(&format!("[v{i}]"));
    }
    graph.push_str(&format!("concat=n={}:v=1:a=0[cat]", plan.segments.len()));

    match &plan.subtitles {
        Some(srt) => graph.push_str(&format!(
            ";[cat]subtitles='{}':force_style='{SUBTITLE_STYLE}'[out]",
            escape_filter_path(srt)
        )),
        None => graph.push_str(";[cat]null[out]"),
    }
    graph
}

fn render_args(plan: &RenderPlan) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-y".into(), "-loglevel".into(), "error".into()];
    for segment in &plan.segments {
        args.push("-i".into());
        args.push(segment.clip.clone().into_os_string());
    }
    args.push("-i".into());
    args.push(plan.audio.clone().into_os_string());

    args.push("-filter_complex".into());
    args.push(filter_graph(plan).into());

    let audio_input = plan.segments.len();
    for arg in [
        "-map".to_string(),
        "[out]".to_string(),
        "-map".to_string(),
        format!("{audio_input}:a"),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-preset".to_string(),
        "veryfast".to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        "192k".to_string(),
        "-t".to_string(),
        format!("{:.3}", plan.duration),
        "-movflags".to_string(),
        "+faststart".to_string(),
    ] {
        args.push(arg.into());
    }
    args.push(plan.output.clone().into_os_string());
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::assembly::{Crop, RenderSegment};

    fn plan(subtitles: Option<PathBuf>) -> RenderPlan {
        RenderPlan {
            segments: vec![
                RenderSegment {
                    clip: PathBuf::from("/tmp/job/clips/clip_00.mp4"),
                    duration: 5.0,
                    crop: Crop { width: 1080, height: 1920, x: 0, y: 0 },
                },
                RenderSegment {
                    clip: PathBuf::from("/tmp/job/clips/clip_01.mp4"),
                    duration: 2.5,
                    crop: Crop { width: 607, height: 1080, x: 656, y: 0 },
                },
            ],
            audio: PathBuf::from("/tmp/job/narration.mp3"),
            subtitles,
            output: PathBuf::from("output/job.mp4"),
            target: Dimensions::VERTICAL_HD,
            frame_rate: 30,
            duration: 7.5,
        }
    }

    #[test]
    fn filter_graph_crops_scales_and_concats() {
        let graph = filter_graph(&plan(Some(PathBuf::from("/tmp/job/captions.srt"))));

        assert!(graph.contains("[1:v]trim=duration=2.500,setpts=PTS-STARTPTS,crop=607:1080:656:0,scale=1080:1920"));
        assert!(graph.contains("[v0][v1]concat=n=2:v=1:a=0[cat]"));
        assert!(graph.contains("subtitles='/tmp/job/captions.srt'"));
        assert!(graph.ends_with("[out]"));
    }

    #[test]
    fn narration_is_mapped_after_clip_inputs() {
        let args: Vec<String> = render_args(&plan(None))
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        let map = args.iter().position(|a| a == "2:a").unwrap();
        assert_eq!(args[map - 1], "-map");
        let t = args.iter().position(|a| a == "-t").unwrap();
        assert_eq!(args[t + 1], "7.500");
        assert_eq!(args.last().unwrap(), "output/job.mp4");
    }

    #[test]
    fn escapes_filter_paths() {
        assert_eq!(escape_filter_path(Path::new("C:\\a'b.srt")), "C\\:/a\\'b.srt");
    }

    #[test]
    fn probe_output_reads_duration_and_size() {
        let json = r#"{"streams":[{"width":1920,"height":1080}],"format":{"duration":"12.480000"}}"#;
        let info = serde_json::from_str::<ProbeOutput>(json).unwrap().into_info().unwrap();
        assert_eq!(info.dimensions, Some(Dimensions { width: 1920, height: 1080 }));
        assert!((info.duration - 12.48).abs() < 1e-9);

        let audio = r#"{"streams":[{}],"format":{"duration":"3.2"}}"#;
        let info = serde_json::from_str::<ProbeOutput>(audio).unwrap().into_info().unwrap();
        assert_eq!(info.dimensions, None);
    }

    #[test]
    fn tool_output_stays_out_of_the_error() {
        let stderr = b"[libx264 @ 0x55d] /home/alice/secret/clip_00.mp4: Invalid data found";
        let err = tool_failed("ffmpeg", "encode the video", stderr);

        let message = err.to_string();
        assert!(message.contains("ffmpeg failed to encode the video"), "{message}");
        assert!(!message.contains("alice"));
        assert!(!message.contains("libx264"));
    }
}
