use std::{
    path::PathBuf,
    time::{Duration, Instant},
};

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use reelsmith_pipeline::{
    CaptionStrategy, Collaborators, Controller, Dimensions, GenerationRequest, JobHandle,
    JobOutput, JobStatus, PipelineConfig, Provider, Stage, Voice,
};
use tracing_subscriber::EnvFilter;

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 60.0 {
        format!("{:.1}s", secs)
    } else {
        format!("{:.0}m {:.0}s", (secs / 60.0).floor(), secs % 60.0)
    }
}

/// CLI wrapper for Provider enum (needed for clap ValueEnum)
#[derive(Clone, Default, ValueEnum)]
enum CliProvider {
    #[default]
    Openai,
    Grok,
    Gemini,
}

impl From<CliProvider> for Provider {
    fn from(cli: CliProvider) -> Self {
        match cli {
            CliProvider::Openai => Provider::Openai,
            CliProvider::Grok => Provider::Grok,
            CliProvider::Gemini => Provider::Gemini,
        }
    }
}

#[derive(Parser)]
#[command(name = "reelsmith")]
#[command(about = "Turn a topic into a narrated, captioned vertical short video")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a video for a topic
    Generate {
        /// What the video is about, e.g. "history of coffee"
        topic: String,

        /// Narration voice id (see `reelsmith voices`)
        #[arg(short, long, default_value = "en_us_001")]
        voice: Voice,

        /// Upload the rendered video to YouTube
        #[arg(long)]
        publish: bool,

        /// Language model provider for the script
        #[arg(short, long, default_value = "openai")]
        provider: CliProvider,

        /// Directory for rendered videos
        #[arg(short, long, env = "REELSMITH_OUTPUT_DIR")]
        output_dir: Option<PathBuf>,

        /// Caption timing: heuristic or transcription
        #[arg(long, env = "REELSMITH_CAPTIONS")]
        captions: Option<CaptionStrategy>,

        /// Number of stock clips to cut together
        #[arg(long)]
        clips: Option<usize>,

        /// Output size, e.g. 1080x1920
        #[arg(long)]
        size: Option<Dimensions>,

        /// Keep the local file after a successful upload
        #[arg(long)]
        keep: bool,
    },
    /// List the available narration voices
    Voices,
}

fn create_spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

fn step_message(stage: Stage, total: usize) -> String {
    format!(
        "{} {}...",
        style(format!("[{}/{}]", stage.ordinal(), total)).dim(),
        stage.label()
    )
}

struct Step {
    stage: Stage,
    spinner: ProgressBar,
    started: Instant,
}

impl Step {
    fn start(stage: Stage, total: usize) -> Self {
        Self {
            stage,
            spinner: create_spinner(&step_message(stage, total)),
            started: Instant::now(),
        }
    }

    fn done(self) {
        self.spinner.finish_with_message(format!(
            "{} {} {}",
            style("✓").green().bold(),
            self.stage.label(),
            style(format!("[{}]", format_duration(self.started.elapsed()))).dim()
        ));
    }

    fn stopped(self, mark: console::StyledObject<&str>, note: &str) {
        self.spinner
            .abandon_with_message(format!("{} {} {}", mark, self.stage.label(), style(note).dim()));
    }
}

/// Render status changes as spinners until the job is terminal. The first
/// Ctrl-C requests cancellation; a second abandons the stage in flight.
async fn follow(controller: &Controller, handle: JobHandle, total: usize) -> JobStatus {
    let id = handle.id;
    let mut status = handle.watch();
    let mut current: Option<Step> = None;
    let mut cancel_sent = false;

    loop {
        let snapshot = status.borrow_and_update().clone();
        match &snapshot {
            JobStatus::Running { stage } => {
                if current.as_ref().map(|s| s.stage) != Some(*stage) {
                    if let Some(step) = current.take() {
                        step.done();
                    }
                    current = Some(Step::start(*stage, total));
                }
            }
            JobStatus::Succeeded(_) => {
                if let Some(step) = current.take() {
                    step.done();
                }
                return snapshot;
            }
            JobStatus::Failed { .. } => {
                if let Some(step) = current.take() {
                    step.stopped(style("✗").red().bold(), "(failed)");
                }
                return snapshot;
            }
            JobStatus::Cancelled { .. } => {
                if let Some(step) = current.take() {
                    step.stopped(style("■").yellow().bold(), "(cancelled)");
                }
                return snapshot;
            }
            JobStatus::Queued => {}
        }

        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    return status.borrow().clone();
                }
            }
            _ = tokio::signal::ctrl_c() => {
                let result = if cancel_sent {
                    // Second Ctrl-C: stop waiting for the stage in flight.
                    if let Some(step) = &current {
                        step.spinner.set_message("Stopping now...");
                    }
                    controller.abandon(id).await
                } else {
                    cancel_sent = true;
                    if let Some(step) = &current {
                        step.spinner
                            .set_message("Cancelling after the current step (Ctrl-C again to stop now)...");
                    }
                    controller.cancel(id)
                };
                if let Err(e) = result {
                    eprintln!("{} {}", style("Error:").red().bold(), e);
                }
            }
        }
    }
}

fn print_output(output: &JobOutput) {
    println!("{}", style("─".repeat(60)).dim());
    if let Some(path) = &output.video_path {
        println!("{} {}", style("Saved:").dim(), style(path.display()).cyan());
    }
    if let Some(remote_id) = &output.remote_id {
        println!(
            "{} {}",
            style("Published:").dim(),
            style(format!("https://youtube.com/shorts/{remote_id}")).cyan()
        );
    }
    println!(
        "{} {:.1}s, {}{}",
        style("Video:").dim(),
        output.duration,
        output.dimensions,
        output
            .file_size
            .as_ref()
            .map(|s| format!(", {s}"))
            .unwrap_or_default()
    );
}

fn init_tracing() {
    // Spinners own stdout; logs go to stderr and stay quiet unless asked for.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn list_voices() {
    println!("\n{}\n", style("Voices").cyan().bold());
    for voice in Voice::ALL {
        let marker = if voice == Voice::default() { " (default)" } else { "" };
        println!(
            "  {:<10} {}{}",
            style(voice.id()).yellow(),
            voice.description(),
            style(marker).dim()
        );
    }
    println!();
}

#[allow(clippy::too_many_arguments)]
async fn generate(
    topic: String,
    voice: Voice,
    publish: bool,
    provider: Provider,
    output_dir: Option<PathBuf>,
    captions: Option<CaptionStrategy>,
    clips: Option<usize>,
    size: Option<Dimensions>,
    keep: bool,
) -> Result<i32> {
    // Validate API key early
    if let Err(e) = provider.validate_api_key() {
        eprintln!("{} {}", style("Error:").red().bold(), e);
        return Ok(1);
    }

    let defaults = PipelineConfig::from_env();
    let config = PipelineConfig {
        output_dir: output_dir.unwrap_or(defaults.output_dir.clone()),
        caption_strategy: captions.unwrap_or(defaults.caption_strategy),
        clip_count: clips.unwrap_or(defaults.clip_count).max(1),
        target: size.unwrap_or(defaults.target),
        retain_published_video: keep || defaults.retain_published_video,
        ..defaults
    };

    let collaborators = Collaborators::from_env(provider, &config)?;
    let controller = Controller::launch(config, collaborators)?;

    let request = match GenerationRequest::new(topic, voice, publish) {
        Ok(request) => request,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            return Ok(1);
        }
    };

    println!(
        "\n{}  {}\n",
        style("reelsmith").cyan().bold(),
        style(&request.topic).dim()
    );
    println!("{}", style("─".repeat(60)).dim());

    let total = if publish { Stage::COUNT } else { Stage::COUNT - 1 };
    let started = Instant::now();
    let handle = match controller.start(request) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            return Ok(1);
        }
    };

    let code = match follow(&controller, handle, total).await {
        JobStatus::Succeeded(output) => {
            print_output(&output);
            0
        }
        JobStatus::Failed { stage, cause, .. } => {
            eprintln!("\n{} {}", style("Error:").red().bold(), cause);
            for hint in stage.suggestions() {
                eprintln!("  {} {}", style("→").dim(), hint);
            }
            1
        }
        JobStatus::Cancelled { stage } => {
            eprintln!(
                "\n{} at the {} stage",
                style("Cancelled").yellow().bold(),
                stage
            );
            130
        }
        JobStatus::Queued | JobStatus::Running { .. } => 1,
    };

    println!(
        "\n{} {}\n",
        style("Total time:").dim(),
        style(format_duration(started.elapsed())).cyan().bold()
    );
    controller.shutdown().await;
    Ok(code)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();

    let code = match cli.command {
        Command::Voices => {
            list_voices();
            0
        }
        Command::Generate {
            topic,
            voice,
            publish,
            provider,
            output_dir,
            captions,
            clips,
            size,
            keep,
        } => {
            generate(
                topic,
                voice,
                publish,
                provider.into(),
                output_dir,
                captions,
                clips,
                size,
                keep,
            )
            .await?
        }
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
