//! Deterministic in-process collaborators for tests.
//!
//! Media files written by the doubles are tiny text stubs of the form
//! `fake-media duration=12.5 size=1080x1920`, which [`FakeMedia`] knows how
//! to probe.

use std::{
    collections::{HashMap, HashSet},
    path::Path,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::{fs, sync::Notify};

use crate::{
    collaborators::{
        Collaborators, FootageSearch, LanguageModel, MediaEngine, MediaInfo, SpeechSynthesizer,
        Transcriber, VideoHost,
    },
    config::PipelineConfig,
    error::{PipelineError, Result},
    stages::assembly::RenderPlan,
    types::{
        Dimensions, FootageCandidate, PublishMetadata, RenderedVideo, TimedWord, Voice,
    },
};

pub const DEFAULT_NARRATION: &str = "Coffee was first found in Ethiopia, where goat herders saw \
their animals dance after eating red berries. Monks brewed the beans to stay awake. Within a \
century coffee houses spread across the Middle East and Europe.";

pub fn media_stub(duration: f64, dimensions: Option<Dimensions>) -> String {
    match dimensions {
        Some(d) => format!("fake-media duration={duration} size={d}"),
        None => format!("fake-media duration={duration}"),
    }
}

fn parse_stub(raw: &str) -> Option<MediaInfo> {
    let mut fields = raw.split_whitespace();
    if fields.next()? != "fake-media" {
        return None;
    }
    let mut duration = None;
    let mut dimensions = None;
    for field in fields {
        match field.split_once('=')? {
            ("duration", v) => duration = v.parse::<f64>().ok(),
            ("size", v) => dimensions = v.parse::<Dimensions>().ok(),
            _ => {}
        }
    }
    Some(MediaInfo {
        duration: duration?,
        dimensions,
    })
}

/// Pipeline settings rooted in `root`, with retries that never sleep.
pub fn config(root: &Path) -> PipelineConfig {
    PipelineConfig {
        work_root: root.join("work"),
        output_dir: root.join("output"),
        clip_count: 3,
        shutdown_grace: Duration::from_millis(200),
        ..PipelineConfig::default().without_backoff()
    }
}

/// A full set of doubles: a valid script, three usable clips per term,
/// 12.5 s of narration and no video host.
pub fn collaborators() -> Collaborators {
    Collaborators {
        language_model: Arc::new(FakeLanguageModel::new()),
        footage: Arc::new(FakeFootage::stocked(3)),
        speech: Arc::new(FakeSpeech::new(12.5)),
        transcriber: None,
        media: Arc::new(FakeMedia::new()),
        video_host: None,
    }
}

#[derive(Clone)]
pub struct FakeLanguageModel {
    replies: Arc<Mutex<Vec<String>>>,
    fallback: String,
    calls: Arc<AtomicUsize>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl FakeLanguageModel {
    pub fn new() -> Self {
        Self {
            replies: Arc::default(),
            fallback: serde_json::json!({
                "script": DEFAULT_NARRATION,
                "search_terms": ["coffee beans", "ethiopia", "cafe"],
            })
            .to_string(),
            calls: Arc::default(),
            prompts: Arc::default(),
        }
    }

    /// Answer with `replies` in order before falling back to the default script.
    pub fn with_replies<I, S>(mut self, replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut replies: Vec<String> = replies.into_iter().map(Into::into).collect();
        replies.reverse();
        self.replies = Arc::new(Mutex::new(replies));
        self
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    /// Every user prompt received, in order.
    pub fn prompts(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.prompts)
    }
}

impl Default for FakeLanguageModel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LanguageModel for FakeLanguageModel {
    fn name(&self) -> &'static str {
        "fake-llm"
    }

    async fn complete(&self, _system: &str, prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(prompt.to_string());
        let next = self.replies.lock().unwrap_or_else(|e| e.into_inner()).pop();
        Ok(next.unwrap_or_else(|| self.fallback.clone()))
    }
}

#[derive(Clone, Default)]
pub struct FakeFootage {
    terms: HashMap<String, Vec<FootageCandidate>>,
    stock_per_term: usize,
    broken: HashSet<String>,
    missing: HashSet<String>,
    rejected_terms: HashSet<String>,
    unauthorized: bool,
    searches: Arc<AtomicUsize>,
}

impl FakeFootage {
    /// No results for any term.
    pub fn new() -> Self {
        Self::default()
    }

    /// `per_term` usable portrait clips for every term.
    pub fn stocked(per_term: usize) -> Self {
        Self {
            stock_per_term: per_term,
            ..Self::default()
        }
    }

    pub fn with_term(mut self, term: &str, candidates: Vec<FootageCandidate>) -> Self {
        self.terms.insert(term.to_lowercase(), candidates);
        self
    }

    /// Downloads of `id` fail with a transient error.
    pub fn failing_download(mut self, id: &str) -> Self {
        self.broken.insert(id.to_string());
        self
    }

    /// Downloads of `id` answer 404.
    pub fn missing(mut self, id: &str) -> Self {
        self.missing.insert(id.to_string());
        self
    }

    /// Searches for `term` answer 400.
    pub fn rejecting_term(mut self, term: &str) -> Self {
        self.rejected_terms.insert(term.to_lowercase());
        self
    }

    /// Every search fails authentication.
    pub fn unauthorized(mut self) -> Self {
        self.unauthorized = true;
        self
    }

    pub fn searches(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.searches)
    }
}

#[async_trait]
impl FootageSearch for FakeFootage {
    async fn search(&self, query: &str, per_page: usize) -> Result<Vec<FootageCandidate>> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        if self.unauthorized {
            return Err(PipelineError::AuthenticationFailed { service: "fake-footage" });
        }
        if self.rejected_terms.contains(&query.to_lowercase()) {
            return Err(PipelineError::Rejected {
                service: "fake-footage",
                status: 400,
            });
        }
        if let Some(found) = self.terms.get(&query.to_lowercase()) {
            return Ok(found.iter().take(per_page).cloned().collect());
        }
        Ok((0..self.stock_per_term.min(per_page))
            .map(|i| {
                let id = format!("{}-{i}", query.replace(' ', "-"));
                FootageCandidate {
                    url: format!("https://stock.test/{id}.mp4"),
                    id,
                    duration: 10.0,
                    width: 1080,
                    height: 1920,
                }
            })
            .collect())
    }

    async fn download(&self, candidate: &FootageCandidate, dest: &Path) -> Result<()> {
        if self.broken.contains(&candidate.id) {
            return Err(PipelineError::collaborator("fake-footage", "connection reset"));
        }
        if self.missing.contains(&candidate.id) {
            return Err(PipelineError::Rejected {
                service: "fake-footage",
                status: 404,
            });
        }
        if let Some(dir) = dest.parent() {
            fs::create_dir_all(dir)
                .await
                .map_err(|e| PipelineError::io(dir, e))?;
        }
        let stub = media_stub(
            candidate.duration,
            Some(Dimensions {
                width: candidate.width,
                height: candidate.height,
            }),
        );
        fs::write(dest, stub)
            .await
            .map_err(|e| PipelineError::io(dest, e))
    }
}

#[derive(Clone)]
pub struct FakeSpeech {
    duration: f64,
    voices: Option<Vec<Voice>>,
    fail_first: usize,
    calls: Arc<AtomicUsize>,
    gate: Option<Arc<Notify>>,
    entered: Option<Arc<Notify>>,
}

impl FakeSpeech {
    /// Every call returns audio lasting `duration` seconds.
    pub fn new(duration: f64) -> Self {
        Self {
            duration,
            voices: None,
            fail_first: 0,
            calls: Arc::default(),
            gate: None,
            entered: None,
        }
    }

    pub fn only_voices(mut self, voices: &[Voice]) -> Self {
        self.voices = Some(voices.to_vec());
        self
    }

    /// The first `n` calls fail with a transient error.
    pub fn failing_first(mut self, n: usize) -> Self {
        self.fail_first = n;
        self
    }

    /// Signal `entered` when a call starts, then hold it until `gate` is notified.
    pub fn gated(mut self, entered: Arc<Notify>, gate: Arc<Notify>) -> Self {
        self.entered = Some(entered);
        self.gate = Some(gate);
        self
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl SpeechSynthesizer for FakeSpeech {
    fn name(&self) -> &'static str {
        "fake-tts"
    }

    fn supports(&self, voice: Voice) -> bool {
        self.voices.as_ref().is_none_or(|v| v.contains(&voice))
    }

    async fn synthesize(&self, _text: &str, _voice: Voice) -> Result<Vec<u8>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(entered) = &self.entered {
            entered.notify_one();
        }
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if call < self.fail_first {
            return Err(PipelineError::collaborator("fake-tts", "HTTP 503"));
        }
        Ok(media_stub(self.duration, None).into_bytes())
    }
}

#[derive(Clone)]
pub struct FakeTranscriber {
    words: Vec<TimedWord>,
    calls: Arc<AtomicUsize>,
    gate: Option<Arc<Notify>>,
    entered: Option<Arc<Notify>>,
}

impl FakeTranscriber {
    /// Every call returns `words`; an empty list means nothing was heard.
    pub fn new(words: Vec<TimedWord>) -> Self {
        Self {
            words,
            calls: Arc::default(),
            gate: None,
            entered: None,
        }
    }

    /// Signal `entered` when a call starts, then hold it until `gate` is notified.
    pub fn gated(mut self, entered: Arc<Notify>, gate: Arc<Notify>) -> Self {
        self.entered = Some(entered);
        self.gate = Some(gate);
        self
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn transcribe(&self, _audio: &Path) -> Result<Vec<TimedWord>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(entered) = &self.entered {
            entered.notify_one();
        }
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        Ok(self.words.clone())
    }
}

#[derive(Clone, Default)]
pub struct FakeMedia {
    plans: Arc<Mutex<Vec<RenderPlan>>>,
    subtitles: Arc<Mutex<Vec<String>>>,
    fail_render: bool,
}

impl FakeMedia {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_render(mut self) -> Self {
        self.fail_render = true;
        self
    }

    /// A shared view of every plan rendered so far.
    pub fn plans(&self) -> Arc<Mutex<Vec<RenderPlan>>> {
        Arc::clone(&self.plans)
    }

    /// The subtitle file contents of every render, read before the job's
    /// temp files are removed.
    pub fn subtitles(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.subtitles)
    }
}

#[async_trait]
impl MediaEngine for FakeMedia {
    async fn probe(&self, path: &Path) -> Result<MediaInfo> {
        let raw = fs::read_to_string(path)
            .await
            .map_err(|e| PipelineError::io(path, e))?;
        parse_stub(&raw).ok_or_else(|| PipelineError::RenderFailure {
            reason: format!("{} is not a media file", path.display()),
        })
    }

    async fn render(&self, plan: &RenderPlan) -> Result<()> {
        self.plans
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(plan.clone());
        if let Some(path) = &plan.subtitles {
            let srt = fs::read_to_string(path)
                .await
                .map_err(|e| PipelineError::io(path, e))?;
            self.subtitles
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(srt);
        }
        if self.fail_render {
            return Err(PipelineError::RenderFailure {
                reason: "encoder exited with status 1".into(),
            });
        }
        fs::write(&plan.output, media_stub(plan.duration, Some(plan.target)))
            .await
            .map_err(|e| PipelineError::io(&plan.output, e))
    }
}

#[derive(Clone, Default)]
pub struct FakeVideoHost {
    calls: Arc<AtomicUsize>,
    reject_auth: bool,
    unavailable: bool,
    gate: Option<Arc<Notify>>,
    entered: Option<Arc<Notify>>,
}

impl FakeVideoHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every upload fails authentication.
    pub fn rejecting(mut self) -> Self {
        self.reject_auth = true;
        self
    }

    /// Every upload fails with a transient error.
    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    /// Signal `entered` when an upload starts, then hold it until `gate` is notified.
    pub fn gated(mut self, entered: Arc<Notify>, gate: Arc<Notify>) -> Self {
        self.entered = Some(entered);
        self.gate = Some(gate);
        self
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl VideoHost for FakeVideoHost {
    fn name(&self) -> &'static str {
        "fake-host"
    }

    async fn upload(&self, video: &RenderedVideo, _metadata: &PublishMetadata) -> Result<String> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(entered) = &self.entered {
            entered.notify_one();
        }
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.reject_auth {
            return Err(PipelineError::AuthenticationFailed { service: "fake-host" });
        }
        if self.unavailable {
            return Err(PipelineError::collaborator("fake-host", "HTTP 503"));
        }
        if !video.path.exists() {
            return Err(PipelineError::PublishFailure {
                reason: "rendered file is missing".into(),
            });
        }
        Ok(format!("remote-{call}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stubs_round_trip_through_the_probe_parser() {
        let info = parse_stub(&media_stub(4.5, Some(Dimensions::VERTICAL_HD))).unwrap();
        assert_eq!(info.duration, 4.5);
        assert_eq!(info.dimensions, Some(Dimensions::VERTICAL_HD));
        assert!(parse_stub("ID3\u{3}binary").is_none());
    }
}
