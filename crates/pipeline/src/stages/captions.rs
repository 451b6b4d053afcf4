//! Caption timing.
//!
//! Both strategies produce contiguous segments: each segment ends where the
//! next one starts, the first starts at zero and the last ends exactly at the
//! narration duration. That makes them ordered, non-overlapping and fully
//! covering by construction.

use std::{fmt::Write as _, path::PathBuf, sync::Arc};

use reelsmith_core::retry_async;
use tracing::{info, warn};

use crate::{
    artifacts::{ArtifactLedger, JobPaths},
    collaborators::Transcriber,
    config::{CaptionStrategy, PipelineConfig},
    error::{PipelineError, Result},
    types::{CaptionSegment, NarrationTrack, TimedWord},
};

pub struct SubtitleDeriver {
    transcriber: Option<Arc<dyn Transcriber>>,
    config: Arc<PipelineConfig>,
}

impl SubtitleDeriver {
    pub fn new(transcriber: Option<Arc<dyn Transcriber>>, config: Arc<PipelineConfig>) -> Self {
        Self {
            transcriber,
            config,
        }
    }

    pub fn strategy(&self) -> CaptionStrategy {
        match (self.config.caption_strategy, &self.transcriber) {
            (CaptionStrategy::Transcription, Some(_)) => CaptionStrategy::Transcription,
            _ => CaptionStrategy::Heuristic,
        }
    }

    /// Derive segments for `narration` and write them as SRT. Returns the
    /// segments and the subtitle file path.
    pub async fn derive(
        &self,
        text: &str,
        narration: &NarrationTrack,
        ledger: &ArtifactLedger,
        paths: &JobPaths,
    ) -> Result<(Vec<CaptionSegment>, PathBuf)> {
        let duration = narration.duration;
        check_duration(duration)?;

        let segments = match (self.strategy(), &self.transcriber) {
            (CaptionStrategy::Transcription, Some(transcriber)) => {
                let words = retry_async(&self.config.collaborator_retry, "subtitles.transcribe", |_| {
                    transcriber.transcribe(&narration.path)
                })
                .await?;
                if words.is_empty() {
                    warn!("transcription returned no words, using heuristic timing");
                    self.heuristic(text, duration)?
                } else {
                    from_words(&words, duration, self.config.max_caption_chars)?
                }
            }
            _ => self.heuristic(text, duration)?,
        };

        let path = paths.captions();
        ledger.write(&path, to_srt(&segments)).await?;
        info!(
            strategy = ?self.strategy(),
            segments = segments.len(),
            duration,
            "captions derived"
        );
        Ok((segments, path))
    }

    fn heuristic(&self, text: &str, duration: f64) -> Result<Vec<CaptionSegment>> {
        heuristic_segments(
            text,
            duration,
            self.config.max_caption_chars,
            self.config.caption_pause_weight,
        )
    }
}

fn ends_sentence(word: &str) -> bool {
    word.trim_end_matches(['"', '\'', ')']).ends_with(['.', '!', '?'])
}

/// Pack words into lines of at most `max_chars`, breaking early at sentence
/// ends. Returns, per line, the index of its last word.
fn group_words<'a>(words: impl IntoIterator<Item = &'a str>, max_chars: usize) -> Vec<(String, usize)> {
    let mut groups: Vec<(String, usize)> = Vec::new();
    let mut current = String::new();
    let mut last_word = 0;

    for (i, word) in words.into_iter().enumerate() {
        let word = word.trim();
        if word.is_empty() {
            continue;
        }
        if !current.is_empty() && current.chars().count() + 1 + word.chars().count() > max_chars {
            groups.push((std::mem::take(&mut current), last_word));
        }
        last_word = i;
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
        if ends_sentence(word) {
            groups.push((std::mem::take(&mut current), i));
        }
    }
    if !current.is_empty() {
        groups.push((current, last_word));
    }
    groups
}

fn check_duration(duration: f64) -> Result<()> {
    if !duration.is_finite() || duration <= 0.0 {
        return Err(PipelineError::CaptionFailure {
            reason: "narration has no duration".into(),
        });
    }
    Ok(())
}

/// Turn line boundaries into contiguous segments over `[0, duration]`.
fn contiguous(lines: Vec<String>, mut boundaries: Vec<f64>, duration: f64) -> Vec<CaptionSegment> {
    debug_assert_eq!(lines.len() + 1, boundaries.len());
    let last = boundaries.len() - 1;
    boundaries[0] = 0.0;
    boundaries[last] = duration;
    // `max` and `min` also pull a NaN boundary back onto its neighbour.
    for i in 1..last {
        boundaries[i] = boundaries[i].max(boundaries[i - 1]).min(duration);
    }

    lines
        .into_iter()
        .enumerate()
        .map(|(i, text)| CaptionSegment {
            text,
            start: boundaries[i],
            end: boundaries[i + 1],
        })
        .filter(|s| s.end > s.start)
        .collect()
}

/// Spread lines over the audio in proportion to their length, with extra
/// weight at sentence ends for the pause a speaker takes there.
pub fn heuristic_segments(
    text: &str,
    duration: f64,
    max_chars: usize,
    pause_weight: f64,
) -> Result<Vec<CaptionSegment>> {
    check_duration(duration)?;
    let lines: Vec<String> = group_words(text.split_whitespace(), max_chars.max(1))
        .into_iter()
        .map(|(line, _)| line)
        .collect();
    if lines.is_empty() {
        return Err(PipelineError::CaptionFailure {
            reason: "no text to caption".into(),
        });
    }

    let weights: Vec<f64> = lines
        .iter()
        .map(|line| {
            let pause = if ends_sentence(line) { pause_weight } else { 0.0 };
            line.chars().count() as f64 + pause
        })
        .collect();
    let total: f64 = weights.iter().sum();

    let mut boundaries = Vec::with_capacity(lines.len() + 1);
    let mut acc = 0.0;
    boundaries.push(0.0);
    for w in &weights {
        acc += w;
        boundaries.push(duration * acc / total);
    }

    Ok(contiguous(lines, boundaries, duration))
}

/// Group word timestamps into lines; each line starts at its first word.
pub fn from_words(words: &[TimedWord], duration: f64, max_chars: usize) -> Result<Vec<CaptionSegment>> {
    check_duration(duration)?;
    if words.iter().any(|w| !w.start.is_finite() || !w.end.is_finite()) {
        return Err(PipelineError::CaptionFailure {
            reason: "transcription returned invalid word timings".into(),
        });
    }
    let groups = group_words(words.iter().map(|w| w.text.as_str()), max_chars.max(1));
    if groups.is_empty() {
        return Err(PipelineError::CaptionFailure {
            reason: "transcription contained no words".into(),
        });
    }

    let mut boundaries = Vec::with_capacity(groups.len() + 1);
    let mut first_word = 0;
    let mut lines = Vec::with_capacity(groups.len());
    for (line, last_word) in groups {
        boundaries.push(words[first_word].start);
        lines.push(line);
        first_word = last_word + 1;
    }
    boundaries.push(duration);

    Ok(contiguous(lines, boundaries, duration))
}

fn srt_timestamp(seconds: f64) -> String {
    let millis = (seconds.max(0.0) * 1000.0).round() as u64;
    format!(
        "{:02}:{:02}:{:02},{:03}",
        millis / 3_600_000,
        millis / 60_000 % 60,
        millis / 1000 % 60,
        millis % 1000
    )
}

pub fn to_srt(segments: &[CaptionSegment]) -> String {
    let mut out = String::new();
    for (i, segment) in segments.iter().enumerate() {
        let _ = write!(
            out,
            "{}\n{} --> {}\n{}\n\n",
            i + 1,
            srt_timestamp(segment.start),
            srt_timestamp(segment.end),
            segment.text
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f64 = 1e-6;
    const TEXT: &str = "Coffee was first found in Ethiopia. Goat herders noticed their animals \
        dancing after eating red berries! Monks brewed the beans to stay awake during prayer. \
        Within a century, coffee houses spread across the Middle East and Europe.";

    fn assert_covers(segments: &[CaptionSegment], duration: f64) {
        assert!(!segments.is_empty());
        assert!(segments[0].start.abs() < TOLERANCE);
        assert!((segments.last().unwrap().end - duration).abs() < TOLERANCE);
        for pair in segments.windows(2) {
            assert!(pair[0].end <= pair[1].start + TOLERANCE, "overlap: {pair:?}");
            assert!(pair[0].start < pair[1].start, "unordered: {pair:?}");
        }
        let covered: f64 = segments.iter().map(CaptionSegment::duration).sum();
        assert!((covered - duration).abs() < TOLERANCE);
    }

    #[test]
    fn heuristic_covers_any_duration() {
        for duration in [0.5, 7.0, 31.25, 180.0] {
            let segments = heuristic_segments(TEXT, duration, 32, 6.0).unwrap();
            assert_covers(&segments, duration);
            assert!(segments.iter().all(|s| s.text.chars().count() <= 32));
        }
    }

    #[test]
    fn heuristic_breaks_at_sentence_ends() {
        let segments = heuristic_segments("One. Two three.", 3.0, 40, 0.0).unwrap();
        let texts: Vec<_> = segments.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["One.", "Two three."]);
        // 4 of 14 characters.
        assert!((segments[0].end - 3.0 * 4.0 / 14.0).abs() < TOLERANCE);
    }

    #[test]
    fn heuristic_rejects_empty_text() {
        assert!(heuristic_segments("   ", 5.0, 32, 6.0).is_err());
    }

    fn word(text: &str, start: f64, end: f64) -> TimedWord {
        TimedWord {
            text: text.into(),
            start,
            end,
        }
    }

    #[test]
    fn transcription_groups_words_and_closes_gaps() {
        let words = vec![
            word("Coffee", 0.3, 0.7),
            word("is", 0.8, 0.9),
            word("old.", 1.0, 1.4),
            word("Very", 2.1, 2.4),
            word("old.", 2.5, 2.9),
        ];
        let segments = from_words(&words, 3.5, 32).unwrap();

        let texts: Vec<_> = segments.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["Coffee is old.", "Very old."]);
        assert_eq!(segments[1].start, 2.1);
        assert_covers(&segments, 3.5);
    }

    #[test]
    fn transcription_clamps_words_past_the_end() {
        let words = vec![
            word("First", 0.0, 0.5),
            word("line.", 0.5, 1.0),
            word("Late", 4.0, 4.5),
            word("words.", 4.5, 5.0),
        ];
        let segments = from_words(&words, 2.0, 40).unwrap();
        assert_eq!(segments.len(), 1);
        assert_covers(&segments, 2.0);
    }

    #[test]
    fn rejects_unusable_timings() {
        let words = vec![word("Coffee", f64::NAN, 0.5), word("beans.", 0.5, 1.0)];
        assert!(matches!(
            from_words(&words, 2.0, 32),
            Err(PipelineError::CaptionFailure { .. })
        ));
        assert!(from_words(&[word("Coffee.", 0.0, 0.5)], f64::NAN, 32).is_err());
        assert!(heuristic_segments(TEXT, f64::INFINITY, 32, 6.0).is_err());
    }

    #[test]
    fn renders_srt() {
        let srt = to_srt(&[
            CaptionSegment {
                text: "Coffee is old.".into(),
                start: 0.0,
                end: 1.5,
            },
            CaptionSegment {
                text: "Very old.".into(),
                start: 1.5,
                end: 3661.042,
            },
        ]);
        assert_eq!(
            srt,
            "1\n00:00:00,000 --> 00:00:01,500\nCoffee is old.\n\n\
             2\n00:00:01,500 --> 01:01:01,042\nVery old.\n\n"
        );
    }
}
