use std::sync::Arc;

use reelsmith_core::retry_async;
use serde::Deserialize;
use tracing::{debug, info};

use crate::{
    artifacts::{ArtifactLedger, JobPaths},
    collaborators::LanguageModel,
    config::PipelineConfig,
    error::{PipelineError, Result},
    stages::ContentOnly,
    types::Script,
};

const SYSTEM_PROMPT: &str = "You write narration for short vertical videos. \
Answer with a single JSON object and nothing else: \
{\"script\": \"<narration text>\", \"search_terms\": [\"<stock footage query>\", ...]}. \
The script is plain spoken prose: no headings, no markdown, no speaker labels, no stage directions. \
Search terms are two or three word visual descriptions that match the narration.";

const MAX_SEARCH_TERMS: usize = 10;

const REFUSAL_PREFIXES: &[&str] = &[
    "i'm sorry",
    "i am sorry",
    "i cannot",
    "i can't",
    "i can not",
    "as an ai",
    "i'm unable",
    "i am unable",
];

#[derive(Debug, Deserialize)]
struct RawScript {
    #[serde(default, alias = "narration")]
    script: String,
    #[serde(default, alias = "terms")]
    search_terms: Vec<String>,
}

pub struct ScriptGenerator {
    model: Arc<dyn LanguageModel>,
    config: Arc<PipelineConfig>,
}

impl ScriptGenerator {
    pub fn new(model: Arc<dyn LanguageModel>, config: Arc<PipelineConfig>) -> Self {
        Self { model, config }
    }

    /// Later attempts rephrase the request, since the first wording already
    /// produced something unusable.
    fn prompt(&self, topic: &str, attempt: u32) -> String {
        let sentences = self.config.script_sentences;
        match attempt {
            1 => format!(
                "Write a {sentences}-sentence narration about the following topic, \
                 with 3 to 5 search terms: {topic}"
            ),
            2 => format!(
                "In {sentences} short, factual, family-friendly sentences, explain: {topic}. \
                 Also give 3 to 5 stock footage search terms."
            ),
            _ => format!(
                "Tell an interesting fact-based story about \"{topic}\" in about {sentences} sentences \
                 for a general audience. Include search terms for matching stock video."
            ),
        }
    }

    async fn attempt(&self, topic: &str, attempt: u32) -> Result<Script> {
        let prompt = self.prompt(topic, attempt);
        let raw = retry_async(&self.config.collaborator_retry, "script.complete", |_| {
            self.model.complete(SYSTEM_PROMPT, &prompt)
        })
        .await?;
        parse_script(&raw, topic, self.config.min_script_chars)
    }

    pub async fn generate(&self, topic: &str, ledger: &ArtifactLedger, paths: &JobPaths) -> Result<Script> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(PipelineError::InvalidRequest {
                reason: "topic must not be empty".into(),
            });
        }

        let script = retry_async(&self.config.content_retry, "script", |attempt| async move {
            self.attempt(topic, attempt).await.map_err(ContentOnly)
        })
        .await
        .map_err(|e| e.0)?;

        ledger
            .write(&paths.script(), serde_json::to_vec_pretty(&script)?)
            .await?;
        info!(
            model = self.model.name(),
            chars = script.narration.chars().count(),
            terms = script.search_terms.len(),
            "script generated"
        );
        Ok(script)
    }
}

/// Validate and clean a model response.
pub fn parse_script(raw: &str, topic: &str, min_chars: usize) -> Result<Script> {
    let body = strip_code_fence(raw.trim());
    if body.is_empty() {
        return Err(PipelineError::GenerationFailure {
            reason: "the model returned an empty response".into(),
        });
    }

    let parsed = match (body.find('{'), body.rfind('}')) {
        (Some(start), Some(end)) if start < end => serde_json::from_str::<RawScript>(&body[start..=end]).ok(),
        _ => None,
    };
    let Some(parsed) = parsed else {
        if is_refusal(body) {
            return Err(PipelineError::GenerationFailure {
                reason: "the model refused the topic".into(),
            });
        }
        return Err(PipelineError::GenerationFailure {
            reason: "the model response was not valid JSON".into(),
        });
    };

    let narration = clean_narration(&parsed.script);
    if is_refusal(&narration) {
        return Err(PipelineError::GenerationFailure {
            reason: "the model refused the topic".into(),
        });
    }
    if narration.chars().count() < min_chars {
        debug!(chars = narration.chars().count(), min_chars, "script too short");
        return Err(PipelineError::GenerationFailure {
            reason: format!("script is shorter than {min_chars} characters"),
        });
    }

    let mut search_terms: Vec<String> = Vec::new();
    for term in parsed.search_terms {
        let term = term.trim().trim_matches(['"', '#']).trim().to_string();
        if term.is_empty() || search_terms.iter().any(|t| t.eq_ignore_ascii_case(&term)) {
            continue;
        }
        search_terms.push(term);
        if search_terms.len() == MAX_SEARCH_TERMS {
            break;
        }
    }
    if search_terms.is_empty() {
        search_terms.push(topic.to_string());
    }

    Ok(Script {
        narration,
        search_terms,
    })
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the language tag on the opening fence.
    let rest = rest.split_once('\n').map_or("", |(_, body)| body);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

fn is_refusal(text: &str) -> bool {
    let lower = text.trim_start().to_lowercase();
    REFUSAL_PREFIXES.iter().any(|p| lower.starts_with(p))
}

/// Strip markdown emphasis, headings and `Narrator:`-style labels, and
/// collapse whitespace into single spaces.
pub fn clean_narration(text: &str) -> String {
    let mut lines = Vec::new();
    for line in text.lines() {
        let line = line.trim().trim_start_matches('#').trim();
        let line = strip_speaker_label(line);
        if !line.is_empty() {
            lines.push(line);
        }
    }
    lines
        .join(" ")
        .replace(['*', '_', '`'], "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn strip_speaker_label(line: &str) -> &str {
    const LABELS: &[&str] = &["narrator", "voiceover", "voice over", "host", "speaker", "script"];
    match line.split_once(':') {
        Some((label, rest))
            if LABELS
                .iter()
                .any(|l| label.trim_matches(['*', '[', ']', '(', ')']).eq_ignore_ascii_case(l)) =>
        {
            rest.trim()
        }
        _ => line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NARRATION: &str = "Coffee was first discovered in Ethiopia. Traders carried it across the Red Sea.";

    #[test]
    fn parses_fenced_json() {
        let raw = format!(
            "```json\n{{\"script\": \"{NARRATION}\", \"search_terms\": [\"coffee beans\", \"Coffee Beans\", \" desert \"]}}\n```"
        );
        let script = parse_script(&raw, "history of coffee", 50).unwrap();
        assert_eq!(script.narration, NARRATION);
        assert_eq!(script.search_terms, vec!["coffee beans", "desert"]);
    }

    #[test]
    fn falls_back_to_topic_search_term() {
        let raw = format!("{{\"script\": \"{NARRATION}\"}}");
        let script = parse_script(&raw, "history of coffee", 50).unwrap();
        assert_eq!(script.search_terms, vec!["history of coffee"]);
    }

    #[test]
    fn rejects_short_empty_and_refused_scripts() {
        for raw in [
            "",
            "{\"script\": \"Too short.\"}",
            "I'm sorry, but I can't help with that.",
            "{\"script\": \"I cannot write about this topic because it violates the content policy, sorry.\"}",
            "not json at all, but long enough to pass the minimum length check",
        ] {
            let err = parse_script(raw, "topic", 50).unwrap_err();
            assert!(matches!(err, PipelineError::GenerationFailure { .. }), "{raw}");
        }
    }

    #[test]
    fn cleans_markdown_and_labels() {
        let cleaned = clean_narration("## Intro\n**Narrator:** Coffee is *old*.\nVoiceover: It spread fast.");
        assert_eq!(cleaned, "Intro Coffee is old. It spread fast.");
    }

    #[test]
    fn keeps_ordinary_colons() {
        assert_eq!(clean_narration("Fun fact: beans are seeds."), "Fun fact: beans are seeds.");
    }
}
