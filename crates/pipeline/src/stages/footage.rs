use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use reelsmith_core::retry_async;
use tracing::{debug, info, warn};

use crate::{
    artifacts::{ArtifactLedger, JobPaths},
    collaborators::{FootageSearch, MediaEngine},
    config::PipelineConfig,
    error::{PipelineError, Result},
    types::{Clip, Dimensions, FootageCandidate},
};

pub struct FootageLocator {
    search: Arc<dyn FootageSearch>,
    media: Arc<dyn MediaEngine>,
    config: Arc<PipelineConfig>,
}

impl FootageLocator {
    pub fn new(
        search: Arc<dyn FootageSearch>,
        media: Arc<dyn MediaEngine>,
        config: Arc<PipelineConfig>,
    ) -> Self {
        Self {
            search,
            media,
            config,
        }
    }

    fn usable(&self, candidate: &FootageCandidate) -> bool {
        candidate.duration >= self.config.min_clip_duration
            && candidate.short_side() >= self.config.min_clip_short_side
    }

    /// The script's terms followed by the configured generic ones.
    fn terms(&self, script_terms: &[String]) -> Vec<String> {
        let mut terms: Vec<String> = Vec::new();
        for term in script_terms.iter().chain(&self.config.fallback_terms) {
            let term = term.trim();
            if !term.is_empty() && !terms.iter().any(|t| t.eq_ignore_ascii_case(term)) {
                terms.push(term.to_string());
            }
        }
        terms
    }

    async fn candidates(&self, term: &str) -> Result<Vec<FootageCandidate>> {
        retry_async(&self.config.collaborator_retry, "footage.search", |_| {
            self.search.search(term, self.config.candidates_per_term)
        })
        .await
    }

    /// Download and probe one candidate into the job's clip slot `index`.
    async fn fetch(
        &self,
        candidate: &FootageCandidate,
        index: usize,
        ledger: &ArtifactLedger,
        paths: &JobPaths,
    ) -> Result<Clip> {
        let dest = paths.clip(index);
        ledger.track(&dest);
        retry_async(&self.config.collaborator_retry, "footage.download", |_| {
            self.search.download(candidate, &dest)
        })
        .await?;

        let info = self.media.probe(&dest).await?;
        Ok(Clip {
            source_id: candidate.id.clone(),
            path: dest,
            duration: info.duration,
            dimensions: info.dimensions.unwrap_or(Dimensions {
                width: candidate.width,
                height: candidate.height,
            }),
        })
    }

    /// Collect `clip_count` clips, taking at most one new clip per term per
    /// pass so the cut mixes the script's subjects. Never returns a short list.
    pub async fn locate(
        &self,
        script_terms: &[String],
        ledger: &ArtifactLedger,
        paths: &JobPaths,
    ) -> Result<Vec<Clip>> {
        let required = self.config.clip_count;
        let terms = self.terms(script_terms);
        let mut results: HashMap<String, Vec<FootageCandidate>> = HashMap::new();
        let mut used: HashSet<String> = HashSet::new();
        let mut clips: Vec<Clip> = Vec::with_capacity(required);

        while clips.len() < required {
            let before = clips.len();

            for term in &terms {
                if clips.len() == required {
                    break;
                }

                if !results.contains_key(term) {
                    let found = match self.candidates(term).await {
                        Ok(found) => found,
                        Err(e) if e.is_credential_failure() => return Err(e),
                        Err(e) => {
                            warn!(term = %term, error = %e, "search failed, trying next term");
                            Vec::new()
                        }
                    };
                    debug!(term = %term, candidates = found.len(), "searched");
                    results.insert(term.clone(), found);
                }

                let pending: Vec<FootageCandidate> = results
                    .get(term)
                    .into_iter()
                    .flatten()
                    .filter(|c| !used.contains(&c.id) && self.usable(c))
                    .cloned()
                    .collect();

                for candidate in pending {
                    used.insert(candidate.id.clone());
                    match self.fetch(&candidate, clips.len(), ledger, paths).await {
                        Ok(clip) => {
                            debug!(term = %term, source_id = %clip.source_id, duration = clip.duration, "clip ready");
                            clips.push(clip);
                            break;
                        }
                        Err(e) if e.is_credential_failure() => return Err(e),
                        Err(e) => {
                            warn!(term = %term, candidate = %candidate.id, error = %e, "skipping candidate");
                        }
                    }
                }
            }

            if clips.len() == before {
                break;
            }
        }

        if clips.len() < required {
            return Err(PipelineError::InsufficientFootage {
                found: clips.len(),
                required,
            });
        }

        info!(clips = clips.len(), terms = terms.len(), "footage located");
        Ok(clips)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeFootage, FakeMedia};

    fn locator(footage: FakeFootage, clip_count: usize) -> FootageLocator {
        let config = PipelineConfig {
            clip_count,
            fallback_terms: vec!["nature".into()],
            ..PipelineConfig::default().without_backoff()
        };
        FootageLocator::new(Arc::new(footage), Arc::new(FakeMedia::new()), Arc::new(config))
    }

    fn candidate(id: &str, duration: f64, width: u32, height: u32) -> FootageCandidate {
        FootageCandidate {
            id: id.into(),
            url: format!("https://stock/{id}.mp4"),
            duration,
            width,
            height,
        }
    }

    #[tokio::test]
    async fn skips_short_and_low_resolution_candidates() {
        let footage = FakeFootage::new()
            .with_term(
                "coffee",
                vec![
                    candidate("short", 2.0, 1080, 1920),
                    candidate("tiny", 10.0, 320, 240),
                    candidate("good", 10.0, 1080, 1920),
                ],
            )
            .with_term("beans", vec![candidate("beans", 8.0, 1920, 1080)]);
        let root = tempfile::tempdir().unwrap();
        let paths = JobPaths::new(root.path(), root.path(), crate::types::JobId::new());
        let ledger = ArtifactLedger::new();

        let clips = locator(footage, 2)
            .locate(&["coffee".into(), "beans".into()], &ledger, &paths)
            .await
            .unwrap();

        let ids: Vec<_> = clips.iter().map(|c| c.source_id.as_str()).collect();
        assert_eq!(ids, vec!["good", "beans"]);
        assert!(clips.iter().all(|c| c.path.exists()));
        assert_eq!(ledger.tracked().len(), 2);
    }

    #[tokio::test]
    async fn falls_back_to_generic_terms_and_never_reuses_a_clip() {
        let shared = candidate("shared", 12.0, 1080, 1920);
        let footage = FakeFootage::new()
            .with_term("coffee", vec![shared.clone()])
            .with_term("nature", vec![shared, candidate("forest", 12.0, 1080, 1920)]);
        let root = tempfile::tempdir().unwrap();
        let paths = JobPaths::new(root.path(), root.path(), crate::types::JobId::new());

        let clips = locator(footage, 2)
            .locate(&["coffee".into()], &ArtifactLedger::new(), &paths)
            .await
            .unwrap();

        let ids: Vec<_> = clips.iter().map(|c| c.source_id.as_str()).collect();
        assert_eq!(ids, vec!["shared", "forest"]);
    }

    #[tokio::test]
    async fn fails_instead_of_returning_a_short_list() {
        let footage = FakeFootage::new().with_term("coffee", vec![candidate("only", 9.0, 1080, 1920)]);
        let root = tempfile::tempdir().unwrap();
        let paths = JobPaths::new(root.path(), root.path(), crate::types::JobId::new());

        let err = locator(footage, 3)
            .locate(&["coffee".into()], &ArtifactLedger::new(), &paths)
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::InsufficientFootage { found: 1, required: 3 }));
    }

    #[tokio::test]
    async fn skips_candidates_whose_download_fails() {
        let footage = FakeFootage::new()
            .with_term(
                "coffee",
                vec![candidate("broken", 9.0, 1080, 1920), candidate("fine", 9.0, 1080, 1920)],
            )
            .failing_download("broken");
        let root = tempfile::tempdir().unwrap();
        let paths = JobPaths::new(root.path(), root.path(), crate::types::JobId::new());

        let clips = locator(footage, 1)
            .locate(&["coffee".into()], &ArtifactLedger::new(), &paths)
            .await
            .unwrap();

        assert_eq!(clips[0].source_id, "fine");
    }

    #[tokio::test]
    async fn dead_links_and_rejected_searches_are_skipped() {
        let footage = FakeFootage::stocked(3)
            .missing("coffee-0")
            .missing("beans-0")
            .rejecting_term("cafe");
        let searches = footage.searches();
        let root = tempfile::tempdir().unwrap();
        let paths = JobPaths::new(root.path(), root.path(), crate::types::JobId::new());

        let clips = locator(footage, 3)
            .locate(
                &["coffee".into(), "beans".into(), "cafe".into()],
                &ArtifactLedger::new(),
                &paths,
            )
            .await
            .unwrap();

        let ids: Vec<_> = clips.iter().map(|c| c.source_id.as_str()).collect();
        assert_eq!(ids, vec!["coffee-1", "beans-1", "nature-0"]);
        assert_eq!(searches.load(std::sync::atomic::Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn refused_credentials_stop_the_search() {
        let footage = FakeFootage::stocked(3).unauthorized();
        let searches = footage.searches();
        let root = tempfile::tempdir().unwrap();
        let paths = JobPaths::new(root.path(), root.path(), crate::types::JobId::new());

        let err = locator(footage, 2)
            .locate(&["coffee".into(), "beans".into()], &ArtifactLedger::new(), &paths)
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::AuthenticationFailed { .. }));
        assert_eq!(searches.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
