//! HTTP front end for the pipeline controller.

use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use reelsmith_pipeline::Controller;
use serde::Serialize;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod error;
pub mod rate_limit;

use rate_limit::{GenerateLimiter, RateLimit};

/// Which collaborators are configured, captured at startup.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HealthInfo {
    pub language_model: bool,
    pub footage: bool,
    pub speech: bool,
    pub transcription: bool,
    pub publishing: bool,
    pub ffmpeg: bool,
}

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub controller: Controller,
    pub health: Arc<HealthInfo>,
    pub limiter: Option<Arc<GenerateLimiter>>,
}

impl AppState {
    pub fn new(controller: Controller, health: HealthInfo) -> Self {
        Self {
            controller,
            health: Arc::new(health),
            limiter: GenerateLimiter::new(RateLimit::default()).map(Arc::new),
        }
    }

    pub fn with_rate_limit(mut self, limit: RateLimit) -> Self {
        self.limiter = GenerateLimiter::new(limit).map(Arc::new);
        self
    }
}

pub fn build_router(state: AppState) -> Router {
    let generate = match &state.limiter {
        Some(limiter) => post(api::generate).route_layer(middleware::from_fn_with_state(
            Arc::clone(limiter),
            rate_limit::limit_generate,
        )),
        None => post(api::generate),
    };

    Router::new()
        .route("/api/health", get(api::health))
        .route("/api/generate", generate)
        .route("/api/jobs/:id", get(api::job_status))
        .route("/api/jobs/:id/cancel", post(api::cancel_job))
        .route("/api/jobs/:id/video", get(api::job_video))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
