//! Request handlers.

use axum::{
    Json,
    extract::{Path, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use reelsmith_pipeline::{CancelAck, GenerationRequest, JobId, JobStatus, Stage, Voice};
use serde::{Deserialize, Serialize};
use tower_http::services::ServeFile;
use tracing::{info, warn};

use crate::{
    AppState, HealthInfo,
    error::{ApiError, ApiResult},
};

fn parse_job_id(raw: &str) -> ApiResult<JobId> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("{raw:?} is not a job id")))
}

#[derive(Debug, Deserialize)]
pub struct GenerateBody {
    pub topic: String,
    #[serde(default)]
    pub voice: Voice,
    #[serde(default)]
    pub publish: bool,
}

#[derive(Debug, Serialize)]
pub struct JobAccepted {
    pub job_id: JobId,
    pub status_url: String,
}

/// POST /api/generate
pub async fn generate(
    State(state): State<AppState>,
    Json(body): Json<GenerateBody>,
) -> ApiResult<(StatusCode, Json<JobAccepted>)> {
    let request = GenerationRequest::new(body.topic, body.voice, body.publish)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let handle = state.controller.start(request)?;
    info!(job_id = %handle.id, "job started over http");

    Ok((
        StatusCode::ACCEPTED,
        Json(JobAccepted {
            job_id: handle.id,
            status_url: format!("/api/jobs/{}", handle.id),
        }),
    ))
}

#[derive(Debug, Serialize)]
pub struct JobView {
    pub job_id: JobId,
    pub topic: String,
    pub status: JobStatus,
    pub step: usize,
    pub total_steps: usize,
    pub percentage: u8,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<&'static str>,
}

impl JobView {
    fn new(job_id: JobId, request: &GenerationRequest, status: JobStatus) -> Self {
        let total_steps = if request.publish { Stage::COUNT } else { Stage::COUNT - 1 };
        let (step, message, suggestions) = match &status {
            JobStatus::Queued => (0, "Queued".to_string(), Vec::new()),
            JobStatus::Running { stage } => (stage.ordinal(), format!("{}...", stage.label()), Vec::new()),
            JobStatus::Succeeded(_) => (total_steps, "Done".to_string(), Vec::new()),
            JobStatus::Cancelled { stage } => (
                stage.ordinal().saturating_sub(1),
                format!("Cancelled at the {stage} stage"),
                Vec::new(),
            ),
            JobStatus::Failed { stage, cause, .. } => {
                (stage.ordinal(), cause.clone(), stage.suggestions().to_vec())
            }
        };
        // A running step counts as half done.
        let completed = match &status {
            JobStatus::Running { .. } => step as f64 - 0.5,
            JobStatus::Failed { .. } => step.saturating_sub(1) as f64,
            _ => step as f64,
        };
        let percentage = (completed.max(0.0) / total_steps as f64 * 100.0).round().min(100.0) as u8;

        Self {
            job_id,
            topic: request.topic.clone(),
            status,
            step,
            total_steps,
            percentage,
            message,
            suggestions,
        }
    }
}

/// GET /api/jobs/:id
pub async fn job_status(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<JobView>> {
    let id = parse_job_id(&id)?;
    let request = state.controller.request(id)?;
    let status = state.controller.status(id)?;
    Ok(Json(JobView::new(id, &request, status)))
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub job_id: JobId,
    pub result: CancelAck,
}

/// POST /api/jobs/:id/cancel
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<CancelResponse>> {
    let id = parse_job_id(&id)?;
    let result = state.controller.cancel(id)?;
    Ok(Json(CancelResponse { job_id: id, result }))
}

/// GET /api/jobs/:id/video
pub async fn job_video(
    State(state): State<AppState>,
    Path(id): Path<String>,
    request: Request,
) -> ApiResult<Response> {
    let id = parse_job_id(&id)?;
    let path = match state.controller.status(id)? {
        JobStatus::Succeeded(output) => output
            .video_path
            .ok_or_else(|| ApiError::NotFound("the video was removed after publishing".into()))?,
        status if status.is_terminal() => {
            return Err(ApiError::NotFound("the job produced no video".into()));
        }
        _ => return Err(ApiError::Conflict("the job is still running".into())),
    };

    // Streamed from disk; range requests are honoured.
    let response = ServeFile::new(&path).try_call(request).await.map_err(|e| {
        warn!(job_id = %id, path = %path.display(), error = %e, "could not open the video");
        ApiError::Internal("the video could not be read".into())
    })?;
    if response.status() == StatusCode::NOT_FOUND {
        return Err(ApiError::NotFound("the video file is missing".into()));
    }
    Ok(response.into_response())
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub active_job_id: Option<JobId>,
    #[serde(flatten)]
    pub info: HealthInfo,
}

/// GET /api/health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        active_job_id: state.controller.active(),
        info: (*state.health).clone(),
    })
}
