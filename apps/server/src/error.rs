//! API error types.

use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use reelsmith_pipeline::{ControlError, JobId};
use serde::Serialize;
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{message}")]
    Busy { message: String, active: JobId },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Rate limit exceeded: at most {max_requests} generation requests per {window_secs} seconds")]
    RateLimited {
        max_requests: u32,
        window_secs: u64,
        retry_after_secs: u64,
    },

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Busy { .. } | ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ControlError> for ApiError {
    fn from(err: ControlError) -> Self {
        match err {
            ControlError::Busy { active } => ApiError::Busy {
                message: err.to_string(),
                active,
            },
            ControlError::UnknownJob(_) => ApiError::NotFound(err.to_string()),
            ControlError::InvalidRequest(reason) => ApiError::BadRequest(reason),
            ControlError::ShutDown => ApiError::Unavailable(err.to_string()),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    active_job_id: Option<JobId>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let active_job_id = match &self {
            ApiError::Busy { active, .. } => Some(*active),
            _ => None,
        };
        let body = ErrorResponse {
            detail: self.to_string(),
            active_job_id,
        };
        let mut response = (status, Json(body)).into_response();
        if let ApiError::RateLimited {
            retry_after_secs, ..
        } = self
        {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, retry_after_secs.into());
        }
        response
    }
}
