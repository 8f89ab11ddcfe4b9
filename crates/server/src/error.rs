//! API error types.

use artifactci_core::Job;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Structured diagnostics, e.g. the job list when a job is not running.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("{message}")]
    JobNotFound { message: String, jobs: Vec<Job> },

    #[error("job `{job}` is {status}, not running")]
    JobNotRunning {
        job: String,
        status: artifactci_core::JobStatus,
        jobs: Vec<Job>,
    },

    #[error("upload already requested for {0}")]
    DuplicateRequest(String),

    #[error("upstream returned {status}: {message}")]
    Upstream { status: StatusCode, message: String },

    #[error("could not read job status: {0}")]
    JobStatusParse(String),

    #[error("artifact not found: {0}")]
    ArtifactNotFound(String),

    #[error("upload not found: {0}")]
    UploadNotFound(String),

    #[error("request timed out")]
    Timeout,

    #[error("internal error: {0}")]
    Internal(String),

    #[error("storage error: {0}")]
    Storage(#[from] artifactci_storage::StorageError),

    #[error("metadata error: {0}")]
    Metadata(#[from] artifactci_metadata::MetadataError),

    #[error("{0}")]
    Core(#[from] artifactci_core::Error),

    #[error("invalid client token: {0}")]
    Signer(#[from] artifactci_signer::SignerError),
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "not_authorized",
            Self::JobNotFound { .. } => "job_not_found",
            Self::JobNotRunning { .. } => "job_not_running",
            Self::DuplicateRequest(_) => "duplicate_upload_request",
            Self::Upstream { .. } => "upstream_error",
            Self::JobStatusParse(_) => "job_status_parse_error",
            Self::ArtifactNotFound(_) => "artifact_not_found",
            Self::UploadNotFound(_) => "upload_not_found",
            Self::Timeout => "timeout",
            Self::Internal(_) => "internal_error",
            Self::Storage(_) => "storage_error",
            Self::Metadata(_) => "metadata_error",
            Self::Core(e) => match e {
                artifactci_core::Error::JobNotFound { .. } => "job_not_found",
                artifactci_core::Error::AmbiguousJob { .. } => "ambiguous_job",
                artifactci_core::Error::InvalidToken(_) => "invalid_token",
                _ => "invalid_request",
            },
            Self::Signer(_) => "invalid_token",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::JobNotFound { .. } => StatusCode::NOT_FOUND,
            Self::JobNotRunning { .. } => StatusCode::NOT_FOUND,
            Self::DuplicateRequest(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::Upstream { status, .. } => *status,
            Self::JobStatusParse(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ArtifactNotFound(_) => StatusCode::NOT_FOUND,
            Self::UploadNotFound(_) => StatusCode::NOT_FOUND,
            Self::Timeout => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Storage(e) => match e {
                artifactci_storage::StorageError::NotFound(_) => StatusCode::NOT_FOUND,
                artifactci_storage::StorageError::InvalidKey(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Metadata(e) => match e {
                artifactci_metadata::MetadataError::NotFound(_) => StatusCode::NOT_FOUND,
                artifactci_metadata::MetadataError::AlreadyExists(_) => StatusCode::CONFLICT,
                artifactci_metadata::MetadataError::Constraint(_) => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Core(e) => match e {
                artifactci_core::Error::JobNotFound { .. } => StatusCode::NOT_FOUND,
                artifactci_core::Error::InvalidToken(_) => StatusCode::UNAUTHORIZED,
                artifactci_core::Error::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
                _ => StatusCode::BAD_REQUEST,
            },
            Self::Signer(e) => match e {
                artifactci_signer::SignerError::KeyParsing(_) => StatusCode::INTERNAL_SERVER_ERROR,
                _ => StatusCode::UNAUTHORIZED,
            },
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::JobNotFound { jobs, .. } | Self::JobNotRunning { jobs, .. } => {
                Some(serde_json::json!({ "jobs": jobs }))
            }
            Self::Core(artifactci_core::Error::AmbiguousJob { candidates, .. }) => {
                Some(serde_json::json!({ "candidates": candidates }))
            }
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "request failed");
        }
        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
            details: self.details(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
