//! Error types for beatreel-server
//!
//! Caller mistakes (`NotFound`, `Conflict`, `BadRequest`) are detected before
//! any external process starts. Tool failures carry the captured tool output
//! in `details` so an operator can see which stage broke.

use axum::{
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::models::SlotError;
use crate::services::analysis::AnalysisError;
use crate::services::orchestrator::OrchestratorError;
use crate::services::slots::SlotAssignError;
use crate::services::stream_download::DownloadError;
use crate::services::tool_invoker::ToolError;
use crate::services::uploads::UploadError;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409) - pipeline already running, duplicate slot filename
    #[error("Conflict: {0}")]
    Conflict(String),

    /// External tool exited non-zero or could not start (500)
    #[error("External tool failure: {message}")]
    ExternalTool {
        message: String,
        details: Option<String>,
    },

    /// Atomic record write could not complete (500)
    #[error("Persistence failure: {0}")]
    Persistence(String),

    /// Upload larger than the per-file limit (413)
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<beatreel_common::Error> for ApiError {
    fn from(err: beatreel_common::Error) -> Self {
        use beatreel_common::Error;
        match err {
            Error::NotFound(msg) => ApiError::NotFound(msg),
            Error::InvalidInput(msg) => ApiError::BadRequest(msg),
            e @ (Error::Io(_) | Error::Json(_)) => ApiError::Persistence(e.to_string()),
            Error::Config(msg) | Error::Internal(msg) => ApiError::Internal(msg),
        }
    }
}

impl From<ToolError> for ApiError {
    fn from(err: ToolError) -> Self {
        let details = err.output().map(str::to_string);
        ApiError::ExternalTool {
            message: err.to_string(),
            details,
        }
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::NotFound(msg) | OrchestratorError::NoActiveRun(msg) => {
                ApiError::NotFound(msg)
            }
            OrchestratorError::AlreadyRunning(msg) => ApiError::Conflict(msg),
            OrchestratorError::MissingAssets(msg) | OrchestratorError::InvalidInput(msg) => {
                ApiError::BadRequest(msg)
            }
            OrchestratorError::ScriptMissing(msg) => ApiError::Internal(msg),
            OrchestratorError::Record(e) => e.into(),
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge(err.body_text())
        } else {
            ApiError::BadRequest(err.body_text())
        }
    }
}

impl From<AnalysisError> for ApiError {
    fn from(err: AnalysisError) -> Self {
        match err {
            AnalysisError::Record(e) => e.into(),
            AnalysisError::NoAudio => ApiError::BadRequest(err.to_string()),
            AnalysisError::Duration(ref source) => ApiError::ExternalTool {
                message: err.to_string(),
                details: source.output().map(str::to_string),
            },
        }
    }
}

impl From<DownloadError> for ApiError {
    fn from(err: DownloadError) -> Self {
        match err {
            DownloadError::Record(e) => e.into(),
            DownloadError::MissingUrl | DownloadError::InvalidUrl => {
                ApiError::BadRequest(err.to_string())
            }
            DownloadError::Stage { ref source, .. } => ApiError::ExternalTool {
                message: err.to_string(),
                details: source.output().map(str::to_string),
            },
        }
    }
}

impl From<SlotError> for ApiError {
    fn from(err: SlotError) -> Self {
        match err {
            SlotError::OutOfRange(_) => ApiError::BadRequest(err.to_string()),
            SlotError::Duplicate { .. } => ApiError::Conflict(err.to_string()),
        }
    }
}

impl From<SlotAssignError> for ApiError {
    fn from(err: SlotAssignError) -> Self {
        match err {
            SlotAssignError::Record(e) => e.into(),
            SlotAssignError::Slot(e) => e.into(),
            SlotAssignError::WrongVariant(_) => ApiError::BadRequest(err.to_string()),
        }
    }
}

impl From<UploadError> for ApiError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::TooLarge { .. } => ApiError::PayloadTooLarge(err.to_string()),
            UploadError::Record(e) => e.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg, None),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg, None),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg, None),
            ApiError::ExternalTool { message, details } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "EXTERNAL_TOOL_FAILURE",
                message,
                details,
            ),
            ApiError::Persistence(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "PERSISTENCE_FAILURE",
                msg,
                None,
            ),
            ApiError::PayloadTooLarge(msg) => {
                (StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE", msg, None)
            }
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg,
                None,
            ),
            ApiError::Io(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "IO_ERROR",
                err.to_string(),
                None,
            ),
        };

        if status.is_server_error() {
            tracing::error!(code = error_code, "{}", message);
        }

        let mut error = json!({
            "code": error_code,
            "message": message,
        });
        if let Some(details) = details {
            error["details"] = json!(details);
        }

        (status, Json(json!({ "error": error }))).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_error_mapping() {
        let not_found: ApiError = beatreel_common::Error::NotFound("p".into()).into();
        assert!(matches!(not_found, ApiError::NotFound(_)));

        let invalid: ApiError = beatreel_common::Error::InvalidInput("bad".into()).into();
        assert!(matches!(invalid, ApiError::BadRequest(_)));

        let io: ApiError =
            beatreel_common::Error::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk full")).into();
        assert!(matches!(io, ApiError::Persistence(_)));
    }

    #[test]
    fn test_slot_error_mapping() {
        let dup: ApiError = SlotError::Duplicate {
            filename: "a.jpg".into(),
            slot: 2,
        }
        .into();
        assert!(matches!(dup, ApiError::Conflict(_)));
        let range: ApiError = SlotError::OutOfRange(13).into();
        assert!(matches!(range, ApiError::BadRequest(_)));
    }

    #[test]
    fn test_tool_failure_keeps_output() {
        let err: ApiError = ToolError::Failed {
            program: "ffmpeg".into(),
            code: Some(1),
            output: "Invalid data found".into(),
        }
        .into();
        match err {
            ApiError::ExternalTool { details, .. } => {
                assert_eq!(details.as_deref(), Some("Invalid data found"))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_status_codes() {
        let cases = [
            (ApiError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (ApiError::BadRequest("x".into()), StatusCode::BAD_REQUEST),
            (ApiError::Conflict("x".into()), StatusCode::CONFLICT),
            (
                ApiError::ExternalTool {
                    message: "x".into(),
                    details: Some("stderr".into()),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (ApiError::PayloadTooLarge("x".into()), StatusCode::PAYLOAD_TOO_LARGE),
        ];
        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }
}
