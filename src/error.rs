use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde::Serialize;
use thiserror::Error;

use crate::models::QuizValidationError;

/// Engine-level failures. Every variant is a deterministic function of the
/// request, so none of them is ever retried.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("quiz not found")]
    QuizNotFound,
    #[error("assignment not found")]
    AssignmentNotFound,
    #[error("submission not found")]
    SubmissionNotFound,
    #[error("access denied")]
    Forbidden,
    #[error("quiz has recorded results and can no longer be edited")]
    Locked,
    #[error("assignment roster must not be empty")]
    EmptyScope,
    #[error("a submission for this assignment already exists")]
    AlreadySubmitted,
    #[error("expected {expected} answers, got {got}")]
    MalformedSubmission { expected: usize, got: usize },
    #[error("answer for question {question} is not a valid option index")]
    InvalidAnswerIndex { question: usize },
    #[error(transparent)]
    Validation(#[from] QuizValidationError),
    #[error("enrollment lookup failed: {0}")]
    Enrollment(#[source] anyhow::Error),
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorDetail {
    pub field: String,
    pub issue: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: ErrorPayload,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<ErrorDetail>,
    pub request_id: String,
}

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub details: Vec<ErrorDetail>,
    pub request_id: String,
}

impl AppError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: Vec::new(),
            request_id: request_id.into(),
        }
    }

    pub fn with_details(mut self, details: Vec<ErrorDetail>) -> Self {
        self.details = details;
        self
    }

    /// Maps an engine failure to its HTTP envelope. A uniqueness race detected
    /// at the store layer arrives here as `AlreadySubmitted`, never as a
    /// generic failure.
    pub fn from_engine(err: EngineError, request_id: String) -> Self {
        match err {
            EngineError::QuizNotFound
            | EngineError::AssignmentNotFound
            | EngineError::SubmissionNotFound => {
                Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", err.to_string(), request_id)
            }
            EngineError::Forbidden => {
                Self::new(StatusCode::FORBIDDEN, "FORBIDDEN", err.to_string(), request_id)
            }
            EngineError::Locked => {
                Self::new(StatusCode::CONFLICT, "QUIZ_LOCKED", err.to_string(), request_id)
            }
            EngineError::AlreadySubmitted => {
                Self::new(StatusCode::CONFLICT, "ALREADY_SUBMITTED", err.to_string(), request_id)
            }
            EngineError::EmptyScope
            | EngineError::MalformedSubmission { .. }
            | EngineError::InvalidAnswerIndex { .. } => {
                Self::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", err.to_string(), request_id)
            }
            EngineError::Validation(inner) => Self::new(
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                "quiz validation failed",
                request_id,
            )
            .with_details(vec![ErrorDetail {
                field: inner.field(),
                issue: inner.to_string(),
            }]),
            EngineError::Enrollment(_) => {
                Self::new(StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR", err.to_string(), request_id)
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let payload = ErrorBody {
            error: ErrorPayload {
                code: self.code,
                message: self.message,
                details: self.details,
                request_id: self.request_id,
            },
        };
        (self.status, Json(payload)).into_response()
    }
}
