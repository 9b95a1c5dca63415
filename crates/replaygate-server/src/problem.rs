//! `application/problem+json` responses and the API error type.

use axum::{
    Json,
    http::{StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
};
use replaygate_core::{CoreError, ValidationErrors};
use replaygate_storage::StorageError;
use serde::Serialize;

use crate::middleware::current_request_id;

pub const PROBLEM_CONTENT_TYPE: &str = "application/problem+json";

/// Problem details body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Problem {
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<ValidationErrors>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(skip)]
    status_code: StatusCode,
}

impl Problem {
    pub fn new(status: StatusCode, title: impl Into<String>) -> Self {
        Self {
            kind: format!("https://httpstatuses.io/{}", status.as_u16()),
            title: title.into(),
            status: status.as_u16(),
            detail: None,
            errors: None,
            trace_id: None,
            status_code: status,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_errors(mut self, errors: ValidationErrors) -> Self {
        self.errors = Some(errors);
        self
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn status_code(&self) -> StatusCode {
        self.status_code
    }
}

impl IntoResponse for Problem {
    fn into_response(self) -> Response {
        (
            self.status_code,
            [(CONTENT_TYPE, PROBLEM_CONTENT_TYPE)],
            Json(self),
        )
            .into_response()
    }
}

/// Errors returned by the Todo handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Todo not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Validation(ValidationErrors),

    #[error("ETag does not match the current resource state.")]
    PreconditionFailed,

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) | Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::PreconditionFailed => StatusCode::PRECONDITION_FAILED,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { id } => Self::NotFound(id),
            StorageError::VersionConflict { .. } => Self::PreconditionFailed,
            StorageError::Internal { message } => Self::Internal(message),
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::TodoNotFound { id } => Self::NotFound(id),
            invalid @ CoreError::InvalidId(_) => Self::BadRequest(invalid.to_string()),
        }
    }
}

impl From<ValidationErrors> for ApiError {
    fn from(errors: ValidationErrors) -> Self {
        Self::Validation(errors)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let problem = match self {
            Self::BadRequest(message) => Problem::new(status, "Bad Request").with_detail(message),
            Self::NotFound(id) => {
                Problem::new(status, "Not Found").with_detail(format!("Todo {id} was not found."))
            }
            Self::Validation(errors) => {
                Problem::new(status, "One or more validation errors occurred.").with_errors(errors)
            }
            Self::PreconditionFailed => Problem::new(status, "Precondition Failed")
                .with_detail("ETag does not match the current resource state."),
            Self::Internal(message) => {
                let trace_id = current_request_id();
                tracing::error!(error = %message, trace_id = ?trace_id, "internal error");
                let problem = Problem::new(status, "Internal Server Error");
                match trace_id {
                    Some(id) => problem.with_trace_id(id),
                    None => problem,
                }
            }
        };
        problem.into_response()
    }
}
