//! Idempotency engine error types.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::problem::Problem;

/// Status used when the caller went away or ran out of time while waiting.
pub const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Why an `Idempotency-Key` header value was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("Idempotency-Key must be present and ≤ {max} characters.")]
    Length { max: usize },

    #[error("Idempotency-Key must be a GUID.")]
    Format,
}

/// Errors surfaced by the interception pipeline.
///
/// Downstream handler responses are never represented here; a 4xx/5xx from
/// the executor is forwarded as-is.
#[derive(Debug, thiserror::Error)]
pub enum IdempotencyError {
    #[error("invalid idempotency key: {0}")]
    InvalidToken(#[from] TokenError),

    #[error("failed to read request body: {0}")]
    RequestBody(#[source] axum::Error),

    #[error("request cancelled before its response could be recorded")]
    Cancelled,

    #[error("failed to capture downstream response: {0}")]
    Downstream(#[source] axum::Error),
}

impl IdempotencyError {
    /// Label used for the `outcome` metric dimension.
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::InvalidToken(_) | Self::RequestBody(_) => "invalid",
            Self::Cancelled => "cancelled",
            Self::Downstream(_) => "capture_failed",
        }
    }
}

impl IntoResponse for IdempotencyError {
    fn into_response(self) -> Response {
        match self {
            Self::InvalidToken(err) => {
                Problem::new(StatusCode::BAD_REQUEST, "Invalid Idempotency-Key")
                    .with_detail(err.to_string())
                    .into_response()
            }
            Self::RequestBody(err) => Problem::new(StatusCode::BAD_REQUEST, "Invalid request body")
                .with_detail(err.to_string())
                .into_response(),
            Self::Cancelled => StatusCode::from_u16(CLIENT_CLOSED_REQUEST)
                .unwrap_or(StatusCode::REQUEST_TIMEOUT)
                .into_response(),
            Self::Downstream(err) => Problem::new(StatusCode::BAD_GATEWAY, "Bad Gateway")
                .with_detail(err.to_string())
                .into_response(),
        }
    }
}
