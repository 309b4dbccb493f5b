use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// Errors returned by the HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("invalid tag `{0}`: expected 1-128 characters of [A-Za-z0-9_.-]")]
    InvalidTag(String),

    #[error("count must be between 1 and {max}, got {count}")]
    InvalidCount { count: usize, max: usize },

    #[error("no allocator has been created for tag `{0}`")]
    UnknownTag(String),

    #[error(transparent)]
    Allocator(#[from] segid::Error),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidTag(_) | Self::InvalidCount { .. } => StatusCode::BAD_REQUEST,
            Self::UnknownTag(_) => StatusCode::NOT_FOUND,
            Self::Allocator(err) => match err {
                segid::Error::Cancelled
                | segid::Error::RefillLoad { .. }
                | segid::Error::RefillExhausted { .. }
                | segid::Error::Repository(_) => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}
