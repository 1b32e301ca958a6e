//! The HTTP surface: health, marker detection and metadata extraction.

mod markers;
mod metadata;
mod server;

pub use server::{new_server, router};

use actix_web::HttpResponse;
use actix_web::http::StatusCode;
use serde::Serialize;

/// Bounded JSON error body; handlers never leak stack traces.
#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<&'a str>,
}

/// Request-level failures, mapped onto the documented status codes.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Malformed input; never retried internally.
    #[error("{0}")]
    BadRequest(String),

    /// A requested URL could not be fetched.
    #[error("Failed to download file: {0}")]
    Download(String),

    /// Models are still loading.
    #[error("Service is still initializing. Please retry.")]
    Initializing,

    /// Anything unexpected; logged, surfaced as a single line.
    #[error("{0}")]
    Internal(String),
}

impl actix_web::ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) | Self::Download(_) => StatusCode::BAD_REQUEST,
            Self::Initializing => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if matches!(self, Self::Internal(_)) {
            tracing::error!("{self}");
        }
        HttpResponse::build(self.status_code()).json(ErrorBody {
            error: &self.to_string(),
            details: None,
        })
    }
}
