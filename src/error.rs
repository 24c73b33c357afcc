use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::models::ErrorBody;

#[derive(Debug, thiserror::Error)]
pub enum PreviewError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("Invalid or unsafe URL.")]
    UnsafeUrl,
    #[error("Rate limit exceeded (10/min/IP)")]
    RateLimited,
    #[error("URL did not return HTML")]
    WrongContentType,
    #[error("HTML exceeds max size ({limit} bytes)")]
    TooLarge { limit: usize },
    #[error("{0}")]
    FetchFailed(String),
}

impl PreviewError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            PreviewError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            PreviewError::InvalidInput(_)
            | PreviewError::UnsafeUrl
            | PreviewError::WrongContentType
            | PreviewError::TooLarge { .. }
            | PreviewError::FetchFailed(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for PreviewError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.to_string(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}

impl From<reqwest::Error> for PreviewError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            PreviewError::FetchFailed(format!("TimeoutError: {}", e))
        } else if e.is_connect() {
            PreviewError::FetchFailed(format!("ConnectError: {}", e))
        } else {
            PreviewError::FetchFailed(format!("RequestError: {}", e))
        }
    }
}
