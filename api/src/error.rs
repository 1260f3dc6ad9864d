use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Errors surfaced by handlers, rendered as `{"error": "..."}`.
#[derive(Debug)]
pub enum ApiError {
    Source(pricefeed::Error),
    BadRequest(String),
    NotFound(String),
    Internal(anyhow::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        use pricefeed::Error as E;
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Source(e) => match e {
                E::NotFound(_) => StatusCode::NOT_FOUND,
                E::BadRequest { .. } => StatusCode::BAD_REQUEST,
                E::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
                E::Cancelled | E::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
                E::Cache(_) | E::CacheUnavailable(_) | E::LimiterClosed => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                _ => StatusCode::BAD_GATEWAY,
            },
        }
    }
}

impl From<pricefeed::Error> for ApiError {
    fn from(e: pricefeed::Error) -> Self {
        ApiError::Source(e)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::Source(e) => e.to_string(),
            ApiError::BadRequest(m) | ApiError::NotFound(m) => m.clone(),
            ApiError::Internal(e) => {
                tracing::error!(error = ?e, "Request failed");
                "internal error".to_string()
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
