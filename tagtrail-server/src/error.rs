//! Error types for tagtrail-server
//!
//! Maps the claim/aggregation failure taxonomy onto HTTP responses with a
//! stable `{ "error": { "code", "message" } }` body.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Message shown to end users when a visitor belongs to another account
pub const CONFLICT_MESSAGE: &str = "this device's history belongs to another account";

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// No authenticated caller, or a bad operator secret (401)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Malformed request input (400)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Visitor already claimed by a different account (409)
    #[error("Visitor {visitor_id} already claimed by another account")]
    VisitorAlreadyClaimed { visitor_id: String },

    /// Feature disabled or resource missing (404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Claim exceeded its unit-of-work timeout (500)
    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// One rollup dimension failed; earlier dimensions of the run stay committed (500)
    #[error("Aggregation failed while writing {dimension}: {source}")]
    AggregationFailed {
        dimension: &'static str,
        #[source]
        source: Box<ApiError>,
    },

    /// tagtrail-common error
    #[error("Common error: {0}")]
    Common(#[from] tagtrail_common::Error),

    /// Database error raised directly by a handler or engine
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ApiError {
    /// Stable machine-readable code for the response body
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::Validation(_) => "VALIDATION_ERROR",
            ApiError::VisitorAlreadyClaimed { .. } => "VISITOR_ALREADY_CLAIMED",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Common(tagtrail_common::Error::InvalidInput(_)) => "VALIDATION_ERROR",
            ApiError::AggregationFailed { .. } => "AGGREGATION_FAILED",
            ApiError::Timeout(_) | ApiError::Common(_) | ApiError::Database(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self.code() {
            "UNAUTHORIZED" => StatusCode::UNAUTHORIZED,
            "VALIDATION_ERROR" => StatusCode::BAD_REQUEST,
            "VISITOR_ALREADY_CLAIMED" => StatusCode::CONFLICT,
            "NOT_FOUND" => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        let body = match &self {
            ApiError::VisitorAlreadyClaimed { visitor_id } => json!({
                "error": { "code": code, "message": CONFLICT_MESSAGE },
                "visitorId": visitor_id,
            }),
            ApiError::Unauthorized(msg) | ApiError::Validation(msg) | ApiError::NotFound(msg) => {
                json!({ "error": { "code": code, "message": msg } })
            }
            ApiError::Common(tagtrail_common::Error::InvalidInput(msg)) => {
                json!({ "error": { "code": code, "message": msg } })
            }
            ApiError::AggregationFailed { dimension, .. } => {
                json!({
                    "error": {
                        "code": code,
                        "message": format!("aggregation failed at dimension {}; re-run the date", dimension),
                    }
                })
            }
            other => {
                // Full context stays in the logs; callers get a generic message
                tracing::error!(error = %other, "Request failed with internal error");
                json!({ "error": { "code": code, "message": "internal error" } })
            }
        };

        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers and engines
pub type ApiResult<T> = Result<T, ApiError>;
