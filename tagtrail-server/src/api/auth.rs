//! Caller authentication
//!
//! Two kinds of caller reach this service:
//! - end users, whose account id is set by the upstream session layer in a
//!   trusted header (`x-user-id` unless configured otherwise)
//! - operators and schedulers, who present the shared cron secret either as
//!   `Authorization: Bearer <secret>` or in `x-cron-secret`

use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::error::ApiError;
use crate::AppState;

pub const CRON_SECRET_HEADER: &str = "x-cron-secret";

/// Account id of the authenticated caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser(pub String);

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(state.settings.user_header.as_str())
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty());

        match user_id {
            Some(id) => Ok(AuthenticatedUser(id.to_string())),
            None => Err(ApiError::Unauthorized("sign in required".to_string())),
        }
    }
}

/// Secret presented by the caller, from either supported header
fn presented_secret(headers: &HeaderMap) -> Option<&str> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);

    bearer
        .or_else(|| {
            headers
                .get(CRON_SECRET_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
        })
        .filter(|v| !v.is_empty())
}

/// Compare two secrets through their SHA-256 digests
pub fn secrets_match(presented: &str, expected: &str) -> bool {
    Sha256::digest(presented.as_bytes()) == Sha256::digest(expected.as_bytes())
}

/// Require the operator secret
///
/// An unconfigured secret rejects every request.
pub async fn require_operator(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected) = state.settings.cron_secret.as_deref() else {
        warn!(path = %request.uri().path(), "Operator request rejected: no secret configured");
        return Err(ApiError::Unauthorized("operator secret not configured".to_string()));
    };

    let rejection = match presented_secret(request.headers()) {
        Some(presented) if secrets_match(presented, expected) => None,
        Some(_) => Some("invalid operator secret"),
        None => Some("operator secret required"),
    };

    if let Some(reason) = rejection {
        warn!(path = %request.uri().path(), reason, "Operator request rejected");
        return Err(ApiError::Unauthorized(reason.to_string()));
    }

    Ok(next.run(request).await)
}
