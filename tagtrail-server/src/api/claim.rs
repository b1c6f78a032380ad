//! Claim endpoints
//!
//! `POST /api/claim` attaches the caller's anonymous visitor history to their
//! account. `GET /api/claims/audit` lists the audit trail for one account.

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tagtrail_common::db::ClaimAuditRecord;

use super::auth::AuthenticatedUser;
use crate::attribution::{audit, AnonVisitorId, ClaimMethod, ClaimOutcome, ClaimRequest};
use crate::error::{ApiError, ApiResult};
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimBody {
    pub anon_visitor_id: Option<String>,
    pub method: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimResponse {
    pub ok: bool,
    pub visitor_id: String,
    pub anon_visitor_id: AnonVisitorId,
    pub tap_events_linked: i64,
    pub my_list_claimed: bool,
}

impl ClaimBody {
    fn into_request(self, user_id: String) -> ApiResult<ClaimRequest> {
        let raw = self
            .anon_visitor_id
            .ok_or_else(|| ApiError::Validation("anonVisitorId is required".to_string()))?;
        let method = match self.method {
            Some(m) => m.parse::<ClaimMethod>()?,
            None => ClaimMethod::default(),
        };

        Ok(ClaimRequest {
            user_id,
            anon_visitor_id: AnonVisitorId::parse(&raw)?,
            method,
        })
    }
}

/// POST /api/claim
pub async fn claim_visitor(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    body: Result<Json<ClaimBody>, JsonRejection>,
) -> ApiResult<Json<ClaimResponse>> {
    let Json(body) = body.map_err(|e| ApiError::Validation(e.body_text()))?;
    let request = body.into_request(user_id)?;

    match state.claims.claim(&request).await? {
        ClaimOutcome::Linked(report) => Ok(Json(ClaimResponse {
            ok: true,
            my_list_claimed: report.list.claimed(),
            visitor_id: report.visitor_id,
            anon_visitor_id: report.anon_visitor_id,
            tap_events_linked: report.linked_count,
        })),
        ClaimOutcome::Conflict(conflict) => Err(ApiError::VisitorAlreadyClaimed {
            visitor_id: conflict.visitor_id,
        }),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditQuery {
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditResponse {
    pub user_id: String,
    pub claims: Vec<ClaimAuditRecord>,
}

/// GET /api/claims/audit?userId=...
pub async fn claim_audit(
    State(state): State<AppState>,
    Query(query): Query<AuditQuery>,
) -> ApiResult<Json<AuditResponse>> {
    let user_id = query
        .user_id
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .ok_or_else(|| ApiError::Validation("userId is required".to_string()))?;

    let claims = audit::for_user(&state.db, &user_id).await?;
    Ok(Json(AuditResponse { user_id, claims }))
}
