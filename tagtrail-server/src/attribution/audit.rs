//! Claim audit trail
//!
//! One row per (user, visitor) pair. Re-running a claim refreshes the row's
//! method and details and stamps `reclaimed_at`; `claimed_at` keeps the first
//! successful claim.

use sqlx::{SqliteConnection, SqlitePool};
use tagtrail_common::db::ClaimAuditRecord;
use tagtrail_common::uuid_utils;

use crate::error::ApiResult;

/// Upsert the audit row for a claim
///
/// Returns true when a row for the pair already existed.
pub async fn record_claim(
    conn: &mut SqliteConnection,
    user_id: &str,
    visitor_id: &str,
    anon_visitor_id: &str,
    method: &str,
    details: &serde_json::Value,
    now_ms: i64,
) -> ApiResult<bool> {
    let existed: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM claim_audit WHERE user_id = ? AND visitor_id = ?)",
    )
    .bind(user_id)
    .bind(visitor_id)
    .fetch_one(&mut *conn)
    .await?;

    let details = serde_json::to_string(details).map_err(tagtrail_common::Error::from)?;

    sqlx::query(
        r#"
        INSERT INTO claim_audit (
            id, user_id, visitor_id, anon_visitor_id, method, claimed_at, details
        ) VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(user_id, visitor_id) DO UPDATE SET
            method = excluded.method,
            anon_visitor_id = excluded.anon_visitor_id,
            details = excluded.details,
            reclaimed_at = excluded.claimed_at
        "#,
    )
    .bind(uuid_utils::generate_id())
    .bind(user_id)
    .bind(visitor_id)
    .bind(anon_visitor_id)
    .bind(method)
    .bind(now_ms)
    .bind(details)
    .execute(&mut *conn)
    .await?;

    Ok(existed)
}

/// Audit rows for one account, newest first
pub async fn for_user(pool: &SqlitePool, user_id: &str) -> ApiResult<Vec<ClaimAuditRecord>> {
    let rows = sqlx::query_as::<_, ClaimAuditRecord>(
        r#"
        SELECT * FROM claim_audit
        WHERE user_id = ?
        ORDER BY COALESCE(reclaimed_at, claimed_at) DESC, claimed_at DESC
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
