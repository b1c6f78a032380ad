//! Ledger linking primitives
//!
//! Every update here carries the self-qualifying `user_id IS NULL` predicate:
//! an event that already belongs to an account is never touched again, which
//! is what lets concurrent or repeated passes run without row locks.

use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use crate::error::ApiResult;

/// Upper bound on ids bound into a single UPDATE
const LINK_CHUNK: usize = 500;

/// Account and visitor that matched events are attached to
#[derive(Debug, Clone)]
pub struct LinkTarget {
    pub user_id: String,
    pub visitor_id: String,
    pub anon_visitor_id: String,
}

/// Primary pass: link every unlinked event carrying the claimed token or
/// visitor id
///
/// Sets owner, visitor, token, `linked_at` and `link_method` in one write.
pub async fn link_primary(
    conn: &mut SqliteConnection,
    target: &LinkTarget,
    link_method: &str,
    now_ms: i64,
) -> ApiResult<u64> {
    let result = sqlx::query(
        r#"
        UPDATE tap_events SET
            user_id = ?,
            visitor_id = ?,
            anon_visitor_id = ?,
            linked_at = ?,
            link_method = ?
        WHERE user_id IS NULL
          AND (anon_visitor_id = ? OR visitor_id = ?)
        "#,
    )
    .bind(&target.user_id)
    .bind(&target.visitor_id)
    .bind(&target.anon_visitor_id)
    .bind(now_ms)
    .bind(link_method)
    .bind(&target.anon_visitor_id)
    .bind(&target.visitor_id)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}

/// Fill in `visitor_id` on events that carry the token but lack the id
///
/// Independent of ownership: events already linked elsewhere are repaired too.
pub async fn backfill_visitor_ids(
    conn: &mut SqliteConnection,
    target: &LinkTarget,
) -> ApiResult<u64> {
    let result = sqlx::query(
        "UPDATE tap_events SET visitor_id = ? WHERE anon_visitor_id = ? AND visitor_id IS NULL",
    )
    .bind(&target.visitor_id)
    .bind(&target.anon_visitor_id)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}

/// Link the given candidate events with `link_method`
///
/// Shared by every fallback matcher. Candidates that were linked in the
/// meantime (by an earlier pass or another request) are skipped by the
/// `user_id IS NULL` predicate. The token column is left as recorded.
pub async fn link_events(
    conn: &mut SqliteConnection,
    event_ids: &[String],
    target: &LinkTarget,
    link_method: &str,
    now_ms: i64,
) -> ApiResult<u64> {
    let mut linked = 0;

    for chunk in event_ids.chunks(LINK_CHUNK) {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE tap_events SET user_id = ");
        qb.push_bind(target.user_id.clone());
        qb.push(", visitor_id = COALESCE(visitor_id, ");
        qb.push_bind(target.visitor_id.clone());
        qb.push("), linked_at = ");
        qb.push_bind(now_ms);
        qb.push(", link_method = ");
        qb.push_bind(link_method.to_string());
        qb.push(" WHERE user_id IS NULL AND id IN (");
        let mut ids = qb.separated(", ");
        for id in chunk {
            ids.push_bind(id.clone());
        }
        qb.push(")");

        linked += qb.build().execute(&mut *conn).await?.rows_affected();
    }

    Ok(linked)
}

/// Events linked to `user_id` at or after `since_ms`
pub async fn count_recently_linked(
    conn: &mut SqliteConnection,
    user_id: &str,
    since_ms: i64,
) -> ApiResult<i64> {
    let count = sqlx::query_scalar(
        "SELECT COUNT(*) FROM tap_events WHERE user_id = ? AND linked_at >= ?",
    )
    .bind(user_id)
    .bind(since_ms)
    .fetch_one(&mut *conn)
    .await?;

    Ok(count)
}
