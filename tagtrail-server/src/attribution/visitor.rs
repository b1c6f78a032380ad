//! Visitor registry operations used by the claim protocol

use sqlx::SqliteConnection;
use tagtrail_common::db::Visitor;
use tagtrail_common::uuid_utils;

use crate::error::ApiResult;

/// Find the visitor for `anon_visitor_id`, creating it if missing, and touch
/// `last_seen_at`
///
/// This is the first statement of every claim transaction. Being a write, it
/// takes the SQLite writer lock immediately, so concurrent claims for the
/// same visitor queue here instead of racing on the ownership check.
pub async fn find_or_create(
    conn: &mut SqliteConnection,
    anon_visitor_id: &str,
    now_ms: i64,
) -> ApiResult<Visitor> {
    sqlx::query(
        r#"
        INSERT INTO visitors (id, anon_visitor_id, first_seen_at, last_seen_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(anon_visitor_id) DO UPDATE SET
            last_seen_at = MAX(visitors.last_seen_at, excluded.last_seen_at)
        "#,
    )
    .bind(uuid_utils::generate_id())
    .bind(anon_visitor_id)
    .bind(now_ms)
    .bind(now_ms)
    .execute(&mut *conn)
    .await?;

    // Load back to get the actual id (differs from ours when the row existed)
    let visitor = sqlx::query_as::<_, Visitor>("SELECT * FROM visitors WHERE anon_visitor_id = ?")
        .bind(anon_visitor_id)
        .fetch_one(&mut *conn)
        .await?;

    Ok(visitor)
}

/// Set the visitor's owner if it has none
///
/// Returns true when this call performed the null→user transition.
pub async fn assign_user(
    conn: &mut SqliteConnection,
    visitor_id: &str,
    user_id: &str,
) -> ApiResult<bool> {
    let result = sqlx::query("UPDATE visitors SET user_id = ? WHERE id = ? AND user_id IS NULL")
        .bind(user_id)
        .bind(visitor_id)
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected() == 1)
}
