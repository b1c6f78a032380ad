//! Write side of the daily rollup
//!
//! Each dimension is replaced in its own transaction: the date's rows are
//! deleted and the complete, freshly computed set is inserted. Counts are
//! never incremented in place, so a re-run converges to the same rows and
//! keys that disappeared since the last run are removed.

use sqlx::{Sqlite, SqlitePool, Transaction};
use tagtrail_common::db::{
    DailyBatchStats, DailyItemStats, DailySiteStats, DailyTagStats, DailyVisitorStats,
};

use crate::error::ApiResult;

async fn clear_date(tx: &mut Transaction<'_, Sqlite>, table: &str, date: &str) -> ApiResult<()> {
    sqlx::query(&format!("DELETE FROM {} WHERE date = ?", table))
        .bind(date)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

pub async fn write_site(pool: &SqlitePool, row: &DailySiteStats) -> ApiResult<u64> {
    let mut tx = pool.begin().await?;
    clear_date(&mut tx, "daily_site_stats", &row.date).await?;

    sqlx::query(
        r#"
        INSERT INTO daily_site_stats (
            date, taps, unique_visitors, new_users, lists_created,
            items_added, items_purchased, computed_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(date) DO UPDATE SET
            taps = excluded.taps,
            unique_visitors = excluded.unique_visitors,
            new_users = excluded.new_users,
            lists_created = excluded.lists_created,
            items_added = excluded.items_added,
            items_purchased = excluded.items_purchased,
            computed_at = excluded.computed_at
        "#,
    )
    .bind(&row.date)
    .bind(row.taps)
    .bind(row.unique_visitors)
    .bind(row.new_users)
    .bind(row.lists_created)
    .bind(row.items_added)
    .bind(row.items_purchased)
    .bind(row.computed_at)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(1)
}

pub async fn write_batches(
    pool: &SqlitePool,
    date: &str,
    rows: &[DailyBatchStats],
) -> ApiResult<u64> {
    let mut tx = pool.begin().await?;
    clear_date(&mut tx, "daily_batch_stats", date).await?;

    for row in rows {
        sqlx::query(
            r#"
            INSERT INTO daily_batch_stats (date, batch_id, taps, unique_visitors, computed_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(date, batch_id) DO UPDATE SET
                taps = excluded.taps,
                unique_visitors = excluded.unique_visitors,
                computed_at = excluded.computed_at
            "#,
        )
        .bind(&row.date)
        .bind(&row.batch_id)
        .bind(row.taps)
        .bind(row.unique_visitors)
        .bind(row.computed_at)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(rows.len() as u64)
}

pub async fn write_tags(pool: &SqlitePool, date: &str, rows: &[DailyTagStats]) -> ApiResult<u64> {
    let mut tx = pool.begin().await?;
    clear_date(&mut tx, "daily_tag_stats", date).await?;

    for row in rows {
        sqlx::query(
            r#"
            INSERT INTO daily_tag_stats (date, tag_id, taps, unique_visitors, computed_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(date, tag_id) DO UPDATE SET
                taps = excluded.taps,
                unique_visitors = excluded.unique_visitors,
                computed_at = excluded.computed_at
            "#,
        )
        .bind(&row.date)
        .bind(&row.tag_id)
        .bind(row.taps)
        .bind(row.unique_visitors)
        .bind(row.computed_at)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(rows.len() as u64)
}

pub async fn write_items(pool: &SqlitePool, date: &str, rows: &[DailyItemStats]) -> ApiResult<u64> {
    let mut tx = pool.begin().await?;
    clear_date(&mut tx, "daily_item_stats", date).await?;

    for row in rows {
        sqlx::query(
            r#"
            INSERT INTO daily_item_stats (date, item_key, added, purchased, computed_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(date, item_key) DO UPDATE SET
                added = excluded.added,
                purchased = excluded.purchased,
                computed_at = excluded.computed_at
            "#,
        )
        .bind(&row.date)
        .bind(&row.item_key)
        .bind(row.added)
        .bind(row.purchased)
        .bind(row.computed_at)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(rows.len() as u64)
}

pub async fn write_visitors(
    pool: &SqlitePool,
    date: &str,
    rows: &[DailyVisitorStats],
) -> ApiResult<u64> {
    let mut tx = pool.begin().await?;
    clear_date(&mut tx, "daily_visitor_stats", date).await?;

    for row in rows {
        sqlx::query(
            r#"
            INSERT INTO daily_visitor_stats (
                date, visitor_id, user_id, taps, tags_tapped, batches_tapped,
                lists_created, items_added, items_purchased, score, is_power_user,
                computed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(date, visitor_id) DO UPDATE SET
                user_id = excluded.user_id,
                taps = excluded.taps,
                tags_tapped = excluded.tags_tapped,
                batches_tapped = excluded.batches_tapped,
                lists_created = excluded.lists_created,
                items_added = excluded.items_added,
                items_purchased = excluded.items_purchased,
                score = excluded.score,
                is_power_user = excluded.is_power_user,
                computed_at = excluded.computed_at
            "#,
        )
        .bind(&row.date)
        .bind(&row.visitor_id)
        .bind(&row.user_id)
        .bind(row.taps)
        .bind(row.tags_tapped)
        .bind(row.batches_tapped)
        .bind(row.lists_created)
        .bind(row.items_added)
        .bind(row.items_purchased)
        .bind(row.score)
        .bind(row.is_power_user)
        .bind(row.computed_at)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(rows.len() as u64)
}
