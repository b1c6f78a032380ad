//! Shared fixtures for tagtrail-server integration tests
//!
//! Every test gets its own SQLite file in a temp directory; the directory
//! guard must stay alive for as long as the pool is used.

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use sqlx::SqlitePool;
use tagtrail_common::db::{init_database, TapEvent};
use tempfile::TempDir;

pub async fn test_pool() -> (TempDir, SqlitePool) {
    let dir = TempDir::new().expect("create temp dir");
    let pool = init_database(&dir.path().join("tagtrail.db"))
        .await
        .expect("init database");
    (dir, pool)
}

/// UTC instant on a fixed test day
pub fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, day, hour, minute, 0)
        .single()
        .expect("valid test instant")
}

pub fn ms(day: u32, hour: u32, minute: u32) -> i64 {
    at(day, hour, minute).timestamp_millis()
}

#[derive(Debug, Clone, Default)]
pub struct VisitorSeed {
    pub id: &'static str,
    pub anon_visitor_id: &'static str,
    pub user_id: Option<&'static str>,
    pub last_tag_id: Option<&'static str>,
    pub last_batch_id: Option<&'static str>,
    pub ip_hash: Option<&'static str>,
    pub user_agent: Option<&'static str>,
}

pub async fn insert_visitor(pool: &SqlitePool, seed: VisitorSeed) {
    sqlx::query(
        r#"
        INSERT INTO visitors (
            id, anon_visitor_id, user_id, tap_count, first_seen_at, last_seen_at,
            last_tag_id, last_batch_id, ip_hash_last_seen, user_agent_last_seen
        ) VALUES (?, ?, ?, 0, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(seed.id)
    .bind(seed.anon_visitor_id)
    .bind(seed.user_id)
    .bind(ms(1, 0, 0))
    .bind(ms(1, 0, 0))
    .bind(seed.last_tag_id)
    .bind(seed.last_batch_id)
    .bind(seed.ip_hash)
    .bind(seed.user_agent)
    .execute(pool)
    .await
    .expect("insert visitor");
}

#[derive(Debug, Clone, Default)]
pub struct TapSeed {
    pub id: &'static str,
    pub tag_id: &'static str,
    pub batch_id: Option<&'static str>,
    pub occurred_at: i64,
    pub ip_hash: Option<&'static str>,
    pub user_agent: Option<&'static str>,
    pub anon_visitor_id: Option<&'static str>,
    pub visitor_id: Option<&'static str>,
    pub user_id: Option<&'static str>,
    pub is_duplicate: bool,
}

pub async fn insert_tap(pool: &SqlitePool, seed: TapSeed) {
    sqlx::query(
        r#"
        INSERT INTO tap_events (
            id, tag_id, batch_id, occurred_at, ip_hash, user_agent,
            anon_visitor_id, visitor_id, user_id, is_duplicate
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(seed.id)
    .bind(seed.tag_id)
    .bind(seed.batch_id)
    .bind(seed.occurred_at)
    .bind(seed.ip_hash)
    .bind(seed.user_agent)
    .bind(seed.anon_visitor_id)
    .bind(seed.visitor_id)
    .bind(seed.user_id)
    .bind(seed.is_duplicate)
    .execute(pool)
    .await
    .expect("insert tap");
}

pub async fn load_tap(pool: &SqlitePool, id: &str) -> TapEvent {
    sqlx::query_as::<_, TapEvent>("SELECT * FROM tap_events WHERE id = ?")
        .bind(id)
        .fetch_one(pool)
        .await
        .expect("load tap")
}

pub async fn insert_user(pool: &SqlitePool, id: &str, created_at: i64) {
    sqlx::query("INSERT INTO users (id, created_at) VALUES (?, ?)")
        .bind(id)
        .bind(created_at)
        .execute(pool)
        .await
        .expect("insert user");
}

#[derive(Debug, Clone, Default)]
pub struct ListSeed {
    pub id: &'static str,
    pub owner_visitor_id: Option<&'static str>,
    pub owner_user_id: Option<&'static str>,
    pub claimed_from_visitor_id: Option<&'static str>,
    pub merged_into_list_id: Option<&'static str>,
    pub source_tag_id: Option<&'static str>,
    pub created_at: i64,
}

pub async fn insert_list(pool: &SqlitePool, seed: ListSeed) {
    sqlx::query(
        r#"
        INSERT INTO shopping_lists (
            id, owner_visitor_id, owner_user_id, claimed_from_visitor_id,
            merged_into_list_id, source_tag_id, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(seed.id)
    .bind(seed.owner_visitor_id)
    .bind(seed.owner_user_id)
    .bind(seed.claimed_from_visitor_id)
    .bind(seed.merged_into_list_id)
    .bind(seed.source_tag_id)
    .bind(seed.created_at)
    .bind(seed.created_at)
    .execute(pool)
    .await
    .expect("insert list");
}

#[derive(Debug, Clone, Default)]
pub struct ItemSeed {
    pub id: &'static str,
    pub list_id: &'static str,
    pub item_key: &'static str,
    pub quantity: i64,
    pub times_purchased: i64,
    pub source_tag_id: Option<&'static str>,
    pub last_added_at: Option<i64>,
    pub purchased_at: Option<i64>,
}

pub async fn insert_item(pool: &SqlitePool, seed: ItemSeed) {
    sqlx::query(
        r#"
        INSERT INTO shopping_list_items (
            id, list_id, item_key, quantity, times_purchased, source_tag_id,
            created_at, last_added_at, purchased_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(seed.id)
    .bind(seed.list_id)
    .bind(seed.item_key)
    .bind(seed.quantity.max(1))
    .bind(seed.times_purchased)
    .bind(seed.source_tag_id)
    .bind(ms(1, 0, 0))
    .bind(seed.last_added_at)
    .bind(seed.purchased_at)
    .execute(pool)
    .await
    .expect("insert item");
}
