//! Database initialization
//!
//! Opens (creating if needed) the SQLite database and builds the ledger,
//! registry, list, audit and snapshot tables. Every statement is idempotent
//! so the whole sequence is safe to run on each startup.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Current schema version recorded in `schema_version`
pub const SCHEMA_VERSION: i64 = 1;

/// Busy timeout applied to every connection; writers queue behind the
/// SQLite writer lock for at most this long
const BUSY_TIMEOUT_MS: i64 = 10_000;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                // Per-connection pragmas; a pool-level PRAGMA only reaches one connection
                sqlx::query("PRAGMA foreign_keys = ON").execute(&mut *conn).await?;
                sqlx::query(&format!("PRAGMA busy_timeout = {}", BUSY_TIMEOUT_MS))
                    .execute(&mut *conn)
                    .await?;
                Ok(())
            })
        })
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // WAL allows report readers alongside the single writer
    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create every table and index (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_schema_version_table(pool).await?;
    create_users_table(pool).await?;
    create_visitors_table(pool).await?;
    create_tap_events_table(pool).await?;
    create_shopping_list_tables(pool).await?;
    create_claim_audit_table(pool).await?;
    create_daily_snapshot_tables(pool).await?;

    sqlx::query("INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (?, ?)")
        .bind(SCHEMA_VERSION)
        .bind(crate::time::to_millis(crate::time::now()))
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Accounts are owned by the session layer; only `created_at` is read here
async fn create_users_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_users_created_at ON users(created_at)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_visitors_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS visitors (
            id TEXT PRIMARY KEY,
            anon_visitor_id TEXT NOT NULL UNIQUE,
            user_id TEXT,
            tap_count INTEGER NOT NULL DEFAULT 0,
            first_seen_at INTEGER NOT NULL,
            last_seen_at INTEGER NOT NULL,
            last_tag_id TEXT,
            last_batch_id TEXT,
            ip_hash_last_seen TEXT,
            user_agent_last_seen TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_visitors_user_id ON visitors(user_id)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_tap_events_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tap_events (
            id TEXT PRIMARY KEY,
            tag_id TEXT NOT NULL,
            batch_id TEXT,
            occurred_at INTEGER NOT NULL,
            ip_hash TEXT,
            user_agent TEXT,
            device_hint TEXT,
            anon_visitor_id TEXT,
            visitor_id TEXT,
            user_id TEXT,
            is_duplicate INTEGER NOT NULL DEFAULT 0,
            linked_at INTEGER,
            link_method TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    for (name, columns) in [
        ("idx_tap_events_anon_visitor", "anon_visitor_id"),
        ("idx_tap_events_visitor", "visitor_id"),
        ("idx_tap_events_user", "user_id, linked_at"),
        ("idx_tap_events_tag", "tag_id, occurred_at"),
        ("idx_tap_events_batch", "batch_id, occurred_at"),
        ("idx_tap_events_occurred", "occurred_at"),
        ("idx_tap_events_fingerprint", "ip_hash, user_agent, occurred_at"),
    ] {
        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS {} ON tap_events({})",
            name, columns
        ))
        .execute(pool)
        .await?;
    }

    Ok(())
}

async fn create_shopping_list_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS shopping_lists (
            id TEXT PRIMARY KEY,
            owner_visitor_id TEXT,
            owner_user_id TEXT,
            claimed_from_visitor_id TEXT,
            merged_into_list_id TEXT REFERENCES shopping_lists(id),
            source_tag_id TEXT,
            source_batch_id TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            claimed_at INTEGER,
            CHECK (owner_visitor_id IS NULL OR owner_user_id IS NULL)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS shopping_list_items (
            id TEXT PRIMARY KEY,
            list_id TEXT NOT NULL REFERENCES shopping_lists(id) ON DELETE CASCADE,
            item_key TEXT NOT NULL,
            label TEXT,
            quantity INTEGER NOT NULL DEFAULT 1,
            times_purchased INTEGER NOT NULL DEFAULT 0,
            source_tag_id TEXT,
            source_batch_id TEXT,
            created_at INTEGER NOT NULL,
            last_added_at INTEGER,
            purchased_at INTEGER,
            UNIQUE(list_id, item_key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    for (name, table, columns) in [
        ("idx_lists_owner_visitor", "shopping_lists", "owner_visitor_id, updated_at"),
        ("idx_lists_owner_user", "shopping_lists", "owner_user_id, updated_at"),
        ("idx_lists_claimed_from", "shopping_lists", "claimed_from_visitor_id"),
        ("idx_lists_created", "shopping_lists", "created_at"),
        ("idx_items_last_added", "shopping_list_items", "last_added_at"),
        ("idx_items_purchased", "shopping_list_items", "purchased_at"),
    ] {
        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS {} ON {}({})",
            name, table, columns
        ))
        .execute(pool)
        .await?;
    }

    Ok(())
}

async fn create_claim_audit_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS claim_audit (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            visitor_id TEXT NOT NULL,
            anon_visitor_id TEXT NOT NULL,
            method TEXT NOT NULL,
            claimed_at INTEGER NOT NULL,
            reclaimed_at INTEGER,
            details TEXT NOT NULL DEFAULT '{}',
            UNIQUE(user_id, visitor_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_daily_snapshot_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS daily_site_stats (
            date TEXT PRIMARY KEY,
            taps INTEGER NOT NULL,
            unique_visitors INTEGER NOT NULL,
            new_users INTEGER NOT NULL,
            lists_created INTEGER NOT NULL,
            items_added INTEGER NOT NULL,
            items_purchased INTEGER NOT NULL,
            computed_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS daily_batch_stats (
            date TEXT NOT NULL,
            batch_id TEXT NOT NULL,
            taps INTEGER NOT NULL,
            unique_visitors INTEGER NOT NULL,
            computed_at INTEGER NOT NULL,
            PRIMARY KEY (date, batch_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS daily_tag_stats (
            date TEXT NOT NULL,
            tag_id TEXT NOT NULL,
            taps INTEGER NOT NULL,
            unique_visitors INTEGER NOT NULL,
            computed_at INTEGER NOT NULL,
            PRIMARY KEY (date, tag_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS daily_item_stats (
            date TEXT NOT NULL,
            item_key TEXT NOT NULL,
            added INTEGER NOT NULL,
            purchased INTEGER NOT NULL,
            computed_at INTEGER NOT NULL,
            PRIMARY KEY (date, item_key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS daily_visitor_stats (
            date TEXT NOT NULL,
            visitor_id TEXT NOT NULL,
            user_id TEXT,
            taps INTEGER NOT NULL,
            tags_tapped INTEGER NOT NULL,
            batches_tapped INTEGER NOT NULL,
            lists_created INTEGER NOT NULL,
            items_added INTEGER NOT NULL,
            items_purchased INTEGER NOT NULL,
            score INTEGER NOT NULL,
            is_power_user INTEGER NOT NULL,
            computed_at INTEGER NOT NULL,
            PRIMARY KEY (date, visitor_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
