//! Read side of the daily rollup
//!
//! Loads one day's ledger and list activity and turns it into per-dimension
//! counts. All queries take the same [`DayWindow`], so every dimension of a
//! run is computed against identical boundaries.

use serde::Serialize;
use sqlx::{FromRow, SqlitePool};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tagtrail_common::DayWindow;

use super::estimate::UniqueVisitorEstimate;
use crate::error::ApiResult;

/// Columns of a non-duplicate tap needed by the rollup
#[derive(Debug, Clone, FromRow)]
pub struct TapRow {
    pub id: String,
    pub tag_id: String,
    pub batch_id: Option<String>,
    pub occurred_at: i64,
    pub ip_hash: Option<String>,
    pub user_agent: Option<String>,
    pub anon_visitor_id: Option<String>,
    pub visitor_id: Option<String>,
    pub user_id: Option<String>,
}

/// Registry row of a visitor active in the window
#[derive(Debug, Clone, FromRow)]
pub struct ActiveVisitor {
    pub id: String,
    pub anon_visitor_id: String,
    pub user_id: Option<String>,
}

/// Tap count plus unique-visitor estimate for one dimension key
#[derive(Debug, Clone, Default)]
pub struct TapTotals {
    pub taps: i64,
    pub visitors: UniqueVisitorEstimate,
}

impl TapTotals {
    fn add(&mut self, tap: &TapRow) {
        self.taps += 1;
        self.visitors.add(tap);
    }

    pub fn unique_visitors(&self) -> i64 {
        self.visitors.count()
    }
}

/// One visitor's tap activity for the day
#[derive(Debug, Clone, Default)]
pub struct VisitorTaps {
    pub taps: i64,
    pub tags: BTreeSet<String>,
    pub batches: BTreeSet<String>,
    /// Owner from the most recent same-day tap that carries one
    pub event_user_id: Option<String>,
}

/// Tap-derived aggregates for every tap dimension
#[derive(Debug, Clone, Default)]
pub struct TapRollups {
    pub site: TapTotals,
    pub batches: BTreeMap<String, TapTotals>,
    pub tags: BTreeMap<String, TapTotals>,
    pub visitors: BTreeMap<String, VisitorTaps>,
}

/// Added / purchased counts for one item key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ItemCounts {
    pub added: i64,
    pub purchased: i64,
}

/// List activity attributed to one visitor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VisitorListActivity {
    pub lists_created: i64,
    pub items_added: i64,
    pub items_purchased: i64,
}

/// Non-duplicate taps in the window, oldest first
pub async fn load_taps(pool: &SqlitePool, window: &DayWindow) -> ApiResult<Vec<TapRow>> {
    let rows = sqlx::query_as::<_, TapRow>(
        r#"
        SELECT id, tag_id, batch_id, occurred_at, ip_hash, user_agent,
               anon_visitor_id, visitor_id, user_id
        FROM tap_events
        WHERE is_duplicate = 0 AND occurred_at BETWEEN ? AND ?
        ORDER BY occurred_at, id
        "#,
    )
    .bind(window.start_ms)
    .bind(window.end_ms)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Visitors with at least one non-duplicate tap in the window
pub async fn load_active_visitors(
    pool: &SqlitePool,
    window: &DayWindow,
) -> ApiResult<Vec<ActiveVisitor>> {
    let rows = sqlx::query_as::<_, ActiveVisitor>(
        r#"
        SELECT v.id, v.anon_visitor_id, v.user_id
        FROM visitors v
        WHERE EXISTS (
            SELECT 1 FROM tap_events e
            WHERE e.is_duplicate = 0
              AND e.occurred_at BETWEEN ? AND ?
              AND (e.visitor_id = v.id OR e.anon_visitor_id = v.anon_visitor_id)
        )
        "#,
    )
    .bind(window.start_ms)
    .bind(window.end_ms)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Derive site, batch, tag and visitor tap aggregates from one load
///
/// A tap belongs to a visitor through its `visitor_id`, or, when that is
/// empty, through its token.
pub fn rollup_taps(taps: &[TapRow], visitors: &[ActiveVisitor]) -> TapRollups {
    let by_id: HashMap<&str, &ActiveVisitor> =
        visitors.iter().map(|v| (v.id.as_str(), v)).collect();
    let by_anon: HashMap<&str, &ActiveVisitor> = visitors
        .iter()
        .map(|v| (v.anon_visitor_id.as_str(), v))
        .collect();

    let mut rollups = TapRollups::default();

    for tap in taps {
        rollups.site.add(tap);
        rollups.tags.entry(tap.tag_id.clone()).or_default().add(tap);
        if let Some(batch) = tap.batch_id.as_ref().filter(|b| !b.is_empty()) {
            rollups.batches.entry(batch.clone()).or_default().add(tap);
        }

        let visitor = tap
            .visitor_id
            .as_deref()
            .and_then(|id| by_id.get(id))
            .or_else(|| tap.anon_visitor_id.as_deref().and_then(|a| by_anon.get(a)));
        if let Some(visitor) = visitor {
            let entry = rollups.visitors.entry(visitor.id.clone()).or_default();
            entry.taps += 1;
            entry.tags.insert(tap.tag_id.clone());
            if let Some(batch) = tap.batch_id.as_ref().filter(|b| !b.is_empty()) {
                entry.batches.insert(batch.clone());
            }
            // Taps arrive oldest first, so the last owner seen is the most recent
            if let Some(user) = tap.user_id.as_ref() {
                entry.event_user_id = Some(user.clone());
            }
        }
    }

    rollups
}

/// Accounts created in the window
pub async fn count_new_users(pool: &SqlitePool, window: &DayWindow) -> ApiResult<i64> {
    let count = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE created_at BETWEEN ? AND ?")
        .bind(window.start_ms)
        .bind(window.end_ms)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Lists created in the window
pub async fn count_lists_created(pool: &SqlitePool, window: &DayWindow) -> ApiResult<i64> {
    let count =
        sqlx::query_scalar("SELECT COUNT(*) FROM shopping_lists WHERE created_at BETWEEN ? AND ?")
            .bind(window.start_ms)
            .bind(window.end_ms)
            .fetch_one(pool)
            .await?;
    Ok(count)
}

/// Items added and purchased in the window, one entry per item key
///
/// Items on merged husk lists are skipped; their copies on the target list
/// already carry the same timestamps.
pub async fn load_item_counts(
    pool: &SqlitePool,
    window: &DayWindow,
) -> ApiResult<BTreeMap<String, ItemCounts>> {
    let added: Vec<(String, i64)> = sqlx::query_as(
        r#"
        SELECT i.item_key, COUNT(*)
        FROM shopping_list_items i
        JOIN shopping_lists l ON l.id = i.list_id
        WHERE l.merged_into_list_id IS NULL
          AND i.last_added_at BETWEEN ? AND ?
        GROUP BY i.item_key
        "#,
    )
    .bind(window.start_ms)
    .bind(window.end_ms)
    .fetch_all(pool)
    .await?;

    let purchased: Vec<(String, i64)> = sqlx::query_as(
        r#"
        SELECT i.item_key, COUNT(*)
        FROM shopping_list_items i
        JOIN shopping_lists l ON l.id = i.list_id
        WHERE l.merged_into_list_id IS NULL
          AND i.purchased_at BETWEEN ? AND ?
        GROUP BY i.item_key
        "#,
    )
    .bind(window.start_ms)
    .bind(window.end_ms)
    .fetch_all(pool)
    .await?;

    Ok(merge_item_counts(added, purchased))
}

/// Outer-join added and purchased counts on item key
pub fn merge_item_counts(
    added: Vec<(String, i64)>,
    purchased: Vec<(String, i64)>,
) -> BTreeMap<String, ItemCounts> {
    let mut items: BTreeMap<String, ItemCounts> = BTreeMap::new();
    for (key, count) in added {
        items.entry(key).or_default().added += count;
    }
    for (key, count) in purchased {
        items.entry(key).or_default().purchased += count;
    }
    items
}

/// List activity per visitor, through lists the visitor owns or owned
pub async fn load_visitor_list_activity(
    pool: &SqlitePool,
    window: &DayWindow,
) -> ApiResult<HashMap<String, VisitorListActivity>> {
    let lists: Vec<(String, i64)> = sqlx::query_as(
        r#"
        SELECT COALESCE(owner_visitor_id, claimed_from_visitor_id) AS visitor_id, COUNT(*)
        FROM shopping_lists
        WHERE created_at BETWEEN ? AND ?
          AND COALESCE(owner_visitor_id, claimed_from_visitor_id) IS NOT NULL
        GROUP BY visitor_id
        "#,
    )
    .bind(window.start_ms)
    .bind(window.end_ms)
    .fetch_all(pool)
    .await?;

    let items: Vec<(String, i64, i64)> = sqlx::query_as(
        r#"
        SELECT COALESCE(l.owner_visitor_id, l.claimed_from_visitor_id) AS visitor_id,
               SUM(CASE WHEN i.last_added_at BETWEEN ? AND ? THEN 1 ELSE 0 END),
               SUM(CASE WHEN i.purchased_at BETWEEN ? AND ? THEN 1 ELSE 0 END)
        FROM shopping_list_items i
        JOIN shopping_lists l ON l.id = i.list_id
        WHERE COALESCE(l.owner_visitor_id, l.claimed_from_visitor_id) IS NOT NULL
          AND (i.last_added_at BETWEEN ? AND ? OR i.purchased_at BETWEEN ? AND ?)
        GROUP BY visitor_id
        "#,
    )
    .bind(window.start_ms)
    .bind(window.end_ms)
    .bind(window.start_ms)
    .bind(window.end_ms)
    .bind(window.start_ms)
    .bind(window.end_ms)
    .bind(window.start_ms)
    .bind(window.end_ms)
    .fetch_all(pool)
    .await?;

    let mut activity: HashMap<String, VisitorListActivity> = HashMap::new();
    for (visitor_id, count) in lists {
        activity.entry(visitor_id).or_default().lists_created = count;
    }
    for (visitor_id, added, purchased) in items {
        let entry = activity.entry(visitor_id).or_default();
        entry.items_added = added;
        entry.items_purchased = purchased;
    }

    Ok(activity)
}
