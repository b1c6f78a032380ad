//! Integration tests for the daily rollup
//!
//! One seeded day (2024-03-01) with a mix of identified and fingerprint-only
//! taps, a duplicate, a tap on the next day, and list activity on owned,
//! user-only and merged husk lists.

mod helpers;

use chrono::NaiveDate;
use helpers::*;
use sqlx::SqlitePool;
use tagtrail_common::db::{
    DailyBatchStats, DailyItemStats, DailySiteStats, DailyTagStats, DailyVisitorStats,
};
use tagtrail_server::aggregation::AggregationEngine;
use tagtrail_server::error::ApiError;

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
}

async fn seed_day(pool: &SqlitePool) {
    insert_visitor(
        pool,
        VisitorSeed {
            id: "v1",
            anon_visitor_id: "anon-aaaaaaaa",
            ..Default::default()
        },
    )
    .await;
    insert_visitor(
        pool,
        VisitorSeed {
            id: "v2",
            anon_visitor_id: "anon-bbbbbbbb",
            user_id: Some("u-registry"),
            ..Default::default()
        },
    )
    .await;

    let taps = [
        ("t1", "tag-1", Some("batch-1"), ms(1, 10, 0), Some("anon-aaaaaaaa"), None, None, false),
        ("t2", "tag-1", Some("batch-1"), ms(1, 10, 5), Some("anon-aaaaaaaa"), None, None, false),
        ("t3", "tag-2", Some("batch-1"), ms(1, 11, 0), Some("anon-aaaaaaaa"), None, None, false),
        ("t4", "tag-1", Some("batch-2"), ms(1, 12, 0), Some("anon-bbbbbbbb"), Some("v2"), Some("u-event"), false),
        ("t5", "tag-3", None, ms(1, 13, 0), Some("anon-cccccccc"), None, None, false),
        ("t6", "tag-1", Some("batch-1"), ms(1, 14, 0), None, None, None, false),
        ("t7", "tag-1", Some("batch-1"), ms(1, 15, 0), None, None, None, false),
        ("dup", "tag-1", Some("batch-1"), ms(1, 16, 0), Some("anon-aaaaaaaa"), None, None, true),
        ("next-day", "tag-1", Some("batch-1"), ms(2, 1, 0), Some("anon-aaaaaaaa"), None, None, false),
    ];
    for (id, tag_id, batch_id, occurred_at, anon, visitor_id, user_id, is_duplicate) in taps {
        insert_tap(
            pool,
            TapSeed {
                id,
                tag_id,
                batch_id,
                occurred_at,
                ip_hash: Some("iphash-9"),
                user_agent: Some("ua-9"),
                anon_visitor_id: anon,
                visitor_id,
                user_id,
                is_duplicate,
            },
        )
        .await;
    }

    insert_user(pool, "u-new", ms(1, 18, 0)).await;
    insert_user(pool, "u-old", ms(1, 0, 0) - 86_400_000).await;

    insert_list(
        pool,
        ListSeed {
            id: "list-v1",
            owner_visitor_id: Some("v1"),
            created_at: ms(1, 9, 0),
            ..Default::default()
        },
    )
    .await;
    insert_item(
        pool,
        ItemSeed {
            id: "v1-milk",
            list_id: "list-v1",
            item_key: "milk",
            last_added_at: Some(ms(1, 9, 10)),
            purchased_at: Some(ms(1, 17, 0)),
            ..Default::default()
        },
    )
    .await;
    insert_item(
        pool,
        ItemSeed {
            id: "v1-eggs",
            list_id: "list-v1",
            item_key: "eggs",
            last_added_at: Some(ms(1, 9, 20)),
            ..Default::default()
        },
    )
    .await;

    // Created before the day, active during it
    insert_list(
        pool,
        ListSeed {
            id: "list-user",
            owner_user_id: Some("u9"),
            created_at: ms(1, 0, 0) - 10 * 86_400_000,
            ..Default::default()
        },
    )
    .await;
    insert_item(
        pool,
        ItemSeed {
            id: "user-milk",
            list_id: "list-user",
            item_key: "milk",
            last_added_at: Some(ms(1, 8, 0)),
            ..Default::default()
        },
    )
    .await;
    insert_item(
        pool,
        ItemSeed {
            id: "user-bread",
            list_id: "list-user",
            item_key: "bread",
            purchased_at: Some(ms(1, 19, 0)),
            ..Default::default()
        },
    )
    .await;

    // Husk whose items were already merged into list-user
    insert_list(
        pool,
        ListSeed {
            id: "list-husk",
            owner_user_id: Some("u9"),
            claimed_from_visitor_id: Some("v-gone"),
            merged_into_list_id: Some("list-user"),
            created_at: ms(1, 0, 0) - 20 * 86_400_000,
            ..Default::default()
        },
    )
    .await;
    insert_item(
        pool,
        ItemSeed {
            id: "husk-milk",
            list_id: "list-husk",
            item_key: "milk",
            last_added_at: Some(ms(1, 8, 0)),
            ..Default::default()
        },
    )
    .await;
}

async fn site_row(pool: &SqlitePool) -> DailySiteStats {
    sqlx::query_as::<_, DailySiteStats>("SELECT * FROM daily_site_stats WHERE date = '2024-03-01'")
        .fetch_one(pool)
        .await
        .unwrap()
}

async fn tag_rows(pool: &SqlitePool) -> Vec<DailyTagStats> {
    sqlx::query_as::<_, DailyTagStats>(
        "SELECT * FROM daily_tag_stats WHERE date = '2024-03-01' ORDER BY tag_id",
    )
    .fetch_all(pool)
    .await
    .unwrap()
}

async fn batch_rows(pool: &SqlitePool) -> Vec<DailyBatchStats> {
    sqlx::query_as::<_, DailyBatchStats>(
        "SELECT * FROM daily_batch_stats WHERE date = '2024-03-01' ORDER BY batch_id",
    )
    .fetch_all(pool)
    .await
    .unwrap()
}

async fn item_rows(pool: &SqlitePool) -> Vec<DailyItemStats> {
    sqlx::query_as::<_, DailyItemStats>(
        "SELECT * FROM daily_item_stats WHERE date = '2024-03-01' ORDER BY item_key",
    )
    .fetch_all(pool)
    .await
    .unwrap()
}

async fn visitor_rows(pool: &SqlitePool) -> Vec<DailyVisitorStats> {
    sqlx::query_as::<_, DailyVisitorStats>(
        "SELECT * FROM daily_visitor_stats WHERE date = '2024-03-01' ORDER BY visitor_id",
    )
    .fetch_all(pool)
    .await
    .unwrap()
}

#[tokio::test]
async fn test_site_rollup() {
    let (_dir, pool) = test_pool().await;
    seed_day(&pool).await;

    let summary = AggregationEngine::new(pool.clone(), 50)
        .aggregate_day_at(Some(day()), at(2, 1, 30))
        .await
        .unwrap();

    assert_eq!(summary.date, "2024-03-01");
    assert_eq!(summary.site, 1);

    let site = site_row(&pool).await;
    assert_eq!(site.taps, 7);
    // Three tokens plus one fingerprint-only device
    assert_eq!(site.unique_visitors, 4);
    assert_eq!(site.new_users, 1);
    assert_eq!(site.lists_created, 1);
    assert_eq!(site.items_added, 3);
    assert_eq!(site.items_purchased, 2);
    assert_eq!(site.computed_at, ms(2, 1, 30));
}

#[tokio::test]
async fn test_tag_and_batch_rollups() {
    let (_dir, pool) = test_pool().await;
    seed_day(&pool).await;

    let summary = AggregationEngine::new(pool.clone(), 50)
        .aggregate_day_at(Some(day()), at(2, 1, 30))
        .await
        .unwrap();
    assert_eq!(summary.tags, 3);
    assert_eq!(summary.batches, 2);

    let tags = tag_rows(&pool).await;
    let tag_1 = &tags[0];
    assert_eq!(tag_1.tag_id, "tag-1");
    assert_eq!(tag_1.taps, 5);
    assert_eq!(tag_1.unique_visitors, 3);
    assert_eq!((tags[1].taps, tags[1].unique_visitors), (1, 1));
    assert_eq!((tags[2].taps, tags[2].unique_visitors), (1, 1));

    let batches = batch_rows(&pool).await;
    assert_eq!(batches[0].batch_id, "batch-1");
    assert_eq!(batches[0].taps, 5);
    assert_eq!(batches[0].unique_visitors, 2);
    assert_eq!(batches[1].batch_id, "batch-2");
    assert_eq!(batches[1].taps, 1);
}

#[tokio::test]
async fn test_item_rollup_outer_joins_added_and_purchased() {
    let (_dir, pool) = test_pool().await;
    seed_day(&pool).await;

    AggregationEngine::new(pool.clone(), 50)
        .aggregate_day_at(Some(day()), at(2, 1, 30))
        .await
        .unwrap();

    let items: Vec<_> = item_rows(&pool)
        .await
        .into_iter()
        .map(|r| (r.item_key, r.added, r.purchased))
        .collect();
    assert_eq!(
        items,
        vec![
            ("bread".to_string(), 0, 1),
            ("eggs".to_string(), 1, 0),
            ("milk".to_string(), 2, 1),
        ]
    );
}

#[tokio::test]
async fn test_visitor_scores_and_owner() {
    let (_dir, pool) = test_pool().await;
    seed_day(&pool).await;

    let summary = AggregationEngine::new(pool.clone(), 19)
        .aggregate_day_at(Some(day()), at(2, 1, 30))
        .await
        .unwrap();
    assert_eq!(summary.visitors, 2);
    assert_eq!(summary.power_users, 1);

    let rows = visitor_rows(&pool).await;
    let v1 = &rows[0];
    assert_eq!(v1.visitor_id, "v1");
    assert_eq!(
        (v1.taps, v1.tags_tapped, v1.batches_tapped),
        (3, 2, 1)
    );
    assert_eq!(
        (v1.lists_created, v1.items_added, v1.items_purchased),
        (1, 2, 1)
    );
    // 3 + 2*2 + 1*2 + 1*3 + 2 + 1*5
    assert_eq!(v1.score, 19);
    assert!(v1.is_power_user);
    assert_eq!(v1.user_id, None);

    let v2 = &rows[1];
    assert_eq!(v2.visitor_id, "v2");
    assert_eq!(v2.score, 5);
    assert!(!v2.is_power_user);
    // The day's event owner wins over the registry owner
    assert_eq!(v2.user_id.as_deref(), Some("u-event"));
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let (_dir, pool) = test_pool().await;
    seed_day(&pool).await;
    let engine = AggregationEngine::new(pool.clone(), 50);

    let first = engine.aggregate_day_at(Some(day()), at(2, 1, 30)).await.unwrap();
    let site_before = site_row(&pool).await;
    let visitors_before = visitor_rows(&pool).await;

    let second = engine.aggregate_day_at(Some(day()), at(2, 2, 30)).await.unwrap();
    let site_after = site_row(&pool).await;
    let visitors_after = visitor_rows(&pool).await;

    assert_eq!(first, second);
    assert_eq!(site_after.taps, site_before.taps);
    assert_eq!(site_after.unique_visitors, site_before.unique_visitors);
    assert_eq!(site_after.items_added, site_before.items_added);
    assert_eq!(site_after.computed_at, ms(2, 2, 30));
    assert_eq!(visitors_after.len(), visitors_before.len());
    for (before, after) in visitors_before.iter().zip(&visitors_after) {
        assert_eq!(before.score, after.score);
        assert_eq!(before.taps, after.taps);
    }

    let site_rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM daily_site_stats")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(site_rows, 1);
}

#[tokio::test]
async fn test_rerun_removes_vanished_keys() {
    let (_dir, pool) = test_pool().await;
    seed_day(&pool).await;
    let engine = AggregationEngine::new(pool.clone(), 50);

    engine.aggregate_day_at(Some(day()), at(2, 1, 30)).await.unwrap();
    assert_eq!(tag_rows(&pool).await.len(), 3);

    // The only tag-2 tap is reclassified as a duplicate
    sqlx::query("UPDATE tap_events SET is_duplicate = 1 WHERE id = 't3'")
        .execute(&pool)
        .await
        .unwrap();

    let summary = engine.aggregate_day_at(Some(day()), at(2, 2, 30)).await.unwrap();

    assert_eq!(summary.tags, 2);
    let tags: Vec<_> = tag_rows(&pool).await.into_iter().map(|t| t.tag_id).collect();
    assert_eq!(tags, vec!["tag-1".to_string(), "tag-3".to_string()]);
}

#[tokio::test]
async fn test_default_date_is_yesterday() {
    let (_dir, pool) = test_pool().await;
    seed_day(&pool).await;

    let summary = AggregationEngine::new(pool.clone(), 50)
        .aggregate_day_at(None, at(2, 0, 5))
        .await
        .unwrap();

    assert_eq!(summary.date, "2024-03-01");
    assert_eq!(site_row(&pool).await.taps, 7);
}

#[tokio::test]
async fn test_empty_day_writes_zero_site_row() {
    let (_dir, pool) = test_pool().await;

    let summary = AggregationEngine::new(pool.clone(), 50)
        .aggregate_day_at(Some(day()), at(2, 1, 0))
        .await
        .unwrap();

    assert_eq!(summary.site, 1);
    assert_eq!(summary.tags + summary.batches + summary.items + summary.visitors, 0);
    let site = site_row(&pool).await;
    assert_eq!((site.taps, site.unique_visitors, site.new_users), (0, 0, 0));
}

#[tokio::test]
async fn test_range_backfill() {
    let (_dir, pool) = test_pool().await;
    seed_day(&pool).await;
    let engine = AggregationEngine::new(pool.clone(), 50);

    let summaries = engine
        .aggregate_range(day(), NaiveDate::from_ymd_opt(2024, 3, 3).unwrap())
        .await
        .unwrap();

    let dates: Vec<_> = summaries.iter().map(|s| s.date.as_str()).collect();
    assert_eq!(dates, vec!["2024-03-01", "2024-03-02", "2024-03-03"]);
    // Only the next-day tap lands on 2024-03-02
    let taps: i64 = sqlx::query_scalar("SELECT taps FROM daily_site_stats WHERE date = '2024-03-02'")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(taps, 1);

    assert!(engine
        .aggregate_range(NaiveDate::from_ymd_opt(2024, 3, 3).unwrap(), day())
        .await
        .is_err());
}

#[tokio::test]
async fn test_failed_dimension_keeps_earlier_rows_and_rerun_converges() {
    let (_dir, pool) = test_pool().await;
    seed_day(&pool).await;
    let engine = AggregationEngine::new(pool.clone(), 50);

    sqlx::query("ALTER TABLE daily_item_stats RENAME TO daily_item_stats_parked")
        .execute(&pool)
        .await
        .unwrap();

    let err = engine
        .aggregate_day_at(Some(day()), at(2, 1, 30))
        .await
        .unwrap_err();

    assert_eq!(err.code(), "AGGREGATION_FAILED");
    assert!(matches!(err, ApiError::AggregationFailed { dimension: "items", .. }));
    assert!(err.to_string().contains("items"));

    // Dimensions written before items stay committed; later ones never ran
    assert_eq!(site_row(&pool).await.taps, 7);
    assert_eq!(batch_rows(&pool).await.len(), 2);
    assert_eq!(tag_rows(&pool).await.len(), 3);
    assert!(visitor_rows(&pool).await.is_empty());

    sqlx::query("ALTER TABLE daily_item_stats_parked RENAME TO daily_item_stats")
        .execute(&pool)
        .await
        .unwrap();

    let summary = engine
        .aggregate_day_at(Some(day()), at(2, 2, 30))
        .await
        .unwrap();

    assert_eq!(summary.items, 3);
    assert_eq!(summary.visitors, 2);
    assert_eq!(tag_rows(&pool).await.len(), 3);
    assert_eq!(item_rows(&pool).await.len(), 3);
}
