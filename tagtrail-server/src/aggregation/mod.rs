//! Aggregation engine: daily rollup and power-user scoring
//!
//! Computes one UTC day of activity into the five snapshot tables. Every
//! input is loaded before the first write, then the dimensions are written
//! in a fixed order (site, batches, tags, items, visitors), each in its own
//! transaction. A failure names the dimension that broke; rows of earlier
//! dimensions stay committed and a re-run of the date converges.

pub mod collect;
pub mod estimate;
pub mod snapshots;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::HashMap;
use tagtrail_common::db::{
    DailyBatchStats, DailyItemStats, DailySiteStats, DailyTagStats, DailyVisitorStats,
};
use tagtrail_common::{time, DayWindow, VisitorActivity};
use tracing::{error, info};

use crate::error::{ApiError, ApiResult};
use collect::{ActiveVisitor, ItemCounts, TapRollups, VisitorListActivity};

/// Rows written per dimension for one date
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationSummary {
    pub date: String,
    pub site: u64,
    pub batches: u64,
    pub tags: u64,
    pub items: u64,
    pub visitors: u64,
    pub power_users: u64,
}

/// Every snapshot row for one date, computed before anything is written
#[derive(Debug, Clone)]
pub struct DayRollup {
    pub site: DailySiteStats,
    pub batches: Vec<DailyBatchStats>,
    pub tags: Vec<DailyTagStats>,
    pub items: Vec<DailyItemStats>,
    pub visitors: Vec<DailyVisitorStats>,
}

impl DayRollup {
    fn power_users(&self) -> u64 {
        self.visitors.iter().filter(|v| v.is_power_user).count() as u64
    }
}

/// Inputs gathered from the ledger, registry and lists for one window
struct DayInputs {
    taps: TapRollups,
    visitors: Vec<ActiveVisitor>,
    list_activity: HashMap<String, VisitorListActivity>,
    items: std::collections::BTreeMap<String, ItemCounts>,
    new_users: i64,
    lists_created: i64,
}

/// Runs the daily rollup against the shared database
#[derive(Clone)]
pub struct AggregationEngine {
    db: SqlitePool,
    power_user_threshold: i64,
}

impl AggregationEngine {
    pub fn new(db: SqlitePool, power_user_threshold: i64) -> Self {
        Self {
            db,
            power_user_threshold,
        }
    }

    /// Aggregate `date`, or yesterday (UTC) when absent
    pub async fn aggregate_day(&self, date: Option<NaiveDate>) -> ApiResult<AggregationSummary> {
        self.aggregate_day_at(date, time::now()).await
    }

    /// Aggregate with an explicit clock for the default date and `computed_at`
    pub async fn aggregate_day_at(
        &self,
        date: Option<NaiveDate>,
        now: DateTime<Utc>,
    ) -> ApiResult<AggregationSummary> {
        let window = DayWindow::resolve(date, now);
        let date_key = window.date_key();
        let computed_at = time::to_millis(now);

        info!(date = %date_key, "Daily aggregation started");

        let inputs = self.load_inputs(&window).await?;
        let rollup = build_rollup(&date_key, &inputs, self.power_user_threshold, computed_at);
        let summary = self.write_rollup(&rollup).await?;

        info!(
            date = %summary.date,
            site = summary.site,
            batches = summary.batches,
            tags = summary.tags,
            items = summary.items,
            visitors = summary.visitors,
            power_users = summary.power_users,
            "Daily aggregation complete"
        );

        Ok(summary)
    }

    /// Aggregate every date from `from` to `to` inclusive, oldest first
    pub async fn aggregate_range(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> ApiResult<Vec<AggregationSummary>> {
        if to < from {
            return Err(ApiError::Validation(format!(
                "range end {} is before start {}",
                to, from
            )));
        }

        let mut summaries = Vec::new();
        for date in from.iter_days().take_while(|d| *d <= to) {
            summaries.push(self.aggregate_day(Some(date)).await?);
        }
        Ok(summaries)
    }

    async fn load_inputs(&self, window: &DayWindow) -> ApiResult<DayInputs> {
        let taps = collect::load_taps(&self.db, window).await?;
        let visitors = collect::load_active_visitors(&self.db, window).await?;

        Ok(DayInputs {
            taps: collect::rollup_taps(&taps, &visitors),
            visitors,
            list_activity: collect::load_visitor_list_activity(&self.db, window).await?,
            items: collect::load_item_counts(&self.db, window).await?,
            new_users: collect::count_new_users(&self.db, window).await?,
            lists_created: collect::count_lists_created(&self.db, window).await?,
        })
    }

    async fn write_rollup(&self, rollup: &DayRollup) -> ApiResult<AggregationSummary> {
        let date = rollup.site.date.as_str();
        let fail = |dimension: &'static str| {
            move |source: ApiError| {
                error!(date = %date, dimension, error = %source, "Snapshot write failed");
                ApiError::AggregationFailed {
                    dimension,
                    source: Box::new(source),
                }
            }
        };

        Ok(AggregationSummary {
            date: date.to_string(),
            site: snapshots::write_site(&self.db, &rollup.site)
                .await
                .map_err(fail("site"))?,
            batches: snapshots::write_batches(&self.db, date, &rollup.batches)
                .await
                .map_err(fail("batches"))?,
            tags: snapshots::write_tags(&self.db, date, &rollup.tags)
                .await
                .map_err(fail("tags"))?,
            items: snapshots::write_items(&self.db, date, &rollup.items)
                .await
                .map_err(fail("items"))?,
            visitors: snapshots::write_visitors(&self.db, date, &rollup.visitors)
                .await
                .map_err(fail("visitors"))?,
            power_users: rollup.power_users(),
        })
    }
}

/// Turn loaded inputs into snapshot rows
fn build_rollup(date: &str, inputs: &DayInputs, threshold: i64, computed_at: i64) -> DayRollup {
    let items_added = inputs.items.values().map(|c| c.added).sum();
    let items_purchased = inputs.items.values().map(|c| c.purchased).sum();

    let site = DailySiteStats {
        date: date.to_string(),
        taps: inputs.taps.site.taps,
        unique_visitors: inputs.taps.site.unique_visitors(),
        new_users: inputs.new_users,
        lists_created: inputs.lists_created,
        items_added,
        items_purchased,
        computed_at,
    };

    let batches = inputs
        .taps
        .batches
        .iter()
        .map(|(batch_id, totals)| DailyBatchStats {
            date: date.to_string(),
            batch_id: batch_id.clone(),
            taps: totals.taps,
            unique_visitors: totals.unique_visitors(),
            computed_at,
        })
        .collect();

    let tags = inputs
        .taps
        .tags
        .iter()
        .map(|(tag_id, totals)| DailyTagStats {
            date: date.to_string(),
            tag_id: tag_id.clone(),
            taps: totals.taps,
            unique_visitors: totals.unique_visitors(),
            computed_at,
        })
        .collect();

    let items = inputs
        .items
        .iter()
        .map(|(item_key, counts)| DailyItemStats {
            date: date.to_string(),
            item_key: item_key.clone(),
            added: counts.added,
            purchased: counts.purchased,
            computed_at,
        })
        .collect();

    let registry: HashMap<&str, &ActiveVisitor> =
        inputs.visitors.iter().map(|v| (v.id.as_str(), v)).collect();

    let visitors = inputs
        .taps
        .visitors
        .iter()
        .map(|(visitor_id, taps)| {
            let lists = inputs
                .list_activity
                .get(visitor_id)
                .copied()
                .unwrap_or_default();
            let activity = VisitorActivity {
                taps: taps.taps,
                tags_tapped: taps.tags.len() as i64,
                batches_tapped: taps.batches.len() as i64,
                lists_created: lists.lists_created,
                items_added: lists.items_added,
                items_purchased: lists.items_purchased,
            };
            let score = activity.score();
            // Same-day event owner first, registry owner otherwise
            let user_id = taps.event_user_id.clone().or_else(|| {
                registry
                    .get(visitor_id.as_str())
                    .and_then(|v| v.user_id.clone())
            });

            DailyVisitorStats {
                date: date.to_string(),
                visitor_id: visitor_id.clone(),
                user_id,
                taps: activity.taps,
                tags_tapped: activity.tags_tapped,
                batches_tapped: activity.batches_tapped,
                lists_created: activity.lists_created,
                items_added: activity.items_added,
                items_purchased: activity.items_purchased,
                score,
                is_power_user: tagtrail_common::scoring::is_power_user(score, threshold),
                computed_at,
            }
        })
        .collect();

    DayRollup {
        site,
        batches,
        tags,
        items,
        visitors,
    }
}
