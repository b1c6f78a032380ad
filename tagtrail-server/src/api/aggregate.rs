//! Scheduler endpoint for the daily rollup
//!
//! `POST /api/cron/aggregate-daily` with an optional `{ "date": "YYYY-MM-DD" }`
//! body; `GET` with `?date=` for schedulers that cannot send a body. The
//! feature flag is checked before the secret so a disabled deployment looks
//! the same to every caller.

use axum::{
    body::Bytes,
    extract::{Query, Request, State},
    middleware::Next,
    response::Response,
    Json,
};
use serde::{Deserialize, Serialize};
use tagtrail_common::time;
use tracing::debug;

use crate::aggregation::AggregationSummary;
use crate::error::{ApiError, ApiResult};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct DateParams {
    pub date: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DimensionCounts {
    pub site: u64,
    pub batches: u64,
    pub tags: u64,
    pub items: u64,
    pub visitors: u64,
    pub power_users: u64,
}

#[derive(Debug, Serialize)]
pub struct AggregateResponse {
    pub ok: bool,
    pub date: String,
    pub counts: DimensionCounts,
}

impl From<AggregationSummary> for AggregateResponse {
    fn from(summary: AggregationSummary) -> Self {
        Self {
            ok: true,
            date: summary.date,
            counts: DimensionCounts {
                site: summary.site,
                batches: summary.batches,
                tags: summary.tags,
                items: summary.items,
                visitors: summary.visitors,
                power_users: summary.power_users,
            },
        }
    }
}

/// Answer 404 unless daily aggregation is enabled
pub async fn require_daily_aggregation(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if !state.settings.daily_aggregation_enabled {
        debug!("Daily aggregation request while disabled");
        return Err(ApiError::NotFound("not found".to_string()));
    }
    Ok(next.run(request).await)
}

async fn run(state: &AppState, date: Option<String>) -> ApiResult<Json<AggregateResponse>> {
    let date = date
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(time::parse_date)
        .transpose()?;

    let summary = state.aggregation.aggregate_day(date).await?;
    Ok(Json(summary.into()))
}

/// POST /api/cron/aggregate-daily
///
/// An empty body aggregates yesterday; a `date` query parameter is honoured
/// when the body carries none.
pub async fn aggregate_daily(
    State(state): State<AppState>,
    Query(query): Query<DateParams>,
    body: Bytes,
) -> ApiResult<Json<AggregateResponse>> {
    let params = if body.iter().all(u8::is_ascii_whitespace) {
        DateParams::default()
    } else {
        serde_json::from_slice::<DateParams>(&body)
            .map_err(|e| ApiError::Validation(format!("invalid body: {}", e)))?
    };

    run(&state, params.date.or(query.date)).await
}

/// GET /api/cron/aggregate-daily
pub async fn aggregate_daily_get(
    State(state): State<AppState>,
    Query(query): Query<DateParams>,
) -> ApiResult<Json<AggregateResponse>> {
    run(&state, query.date).await
}
