//! tagtrail-server library
//!
//! Attribution of anonymous tap activity to accounts, and the daily rollup
//! that turns the activity ledger into reporting snapshots.

use axum::Router;
use sqlx::SqlitePool;
use std::sync::Arc;
use tagtrail_common::config::Settings;
use tower_http::trace::TraceLayer;

pub mod aggregation;
pub mod api;
pub mod attribution;
pub mod error;

use aggregation::AggregationEngine;
use attribution::ClaimEngine;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub settings: Arc<Settings>,
    pub claims: ClaimEngine,
    pub aggregation: AggregationEngine,
}

impl AppState {
    pub fn new(db: SqlitePool, settings: Settings) -> Self {
        let claims = ClaimEngine::new(db.clone(), settings.claim, settings.claim_timeout);
        let aggregation = AggregationEngine::new(db.clone(), settings.power_user_threshold);
        Self {
            db,
            settings: Arc::new(settings),
            claims,
            aggregation,
        }
    }
}

/// Build application router
///
/// Health is public. Claims need an authenticated user. Operator routes need
/// the cron secret; the daily rollup additionally needs its feature flag,
/// which is checked first.
pub fn build_router(state: AppState) -> Router {
    use axum::middleware;
    use axum::routing::{get, post};

    let aggregate = Router::new()
        .route(
            "/api/cron/aggregate-daily",
            post(api::aggregate_daily).get(api::aggregate_daily_get),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            api::require_operator,
        ))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            api::require_daily_aggregation,
        ));

    let operator = Router::new()
        .route("/api/claims/audit", get(api::claim_audit))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            api::require_operator,
        ));

    let public = Router::new()
        .route("/api/claim", post(api::claim_visitor))
        .merge(api::health_routes());

    Router::new()
        .merge(aggregate)
        .merge(operator)
        .merge(public)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
