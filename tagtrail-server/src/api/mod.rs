//! HTTP API handlers for tagtrail-server

pub mod aggregate;
pub mod auth;
pub mod claim;
pub mod health;

pub use aggregate::{aggregate_daily, aggregate_daily_get, require_daily_aggregation};
pub use auth::{require_operator, AuthenticatedUser};
pub use claim::{claim_audit, claim_visitor};
pub use health::health_routes;
