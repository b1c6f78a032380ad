//! Attribution engine: the claim protocol
//!
//! Reassigns activity collected under an anonymous visitor token to the
//! authenticated account that claims it. One claim is one SQLite transaction:
//!
//! 1. find-or-create the visitor (touching `last_seen_at`)
//! 2. refuse, with no mutation, if another account already owns the visitor
//! 3. set the visitor's owner if unset
//! 4. primary pass on the token / visitor id, plus `visitor_id` backfill
//! 5. fallback chain (list provenance, last tag, stored IP + user agent)
//! 6. claim or merge the visitor's shopping list
//! 7. upsert the audit row
//! 8. report events linked to the account within the trailing window
//!
//! Re-running a claim for the same pair converges: no unlinked rows remain
//! for the earlier passes, the list is already claimed, and only the audit
//! row is refreshed.

pub mod audit;
pub mod fallback;
pub mod linking;
pub mod list_merge;
pub mod visitor;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tagtrail_common::config::ClaimLimits;
use tagtrail_common::time;
use tagtrail_common::Error as CommonError;
use tracing::{debug, error, info, warn};

use crate::error::{ApiError, ApiResult};
use fallback::{ClaimContext, LinkMatcher};
use linking::LinkTarget;
use list_merge::ListClaim;

const MIN_TOKEN_LEN: usize = 8;
const MAX_TOKEN_LEN: usize = 128;

/// Externally issued anonymous visitor token
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct AnonVisitorId(String);

impl AnonVisitorId {
    /// Validate a raw token: 8 to 128 characters of `[A-Za-z0-9_-]`
    pub fn parse(raw: &str) -> Result<Self, CommonError> {
        let token = raw.trim();
        if token.len() < MIN_TOKEN_LEN || token.len() > MAX_TOKEN_LEN {
            return Err(CommonError::InvalidInput(format!(
                "anonVisitorId must be {}-{} characters",
                MIN_TOKEN_LEN, MAX_TOKEN_LEN
            )));
        }
        if !token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        {
            return Err(CommonError::InvalidInput(
                "anonVisitorId may only contain letters, digits, '-' and '_'".to_string(),
            ));
        }
        Ok(Self(token.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AnonVisitorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How the caller came to claim the visitor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimMethod {
    #[default]
    Login,
    Signup,
    Manual,
}

impl ClaimMethod {
    /// Stored as the primary pass's `link_method` and in the audit row
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimMethod::Login => "login",
            ClaimMethod::Signup => "signup",
            ClaimMethod::Manual => "manual",
        }
    }
}

impl FromStr for ClaimMethod {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "login" => Ok(ClaimMethod::Login),
            "signup" => Ok(ClaimMethod::Signup),
            "manual" => Ok(ClaimMethod::Manual),
            other => Err(CommonError::InvalidInput(format!(
                "method must be one of login, signup, manual (got {:?})",
                other
            ))),
        }
    }
}

/// A validated claim
#[derive(Debug, Clone)]
pub struct ClaimRequest {
    pub user_id: String,
    pub anon_visitor_id: AnonVisitorId,
    pub method: ClaimMethod,
}

/// Rows linked by each pass of one claim
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkCounts {
    pub primary: u64,
    pub backfilled: u64,
    /// Keyed by link method
    pub fallbacks: BTreeMap<String, u64>,
}

impl LinkCounts {
    /// Events newly attributed to the account by this call
    pub fn linked_this_call(&self) -> u64 {
        self.primary + self.fallbacks.values().sum::<u64>()
    }
}

/// Result of a successful claim
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimReport {
    pub visitor_id: String,
    pub anon_visitor_id: AnonVisitorId,
    pub user_id: String,
    pub method: ClaimMethod,
    /// Events linked to the account within the trailing window
    pub linked_count: i64,
    pub passes: LinkCounts,
    pub list: ListClaim,
    /// Whether an audit row for the pair already existed
    pub reclaimed: bool,
}

/// The visitor belongs to a different account; nothing was changed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimConflict {
    pub visitor_id: String,
    pub anon_visitor_id: AnonVisitorId,
}

/// Outcome of the claim protocol; a conflict is data, not an error
#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    Linked(ClaimReport),
    Conflict(ClaimConflict),
}

/// Executes claims against the shared database
#[derive(Clone)]
pub struct ClaimEngine {
    db: SqlitePool,
    limits: ClaimLimits,
    timeout: Duration,
    matchers: Arc<Vec<Box<dyn LinkMatcher>>>,
}

impl ClaimEngine {
    /// Engine with the standard fallback chain
    pub fn new(db: SqlitePool, limits: ClaimLimits, timeout: Duration) -> Self {
        let matchers = fallback::default_chain(&limits);
        Self::with_matchers(db, limits, timeout, matchers)
    }

    /// Engine with a custom fallback chain, strongest signal first
    pub fn with_matchers(
        db: SqlitePool,
        limits: ClaimLimits,
        timeout: Duration,
        matchers: Vec<Box<dyn LinkMatcher>>,
    ) -> Self {
        Self {
            db,
            limits,
            timeout,
            matchers: Arc::new(matchers),
        }
    }

    /// Run the claim protocol now
    pub async fn claim(&self, request: &ClaimRequest) -> ApiResult<ClaimOutcome> {
        self.claim_at(request, time::now()).await
    }

    /// Run the claim protocol with an explicit clock
    ///
    /// On timeout the transaction is dropped, which rolls every step back.
    pub async fn claim_at(
        &self,
        request: &ClaimRequest,
        now: DateTime<Utc>,
    ) -> ApiResult<ClaimOutcome> {
        match tokio::time::timeout(self.timeout, self.run(request, now)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                error!(
                    user_id = %request.user_id,
                    anon_visitor_id = %request.anon_visitor_id,
                    timeout = ?self.timeout,
                    "Claim timed out and was rolled back"
                );
                Err(ApiError::Timeout(self.timeout))
            }
        }
    }

    async fn run(&self, request: &ClaimRequest, now: DateTime<Utc>) -> ApiResult<ClaimOutcome> {
        let now_ms = time::to_millis(now);
        let user_id = request.user_id.as_str();
        let method = request.method.as_str();

        let mut tx = self.db.begin().await?;

        let visitor = visitor::find_or_create(&mut tx, request.anon_visitor_id.as_str(), now_ms).await?;

        // The single gate against attaching one person's history to another account
        if let Some(owner) = visitor.user_id.as_deref() {
            if owner != user_id {
                tx.rollback().await?;
                warn!(
                    user_id = %user_id,
                    visitor_id = %visitor.id,
                    "Claim refused: visitor already claimed by another account"
                );
                return Ok(ClaimOutcome::Conflict(ClaimConflict {
                    visitor_id: visitor.id,
                    anon_visitor_id: request.anon_visitor_id.clone(),
                }));
            }
        }

        let newly_claimed = visitor::assign_user(&mut tx, &visitor.id, user_id).await?;

        let target = LinkTarget {
            user_id: user_id.to_string(),
            visitor_id: visitor.id.clone(),
            anon_visitor_id: request.anon_visitor_id.as_str().to_string(),
        };

        let mut passes = LinkCounts {
            primary: linking::link_primary(&mut tx, &target, method, now_ms).await?,
            backfilled: linking::backfill_visitor_ids(&mut tx, &target).await?,
            ..Default::default()
        };

        let ctx = ClaimContext {
            visitor: &visitor,
            user_id,
            now_ms,
        };
        for matcher in self.matchers.iter() {
            let candidates = matcher.candidates(&mut tx, &ctx).await?;
            let linked =
                linking::link_events(&mut tx, &candidates, &target, matcher.link_method(), now_ms)
                    .await?;
            debug!(
                visitor_id = %visitor.id,
                link_method = matcher.link_method(),
                candidates = candidates.len(),
                linked,
                "Fallback pass complete"
            );
            *passes.fallbacks.entry(matcher.link_method().to_string()).or_default() += linked;
        }

        let list = list_merge::claim_visitor_list(&mut tx, &visitor.id, user_id, now_ms).await?;

        let since_ms = now_ms - self.limits.linked_window_secs * 1000;
        let linked_count = linking::count_recently_linked(&mut tx, user_id, since_ms).await?;

        let details = json!({
            "linkedCount": linked_count,
            "passes": &passes,
            "list": &list,
            "visitorNewlyClaimed": newly_claimed,
        });
        let reclaimed = audit::record_claim(
            &mut tx,
            user_id,
            &visitor.id,
            request.anon_visitor_id.as_str(),
            method,
            &details,
            now_ms,
        )
        .await?;

        tx.commit().await?;

        info!(
            user_id = %user_id,
            visitor_id = %visitor.id,
            method,
            linked_this_call = passes.linked_this_call(),
            linked_count,
            list_claimed = list.claimed(),
            list_merged = list.merged(),
            reclaimed,
            "Visitor claimed"
        );

        Ok(ClaimOutcome::Linked(ClaimReport {
            visitor_id: visitor.id,
            anon_visitor_id: request.anon_visitor_id.clone(),
            user_id: user_id.to_string(),
            method: request.method,
            linked_count,
            passes,
            list,
            reclaimed,
        }))
    }
}
