//! Weak-signal fallback matchers
//!
//! After the primary pass, a claim walks an ordered chain of matchers, each
//! strictly weaker evidence than the one before it:
//!
//! 1. [`ListSourceTagMatcher`]: tags/batches the visitor's list items came from
//! 2. [`VisitorLastTagMatcher`]: the visitor's last-known tag/batch
//! 3. [`StoredIpUaMatcher`]: the visitor's stored IP hash + user agent, recent only
//!
//! A matcher only nominates candidate event ids; [`link_events`] performs the
//! write. Because that write only touches unlinked rows, a weaker matcher can
//! never undo or relabel what a stronger one linked. New signals are added by
//! inserting another matcher into [`default_chain`].
//!
//! [`link_events`]: super::linking::link_events

use async_trait::async_trait;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use std::collections::BTreeSet;
use tagtrail_common::config::ClaimLimits;
use tagtrail_common::db::{ShoppingList, Visitor};

use crate::error::ApiResult;

pub const LINK_METHOD_LIST_SOURCE_TAG: &str = "myListSourceTag";
pub const LINK_METHOD_VISITOR_LAST_TAG: &str = "visitorLastTag";
pub const LINK_METHOD_STORED_IP_UA: &str = "visitorStoredIpUa";

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// What a matcher knows about the claim in progress
#[derive(Debug, Clone, Copy)]
pub struct ClaimContext<'a> {
    /// Visitor as loaded at the start of the claim
    pub visitor: &'a Visitor,
    pub user_id: &'a str,
    pub now_ms: i64,
}

/// One link signal in the fallback chain
#[async_trait]
pub trait LinkMatcher: Send + Sync {
    /// Value written to `tap_events.link_method` for rows this matcher links
    fn link_method(&self) -> &'static str;

    /// Ids of unlinked events this signal attributes to the visitor
    async fn candidates(
        &self,
        conn: &mut SqliteConnection,
        ctx: &ClaimContext<'_>,
    ) -> ApiResult<Vec<String>>;
}

/// The standard chain, strongest signal first
pub fn default_chain(limits: &ClaimLimits) -> Vec<Box<dyn LinkMatcher>> {
    vec![
        Box::new(ListSourceTagMatcher {
            item_sample: limits.list_item_sample,
            limit: limits.list_source_events,
        }),
        Box::new(VisitorLastTagMatcher {
            limit: limits.last_tag_events,
        }),
        Box::new(StoredIpUaMatcher {
            limit: limits.ip_ua_events,
            window_ms: limits.ip_ua_window_days * DAY_MS,
        }),
    ]
}

/// Start a candidate query with the predicates every fallback shares
///
/// Besides being unlinked, a candidate must carry no identity evidence that
/// points at a different device: its token and visitor id are either empty
/// or the claimed visitor's own.
fn unlinked_candidates<'a>(ctx: &ClaimContext<'_>) -> QueryBuilder<'a, Sqlite> {
    let mut qb = QueryBuilder::new(
        "SELECT id FROM tap_events WHERE user_id IS NULL AND (anon_visitor_id IS NULL OR anon_visitor_id = ",
    );
    qb.push_bind(ctx.visitor.anon_visitor_id.clone());
    qb.push(") AND (visitor_id IS NULL OR visitor_id = ");
    qb.push_bind(ctx.visitor.id.clone());
    qb.push(")");
    qb
}

/// Unlinked events on any of `tags` or `batches`, newest first
async fn select_on_tags(
    conn: &mut SqliteConnection,
    ctx: &ClaimContext<'_>,
    tags: &BTreeSet<String>,
    batches: &BTreeSet<String>,
    limit: i64,
) -> ApiResult<Vec<String>> {
    if (tags.is_empty() && batches.is_empty()) || limit <= 0 {
        return Ok(Vec::new());
    }

    let mut qb = unlinked_candidates(ctx);
    qb.push(" AND (");
    if !tags.is_empty() {
        qb.push("tag_id IN (");
        let mut list = qb.separated(", ");
        for tag in tags {
            list.push_bind(tag.clone());
        }
        qb.push(")");
    }
    if !batches.is_empty() {
        if !tags.is_empty() {
            qb.push(" OR ");
        }
        qb.push("batch_id IN (");
        let mut list = qb.separated(", ");
        for batch in batches {
            list.push_bind(batch.clone());
        }
        qb.push(")");
    }
    qb.push(") ORDER BY occurred_at DESC LIMIT ");
    qb.push_bind(limit);

    let ids = qb.build_query_scalar::<String>().fetch_all(&mut *conn).await?;
    Ok(ids)
}

fn insert_present(set: &mut BTreeSet<String>, value: Option<String>) {
    if let Some(value) = value.filter(|v| !v.is_empty()) {
        set.insert(value);
    }
}

/// Most recent list the visitor owns or owned before a claim
pub async fn latest_visitor_list(
    conn: &mut SqliteConnection,
    visitor_id: &str,
) -> ApiResult<Option<ShoppingList>> {
    let list = sqlx::query_as::<_, ShoppingList>(
        r#"
        SELECT * FROM shopping_lists
        WHERE owner_visitor_id = ? OR claimed_from_visitor_id = ?
        ORDER BY updated_at DESC, created_at DESC
        LIMIT 1
        "#,
    )
    .bind(visitor_id)
    .bind(visitor_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(list)
}

/// Links events on the tags/batches the visitor's list items were acquired from
#[derive(Debug, Clone)]
pub struct ListSourceTagMatcher {
    /// Items sampled from the list
    pub item_sample: i64,
    /// Events nominated per claim
    pub limit: i64,
}

#[async_trait]
impl LinkMatcher for ListSourceTagMatcher {
    fn link_method(&self) -> &'static str {
        LINK_METHOD_LIST_SOURCE_TAG
    }

    async fn candidates(
        &self,
        conn: &mut SqliteConnection,
        ctx: &ClaimContext<'_>,
    ) -> ApiResult<Vec<String>> {
        let Some(list) = latest_visitor_list(conn, &ctx.visitor.id).await? else {
            return Ok(Vec::new());
        };

        let sources: Vec<(Option<String>, Option<String>)> = sqlx::query_as(
            r#"
            SELECT source_tag_id, source_batch_id FROM shopping_list_items
            WHERE list_id = ?
            ORDER BY COALESCE(last_added_at, created_at) DESC
            LIMIT ?
            "#,
        )
        .bind(&list.id)
        .bind(self.item_sample)
        .fetch_all(&mut *conn)
        .await?;

        let mut tags = BTreeSet::new();
        let mut batches = BTreeSet::new();
        insert_present(&mut tags, list.source_tag_id);
        insert_present(&mut batches, list.source_batch_id);
        for (tag, batch) in sources {
            insert_present(&mut tags, tag);
            insert_present(&mut batches, batch);
        }

        select_on_tags(conn, ctx, &tags, &batches, self.limit).await
    }
}

/// Links events on the visitor's last-seen tag or batch
#[derive(Debug, Clone)]
pub struct VisitorLastTagMatcher {
    pub limit: i64,
}

#[async_trait]
impl LinkMatcher for VisitorLastTagMatcher {
    fn link_method(&self) -> &'static str {
        LINK_METHOD_VISITOR_LAST_TAG
    }

    async fn candidates(
        &self,
        conn: &mut SqliteConnection,
        ctx: &ClaimContext<'_>,
    ) -> ApiResult<Vec<String>> {
        let mut tags = BTreeSet::new();
        let mut batches = BTreeSet::new();
        insert_present(&mut tags, ctx.visitor.last_tag_id.clone());
        insert_present(&mut batches, ctx.visitor.last_batch_id.clone());

        select_on_tags(conn, ctx, &tags, &batches, self.limit).await
    }
}

/// Links recent events sharing both the stored IP hash and user agent
#[derive(Debug, Clone)]
pub struct StoredIpUaMatcher {
    pub limit: i64,
    /// How far back from the claim an event may have occurred
    pub window_ms: i64,
}

#[async_trait]
impl LinkMatcher for StoredIpUaMatcher {
    fn link_method(&self) -> &'static str {
        LINK_METHOD_STORED_IP_UA
    }

    async fn candidates(
        &self,
        conn: &mut SqliteConnection,
        ctx: &ClaimContext<'_>,
    ) -> ApiResult<Vec<String>> {
        let Some((ip_hash, user_agent)) = ctx.visitor.fingerprint() else {
            return Ok(Vec::new());
        };
        if self.limit <= 0 {
            return Ok(Vec::new());
        }

        let mut qb = unlinked_candidates(ctx);
        qb.push(" AND ip_hash = ");
        qb.push_bind(ip_hash.to_string());
        qb.push(" AND user_agent = ");
        qb.push_bind(user_agent.to_string());
        qb.push(" AND occurred_at >= ");
        qb.push_bind(ctx.now_ms - self.window_ms);
        qb.push(" ORDER BY occurred_at DESC LIMIT ");
        qb.push_bind(self.limit);

        let ids = qb.build_query_scalar::<String>().fetch_all(&mut *conn).await?;
        Ok(ids)
    }
}
