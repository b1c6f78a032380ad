//! Claiming and merging the visitor's shopping list
//!
//! The visitor's most recent list either becomes the user's list, or, when
//! the user already has one, its items are folded into that list keyed on
//! `item_key` and the visitor list is left behind as a claimed husk. Either
//! way it stops being visitor-owned, so later claims never pick it up again.

use serde::Serialize;
use sqlx::SqliteConnection;
use tagtrail_common::db::{ShoppingList, ShoppingListItem};
use tagtrail_common::uuid_utils;
use tracing::debug;

use crate::error::ApiResult;

/// What happened to the visitor's list during one claim
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListClaim {
    /// Visitor list that was claimed, if it had an unclaimed one
    pub list_id: Option<String>,
    /// User list the items were merged into
    pub merged_into: Option<String>,
    /// Keys present on both lists
    pub items_merged: u64,
    /// Keys only on the visitor list, copied over
    pub items_copied: u64,
}

impl ListClaim {
    pub fn claimed(&self) -> bool {
        self.list_id.is_some()
    }

    pub fn merged(&self) -> bool {
        self.merged_into.is_some()
    }
}

/// Combine an incoming item into the existing row for the same key
///
/// Counters and timestamps take the larger of the two; the existing row's
/// identity and provenance are kept.
pub fn merge_item(existing: &ShoppingListItem, incoming: &ShoppingListItem) -> ShoppingListItem {
    ShoppingListItem {
        quantity: existing.quantity.max(incoming.quantity),
        times_purchased: existing.times_purchased.max(incoming.times_purchased),
        last_added_at: existing.last_added_at.max(incoming.last_added_at),
        purchased_at: existing.purchased_at.max(incoming.purchased_at),
        label: existing.label.clone().or_else(|| incoming.label.clone()),
        ..existing.clone()
    }
}

async fn load_items(conn: &mut SqliteConnection, list_id: &str) -> ApiResult<Vec<ShoppingListItem>> {
    let items = sqlx::query_as::<_, ShoppingListItem>(
        "SELECT * FROM shopping_list_items WHERE list_id = ? ORDER BY created_at, item_key",
    )
    .bind(list_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(items)
}

/// Claim the visitor's most recent unclaimed list for `user_id`
pub async fn claim_visitor_list(
    conn: &mut SqliteConnection,
    visitor_id: &str,
    user_id: &str,
    now_ms: i64,
) -> ApiResult<ListClaim> {
    let visitor_list = sqlx::query_as::<_, ShoppingList>(
        r#"
        SELECT * FROM shopping_lists
        WHERE owner_visitor_id = ?
        ORDER BY updated_at DESC, created_at DESC
        LIMIT 1
        "#,
    )
    .bind(visitor_id)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(visitor_list) = visitor_list else {
        return Ok(ListClaim::default());
    };

    let user_list = sqlx::query_as::<_, ShoppingList>(
        r#"
        SELECT * FROM shopping_lists
        WHERE owner_user_id = ? AND merged_into_list_id IS NULL AND id != ?
        ORDER BY updated_at DESC, created_at DESC
        LIMIT 1
        "#,
    )
    .bind(user_id)
    .bind(&visitor_list.id)
    .fetch_optional(&mut *conn)
    .await?;

    let mut claim = ListClaim {
        list_id: Some(visitor_list.id.clone()),
        ..Default::default()
    };

    if let Some(user_list) = user_list {
        let (merged, copied) = merge_into(conn, &visitor_list, &user_list, now_ms).await?;
        claim.items_merged = merged;
        claim.items_copied = copied;
        claim.merged_into = Some(user_list.id);
    }

    sqlx::query(
        r#"
        UPDATE shopping_lists SET
            owner_visitor_id = NULL,
            owner_user_id = ?,
            claimed_from_visitor_id = ?,
            merged_into_list_id = ?,
            claimed_at = ?,
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(user_id)
    .bind(visitor_id)
    .bind(&claim.merged_into)
    .bind(now_ms)
    .bind(now_ms)
    .bind(&visitor_list.id)
    .execute(&mut *conn)
    .await?;

    debug!(
        list_id = %visitor_list.id,
        merged_into = ?claim.merged_into,
        items_merged = claim.items_merged,
        items_copied = claim.items_copied,
        "Visitor list claimed"
    );

    Ok(claim)
}

/// Fold every item of `source` into `target`; returns (merged, copied)
async fn merge_into(
    conn: &mut SqliteConnection,
    source: &ShoppingList,
    target: &ShoppingList,
    now_ms: i64,
) -> ApiResult<(u64, u64)> {
    let incoming = load_items(conn, &source.id).await?;
    let existing = load_items(conn, &target.id).await?;

    let mut merged = 0;
    let mut copied = 0;

    for item in &incoming {
        match existing.iter().find(|e| e.item_key == item.item_key) {
            Some(current) => {
                let combined = merge_item(current, item);
                sqlx::query(
                    r#"
                    UPDATE shopping_list_items SET
                        quantity = ?, times_purchased = ?, last_added_at = ?,
                        purchased_at = ?, label = ?
                    WHERE id = ?
                    "#,
                )
                .bind(combined.quantity)
                .bind(combined.times_purchased)
                .bind(combined.last_added_at)
                .bind(combined.purchased_at)
                .bind(&combined.label)
                .bind(&combined.id)
                .execute(&mut *conn)
                .await?;
                merged += 1;
            }
            None => {
                // Source provenance travels with the copy
                sqlx::query(
                    r#"
                    INSERT INTO shopping_list_items (
                        id, list_id, item_key, label, quantity, times_purchased,
                        source_tag_id, source_batch_id, created_at, last_added_at, purchased_at
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    ON CONFLICT(list_id, item_key) DO NOTHING
                    "#,
                )
                .bind(uuid_utils::generate_id())
                .bind(&target.id)
                .bind(&item.item_key)
                .bind(&item.label)
                .bind(item.quantity)
                .bind(item.times_purchased)
                .bind(&item.source_tag_id)
                .bind(&item.source_batch_id)
                .bind(item.created_at)
                .bind(item.last_added_at)
                .bind(item.purchased_at)
                .execute(&mut *conn)
                .await?;
                copied += 1;
            }
        }
    }

    sqlx::query("UPDATE shopping_lists SET updated_at = ? WHERE id = ?")
        .bind(now_ms)
        .bind(&target.id)
        .execute(&mut *conn)
        .await?;

    Ok((merged, copied))
}
