//! Database models
//!
//! Row shapes of the activity ledger, visitor registry, lists, claim audit
//! trail and daily snapshots. Timestamps are epoch milliseconds (UTC).

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One anonymous browsing identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Visitor {
    pub id: String,
    pub anon_visitor_id: String,
    /// Set at most once; never overwritten with a different account
    pub user_id: Option<String>,
    pub tap_count: i64,
    pub first_seen_at: i64,
    pub last_seen_at: i64,
    pub last_tag_id: Option<String>,
    pub last_batch_id: Option<String>,
    pub ip_hash_last_seen: Option<String>,
    pub user_agent_last_seen: Option<String>,
}

impl Visitor {
    /// Stored device fingerprint, present only when both halves are known
    pub fn fingerprint(&self) -> Option<(&str, &str)> {
        match (&self.ip_hash_last_seen, &self.user_agent_last_seen) {
            (Some(ip), Some(ua)) if !ip.is_empty() && !ua.is_empty() => Some((ip, ua)),
            _ => None,
        }
    }
}

/// One observed tag interaction in the activity ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TapEvent {
    pub id: String,
    pub tag_id: String,
    pub batch_id: Option<String>,
    pub occurred_at: i64,
    pub ip_hash: Option<String>,
    pub user_agent: Option<String>,
    pub device_hint: Option<String>,
    pub anon_visitor_id: Option<String>,
    pub visitor_id: Option<String>,
    /// Set together with `linked_at` and `link_method`, at most once
    pub user_id: Option<String>,
    pub is_duplicate: bool,
    pub linked_at: Option<i64>,
    pub link_method: Option<String>,
}

/// Cart-like list owned by a visitor or by a user, never both
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ShoppingList {
    pub id: String,
    pub owner_visitor_id: Option<String>,
    pub owner_user_id: Option<String>,
    /// Former visitor owner, kept after a claim
    pub claimed_from_visitor_id: Option<String>,
    /// Set when this list's items were folded into another user list
    pub merged_into_list_id: Option<String>,
    pub source_tag_id: Option<String>,
    pub source_batch_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub claimed_at: Option<i64>,
}

/// One keyed entry of a shopping list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ShoppingListItem {
    pub id: String,
    pub list_id: String,
    pub item_key: String,
    pub label: Option<String>,
    pub quantity: i64,
    pub times_purchased: i64,
    /// Tag the item was acquired from
    pub source_tag_id: Option<String>,
    pub source_batch_id: Option<String>,
    pub created_at: i64,
    pub last_added_at: Option<i64>,
    pub purchased_at: Option<i64>,
}

/// One row per (user, visitor) pair that has been claimed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ClaimAuditRecord {
    pub id: String,
    pub user_id: String,
    pub visitor_id: String,
    pub anon_visitor_id: String,
    pub method: String,
    pub claimed_at: i64,
    pub reclaimed_at: Option<i64>,
    /// JSON counts of the most recent run
    pub details: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DailySiteStats {
    pub date: String,
    pub taps: i64,
    pub unique_visitors: i64,
    pub new_users: i64,
    pub lists_created: i64,
    pub items_added: i64,
    pub items_purchased: i64,
    pub computed_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DailyBatchStats {
    pub date: String,
    pub batch_id: String,
    pub taps: i64,
    pub unique_visitors: i64,
    pub computed_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DailyTagStats {
    pub date: String,
    pub tag_id: String,
    pub taps: i64,
    pub unique_visitors: i64,
    pub computed_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DailyItemStats {
    pub date: String,
    pub item_key: String,
    pub added: i64,
    pub purchased: i64,
    pub computed_at: i64,
}

/// Per-visitor engagement row; `score` and `is_power_user` are derived
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DailyVisitorStats {
    pub date: String,
    pub visitor_id: String,
    pub user_id: Option<String>,
    pub taps: i64,
    pub tags_tapped: i64,
    pub batches_tapped: i64,
    pub lists_created: i64,
    pub items_added: i64,
    pub items_purchased: i64,
    pub score: i64,
    pub is_power_user: bool,
    pub computed_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn visitor(ip: Option<&str>, ua: Option<&str>) -> Visitor {
        Visitor {
            id: "v1".to_string(),
            anon_visitor_id: "anon-0001".to_string(),
            user_id: None,
            tap_count: 0,
            first_seen_at: 0,
            last_seen_at: 0,
            last_tag_id: None,
            last_batch_id: None,
            ip_hash_last_seen: ip.map(str::to_string),
            user_agent_last_seen: ua.map(str::to_string),
        }
    }

    #[test]
    fn test_fingerprint_requires_both_halves() {
        assert_eq!(visitor(Some("h"), Some("ua")).fingerprint(), Some(("h", "ua")));
        assert_eq!(visitor(Some("h"), None).fingerprint(), None);
        assert_eq!(visitor(None, Some("ua")).fingerprint(), None);
        assert_eq!(visitor(Some(""), Some("ua")).fingerprint(), None);
    }
}
