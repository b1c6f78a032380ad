//! Power-user scoring model
//!
//! Fixed business weights applied to one visitor's activity for one day:
//!
//! ```text
//! score = taps*1 + tags_tapped*2 + batches_tapped*2
//!       + lists_created*3 + items_added*1 + items_purchased*5
//! ```

use serde::{Deserialize, Serialize};

/// Default score at which a visitor counts as a power user
pub const DEFAULT_POWER_USER_THRESHOLD: i64 = 50;

pub const TAP_WEIGHT: i64 = 1;
pub const TAG_WEIGHT: i64 = 2;
pub const BATCH_WEIGHT: i64 = 2;
pub const LIST_WEIGHT: i64 = 3;
pub const ITEM_ADDED_WEIGHT: i64 = 1;
pub const ITEM_PURCHASED_WEIGHT: i64 = 5;

/// One visitor's activity counts for a single day
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitorActivity {
    pub taps: i64,
    pub tags_tapped: i64,
    pub batches_tapped: i64,
    pub lists_created: i64,
    pub items_added: i64,
    pub items_purchased: i64,
}

impl VisitorActivity {
    /// Weighted engagement score
    pub fn score(&self) -> i64 {
        self.taps * TAP_WEIGHT
            + self.tags_tapped * TAG_WEIGHT
            + self.batches_tapped * BATCH_WEIGHT
            + self.lists_created * LIST_WEIGHT
            + self.items_added * ITEM_ADDED_WEIGHT
            + self.items_purchased * ITEM_PURCHASED_WEIGHT
    }

    /// Whether the score reaches `threshold` (inclusive)
    pub fn is_power_user(&self, threshold: i64) -> bool {
        is_power_user(self.score(), threshold)
    }
}

/// Threshold check shared by the rollup and any reporting code
pub fn is_power_user(score: i64, threshold: i64) -> bool {
    score >= threshold
}
