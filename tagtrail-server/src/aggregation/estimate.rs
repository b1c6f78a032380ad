//! Two-tier unique-visitor estimate
//!
//! estimate = |distinct anon_visitor_id| + |distinct (ip_hash, user_agent)
//! among taps that carry no anon_visitor_id|
//!
//! This is an approximation kept stable for historical KPIs. A tap with a
//! token never contributes a fingerprint, so a visitor seen both ways is not
//! counted twice through the same tap.

use std::collections::HashSet;

use super::collect::TapRow;

#[derive(Debug, Clone, Default)]
pub struct UniqueVisitorEstimate {
    identified: HashSet<String>,
    fingerprints: HashSet<(Option<String>, Option<String>)>,
}

impl UniqueVisitorEstimate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for one non-duplicate tap
    pub fn add(&mut self, tap: &TapRow) {
        match tap.anon_visitor_id.as_deref().filter(|id| !id.is_empty()) {
            Some(id) => {
                self.identified.insert(id.to_string());
            }
            None => {
                // A fingerprint needs at least one known half
                if tap.ip_hash.is_some() || tap.user_agent.is_some() {
                    self.fingerprints
                        .insert((tap.ip_hash.clone(), tap.user_agent.clone()));
                }
            }
        }
    }

    pub fn count(&self) -> i64 {
        (self.identified.len() + self.fingerprints.len()) as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tap(anon: Option<&str>, ip: Option<&str>, ua: Option<&str>) -> TapRow {
        TapRow {
            id: "e".to_string(),
            tag_id: "tag".to_string(),
            batch_id: None,
            occurred_at: 0,
            ip_hash: ip.map(str::to_string),
            user_agent: ua.map(str::to_string),
            anon_visitor_id: anon.map(str::to_string),
            visitor_id: None,
            user_id: None,
        }
    }

    #[test]
    fn test_three_identified_plus_one_fingerprint() {
        let mut estimate = UniqueVisitorEstimate::new();
        estimate.add(&tap(Some("anon-a"), Some("ip1"), Some("ua1")));
        estimate.add(&tap(Some("anon-b"), Some("ip1"), Some("ua1")));
        estimate.add(&tap(Some("anon-c"), None, None));
        estimate.add(&tap(None, Some("ip9"), Some("ua9")));
        estimate.add(&tap(None, Some("ip9"), Some("ua9")));

        assert_eq!(estimate.count(), 4);
    }

    #[test]
    fn test_repeat_token_counts_once() {
        let mut estimate = UniqueVisitorEstimate::new();
        for _ in 0..5 {
            estimate.add(&tap(Some("anon-a"), Some("ip1"), Some("ua1")));
        }
        assert_eq!(estimate.count(), 1);
    }

    #[test]
    fn test_fingerprint_pairs_are_distinct_on_either_half() {
        let mut estimate = UniqueVisitorEstimate::new();
        estimate.add(&tap(None, Some("ip1"), Some("ua1")));
        estimate.add(&tap(None, Some("ip1"), Some("ua2")));
        estimate.add(&tap(None, Some("ip2"), Some("ua1")));
        estimate.add(&tap(None, None, Some("ua1")));
        estimate.add(&tap(None, None, None));

        assert_eq!(estimate.count(), 4);
    }
}
