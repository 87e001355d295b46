//! Crawler definitions and the per-cycle registry snapshot.
//!
//! A [`CrawlerSnapshot`] is read once at the start of a cycle and then passed by value
//! through dispatch, correlation and aggregation. Nothing in a cycle re-reads the
//! registry, so a crawler that is disabled mid-cycle is still attributed correctly.

use crate::types::CrawlerId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A registered, monitorable crawler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct CrawlerDefinition {
    /// Primary key of the crawler row
    pub crawler_id: CrawlerId,
    /// Carrier the crawler queries for
    pub carrier_id: i64,
    /// Carrier code; correlates probe results back to this crawler within a cycle
    pub carrier_code: String,
    /// Human-readable crawler name
    pub display_name: String,
    /// Known-good tracking number used as the probe payload
    pub heartbeat_tracking_number: String,
    /// Agent implementation type (e.g. `PYTHON`, `JAVA`)
    pub agent_type: String,
    /// Where the agent itself is reachable, informational only
    pub agent_url: Option<String>,
    /// Start of the validity window
    pub start_time: DateTime<Utc>,
    /// End of the validity window
    pub end_time: DateTime<Utc>,
    /// Administrative enable flag
    pub active: bool,
    /// Stored health flag, owned by the aggregator
    pub healthy: bool,
}

impl CrawlerDefinition {
    /// Whether this definition should be probed at `as_of`.
    pub fn is_probeable_at(&self, as_of: DateTime<Utc>) -> bool {
        self.active && self.start_time <= as_of && as_of <= self.end_time
    }
}

/// Immutable point-in-time view of the enabled crawlers.
#[derive(Debug, Clone, Default)]
pub struct CrawlerSnapshot {
    taken_at: DateTime<Utc>,
    crawlers: Vec<CrawlerDefinition>,
}

impl CrawlerSnapshot {
    pub fn new(taken_at: DateTime<Utc>, crawlers: Vec<CrawlerDefinition>) -> Self {
        Self { taken_at, crawlers }
    }

    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }

    pub fn crawlers(&self) -> &[CrawlerDefinition] {
        &self.crawlers
    }

    pub fn len(&self) -> usize {
        self.crawlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.crawlers.is_empty()
    }

    /// Resolve a probe result's carrier code. The first definition in registry order wins
    /// when several crawlers share a carrier.
    pub fn find_by_carrier_code(&self, carrier_code: &str) -> Option<&CrawlerDefinition> {
        self.crawlers.iter().find(|c| c.carrier_code == carrier_code)
    }

    pub fn find_by_id(&self, crawler_id: CrawlerId) -> Option<&CrawlerDefinition> {
        self.crawlers.iter().find(|c| c.crawler_id == crawler_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::crawler;
    use chrono::Duration;

    #[test]
    fn test_probeable_requires_active_and_window() {
        let now = Utc::now();
        let mut def = crawler(1, "UPS");
        assert!(def.is_probeable_at(now));

        def.active = false;
        assert!(!def.is_probeable_at(now));

        def.active = true;
        def.end_time = now - Duration::seconds(1);
        assert!(!def.is_probeable_at(now));

        def.end_time = now + Duration::days(1);
        def.start_time = now + Duration::seconds(1);
        assert!(!def.is_probeable_at(now));
    }

    #[test]
    fn test_find_by_carrier_code_returns_first_match() {
        let snapshot = CrawlerSnapshot::new(Utc::now(), vec![crawler(7, "DHL"), crawler(8, "DHL"), crawler(9, "UPS")]);

        assert_eq!(snapshot.find_by_carrier_code("DHL").map(|c| c.crawler_id), Some(CrawlerId(7)));
        assert_eq!(snapshot.find_by_carrier_code("UPS").map(|c| c.crawler_id), Some(CrawlerId(9)));
        assert!(snapshot.find_by_carrier_code("FEDEX").is_none());
        assert_eq!(snapshot.find_by_id(CrawlerId(8)).map(|c| c.carrier_code.as_str()), Some("DHL"));
    }
}
