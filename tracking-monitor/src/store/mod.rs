//! Persistence boundary: crawler registry reads, health log writes, health flag updates.
//!
//! The monitor only ever needs the four operations on [`HealthStore`]. The PostgreSQL
//! implementation is what runs in production; the in-memory one backs tests.

use crate::crawlers::CrawlerDefinition;
use crate::health::models::{HealthAggregate, HealthLogEntry};
use crate::types::CrawlerId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub mod errors;
pub mod in_memory;
pub mod postgres;


pub use errors::{DbError, Result};
pub use in_memory::InMemoryStore;
pub use postgres::PostgresStore;

/// Row id of an inserted health log entry.
pub type RecordId = i64;

#[async_trait]
pub trait HealthStore: Send + Sync {
    /// Crawlers that are enabled and whose validity window contains `as_of`.
    async fn list_active_crawlers(&self, as_of: DateTime<Utc>) -> Result<Vec<CrawlerDefinition>>;

    /// Append one classified probe outcome.
    async fn insert_health_log(&self, entry: &HealthLogEntry) -> Result<RecordId>;

    /// Ok/error counts per crawler over log rows that occurred after `since`.
    async fn aggregate_health_counts(&self, since: DateTime<Utc>) -> Result<Vec<HealthAggregate>>;

    /// Store the health flag. Returns the number of rows whose value actually changed,
    /// so writing the value already stored returns 0.
    async fn set_crawler_health_flag(&self, crawler_id: CrawlerId, healthy: bool) -> Result<u64>;
}
