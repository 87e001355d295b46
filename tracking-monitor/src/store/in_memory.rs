//! In-memory health store.
//!
//! Keeps crawler rows and the appended health log behind `parking_lot` locks. Suitable
//! for tests; everything is lost when the process exits.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use super::{DbError, HealthStore, RecordId, Result};
use crate::crawlers::CrawlerDefinition;
use crate::health::models::{HealthAggregate, HealthLogEntry, ResultStatus};
use crate::types::CrawlerId;

#[derive(Default)]
struct Inner {
    crawlers: RwLock<Vec<CrawlerDefinition>>,
    health_log: RwLock<Vec<(RecordId, HealthLogEntry)>>,
    flag_writes: Mutex<Vec<(CrawlerId, bool)>>,
    insert_failure: Mutex<Option<String>>,
}

#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_crawlers(crawlers: Vec<CrawlerDefinition>) -> Self {
        let store = Self::new();
        *store.inner.crawlers.write() = crawlers;
        store
    }

    /// Replace or add a crawler row.
    pub fn upsert_crawler(&self, crawler: CrawlerDefinition) {
        let mut crawlers = self.inner.crawlers.write();
        match crawlers.iter_mut().find(|c| c.crawler_id == crawler.crawler_id) {
            Some(existing) => *existing = crawler,
            None => crawlers.push(crawler),
        }
    }

    pub fn crawler(&self, crawler_id: CrawlerId) -> Option<CrawlerDefinition> {
        self.inner.crawlers.read().iter().find(|c| c.crawler_id == crawler_id).cloned()
    }

    pub fn health_log(&self) -> Vec<HealthLogEntry> {
        self.inner.health_log.read().iter().map(|(_, entry)| entry.clone()).collect()
    }

    /// Append `count` synthetic entries for `crawler_id`.
    pub fn seed_health_log(&self, crawler_id: CrawlerId, status: ResultStatus, count: usize, occurred_at: DateTime<Utc>) {
        let mut log = self.inner.health_log.write();
        for _ in 0..count {
            let id = log.len() as RecordId + 1;
            log.push((
                id,
                HealthLogEntry {
                    crawler_id,
                    tracking_no: "SEED".to_string(),
                    timing_millis: 0,
                    result_status: status,
                    occurred_at,
                    raw_response_body: None,
                    result_note: None,
                },
            ));
        }
    }

    /// Flag writes that changed stored state, in order.
    pub fn flag_writes(&self) -> Vec<(CrawlerId, bool)> {
        self.inner.flag_writes.lock().clone()
    }

    /// Make every subsequent `insert_health_log` fail with `message`.
    pub fn fail_inserts(&self, message: impl Into<String>) {
        *self.inner.insert_failure.lock() = Some(message.into());
    }
}

#[async_trait]
impl HealthStore for InMemoryStore {
    async fn list_active_crawlers(&self, as_of: DateTime<Utc>) -> Result<Vec<CrawlerDefinition>> {
        let crawlers = self.inner.crawlers.read();
        let mut active: Vec<_> = crawlers.iter().filter(|c| c.is_probeable_at(as_of)).cloned().collect();
        active.sort_by_key(|c| c.crawler_id);
        Ok(active)
    }

    async fn insert_health_log(&self, entry: &HealthLogEntry) -> Result<RecordId> {
        if let Some(message) = self.inner.insert_failure.lock().clone() {
            return Err(DbError::Other(anyhow::anyhow!(message)));
        }

        let mut log = self.inner.health_log.write();
        let id = log.len() as RecordId + 1;
        log.push((id, entry.clone()));
        Ok(id)
    }

    async fn aggregate_health_counts(&self, since: DateTime<Utc>) -> Result<Vec<HealthAggregate>> {
        let log = self.inner.health_log.read();
        let mut counts: BTreeMap<CrawlerId, (i64, i64)> = BTreeMap::new();

        for (_, entry) in log.iter().filter(|(_, e)| e.occurred_at > since) {
            let slot = counts.entry(entry.crawler_id).or_default();
            match entry.result_status {
                ResultStatus::Ok => slot.0 += 1,
                ResultStatus::Error => slot.1 += 1,
            }
        }

        Ok(counts
            .into_iter()
            .map(|(crawler_id, (count_ok, count_error))| HealthAggregate {
                crawler_id,
                count_ok,
                count_error,
            })
            .collect())
    }

    async fn set_crawler_health_flag(&self, crawler_id: CrawlerId, healthy: bool) -> Result<u64> {
        let mut crawlers = self.inner.crawlers.write();
        let Some(crawler) = crawlers.iter_mut().find(|c| c.crawler_id == crawler_id) else {
            return Ok(0);
        };

        if crawler.healthy == healthy {
            return Ok(0);
        }

        crawler.healthy = healthy;
        self.inner.flag_writes.lock().push((crawler_id, healthy));
        Ok(1)
    }
}
