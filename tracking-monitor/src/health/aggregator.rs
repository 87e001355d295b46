//! Rolling health evaluation over the trailing window of the health log.
//!
//! Every run recomputes the verdict from the log alone, so overlapping runs converge on
//! the same stored flag no matter how their writes interleave.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::crawlers::CrawlerSnapshot;
use crate::metrics;
use crate::store::{HealthStore, Result};
use crate::types::CrawlerId;

/// Outcome of one aggregation run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregationReport {
    /// Crawlers that had enough data for a verdict
    pub evaluated: usize,
    /// Flags that were actually flipped, with their new value
    pub changed: Vec<(CrawlerId, bool)>,
    /// Aggregate rows for crawlers not in the snapshot
    pub skipped_unknown: usize,
    /// Crawlers with no probes in the window
    pub skipped_empty: usize,
}

pub struct HealthAggregator<S: HealthStore + ?Sized> {
    store: Arc<S>,
    window: Duration,
    threshold: f64,
}

impl<S: HealthStore + ?Sized> Clone for HealthAggregator<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            window: self.window,
            threshold: self.threshold,
        }
    }
}

impl<S: HealthStore + ?Sized> HealthAggregator<S> {
    pub fn new(store: Arc<S>, window: Duration, threshold: f64) -> Self {
        Self {
            store,
            window,
            threshold,
        }
    }

    pub fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let window = chrono::Duration::from_std(self.window).unwrap_or(chrono::Duration::MAX);
        now.checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    #[tracing::instrument(skip(self, snapshot), fields(crawlers = snapshot.len()))]
    pub async fn run(&self, snapshot: &CrawlerSnapshot, now: DateTime<Utc>) -> Result<AggregationReport> {
        let since = self.window_start(now);
        let aggregates = self.store.aggregate_health_counts(since).await?;
        let mut report = AggregationReport::default();

        for aggregate in aggregates {
            let Some(crawler) = snapshot.find_by_id(aggregate.crawler_id) else {
                tracing::debug!(crawler_id = %aggregate.crawler_id, "Skipping aggregate for crawler outside snapshot");
                report.skipped_unknown += 1;
                continue;
            };

            let Some(healthy) = aggregate.is_healthy(self.threshold) else {
                report.skipped_empty += 1;
                continue;
            };
            report.evaluated += 1;

            let changed = self.store.set_crawler_health_flag(crawler.crawler_id, healthy).await?;
            if changed > 0 {
                tracing::info!(
                    crawler_id = %crawler.crawler_id,
                    crawler = %crawler.display_name,
                    carrier_code = %crawler.carrier_code,
                    healthy,
                    count_ok = aggregate.count_ok,
                    count_error = aggregate.count_error,
                    "Crawler health flag changed"
                );
                metrics::record_health_flag_change(healthy);
                report.changed.push((crawler.crawler_id, healthy));
            }
        }

        tracing::debug!(
            evaluated = report.evaluated,
            changed = report.changed.len(),
            skipped_unknown = report.skipped_unknown,
            skipped_empty = report.skipped_empty,
            "Health aggregation finished"
        );
        Ok(report)
    }
}
