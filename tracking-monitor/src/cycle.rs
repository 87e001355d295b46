//! One monitoring cycle: snapshot, dispatch, retrieve, classify, log, then aggregate.
//!
//! The cycle body runs sequentially. Aggregation is handed to a [`TaskTracker`] as soon as
//! the log is written and the cycle returns without waiting for it.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;

use crate::crawlers::CrawlerSnapshot;
use crate::errors::{Error, Result};
use crate::health::{AggregationReport, HealthAggregator, ResultStatus};
use crate::metrics;
use crate::probes::{classifier, correlator, dispatcher};
use crate::queue::ProbeQueue;
use crate::store::HealthStore;
use crate::types::{Language, Priority};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStatus {
    /// Results were logged and aggregation was started
    Completed,
    /// The registry had nothing to probe
    NoCrawlers,
    /// The queue rejected the batch; nothing was logged
    SubmissionFailed,
    /// Another cycle was still running
    Skipped,
}

impl CycleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleStatus::Completed => "completed",
            CycleStatus::NoCrawlers => "no_crawlers",
            CycleStatus::SubmissionFailed => "submission_failed",
            CycleStatus::Skipped => "skipped",
        }
    }
}

#[derive(Debug)]
pub struct CycleReport {
    pub status: CycleStatus,
    pub crawlers: usize,
    pub submitted: usize,
    pub received: usize,
    pub written: usize,
    pub unmatched: usize,
    /// Resolves when the detached aggregation finishes; `None` inside means it failed
    pub aggregation: Option<JoinHandle<Option<AggregationReport>>>,
}

impl CycleReport {
    fn new(status: CycleStatus) -> Self {
        Self {
            status,
            crawlers: 0,
            submitted: 0,
            received: 0,
            written: 0,
            unmatched: 0,
            aggregation: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MonitorSettings {
    pub priority: Priority,
    pub language: Language,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            priority: Priority::Highest,
            language: Language::En,
        }
    }
}

pub struct Monitor<S: HealthStore + ?Sized, Q: ProbeQueue + ?Sized> {
    store: Arc<S>,
    queue: Arc<Q>,
    aggregator: HealthAggregator<S>,
    settings: MonitorSettings,
    in_flight: AtomicBool,
    aggregations: TaskTracker,
}

impl<S, Q> Monitor<S, Q>
where
    S: HealthStore + ?Sized + 'static,
    Q: ProbeQueue + ?Sized + 'static,
{
    pub fn new(store: Arc<S>, queue: Arc<Q>, aggregator: HealthAggregator<S>, settings: MonitorSettings) -> Self {
        Self {
            store,
            queue,
            aggregator,
            settings,
            in_flight: AtomicBool::new(false),
            aggregations: TaskTracker::new(),
        }
    }

    /// Run one cycle unless another one is still in flight.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::warn!("Previous monitoring cycle still running, skipping this one");
            metrics::record_cycle(CycleStatus::Skipped.as_str());
            return Ok(CycleReport::new(CycleStatus::Skipped));
        }
        let _in_flight = scopeguard::guard(&self.in_flight, |flag| flag.store(false, Ordering::Release));

        let outcome = self.execute().await;
        match &outcome {
            Ok(report) => metrics::record_cycle(report.status.as_str()),
            Err(_) => metrics::record_cycle("failed"),
        }
        outcome
    }

    #[tracing::instrument(skip(self), fields(priority = %self.settings.priority))]
    async fn execute(&self) -> Result<CycleReport> {
        let cycle_start = Utc::now();
        let crawlers = self.store.list_active_crawlers(cycle_start).await?;
        let snapshot = Arc::new(CrawlerSnapshot::new(cycle_start, crawlers));
        metrics::set_active_crawlers(snapshot.len());
        tracing::info!(crawlers = snapshot.len(), "Crawler snapshot taken");

        if snapshot.is_empty() {
            tracing::info!("No active crawlers to probe");
            return Ok(CycleReport::new(CycleStatus::NoCrawlers));
        }

        let mut report = CycleReport::new(CycleStatus::Completed);
        report.crawlers = snapshot.len();

        let batch = dispatcher::build_probe_batch(&snapshot, cycle_start, self.settings.language);
        let keys = match dispatcher::dispatch(self.queue.as_ref(), self.settings.priority, &batch).await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!(error = %e, batch_size = batch.len(), "Probe batch submission failed, skipping cycle");
                report.status = CycleStatus::SubmissionFailed;
                return Ok(report);
            }
        };
        report.submitted = keys.len();

        let results = correlator::retrieve(self.queue.as_ref(), self.settings.priority, &keys)
            .await
            .map_err(Error::Retrieval)?;
        report.received = results.len();

        let correlation = correlator::correlate(&snapshot, results, Utc::now());
        report.unmatched = correlation.unmatched.len();

        for matched in &correlation.matched {
            let entry = classifier::to_health_log_entry(matched);
            self.store.insert_health_log(&entry).await?;
            report.written += 1;

            let crawler = matched.crawler;
            match entry.result_status {
                ResultStatus::Ok => tracing::info!(
                    crawler = %crawler.display_name,
                    carrier_code = %crawler.carrier_code,
                    tracking_no = %entry.tracking_no,
                    timing_ms = entry.timing_millis,
                    note = entry.result_note.as_deref().unwrap_or(""),
                    "Crawler heartbeat OK"
                ),
                ResultStatus::Error => tracing::warn!(
                    crawler = %crawler.display_name,
                    carrier_code = %crawler.carrier_code,
                    tracking_no = %entry.tracking_no,
                    timing_ms = entry.timing_millis,
                    note = entry.result_note.as_deref().unwrap_or(""),
                    "Crawler heartbeat ERROR"
                ),
            }
            metrics::record_probe_result(entry.result_status, entry.timing_millis);
        }

        report.aggregation = Some(self.spawn_aggregation(snapshot.clone()));

        tracing::info!(
            crawlers = report.crawlers,
            received = report.received,
            written = report.written,
            unmatched = report.unmatched,
            "Monitoring cycle finished"
        );
        Ok(report)
    }

    fn spawn_aggregation(&self, snapshot: Arc<CrawlerSnapshot>) -> JoinHandle<Option<AggregationReport>> {
        let aggregator = self.aggregator.clone();
        self.aggregations.spawn(async move {
            let run = AssertUnwindSafe(aggregator.run(&snapshot, Utc::now())).catch_unwind();
            match run.await {
                Ok(Ok(report)) => Some(report),
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "Health aggregation failed");
                    None
                }
                Err(_) => {
                    tracing::error!("Health aggregation panicked");
                    None
                }
            }
        })
    }

    /// Stop accepting aggregations and wait for the outstanding ones.
    pub async fn drain(&self) {
        self.aggregations.close();
        self.aggregations.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probes::classifier::NOTE_TIMEOUT;
    use crate::probes::models::{AgentCode, ProbeRequest, ProbeResult};
    use crate::queue::{InMemoryProbeQueue, QueueError};
    use crate::crawlers::CrawlerDefinition;
    use crate::health::models::{HealthAggregate, HealthLogEntry};
    use crate::store::{DbError, InMemoryStore, RecordId};
    use crate::test_utils::{crawler, probe_result};
    use chrono::DateTime;
    use rstest::rstest;
    use crate::types::{CorrelationKey, CrawlerId};
    use std::time::Duration;
    use tokio::sync::Notify;

    fn monitor_over<S, Q>(store: Arc<S>, queue: Arc<Q>) -> Monitor<S, Q>
    where
        S: HealthStore + 'static,
        Q: ProbeQueue + 'static,
    {
        let aggregator = HealthAggregator::new(store.clone(), Duration::from_secs(48 * 3600), 0.89);
        Monitor::new(store, queue, aggregator, MonitorSettings::default())
    }

    fn monitor<Q: ProbeQueue + 'static>(store: InMemoryStore, queue: Arc<Q>) -> Monitor<InMemoryStore, Q> {
        monitor_over(Arc::new(store), queue)
    }

    #[test_log::test(tokio::test)]
    async fn test_two_crawler_cycle_logs_ok_and_timeout() {
        let store = InMemoryStore::with_crawlers(vec![crawler(1, "A"), crawler(2, "B")]);
        let queue = Arc::new(InMemoryProbeQueue::new());
        queue.respond_with("A", AgentCode::Success, None);
        queue.respond_with("B", AgentCode::Timeout, None);
        let monitor = monitor(store.clone(), queue.clone());

        let report = monitor.run_cycle().await.unwrap();

        assert_eq!(report.status, CycleStatus::Completed);
        assert_eq!(report.submitted, 2);
        assert_eq!(report.written, 2);
        assert_eq!(queue.submitted()[0].0, Priority::Highest);

        let log = store.health_log();
        assert_eq!(log.len(), 2);
        let a = log.iter().find(|e| e.crawler_id == CrawlerId(1)).unwrap();
        let b = log.iter().find(|e| e.crawler_id == CrawlerId(2)).unwrap();
        assert_eq!(a.result_status, ResultStatus::Ok);
        assert_eq!(a.tracking_no, "HB-A");
        assert_eq!(b.result_status, ResultStatus::Error);
        assert_eq!(b.result_note.as_deref(), Some(NOTE_TIMEOUT));
        assert!(a.timing_millis >= 0 && b.timing_millis >= 0);

        // One error out of one probe is below threshold
        let aggregation = report.aggregation.unwrap().await.unwrap().unwrap();
        assert_eq!(aggregation.changed, vec![(CrawlerId(2), false)]);
        assert!(!store.crawler(CrawlerId(2)).unwrap().healthy);
        assert!(store.crawler(CrawlerId(1)).unwrap().healthy);
    }

    #[tokio::test]
    async fn test_unmatched_result_writes_nothing() {
        let store = InMemoryStore::with_crawlers(vec![crawler(1, "A")]);
        let queue = Arc::new(InMemoryProbeQueue::new());
        queue.inject_result(probe_result("GHOST", AgentCode::Success, Utc::now()));
        let monitor = monitor(store.clone(), queue);

        let report = monitor.run_cycle().await.unwrap();

        assert_eq!(report.unmatched, 1);
        assert_eq!(report.written, 0);
        assert!(store.health_log().is_empty());
    }

    #[tokio::test]
    async fn test_submission_failure_skips_cycle_without_logging() {
        let store = InMemoryStore::with_crawlers(vec![crawler(1, "A")]);
        let queue = Arc::new(InMemoryProbeQueue::new());
        queue.respond_with("A", AgentCode::Success, None);
        queue.fail_submit("queue full");
        let monitor = monitor(store.clone(), queue);

        let report = monitor.run_cycle().await.unwrap();

        assert_eq!(report.status, CycleStatus::SubmissionFailed);
        assert!(report.aggregation.is_none());
        assert!(store.health_log().is_empty());
    }

    #[tokio::test]
    async fn test_retrieval_failure_is_propagated() {
        let store = InMemoryStore::with_crawlers(vec![crawler(1, "A")]);
        let queue = Arc::new(InMemoryProbeQueue::new());
        queue.fail_retrieve("cache unreachable");
        let monitor = monitor(store.clone(), queue);

        let err = monitor.run_cycle().await.unwrap_err();

        assert!(matches!(err, Error::Retrieval(QueueError::Unavailable(_))));
        assert!(store.health_log().is_empty());
    }

    #[tokio::test]
    async fn test_store_write_failure_is_propagated() {
        let store = InMemoryStore::with_crawlers(vec![crawler(1, "A")]);
        store.fail_inserts("disk full");
        let queue = Arc::new(InMemoryProbeQueue::new());
        queue.respond_with("A", AgentCode::Success, None);
        let monitor = monitor(store, queue);

        let err = monitor.run_cycle().await.unwrap_err();
        assert!(matches!(err, Error::Database(_)));
    }

    #[tokio::test]
    async fn test_empty_registry_submits_nothing() {
        let queue = Arc::new(InMemoryProbeQueue::new());
        let monitor = monitor(InMemoryStore::new(), queue.clone());

        let report = monitor.run_cycle().await.unwrap();

        assert_eq!(report.status, CycleStatus::NoCrawlers);
        assert!(queue.submitted().is_empty());
    }

    #[tokio::test]
    async fn test_failed_cycle_releases_in_flight_marker() {
        let store = InMemoryStore::with_crawlers(vec![crawler(1, "A")]);
        let queue = Arc::new(InMemoryProbeQueue::new());
        queue.fail_retrieve("cache unreachable");
        let monitor = monitor(store, queue);

        assert!(monitor.run_cycle().await.is_err());
        assert!(monitor.run_cycle().await.is_err());
    }

    /// Holds retrieval open until released.
    struct GatedQueue {
        inner: InMemoryProbeQueue,
        entered: Notify,
        release: Notify,
    }

    impl GatedQueue {
        fn new() -> Self {
            Self {
                inner: InMemoryProbeQueue::new(),
                entered: Notify::new(),
                release: Notify::new(),
            }
        }
    }

    #[async_trait::async_trait]
    impl ProbeQueue for GatedQueue {
        async fn submit(&self, priority: Priority, batch: &[ProbeRequest]) -> std::result::Result<Vec<CorrelationKey>, QueueError> {
            self.inner.submit(priority, batch).await
        }

        async fn retrieve(&self, priority: Priority, keys: &[CorrelationKey]) -> std::result::Result<Vec<ProbeResult>, QueueError> {
            self.entered.notify_one();
            self.release.notified().await;
            self.inner.retrieve(priority, keys).await
        }
    }

    #[tokio::test]
    async fn test_overlapping_cycle_is_skipped() {
        let store = InMemoryStore::with_crawlers(vec![crawler(1, "A")]);
        let queue = Arc::new(GatedQueue::new());
        queue.inner.respond_with("A", AgentCode::Success, None);
        let monitor = Arc::new(monitor(store.clone(), queue.clone()));

        let first = tokio::spawn({
            let monitor = monitor.clone();
            async move { monitor.run_cycle().await }
        });
        queue.entered.notified().await;

        let second = monitor.run_cycle().await.unwrap();
        assert_eq!(second.status, CycleStatus::Skipped);

        queue.release.notify_one();
        let first = first.await.unwrap().unwrap();
        assert_eq!(first.status, CycleStatus::Completed);
        assert_eq!(store.health_log().len(), 1);
        assert_eq!(queue.inner.submitted().len(), 1);
    }

    #[tokio::test]
    async fn test_drain_waits_for_aggregation() {
        let store = InMemoryStore::with_crawlers(vec![crawler(1, "A")]);
        let queue = Arc::new(InMemoryProbeQueue::new());
        queue.respond_with("A", AgentCode::ParseFailed, Some("no table"));
        let monitor = monitor(store.clone(), queue);

        let report = monitor.run_cycle().await.unwrap();
        assert!(report.aggregation.is_some());
        monitor.drain().await;

        assert_eq!(store.flag_writes(), vec![(CrawlerId(1), false)]);
    }

    #[tokio::test]
    async fn test_registry_change_mid_cycle_leaves_snapshot_alone() {
        let store = InMemoryStore::with_crawlers(vec![crawler(1, "A"), crawler(2, "B")]);
        let queue = Arc::new(GatedQueue::new());
        queue.inner.respond_with("A", AgentCode::ParseFailed, Some("no table"));
        queue.inner.respond_with("B", AgentCode::Success, None);
        let monitor = Arc::new(monitor(store.clone(), queue.clone()));

        let cycle = tokio::spawn({
            let monitor = monitor.clone();
            async move { monitor.run_cycle().await }
        });
        queue.entered.notified().await;

        // A is disabled and moved to another carrier while its result is outstanding
        let mut moved = crawler(1, "Z");
        moved.active = false;
        store.upsert_crawler(moved);
        queue.release.notify_one();

        let report = cycle.await.unwrap().unwrap();
        assert_eq!(report.written, 2);
        assert_eq!(report.unmatched, 0);

        let log = store.health_log();
        let a = log.iter().find(|e| e.crawler_id == CrawlerId(1)).unwrap();
        assert_eq!(a.tracking_no, "HB-A");
        assert_eq!(a.result_status, ResultStatus::Error);

        let aggregation = report.aggregation.unwrap().await.unwrap().unwrap();
        assert_eq!(aggregation.evaluated, 2);
        assert_eq!(aggregation.skipped_unknown, 0);
        assert_eq!(aggregation.changed, vec![(CrawlerId(1), false)]);
    }

    /// Delegates to an in-memory store except for aggregation, which errors or panics.
    struct BrokenAggregation {
        inner: InMemoryStore,
        panics: bool,
    }

    #[async_trait::async_trait]
    impl HealthStore for BrokenAggregation {
        async fn list_active_crawlers(&self, as_of: DateTime<Utc>) -> crate::store::Result<Vec<CrawlerDefinition>> {
            self.inner.list_active_crawlers(as_of).await
        }

        async fn insert_health_log(&self, entry: &HealthLogEntry) -> crate::store::Result<RecordId> {
            self.inner.insert_health_log(entry).await
        }

        async fn aggregate_health_counts(&self, _since: DateTime<Utc>) -> crate::store::Result<Vec<HealthAggregate>> {
            if self.panics {
                panic!("aggregate query exploded");
            }
            Err(DbError::Other(anyhow::anyhow!("window query failed")))
        }

        async fn set_crawler_health_flag(&self, crawler_id: CrawlerId, healthy: bool) -> crate::store::Result<u64> {
            self.inner.set_crawler_health_flag(crawler_id, healthy).await
        }
    }

    #[rstest]
    #[case::error(false)]
    #[case::panic(true)]
    #[tokio::test]
    async fn test_aggregation_failure_is_contained(#[case] panics: bool) {
        let inner = InMemoryStore::with_crawlers(vec![crawler(1, "A")]);
        let queue = Arc::new(InMemoryProbeQueue::new());
        queue.respond_with("A", AgentCode::ParseFailed, Some("no table"));
        let store = Arc::new(BrokenAggregation {
            inner: inner.clone(),
            panics,
        });
        let monitor = monitor_over(store, queue);

        let first = monitor.run_cycle().await.unwrap();
        assert_eq!(first.aggregation.unwrap().await.unwrap(), None);

        let second = monitor.run_cycle().await.unwrap();
        assert_eq!(second.status, CycleStatus::Completed);
        assert_eq!(inner.health_log().len(), 2);

        monitor.drain().await;
        assert!(inner.flag_writes().is_empty());
    }
}
