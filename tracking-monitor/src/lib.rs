//! # tracking-monitor: heartbeat monitor for tracking-query crawlers
//!
//! The monitor periodically sends every registered crawler a known-good tracking number
//! through the shared job queue, reads the answers back from the result cache, and writes
//! one health log row per answer. After each cycle it recomputes a rolling ok ratio per
//! crawler over the trailing window and flips the crawler's stored health flag when the
//! ratio crosses the threshold.
//!
//! ## Cycle
//!
//! 1. Take a [`crawlers::CrawlerSnapshot`] of the enabled crawlers
//! 2. Build one [`probes::ProbeRequest`] per crawler and submit the batch at highest priority
//! 3. Retrieve the results and match them to the snapshot by carrier code
//! 4. Classify each result and append it to the health log
//! 5. Hand aggregation to a background task; the cycle is done
//!
//! A rejected submission skips the cycle. A broken result cache or health store fails the
//! cycle loudly. Either way the scheduler keeps running.
//!
//! ## Collaborators
//!
//! - PostgreSQL owns the crawler registry, the health log and the health flags
//!   ([`store::PostgresStore`])
//! - Redis carries the job queue and the result cache ([`queue::RedisProbeQueue`])

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

pub mod config;
pub mod crawlers;
pub mod cycle;
pub mod errors;
pub mod health;
pub mod metrics;
pub mod probes;
pub mod queue;
pub mod scheduler;
pub mod store;
pub mod telemetry;
pub mod types;

#[cfg(test)]
mod test_utils;

pub use config::Config;
pub use cycle::{CycleReport, CycleStatus, Monitor, MonitorSettings};
pub use errors::Error;
pub use scheduler::CycleScheduler;

use health::HealthAggregator;
use queue::RedisProbeQueue;
use store::PostgresStore;

type ProductionMonitor = Monitor<PostgresStore, RedisProbeQueue>;

/// Background tasks started by [`Application::serve`].
///
/// Dropping this cancels the shutdown token, which stops the scheduler.
pub struct BackgroundServices {
    background_tasks: Vec<tokio::task::JoinHandle<()>>,
    shutdown_token: CancellationToken,
    _drop_guard: tokio_util::sync::DropGuard,
}

impl BackgroundServices {
    fn start(monitor: Arc<ProductionMonitor>, config: &Config) -> Self {
        let shutdown_token = CancellationToken::new();
        let drop_guard = shutdown_token.clone().drop_guard();

        let scheduler = CycleScheduler::new(monitor, &config.schedule);
        let handle = tokio::spawn(scheduler.run(shutdown_token.clone()));

        Self {
            background_tasks: vec![handle],
            shutdown_token,
            _drop_guard: drop_guard,
        }
    }

    /// Stop the scheduler and wait for it and its in-flight cycles.
    pub async fn shutdown(self) {
        self.shutdown_token.cancel();
        for handle in self.background_tasks {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Background task panicked during shutdown");
            }
        }
    }
}

/// Owns the store, the queue and the monitor built on them.
///
/// 1. [`Application::new`] connects both collaborators and runs migrations
/// 2. [`Application::serve`] runs cycles on the schedule until `shutdown` resolves,
///    or [`Application::run_once`] runs a single cycle
pub struct Application {
    config: Config,
    store: Arc<PostgresStore>,
    monitor: Arc<ProductionMonitor>,
}

impl Application {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        if let Some(listen) = config.metrics.listen {
            metrics::install_exporter(listen)?;
        }

        let store = Arc::new(PostgresStore::connect(&config.database, config.crawlers.excluded_agent_types.clone()).await?);
        info!("Connected to health store");

        let queue = Arc::new(RedisProbeQueue::connect(&config.redis, &config.probe).await?);
        info!(key_prefix = %config.redis.key_prefix, "Connected to job queue");

        let aggregator = HealthAggregator::new(store.clone(), config.health.window, config.health.threshold);
        let settings = MonitorSettings {
            priority: config.probe.priority,
            language: config.probe.language,
        };
        let monitor = Arc::new(Monitor::new(store.clone(), queue, aggregator, settings));

        Ok(Self { config, store, monitor })
    }

    /// Run cycles until `shutdown` resolves, then wind everything down.
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        info!(
            warmup = %humantime::format_duration(self.config.schedule.warmup),
            interval = %humantime::format_duration(self.config.schedule.interval),
            "Tracking monitor running"
        );

        let bg_services = BackgroundServices::start(self.monitor.clone(), &self.config);
        shutdown.await;
        bg_services.shutdown().await;

        self.close().await;
        Ok(())
    }

    /// Run a single cycle and wait for its aggregation. Connections are closed and
    /// telemetry flushed whether or not the cycle succeeds.
    pub async fn run_once(self) -> anyhow::Result<CycleReport> {
        let outcome = run_single_cycle(&self.monitor).await;
        self.close().await;
        Ok(outcome?)
    }

    async fn close(self) {
        info!("Waiting for outstanding health aggregations...");
        self.monitor.drain().await;

        info!("Closing database connections...");
        self.store.pool().close().await;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();
    }
}

async fn run_single_cycle<S, Q>(monitor: &Monitor<S, Q>) -> Result<CycleReport, Error>
where
    S: store::HealthStore + ?Sized + 'static,
    Q: queue::ProbeQueue + ?Sized + 'static,
{
    let mut report = monitor.run_cycle().await?;
    if let Some(aggregation) = report.aggregation.take()
        && let Ok(Some(summary)) = aggregation.await
    {
        info!(
            evaluated = summary.evaluated,
            changed = summary.changed.len(),
            "Aggregation finished"
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probes::models::AgentCode;
    use crate::queue::InMemoryProbeQueue;
    use crate::store::InMemoryStore;
    use crate::test_utils::crawler;
    use crate::types::CrawlerId;
    use std::time::Duration;

    fn monitor(store: &InMemoryStore, queue: InMemoryProbeQueue) -> Monitor<InMemoryStore, InMemoryProbeQueue> {
        let store = Arc::new(store.clone());
        let aggregator = HealthAggregator::new(store.clone(), Duration::from_secs(3600), 0.89);
        Monitor::new(store, Arc::new(queue), aggregator, MonitorSettings::default())
    }

    #[tokio::test]
    async fn test_single_cycle_waits_for_aggregation() {
        let store = InMemoryStore::with_crawlers(vec![crawler(1, "A")]);
        let queue = InMemoryProbeQueue::new();
        queue.respond_with("A", AgentCode::Timeout, None);

        let report = run_single_cycle(&monitor(&store, queue)).await.unwrap();

        assert_eq!(report.status, CycleStatus::Completed);
        assert!(report.aggregation.is_none());
        assert_eq!(store.flag_writes(), vec![(CrawlerId(1), false)]);
    }

    #[tokio::test]
    async fn test_single_cycle_failure_is_returned() {
        let store = InMemoryStore::with_crawlers(vec![crawler(1, "A")]);
        let queue = InMemoryProbeQueue::new();
        queue.fail_retrieve("cache unreachable");

        let outcome = run_single_cycle(&monitor(&store, queue)).await;

        assert!(matches!(outcome, Err(Error::Retrieval(_))));
        assert!(store.health_log().is_empty());
    }
}
