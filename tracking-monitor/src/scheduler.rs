//! Periodic cycle driver.
//!
//! Each tick spawns the cycle as its own task. Finished tasks are reaped as soon as they
//! end, so a cycle that errors or panics is logged right away and never stops the timer.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::ScheduleConfig;
use crate::cycle::{CycleReport, Monitor};
use crate::errors::Result;
use crate::metrics;
use crate::queue::ProbeQueue;
use crate::store::HealthStore;

pub struct CycleScheduler<S: HealthStore + ?Sized, Q: ProbeQueue + ?Sized> {
    monitor: Arc<Monitor<S, Q>>,
    warmup: Duration,
    interval: Duration,
}

impl<S, Q> CycleScheduler<S, Q>
where
    S: HealthStore + ?Sized + 'static,
    Q: ProbeQueue + ?Sized + 'static,
{
    pub fn new(monitor: Arc<Monitor<S, Q>>, schedule: &ScheduleConfig) -> Self {
        Self {
            monitor,
            warmup: schedule.warmup,
            interval: schedule.interval,
        }
    }

    /// Fire cycles until `shutdown` is cancelled, then wait for the ones still running.
    #[tracing::instrument(skip_all, fields(warmup = ?self.warmup, interval = ?self.interval))]
    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!("Cycle scheduler started");

        let mut ticker = tokio::time::interval_at(Instant::now() + self.warmup, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut cycles: JoinSet<Result<CycleReport>> = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(result) = cycles.join_next(), if !cycles.is_empty() => log_cycle_outcome(result),
                _ = ticker.tick() => {
                    let monitor = self.monitor.clone();
                    cycles.spawn(async move { monitor.run_cycle().await });
                }
            }
        }

        if !cycles.is_empty() {
            tracing::info!(in_flight = cycles.len(), "Waiting for in-flight cycles before stopping");
        }
        while let Some(result) = cycles.join_next().await {
            log_cycle_outcome(result);
        }

        tracing::info!("Cycle scheduler stopped");
    }
}

fn log_cycle_outcome(result: std::result::Result<Result<CycleReport>, tokio::task::JoinError>) {
    match result {
        Ok(Ok(report)) => {
            tracing::trace!(status = report.status.as_str(), "Cycle task completed");
        }
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Monitoring cycle failed");
        }
        Err(join_error) => {
            metrics::record_cycle("panicked");
            tracing::error!(error = %join_error, "Monitoring cycle panicked");
        }
    }
}
