//! Prometheus metrics for the monitor.
//!
//! Everything is recorded through the `metrics` facade. Until [`install_exporter`] runs
//! the calls are no-ops, so tests and `--once` runs pay nothing for them.

use crate::health::models::ResultStatus;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

pub const CYCLES_TOTAL: &str = "tracking_monitor_cycles_total";
pub const PROBE_RESULTS_TOTAL: &str = "tracking_monitor_probe_results_total";
pub const UNMATCHED_RESULTS_TOTAL: &str = "tracking_monitor_unmatched_results_total";
pub const HEALTH_FLAG_CHANGES_TOTAL: &str = "tracking_monitor_health_flag_changes_total";
pub const PROBE_TIMING_MS: &str = "tracking_monitor_probe_timing_ms";
pub const ACTIVE_CRAWLERS: &str = "tracking_monitor_active_crawlers";

/// Serve `/metrics` on `listen` and make the global recorder live.
pub fn install_exporter(listen: SocketAddr) -> anyhow::Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(listen)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter on {listen}: {e}"))?;

    metrics::describe_counter!(CYCLES_TOTAL, "Monitoring cycles by outcome");
    metrics::describe_counter!(PROBE_RESULTS_TOTAL, "Probe results written to the health log by status");
    metrics::describe_counter!(UNMATCHED_RESULTS_TOTAL, "Probe results that matched no crawler in the cycle snapshot");
    metrics::describe_counter!(HEALTH_FLAG_CHANGES_TOTAL, "Stored crawler health flags that were flipped");
    metrics::describe_histogram!(PROBE_TIMING_MS, "Time from probe request to agent completion (milliseconds)");
    metrics::describe_gauge!(ACTIVE_CRAWLERS, "Crawlers in the most recent cycle snapshot");

    tracing::info!(%listen, "Prometheus exporter listening");
    Ok(())
}

pub fn record_cycle(outcome: &'static str) {
    counter!(CYCLES_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_probe_result(status: ResultStatus, timing_millis: i64) {
    let label = match status {
        ResultStatus::Ok => "ok",
        ResultStatus::Error => "error",
    };
    counter!(PROBE_RESULTS_TOTAL, "status" => label).increment(1);
    histogram!(PROBE_TIMING_MS).record(timing_millis as f64);
}

pub fn record_unmatched_result() {
    counter!(UNMATCHED_RESULTS_TOTAL).increment(1);
}

pub fn record_health_flag_change(healthy: bool) {
    counter!(HEALTH_FLAG_CHANGES_TOTAL, "healthy" => if healthy { "true" } else { "false" }).increment(1);
}

pub fn set_active_crawlers(count: usize) {
    gauge!(ACTIVE_CRAWLERS).set(count as f64);
}
