//! Pulls the batch's results from the cache and attributes each one to its crawler.

use crate::crawlers::{CrawlerDefinition, CrawlerSnapshot};
use crate::metrics;
use crate::probes::models::ProbeResult;
use crate::queue::{ProbeQueue, QueueError};
use crate::types::{CorrelationKey, Priority};
use chrono::{DateTime, Utc};

/// A result attributed to a crawler from the cycle snapshot.
#[derive(Debug, Clone)]
pub struct MatchedResult<'a> {
    pub crawler: &'a CrawlerDefinition,
    pub result: ProbeResult,
    /// Agent end time, or the evaluation time if the agent never reported one
    pub completed_at: DateTime<Utc>,
    pub timing_millis: i64,
}

#[derive(Debug, Default)]
pub struct Correlation<'a> {
    pub matched: Vec<MatchedResult<'a>>,
    /// Results whose carrier code is not in the snapshot
    pub unmatched: Vec<ProbeResult>,
}

/// Fetch every available result for `keys` in one call.
#[tracing::instrument(skip(queue, keys), fields(key_count = keys.len(), %priority))]
pub async fn retrieve<Q>(queue: &Q, priority: Priority, keys: &[CorrelationKey]) -> Result<Vec<ProbeResult>, QueueError>
where
    Q: ProbeQueue + ?Sized,
{
    let results = queue.retrieve(priority, keys).await?;
    if results.len() < keys.len() {
        tracing::warn!(
            expected = keys.len(),
            received = results.len(),
            "Result cache returned fewer results than submitted probes"
        );
    }
    Ok(results)
}

/// Zero or pre-epoch timestamps count as "not reported".
pub fn effective_completion(agent_end_time: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
    agent_end_time.filter(|t| t.timestamp() > 0).unwrap_or(now)
}

/// Milliseconds between request and completion, never negative.
pub fn timing_millis(req_time: DateTime<Utc>, completed_at: DateTime<Utc>) -> i64 {
    (completed_at - req_time).num_milliseconds().max(0)
}

/// Match results against the snapshot by carrier code.
pub fn correlate(snapshot: &CrawlerSnapshot, results: Vec<ProbeResult>, now: DateTime<Utc>) -> Correlation<'_> {
    let mut correlation = Correlation::default();

    for result in results {
        match snapshot.find_by_carrier_code(&result.carrier_code) {
            Some(crawler) => {
                let completed_at = effective_completion(result.agent_end_time, now);
                let timing_millis = timing_millis(result.req_time, completed_at);
                correlation.matched.push(MatchedResult {
                    crawler,
                    result,
                    completed_at,
                    timing_millis,
                });
            }
            None => {
                tracing::warn!(
                    carrier_code = %result.carrier_code,
                    tracking_no = %result.tracking_no,
                    "Probe result does not belong to any known crawler, dropping"
                );
                metrics::record_unmatched_result();
                correlation.unmatched.push(result);
            }
        }
    }

    correlation
}
