//! Builds the cycle's probe batch and submits it to the job queue.

use crate::crawlers::CrawlerSnapshot;
use crate::probes::models::ProbeRequest;
use crate::queue::{ProbeQueue, QueueError};
use crate::types::{CorrelationKey, Language, Priority, SequenceNumber};
use chrono::{DateTime, Utc};

/// One request per crawler in the snapshot, all stamped with the same `req_time`.
pub fn build_probe_batch(snapshot: &CrawlerSnapshot, req_time: DateTime<Utc>, language: Language) -> Vec<ProbeRequest> {
    snapshot
        .crawlers()
        .iter()
        .map(|crawler| ProbeRequest {
            seq_no: SequenceNumber::generate(),
            req_time,
            carrier_code: crawler.carrier_code.clone(),
            language,
            tracking_no: crawler.heartbeat_tracking_number.clone(),
        })
        .collect()
}

/// Submit the whole batch in one call. The queue either accepts every request or none,
/// and an answer without exactly one key per request counts as a rejection.
#[tracing::instrument(skip(queue, batch), fields(batch_size = batch.len(), %priority))]
pub async fn dispatch<Q>(queue: &Q, priority: Priority, batch: &[ProbeRequest]) -> Result<Vec<CorrelationKey>, QueueError>
where
    Q: ProbeQueue + ?Sized,
{
    let keys = queue.submit(priority, batch).await?;
    if keys.len() != batch.len() {
        return Err(QueueError::KeyCountMismatch {
            submitted: batch.len(),
            returned: keys.len(),
        });
    }
    tracing::debug!(keys = keys.len(), "Probe batch accepted by queue");
    Ok(keys)
}
