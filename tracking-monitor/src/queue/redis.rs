//! Redis-backed job queue and result cache.
//!
//! Key layout, all under the configured prefix:
//!
//! - `{prefix}:search:{seq}` holds the JSON request, expiring after `request_ttl`
//! - `{prefix}:queue:{priority}` is the list agents pop sequence numbers from
//! - `{prefix}:result:{priority}:{seq}` is where an agent writes its JSON answer

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tokio::time::Instant;

use super::{ProbeQueue, QueueError};
use crate::config::{ProbeConfig, RedisConfig};
use crate::probes::models::{ProbeRequest, ProbeResult};
use crate::types::{CorrelationKey, Priority};

#[derive(Debug, Clone)]
pub struct RedisQueueSettings {
    pub key_prefix: String,
    pub request_ttl: Duration,
    pub result_wait: Duration,
    pub poll_interval: Duration,
    pub io_timeout: Duration,
}

impl RedisQueueSettings {
    pub fn from_config(redis: &RedisConfig, probe: &ProbeConfig) -> Self {
        Self {
            key_prefix: redis.key_prefix.clone(),
            request_ttl: probe.request_ttl,
            result_wait: probe.result_wait,
            poll_interval: probe.poll_interval,
            io_timeout: probe.io_timeout,
        }
    }
}

#[derive(Clone)]
pub struct RedisProbeQueue {
    conn: ConnectionManager,
    settings: RedisQueueSettings,
}

impl RedisProbeQueue {
    pub async fn connect(redis: &RedisConfig, probe: &ProbeConfig) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis.connection_url())?;
        let settings = RedisQueueSettings::from_config(redis, probe);
        let conn = with_timeout("connect", settings.io_timeout, ConnectionManager::new(client)).await?;
        Ok(Self { conn, settings })
    }

    fn search_key(&self, key: &CorrelationKey) -> String {
        format!("{}:search:{}", self.settings.key_prefix, key)
    }

    fn queue_key(&self, priority: Priority) -> String {
        format!("{}:queue:{}", self.settings.key_prefix, priority.as_str())
    }

    fn result_key(&self, priority: Priority, key: &CorrelationKey) -> String {
        format!("{}:result:{}:{}", self.settings.key_prefix, priority.as_str(), key)
    }

    /// One `MGET` over the result keys; payloads come back aligned with `keys`.
    async fn fetch_payloads(&self, priority: Priority, keys: Vec<CorrelationKey>) -> Result<Vec<Option<String>>, QueueError> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("MGET");
        for key in &keys {
            cmd.arg(self.result_key(priority, key));
        }
        with_timeout("result fetch", self.settings.io_timeout, cmd.query_async(&mut conn)).await
    }
}

/// Poll `fetch` for the outstanding keys until all have answered or `result_wait` runs
/// out. Keys that answered are not asked for again.
async fn poll_results<F, Fut>(
    keys: &[CorrelationKey],
    result_wait: Duration,
    poll_interval: Duration,
    mut fetch: F,
) -> Result<Vec<ProbeResult>, QueueError>
where
    F: FnMut(Vec<CorrelationKey>) -> Fut,
    Fut: Future<Output = Result<Vec<Option<String>>, QueueError>>,
{
    let deadline = Instant::now() + result_wait;
    let mut outstanding: Vec<CorrelationKey> = keys.to_vec();
    let mut results = Vec::with_capacity(keys.len());

    while !outstanding.is_empty() {
        let payloads = fetch(outstanding.clone()).await?;
        let mut answered = HashSet::new();
        for (key, payload) in outstanding.iter().zip(payloads) {
            if let Some(payload) = payload {
                results.push(serde_json::from_str::<ProbeResult>(&payload)?);
                answered.insert(key.clone());
            }
        }
        outstanding.retain(|key| !answered.contains(key));

        if outstanding.is_empty() || Instant::now() + poll_interval > deadline {
            break;
        }
        tokio::time::sleep(poll_interval).await;
    }

    tracing::debug!(received = results.len(), outstanding = outstanding.len(), "Result polling finished");
    Ok(results)
}

async fn with_timeout<T, F>(operation: &'static str, after: Duration, fut: F) -> Result<T, QueueError>
where
    F: Future<Output = redis::RedisResult<T>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(QueueError::Timeout { operation, after }),
    }
}

#[async_trait]
impl ProbeQueue for RedisProbeQueue {
    #[tracing::instrument(skip(self, batch), fields(batch_size = batch.len(), %priority))]
    async fn submit(&self, priority: Priority, batch: &[ProbeRequest]) -> Result<Vec<CorrelationKey>, QueueError> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let queue_key = self.queue_key(priority);
        let ttl = self.settings.request_ttl.as_secs().max(1);
        let mut keys = Vec::with_capacity(batch.len());
        let mut pipe = redis::pipe();
        pipe.atomic();

        for request in batch {
            let key = CorrelationKey::from(request.seq_no);
            let payload = serde_json::to_string(request)?;
            pipe.set_ex(self.search_key(&key), payload, ttl).ignore();
            pipe.rpush(&queue_key, key.as_str()).ignore();
            keys.push(key);
        }

        let mut conn = self.conn.clone();
        let _: () = with_timeout("batch submit", self.settings.io_timeout, pipe.query_async(&mut conn)).await?;

        tracing::debug!(queue = %queue_key, "Probe batch pushed");
        Ok(keys)
    }

    #[tracing::instrument(skip(self, keys), fields(key_count = keys.len(), %priority))]
    async fn retrieve(&self, priority: Priority, keys: &[CorrelationKey]) -> Result<Vec<ProbeResult>, QueueError> {
        poll_results(keys, self.settings.result_wait, self.settings.poll_interval, |outstanding| {
            self.fetch_payloads(priority, outstanding)
        })
        .await
    }
}
