//! Job queue and result cache shared with the crawler agents.
//!
//! The monitor never talks to a crawler directly. It pushes a batch of probe requests
//! onto the queue, the agents pick them up, and their answers appear in the result cache
//! under the correlation key handed back at submission.

use crate::probes::models::{ProbeRequest, ProbeResult};
use crate::types::{CorrelationKey, Priority};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub mod in_memory;
pub mod redis;

pub use in_memory::InMemoryProbeQueue;
pub use self::redis::RedisProbeQueue;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("Malformed queue payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{operation} timed out after {}", humantime::format_duration(*after))]
    Timeout { operation: &'static str, after: Duration },

    #[error("Queue unavailable: {0}")]
    Unavailable(String),

    #[error("Queue returned {returned} keys for {submitted} requests")]
    KeyCountMismatch { submitted: usize, returned: usize },
}

#[async_trait]
pub trait ProbeQueue: Send + Sync {
    /// Enqueue the batch. Either every request is accepted, in which case one key per
    /// request is returned in batch order, or none is.
    async fn submit(&self, priority: Priority, batch: &[ProbeRequest]) -> Result<Vec<CorrelationKey>, QueueError>;

    /// Whatever results are available for `keys`. May return fewer results than keys.
    async fn retrieve(&self, priority: Priority, keys: &[CorrelationKey]) -> Result<Vec<ProbeResult>, QueueError>;
}
