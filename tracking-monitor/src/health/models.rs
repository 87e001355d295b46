//! Health records and per-crawler aggregates.

use crate::types::CrawlerId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Binary outcome of one probe.
///
/// The persisted encoding is fixed by [`ResultStatus::as_db_code`] and
/// [`ResultStatus::from_db_code`]; nothing else in the crate should look at the integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Ok,
    Error,
}

impl ResultStatus {
    /// `crawler_health_log.result_status`: 0 = ok, 1 = error.
    pub const fn as_db_code(self) -> i16 {
        match self {
            ResultStatus::Ok => 0,
            ResultStatus::Error => 1,
        }
    }

    pub const fn from_db_code(code: i16) -> Option<Self> {
        match code {
            0 => Some(ResultStatus::Ok),
            1 => Some(ResultStatus::Error),
            _ => None,
        }
    }

    pub fn is_ok(self) -> bool {
        self == ResultStatus::Ok
    }
}

/// One classified probe, ready to be appended to the health log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthLogEntry {
    pub crawler_id: CrawlerId,
    pub tracking_no: String,
    pub timing_millis: i64,
    pub result_status: ResultStatus,
    pub occurred_at: DateTime<Utc>,
    pub raw_response_body: Option<String>,
    pub result_note: Option<String>,
}

/// Ok/error counts for one crawler over the trailing window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthAggregate {
    pub crawler_id: CrawlerId,
    pub count_ok: i64,
    pub count_error: i64,
}

impl HealthAggregate {
    pub fn total(&self) -> i64 {
        self.count_ok + self.count_error
    }

    /// Share of ok probes, or `None` when the window holds no probes at all.
    pub fn ok_ratio(&self) -> Option<f64> {
        let total = self.total();
        if total <= 0 {
            return None;
        }
        Some(self.count_ok as f64 / total as f64)
    }

    /// Health verdict against `threshold`; `None` means there is not enough data to judge.
    pub fn is_healthy(&self, threshold: f64) -> Option<bool> {
        self.ok_ratio().map(|ratio| ratio >= threshold)
    }
}
