//! Wire models exchanged with the job queue and result cache.

use crate::types::{Language, SequenceNumber};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One heartbeat query for one crawler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeRequest {
    pub seq_no: SequenceNumber,
    /// Cycle start, shared by every request in the batch
    pub req_time: DateTime<Utc>,
    pub carrier_code: String,
    pub language: Language,
    pub tracking_no: String,
}

/// Status reported by a crawler agent.
///
/// The agent encodes outcomes as integers where positive values mean it produced an
/// answer. Codes outside the known set deserialize to [`AgentCode::Other`] rather than
/// failing, so an agent upgrade never breaks result retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum AgentCode {
    /// Tracking events fetched and parsed
    Success,
    /// Answer served from the agent's own short-term cache
    SuccessCached,
    /// Target site answered but has no record of the number
    NoTrackingFound,
    /// Target site page could not be parsed
    ParseFailed,
    /// Target site did not answer in time
    Timeout,
    Other(i32),
}

impl AgentCode {
    pub const SUCCESS: i32 = 1;
    pub const SUCCESS_CACHED: i32 = 2;
    pub const NO_TRACKING_FOUND: i32 = 3;
    pub const PARSE_FAILED: i32 = -1;
    pub const TIMEOUT: i32 = -2;
}

impl From<i32> for AgentCode {
    fn from(code: i32) -> Self {
        match code {
            Self::SUCCESS => AgentCode::Success,
            Self::SUCCESS_CACHED => AgentCode::SuccessCached,
            Self::NO_TRACKING_FOUND => AgentCode::NoTrackingFound,
            Self::PARSE_FAILED => AgentCode::ParseFailed,
            Self::TIMEOUT => AgentCode::Timeout,
            other => AgentCode::Other(other),
        }
    }
}

impl From<AgentCode> for i32 {
    fn from(code: AgentCode) -> Self {
        match code {
            AgentCode::Success => AgentCode::SUCCESS,
            AgentCode::SuccessCached => AgentCode::SUCCESS_CACHED,
            AgentCode::NoTrackingFound => AgentCode::NO_TRACKING_FOUND,
            AgentCode::ParseFailed => AgentCode::PARSE_FAILED,
            AgentCode::Timeout => AgentCode::TIMEOUT,
            AgentCode::Other(code) => code,
        }
    }
}

/// The agent's answer to a [`ProbeRequest`], as pulled from the result cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    #[serde(default)]
    pub seq_no: Option<SequenceNumber>,
    pub carrier_code: String,
    /// Tracking number echoed back by the agent
    pub tracking_no: String,
    pub req_time: DateTime<Utc>,
    /// When the agent finished; unset while the agent is still resolving
    #[serde(default)]
    pub agent_end_time: Option<DateTime<Utc>>,
    pub agent_code: AgentCode,
    #[serde(default)]
    pub error_text: Option<String>,
    /// Opaque agent payload, stored for diagnosis
    #[serde(default)]
    pub raw_response_body: Option<String>,
}
