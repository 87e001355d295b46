//! Maps agent status codes to a health outcome and a diagnostic note.

use crate::health::models::{HealthLogEntry, ResultStatus};
use crate::probes::correlator::MatchedResult;
use crate::probes::models::{AgentCode, ProbeResult};

pub const NOTE_NO_TRACKING_FOUND: &str = "no tracking number found";
pub const NOTE_PARSE_FAILED: &str = "failed to parse target site page";
pub const NOTE_TIMEOUT: &str = "timed out querying target site";
pub const NOTE_UNKNOWN: &str = "unknown error";

/// Separator between the fixed note and the agent's error text.
const NOTE_DELIMITER: &str = ": ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub status: ResultStatus,
    pub note: Option<String>,
}

/// Total over every [`AgentCode`], including codes the monitor does not know.
pub fn classify(code: AgentCode, error_text: Option<&str>) -> Classification {
    let (status, base_note) = match code {
        AgentCode::Success | AgentCode::SuccessCached => (ResultStatus::Ok, None),
        // The site answered, so the crawler itself is working.
        AgentCode::NoTrackingFound => (ResultStatus::Ok, Some(NOTE_NO_TRACKING_FOUND)),
        AgentCode::ParseFailed => (ResultStatus::Error, Some(NOTE_PARSE_FAILED)),
        AgentCode::Timeout => (ResultStatus::Error, Some(NOTE_TIMEOUT)),
        AgentCode::Other(_) => (ResultStatus::Error, Some(NOTE_UNKNOWN)),
    };

    let detail = error_text.map(str::trim).filter(|text| !text.is_empty());
    let note = match (status, base_note, detail) {
        (ResultStatus::Error, Some(base), Some(detail)) => Some(format!("{base}{NOTE_DELIMITER}{detail}")),
        (_, base, _) => base.map(str::to_string),
    };

    Classification { status, note }
}

pub fn classify_result(result: &ProbeResult) -> Classification {
    classify(result.agent_code, result.error_text.as_deref())
}

/// Turn a matched result into the record written to the health log.
pub fn to_health_log_entry(matched: &MatchedResult<'_>) -> HealthLogEntry {
    let classification = classify_result(&matched.result);
    HealthLogEntry {
        crawler_id: matched.crawler.crawler_id,
        tracking_no: matched.result.tracking_no.clone(),
        timing_millis: matched.timing_millis,
        result_status: classification.status,
        occurred_at: matched.completed_at,
        raw_response_body: matched.result.raw_response_body.clone(),
        result_note: classification.note,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawlers::CrawlerSnapshot;
    use crate::probes::correlator::correlate;
    use crate::test_utils::{crawler, probe_result};
    use chrono::{Duration, Utc};
    use rstest::rstest;

    #[rstest]
    #[case(AgentCode::Success, ResultStatus::Ok, None)]
    #[case(AgentCode::SuccessCached, ResultStatus::Ok, None)]
    #[case(AgentCode::NoTrackingFound, ResultStatus::Ok, Some(NOTE_NO_TRACKING_FOUND))]
    #[case(AgentCode::ParseFailed, ResultStatus::Error, Some(NOTE_PARSE_FAILED))]
    #[case(AgentCode::Timeout, ResultStatus::Error, Some(NOTE_TIMEOUT))]
    #[case(AgentCode::Other(0), ResultStatus::Error, Some(NOTE_UNKNOWN))]
    #[case(AgentCode::Other(-99), ResultStatus::Error, Some(NOTE_UNKNOWN))]
    fn test_decision_table(#[case] code: AgentCode, #[case] status: ResultStatus, #[case] note: Option<&str>) {
        let classification = classify(code, None);
        assert_eq!(classification.status, status);
        assert_eq!(classification.note.as_deref(), note);
    }

    #[test]
    fn test_error_text_appended_only_on_failure() {
        let failed = classify(AgentCode::Timeout, Some("connect timeout after 30s"));
        assert_eq!(failed.note.as_deref(), Some("timed out querying target site: connect timeout after 30s"));

        let ok = classify(AgentCode::Success, Some("ignored"));
        assert_eq!(ok.note, None);

        let not_found = classify(AgentCode::NoTrackingFound, Some("ignored"));
        assert_eq!(not_found.note.as_deref(), Some(NOTE_NO_TRACKING_FOUND));
    }

    #[test]
    fn test_blank_error_text_is_not_appended() {
        let classification = classify(AgentCode::ParseFailed, Some("   "));
        assert_eq!(classification.note.as_deref(), Some(NOTE_PARSE_FAILED));
    }

    #[test]
    fn test_health_log_entry_carries_result_fields() {
        let now = Utc::now();
        let snapshot = CrawlerSnapshot::new(now, vec![crawler(3, "SF")]);
        let mut result = probe_result("SF", AgentCode::ParseFailed, now - Duration::seconds(2));
        result.error_text = Some("selector #events missing".to_string());
        result.raw_response_body = Some("<html></html>".to_string());

        let correlation = correlate(&snapshot, vec![result], now);
        let entry = to_health_log_entry(&correlation.matched[0]);

        assert_eq!(entry.crawler_id, crate::types::CrawlerId(3));
        assert_eq!(entry.result_status, ResultStatus::Error);
        assert_eq!(entry.timing_millis, 2_000);
        assert_eq!(entry.occurred_at, now);
        assert_eq!(entry.raw_response_body.as_deref(), Some("<html></html>"));
        assert_eq!(
            entry.result_note.as_deref(),
            Some("failed to parse target site page: selector #events missing")
        );
    }
}
