//! Builders shared by unit tests.

use std::io;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;

use crate::crawlers::CrawlerDefinition;
use crate::probes::models::{AgentCode, ProbeResult};
use crate::types::CrawlerId;

/// An active, healthy crawler whose heartbeat number is `HB-{carrier}`.
pub fn crawler(id: i64, carrier: &str) -> CrawlerDefinition {
    CrawlerDefinition {
        crawler_id: CrawlerId(id),
        carrier_id: id * 10,
        carrier_code: carrier.to_string(),
        display_name: format!("{carrier} crawler"),
        heartbeat_tracking_number: format!("HB-{carrier}"),
        agent_type: "PYTHON".to_string(),
        agent_url: None,
        start_time: Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap(),
        end_time: Utc.with_ymd_and_hms(2100, 1, 1, 0, 0, 0).unwrap(),
        active: true,
        healthy: true,
    }
}

/// A result for `carrier` without a completion time.
pub fn probe_result(carrier: &str, code: AgentCode, req_time: DateTime<Utc>) -> ProbeResult {
    ProbeResult {
        seq_no: None,
        carrier_code: carrier.to_string(),
        tracking_no: format!("HB-{carrier}"),
        req_time,
        agent_end_time: None,
        agent_code: code,
        error_text: None,
        raw_response_body: None,
    }
}

/// Formatted tracing output collected in memory.
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    /// Route tracing on the current thread into this buffer until the guard drops.
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let logs = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || logs.clone())
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
