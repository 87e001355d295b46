//! Scriptable in-process queue used by tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{ProbeQueue, QueueError};
use crate::probes::models::{AgentCode, ProbeRequest, ProbeResult};
use crate::types::{CorrelationKey, Priority};

type Responder = Arc<dyn Fn(&ProbeRequest) -> ProbeResult + Send + Sync>;

#[derive(Default)]
struct Inner {
    submitted: Vec<(Priority, Vec<ProbeRequest>)>,
    pending: HashMap<CorrelationKey, ProbeRequest>,
    responders: HashMap<String, Responder>,
    stray_results: Vec<ProbeResult>,
    submit_failure: Option<String>,
    retrieve_failure: Option<String>,
}

/// Answers are produced at retrieval time from responders registered per carrier code.
/// A carrier without a responder simply never answers.
#[derive(Clone, Default)]
pub struct InMemoryProbeQueue {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryProbeQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every probe for `carrier_code` with `code` and optional error text.
    pub fn respond_with(&self, carrier_code: &str, code: AgentCode, error_text: Option<&str>) {
        let error_text = error_text.map(str::to_string);
        self.respond(carrier_code, move |request| ProbeResult {
            seq_no: Some(request.seq_no),
            carrier_code: request.carrier_code.clone(),
            tracking_no: request.tracking_no.clone(),
            req_time: request.req_time,
            agent_end_time: None,
            agent_code: code,
            error_text: error_text.clone(),
            raw_response_body: None,
        });
    }

    /// Answer every probe for `carrier_code` with whatever `responder` builds.
    pub fn respond<F>(&self, carrier_code: &str, responder: F)
    where
        F: Fn(&ProbeRequest) -> ProbeResult + Send + Sync + 'static,
    {
        self.inner.lock().responders.insert(carrier_code.to_string(), Arc::new(responder));
    }

    /// Return `result` from the next retrieval regardless of which keys are asked for.
    pub fn inject_result(&self, result: ProbeResult) {
        self.inner.lock().stray_results.push(result);
    }

    pub fn submitted(&self) -> Vec<(Priority, Vec<ProbeRequest>)> {
        self.inner.lock().submitted.clone()
    }

    pub fn fail_submit(&self, message: impl Into<String>) {
        self.inner.lock().submit_failure = Some(message.into());
    }

    pub fn fail_retrieve(&self, message: impl Into<String>) {
        self.inner.lock().retrieve_failure = Some(message.into());
    }
}

#[async_trait]
impl ProbeQueue for InMemoryProbeQueue {
    async fn submit(&self, priority: Priority, batch: &[ProbeRequest]) -> Result<Vec<CorrelationKey>, QueueError> {
        let mut inner = self.inner.lock();
        if let Some(message) = &inner.submit_failure {
            return Err(QueueError::Unavailable(message.clone()));
        }

        let keys: Vec<CorrelationKey> = batch.iter().map(|r| CorrelationKey::from(r.seq_no)).collect();
        for (key, request) in keys.iter().zip(batch) {
            inner.pending.insert(key.clone(), request.clone());
        }
        inner.submitted.push((priority, batch.to_vec()));
        Ok(keys)
    }

    async fn retrieve(&self, _priority: Priority, keys: &[CorrelationKey]) -> Result<Vec<ProbeResult>, QueueError> {
        let mut inner = self.inner.lock();
        if let Some(message) = &inner.retrieve_failure {
            return Err(QueueError::Unavailable(message.clone()));
        }

        let mut results: Vec<ProbeResult> = keys
            .iter()
            .filter_map(|key| inner.pending.get(key))
            .filter_map(|request| inner.responders.get(&request.carrier_code).map(|respond| respond(request)))
            .collect();
        results.append(&mut inner.stray_results);
        Ok(results)
    }
}
