//! Probe construction, result correlation and outcome classification.

pub mod classifier;
pub mod correlator;
pub mod dispatcher;
pub mod models;

pub use classifier::{Classification, classify};
pub use correlator::{Correlation, MatchedResult, correlate};
pub use dispatcher::build_probe_batch;
pub use models::{AgentCode, ProbeRequest, ProbeResult};
