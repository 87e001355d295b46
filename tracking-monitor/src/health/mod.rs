//! Health log records and the rolling health aggregator.

pub mod aggregator;
pub mod models;

pub use aggregator::{AggregationReport, HealthAggregator};
pub use models::{HealthAggregate, HealthLogEntry, ResultStatus};
