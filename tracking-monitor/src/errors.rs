use crate::queue::QueueError;
use crate::store::DbError;
use thiserror::Error as ThisError;

/// Failures that abort a monitoring cycle.
///
/// Submission failures are not represented here: a cycle whose batch is rejected by the
/// queue completes normally with [`crate::cycle::CycleStatus::SubmissionFailed`].
#[derive(ThisError, Debug)]
pub enum Error {
    /// Result cache could not be read
    #[error("Failed to retrieve probe results: {0}")]
    Retrieval(#[source] QueueError),

    /// Health store operation error
    #[error(transparent)]
    Database(#[from] DbError),

    /// Configuration is inconsistent or incomplete
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
