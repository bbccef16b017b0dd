//! Error types for the scheduler

use obd_protocol::ObdError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedulerError {
    /// Another transaction holds the adapter
    #[error("Adapter busy, request skipped")]
    Busy,

    #[error("Worker task failed: {0}")]
    Join(String),

    #[error(transparent)]
    Obd(#[from] ObdError),
}

impl From<tokio::task::JoinError> for SchedulerError {
    fn from(err: tokio::task::JoinError) -> Self {
        SchedulerError::Join(err.to_string())
    }
}
