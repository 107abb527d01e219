//! Scheduler error types.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by scheduler lifecycle operations.
///
/// Scheduling faults inside the worker loops are logged, never returned.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("{0} is already running")]
    AlreadyRunning(&'static str),

    #[error("{0} is not running")]
    NotRunning(&'static str),

    #[error("{scheduler} did not stop within {timeout:?}; worker detached")]
    StopTimedOut {
        scheduler: &'static str,
        timeout: Duration,
    },

    #[error("invalid scheduler config: {0}")]
    Config(#[from] plategrid_core::CoreError),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
