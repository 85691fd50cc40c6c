use thiserror::Error;

use crate::driver::DriverError;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed submission; rejected before any run exists.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("missing required parameter \"{param}\" for command \"{command}\"")]
    MissingParameter {
        command: &'static str,
        param: &'static str,
    },

    #[error("{0}")]
    AssertionFailed(String),

    #[error(transparent)]
    Driver(#[from] DriverError),

    /// The run's task panicked mid-step.
    #[error("run aborted: {0}")]
    Aborted(String),

    #[error("run {0} not found")]
    NotFound(String),
}
