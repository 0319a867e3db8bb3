use thiserror::Error;

/// Faults in the *request* to the sandbox. Anything that goes wrong while the
/// submission itself runs is reported inside `TestResult` instead.
#[derive(Debug, Error, PartialEq)]
pub enum RunnerError {
    #[error("timeout must be greater than zero seconds")]
    InvalidTimeout,

    #[error("invalid runner configuration: {0}")]
    InvalidConfig(String),
}
