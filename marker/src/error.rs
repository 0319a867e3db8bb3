//! # Marker Error Types
//!
//! Errors that can stop a marking unit. Most things that go wrong while grading
//! do *not* appear here: crashing or timed-out submissions live in `TestResult`,
//! model failures become degraded stage outputs, and unparseable score text
//! resolves to a fallback `ModuleScore`. What remains is the small set of faults
//! a unit genuinely cannot recover from.
//!
//! ## Example
//!
//! ```rust
//! use marker::error::MarkerError;
//!
//! let err = MarkerError::Config {
//!     module_id: "q2".into(),
//!     reason: "rubric text is missing".into(),
//! };
//! assert_eq!(err.to_string(), "configuration error in module 'q2': rubric text is missing");
//! ```

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MarkerError {
    /// The module's configuration cannot be graded (missing rubric, bad max score).
    #[error("configuration error in module '{module_id}': {reason}")]
    Config { module_id: String, reason: String },

    /// Reading or writing the result store failed.
    #[error("I/O error: {0}")]
    Io(String),

    /// A stored record could not be decoded.
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    /// Another run currently holds the writer lock for this unit.
    #[error("unit '{0}' is already being written by another run")]
    UnitLocked(String),

    /// The run for this unit was cancelled.
    #[error("marking cancelled for '{0}'")]
    Cancelled(String),
}

impl From<std::io::Error> for MarkerError {
    fn from(e: std::io::Error) -> Self {
        MarkerError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for MarkerError {
    fn from(e: serde_json::Error) -> Self {
        MarkerError::InvalidJson(e.to_string())
    }
}
