//! Error types for the propagation step and its surrounding I/O.
//!
//! Per-call failures are rejected at the boundary before any merger runs, so a failed call never
//! produces a partial state. The one recoverable condition, [`NavError::SingularGeometry`], is
//! raised by the gravitation model and handled inside the acceleration merger.
use thiserror::Error;

/// Errors that can occur while configuring or running the propagator
#[derive(Debug, Error)]
pub enum NavError {
    /// The position handed to the gravitation model has zero magnitude
    #[error("gravitation is undefined at the origin of the central-body frame")]
    SingularGeometry,

    /// The measurement interval is zero, negative, or not a number
    #[error("measurement interval must be strictly positive, got {dt} s")]
    InvalidInterval { dt: f64 },

    /// A vector or quaternion input has the wrong shape or cannot be used
    #[error("malformed `{field}`: {reason}")]
    MalformedVector { field: &'static str, reason: String },

    /// Missing or invalid configuration, fatal at construction time
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, NavError>;

impl NavError {
    pub(crate) fn malformed(field: &'static str, reason: impl Into<String>) -> Self {
        NavError::MalformedVector {
            field,
            reason: reason.into(),
        }
    }
}
