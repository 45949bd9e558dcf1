//! Error types surfaced by every public operation.
//!
//! The set is closed: each variant has a stable [`ErrorKind`] that callers
//! can match on or serialize without parsing messages.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::driver::DriverError;
use crate::safety::Finding;

/// Result alias used throughout the crate.
pub type Result<T, E = LockplaneError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum LockplaneError {
    /// A catalog violates a structural invariant (duplicate names, dangling
    /// foreign keys, index over a missing column, ...).
    #[error("invalid catalog: {0}")]
    CatalogInvalid(String),

    /// Malformed catalog or plan document, or DDL the in-memory driver
    /// cannot read.
    #[error("parse error at {location}: {message}")]
    ParseError { location: String, message: String },

    /// The diff or planner reached a state that valid catalogs never produce.
    #[error("internal diff error: {0}")]
    DiffInternal(String),

    /// The planner refused to emit an operation that is unsafe by default.
    #[error("unsafe operation: {}\n  Pass `allow_unsafe` in the plan options to emit it anyway.", finding_message(.0))]
    UnsafeOperation(Box<Finding>),

    #[error(
        "source hash mismatch: plan expects {expected}, database is at {actual}\n  \
         The live schema changed since the plan was generated. Re-plan against the current schema."
    )]
    SourceHashMismatch { expected: String, actual: String },

    #[error(
        "plan carries no source hash\n  \
         Regenerate the plan against the live schema, or apply it in unchecked mode."
    )]
    MissingSourceHash,

    #[error("shadow validation failed {}: {error}", shadow_location(.step_index, .description))]
    ShadowValidationFailed {
        step_index: Option<usize>,
        description: Option<String>,
        steps_attempted: usize,
        error: DriverError,
    },

    #[error("predicted hash mismatch on shadow: plan predicts {expected}, shadow produced {actual}")]
    PredictedHashMismatch { expected: String, actual: String },

    #[error("apply failed {}: {error}\n  The target transaction was rolled back; no steps were applied.", step_location(.step_index, .description))]
    ApplyFailed {
        step_index: usize,
        description: String,
        steps_applied: usize,
        error: DriverError,
    },

    #[error("step timed out {}", step_location(.step_index, .description))]
    StepTimeout { step_index: usize, description: String },

    #[error(
        "could not acquire advisory lock {key} within {}s\n  \
         Another apply is probably running against this database.",
        seconds(.waited)
    )]
    LockUnavailable { key: i64, waited: Duration },

    #[error("apply cancelled; the open transaction was rolled back")]
    Cancelled,

    #[error("driver error: {0}")]
    DriverError(#[from] DriverError),
}

/// Stable discriminant for [`LockplaneError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    CatalogInvalid,
    ParseError,
    DiffInternal,
    UnsafeOperation,
    SourceHashMismatch,
    MissingSourceHash,
    ShadowValidationFailed,
    PredictedHashMismatch,
    ApplyFailed,
    StepTimeout,
    LockUnavailable,
    Cancelled,
    DriverError,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::CatalogInvalid => "catalog_invalid",
            ErrorKind::ParseError => "parse_error",
            ErrorKind::DiffInternal => "diff_internal",
            ErrorKind::UnsafeOperation => "unsafe_operation",
            ErrorKind::SourceHashMismatch => "source_hash_mismatch",
            ErrorKind::MissingSourceHash => "missing_source_hash",
            ErrorKind::ShadowValidationFailed => "shadow_validation_failed",
            ErrorKind::PredictedHashMismatch => "predicted_hash_mismatch",
            ErrorKind::ApplyFailed => "apply_failed",
            ErrorKind::StepTimeout => "step_timeout",
            ErrorKind::LockUnavailable => "lock_unavailable",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::DriverError => "driver_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl LockplaneError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            LockplaneError::CatalogInvalid(_) => ErrorKind::CatalogInvalid,
            LockplaneError::ParseError { .. } => ErrorKind::ParseError,
            LockplaneError::DiffInternal(_) => ErrorKind::DiffInternal,
            LockplaneError::UnsafeOperation(_) => ErrorKind::UnsafeOperation,
            LockplaneError::SourceHashMismatch { .. } => ErrorKind::SourceHashMismatch,
            LockplaneError::MissingSourceHash => ErrorKind::MissingSourceHash,
            LockplaneError::ShadowValidationFailed { .. } => ErrorKind::ShadowValidationFailed,
            LockplaneError::PredictedHashMismatch { .. } => ErrorKind::PredictedHashMismatch,
            LockplaneError::ApplyFailed { .. } => ErrorKind::ApplyFailed,
            LockplaneError::StepTimeout { .. } => ErrorKind::StepTimeout,
            LockplaneError::LockUnavailable { .. } => ErrorKind::LockUnavailable,
            LockplaneError::Cancelled => ErrorKind::Cancelled,
            LockplaneError::DriverError(_) => ErrorKind::DriverError,
        }
    }

    pub(crate) fn parse(location: impl Into<String>, message: impl Into<String>) -> Self {
        LockplaneError::ParseError {
            location: location.into(),
            message: message.into(),
        }
    }
}

fn finding_message(finding: &Finding) -> &str {
    &finding.message
}

fn seconds(waited: &Duration) -> u64 {
    waited.as_secs()
}

fn step_location<'a>(index: &usize, description: &'a str) -> StepLocation<'a> {
    StepLocation(Some(*index), Some(description))
}

fn shadow_location<'a>(index: &Option<usize>, description: &'a Option<String>) -> StepLocation<'a> {
    StepLocation(*index, description.as_deref())
}

/// Renders "at step N (description)" for messages; step numbers are 1-based.
struct StepLocation<'a>(Option<usize>, Option<&'a str>);

impl fmt::Display for StepLocation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.0, self.1) {
            (Some(index), Some(description)) => write!(f, "at step {} ({})", index + 1, description),
            (Some(index), None) => write!(f, "at step {}", index + 1),
            (None, _) => write!(f, "while preparing the shadow database"),
        }
    }
}
