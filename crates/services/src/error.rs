//! Shared error types for the services crate.

use thiserror::Error;

use progress_core::PolicyError;
use progress_core::model::QuizError;
use storage::repository::StorageError;

/// Errors returned by `ProgressTracker`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProgressError {
    #[error("no authenticated user")]
    Unauthorized,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("section {section} of module {module} is locked (unlocked through {unlocked_section})")]
    SectionLocked {
        module: u32,
        section: u32,
        unlocked_section: u32,
    },

    #[error("progress store unavailable: {0}")]
    StoreUnavailable(#[source] StorageError),
}

impl ProgressError {
    /// Stable machine-readable tag for the error class.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ProgressError::Unauthorized => "unauthorized",
            ProgressError::BadRequest(_) => "bad_request",
            ProgressError::SectionLocked { .. } => "section_locked",
            ProgressError::StoreUnavailable(_) => "store_unavailable",
        }
    }
}

impl From<PolicyError> for ProgressError {
    fn from(e: PolicyError) -> Self {
        ProgressError::BadRequest(e.to_string())
    }
}

impl From<QuizError> for ProgressError {
    fn from(e: QuizError) -> Self {
        ProgressError::BadRequest(e.to_string())
    }
}

impl From<StorageError> for ProgressError {
    fn from(e: StorageError) -> Self {
        match e {
            // The caller reused an idempotency key for a different section.
            StorageError::Conflict(msg) => ProgressError::BadRequest(msg),
            other => ProgressError::StoreUnavailable(other),
        }
    }
}
