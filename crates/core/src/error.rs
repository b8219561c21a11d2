use thiserror::Error;

/// Errors raised by the unlock policy and the typed id boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PolicyError {
    #[error("{field} must be a positive integer, got {value}")]
    NotPositive { field: &'static str, value: i64 },

    #[error("{field} is out of range: {value}")]
    OutOfRange { field: &'static str, value: i64 },

    #[error("{field} is not an integer: {raw:?}")]
    NotAnInteger { field: &'static str, raw: String },

    #[error("section {section} exceeds the {total} sections of module {module}")]
    SectionOutOfModule { module: u32, section: u32, total: u32 },

    #[error("module {module} must have at least one section")]
    EmptyModule { module: u32 },

    #[error("invalid user id: {0}")]
    InvalidUserId(String),
}
