#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod requests;
pub mod tracker;

pub use progress_core::Clock;

pub use config::{DegradedMode, TrackerConfig, UnknownDegradedMode};
pub use error::ProgressError;
pub use requests::{
    AccessDecision, AccessRequest, ForceCompleteResponse, ModuleOverview, ModuleRequest,
    PageVisitRequest, PageVisitResponse, QuizCompletionRequest, QuizCompletionResponse,
    SectionRequest, SectionStatus,
};
pub use tracker::ProgressTracker;
