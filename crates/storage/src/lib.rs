#![forbid(unsafe_code)]

pub mod repository;
pub mod sqlite;

pub use repository::{
    CompletionStore, InMemoryRepository, ProgressEvents, RecordedQuiz, RecordedVisit, Storage,
    StorageError, WipeReport,
};
pub use sqlite::{SqliteInitError, SqliteRepository};
