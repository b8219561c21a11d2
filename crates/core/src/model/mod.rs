mod ids;
mod patch;
mod progress;
mod quiz;

pub use ids::{ModuleId, PageNumber, QuizAttemptId, SectionId, SectionKey, UserId};
pub use patch::{CounterOp, ModuleCascade, ModulePatch, SectionPatch, SectionUpsert};
pub use progress::{ModuleProgress, PageVisit, SectionCompletion};
pub use quiz::{NewQuizAttempt, QuizAnswer, QuizAttempt, QuizError};
