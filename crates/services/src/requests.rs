//! Request and response records exchanged with callers of `ProgressTracker`.
//!
//! Requests carry raw integers exactly as a client sent them; the tracker
//! validates them into typed ids so bad input surfaces as `BadRequest`.

use serde::{Deserialize, Serialize};

use progress_core::model::{
    ModuleId, ModuleProgress, QuizAnswer, QuizAttemptId, SectionCompletion, SectionId, UserId,
};
use progress_core::policy::SectionState;

//
// ─── REQUESTS ──────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageVisitRequest {
    pub user_id: Option<UserId>,
    pub module_id: i64,
    pub section_id: i64,
    pub page_number: i64,
    /// Client-reported page count; falls back to the curriculum layout.
    #[serde(default)]
    pub total_pages: Option<u32>,
    #[serde(default)]
    pub quizzes_total: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizCompletionRequest {
    pub user_id: Option<UserId>,
    pub module_id: i64,
    pub section_id: i64,
    pub page_number: i64,
    pub score: i64,
    pub total_questions: i64,
    #[serde(default)]
    pub answers: Vec<QuizAnswer>,
    /// Retries of the same submission carry the same key and are counted once.
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub total_pages: Option<u32>,
    #[serde(default)]
    pub quizzes_total: Option<u32>,
}

/// Targets one section of one module for one learner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionRequest {
    pub user_id: Option<UserId>,
    pub module_id: i64,
    pub section_id: i64,
}

pub type AccessRequest = SectionRequest;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleRequest {
    pub user_id: Option<UserId>,
    pub module_id: i64,
}

//
// ─── RESPONSES ─────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageVisitResponse {
    pub section_completion: SectionCompletion,
    /// Set when this visit completed the section.
    pub module_progress: Option<ModuleProgress>,
    pub unlocked_next: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizCompletionResponse {
    pub quiz_attempt_id: QuizAttemptId,
    pub section_completion: SectionCompletion,
    /// True when the idempotency key had been seen and nothing was written.
    pub duplicate: bool,
    pub module_progress: Option<ModuleProgress>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessDecision {
    pub has_access: bool,
    pub unlocked_section: u32,
    /// The store could not be read and the answer came from the degraded policy.
    pub degraded: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForceCompleteResponse {
    pub section_completion: SectionCompletion,
    pub module_progress: ModuleProgress,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionStatus {
    pub section_id: SectionId,
    pub state: SectionState,
    pub completion: Option<SectionCompletion>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleOverview {
    pub module_id: ModuleId,
    pub total_sections: u32,
    pub unlocked_section: u32,
    pub completed: bool,
    pub sections: Vec<SectionStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_visit_request_reads_camel_case_json() {
        let req: PageVisitRequest = serde_json::from_str(
            r#"{
                "userId": "6f1f2a4e-7c43-4d0f-9f4e-2d1c9f0b7a11",
                "moduleId": 1,
                "sectionId": 2,
                "pageNumber": 3,
                "totalPages": 4
            }"#,
        )
        .unwrap();
        assert!(req.user_id.is_some());
        assert_eq!(req.section_id, 2);
        assert_eq!(req.total_pages, Some(4));
        assert_eq!(req.quizzes_total, None);
    }

    #[test]
    fn missing_user_deserializes_as_none() {
        let req: SectionRequest =
            serde_json::from_str(r#"{"userId": null, "moduleId": 1, "sectionId": 0}"#).unwrap();
        assert!(req.user_id.is_none());
        assert_eq!(req.section_id, 0);
    }

    #[test]
    fn access_decision_serializes_camel_case() {
        let json = serde_json::to_value(AccessDecision {
            has_access: true,
            unlocked_section: 2,
            degraded: false,
        })
        .unwrap();
        assert_eq!(json["hasAccess"], true);
        assert_eq!(json["unlockedSection"], 2);
    }
}
