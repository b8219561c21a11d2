use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::{ModuleId, PageNumber, QuizAttemptId, SectionId, SectionKey, UserId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum QuizError {
    #[error("a quiz must have at least one question")]
    NoQuestions,

    #[error("score {score} exceeds the {total} questions of the quiz")]
    ScoreAboveTotal { score: u32, total: u32 },

    #[error("answer for question {index} is outside a {total}-question quiz")]
    AnswerOutOfRange { index: u32, total: u32 },

    #[error("idempotency key cannot be empty")]
    EmptyIdempotencyKey,
}

/// One answered question within an attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizAnswer {
    pub question_index: u32,
    pub selected_option: String,
    pub is_correct: bool,
}

/// A scored quiz submission that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewQuizAttempt {
    pub key: SectionKey,
    pub page_number: PageNumber,
    pub score: u32,
    pub total_questions: u32,
    pub answers: Vec<QuizAnswer>,
    pub idempotency_key: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl NewQuizAttempt {
    /// Builds a submission after checking score and answers against the question count.
    ///
    /// # Errors
    ///
    /// Returns `QuizError` if the quiz has no questions, the score is larger
    /// than the question count, an answer points past the last question, or
    /// the idempotency key is blank.
    pub fn new(
        key: SectionKey,
        page_number: PageNumber,
        score: u32,
        total_questions: u32,
        answers: Vec<QuizAnswer>,
        idempotency_key: Option<String>,
        completed_at: DateTime<Utc>,
    ) -> Result<Self, QuizError> {
        if total_questions == 0 {
            return Err(QuizError::NoQuestions);
        }
        if score > total_questions {
            return Err(QuizError::ScoreAboveTotal {
                score,
                total: total_questions,
            });
        }
        if let Some(answer) = answers
            .iter()
            .find(|a| a.question_index >= total_questions)
        {
            return Err(QuizError::AnswerOutOfRange {
                index: answer.question_index,
                total: total_questions,
            });
        }
        let idempotency_key = match idempotency_key {
            Some(k) if k.trim().is_empty() => return Err(QuizError::EmptyIdempotencyKey),
            Some(k) => Some(k.trim().to_string()),
            None => None,
        };

        Ok(Self {
            key,
            page_number,
            score,
            total_questions,
            answers,
            idempotency_key,
            completed_at,
        })
    }

    #[must_use]
    pub fn assign_id(self, id: QuizAttemptId) -> QuizAttempt {
        QuizAttempt {
            id,
            user_id: self.key.user_id,
            module_id: self.key.module_id,
            section_id: self.key.section_id,
            page_number: self.page_number,
            score: self.score,
            total_questions: self.total_questions,
            answers: self.answers,
            idempotency_key: self.idempotency_key,
            completed_at: self.completed_at,
        }
    }
}

/// A persisted quiz attempt with its answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizAttempt {
    pub id: QuizAttemptId,
    pub user_id: UserId,
    pub module_id: ModuleId,
    pub section_id: SectionId,
    pub page_number: PageNumber,
    pub score: u32,
    pub total_questions: u32,
    pub answers: Vec<QuizAnswer>,
    pub idempotency_key: Option<String>,
    pub completed_at: DateTime<Utc>,
}
