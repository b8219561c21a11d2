use progress_core::model::{
    ModuleId, ModuleProgress, PageNumber, PageVisit, QuizAnswer, QuizAttempt, QuizAttemptId,
    SectionCompletion, SectionId, UserId,
};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::repository::StorageError;

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

pub(crate) fn conn<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

pub(crate) fn user_id_to_text(id: UserId) -> String {
    id.value().to_string()
}

fn user_id_from_row(row: &SqliteRow) -> Result<UserId, StorageError> {
    row.try_get::<String, _>("user_id")
        .map_err(ser)?
        .parse::<UserId>()
        .map_err(ser)
}

fn module_id_from_row(row: &SqliteRow) -> Result<ModuleId, StorageError> {
    ModuleId::try_from_raw(row.try_get::<i64, _>("module_id").map_err(ser)?).map_err(ser)
}

fn section_id_from_row(row: &SqliteRow) -> Result<SectionId, StorageError> {
    SectionId::try_from_raw(row.try_get::<i64, _>("section_id").map_err(ser)?).map_err(ser)
}

fn page_number_from_row(row: &SqliteRow) -> Result<PageNumber, StorageError> {
    PageNumber::try_from_raw(row.try_get::<i64, _>("page_number").map_err(ser)?).map_err(ser)
}

fn u32_column(row: &SqliteRow, field: &'static str) -> Result<u32, StorageError> {
    let v: i64 = row.try_get(field).map_err(ser)?;
    u32::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid {field}: {v}")))
}

pub(crate) fn map_completion_row(row: &SqliteRow) -> Result<SectionCompletion, StorageError> {
    Ok(SectionCompletion {
        user_id: user_id_from_row(row)?,
        module_id: module_id_from_row(row)?,
        section_id: section_id_from_row(row)?,
        total_pages: u32_column(row, "total_pages")?,
        pages_visited: u32_column(row, "pages_visited")?,
        quizzes_total: u32_column(row, "quizzes_total")?,
        quizzes_completed: u32_column(row, "quizzes_completed")?,
        is_complete: row.try_get::<bool, _>("is_complete").map_err(ser)?,
        completed_at: row.try_get("completed_at").map_err(ser)?,
        updated_at: row.try_get("updated_at").map_err(ser)?,
    })
}

pub(crate) fn map_module_row(row: &SqliteRow) -> Result<ModuleProgress, StorageError> {
    let unlocked_section = u32_column(row, "unlocked_section")?;
    if unlocked_section == 0 {
        return Err(StorageError::Serialization(
            "unlocked_section must be at least 1".into(),
        ));
    }
    Ok(ModuleProgress {
        user_id: user_id_from_row(row)?,
        module_id: module_id_from_row(row)?,
        unlocked_section,
        completed: row.try_get::<bool, _>("completed").map_err(ser)?,
        updated_at: row.try_get("updated_at").map_err(ser)?,
    })
}

pub(crate) fn map_visit_row(row: &SqliteRow) -> Result<PageVisit, StorageError> {
    Ok(PageVisit {
        user_id: user_id_from_row(row)?,
        module_id: module_id_from_row(row)?,
        section_id: section_id_from_row(row)?,
        page_number: page_number_from_row(row)?,
        visited_at: row.try_get("visited_at").map_err(ser)?,
    })
}

/// Maps an attempt row; answers are loaded separately and attached by the caller.
pub(crate) fn map_attempt_row(row: &SqliteRow) -> Result<QuizAttempt, StorageError> {
    Ok(QuizAttempt {
        id: QuizAttemptId::new(row.try_get("id").map_err(ser)?),
        user_id: user_id_from_row(row)?,
        module_id: module_id_from_row(row)?,
        section_id: section_id_from_row(row)?,
        page_number: page_number_from_row(row)?,
        score: u32_column(row, "score")?,
        total_questions: u32_column(row, "total_questions")?,
        answers: Vec::new(),
        idempotency_key: row.try_get("idempotency_key").map_err(ser)?,
        completed_at: row.try_get("completed_at").map_err(ser)?,
    })
}

pub(crate) fn map_answer_row(row: &SqliteRow) -> Result<(i64, QuizAnswer), StorageError> {
    Ok((
        row.try_get("attempt_id").map_err(ser)?,
        QuizAnswer {
            question_index: u32_column(row, "question_index")?,
            selected_option: row.try_get("selected_option").map_err(ser)?,
            is_correct: row.try_get::<bool, _>("is_correct").map_err(ser)?,
        },
    ))
}
