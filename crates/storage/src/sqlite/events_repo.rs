use std::collections::HashMap;

use progress_core::model::{
    NewQuizAttempt, PageVisit, QuizAttempt, QuizAttemptId, SectionKey, SectionPatch,
    SectionUpsert,
};
use sqlx::Row;

use super::SqliteRepository;
use super::completion_repo::{apply_section_patch, claim_section_row, load_section_row};
use super::mapping::{
    conn, map_answer_row, map_attempt_row, map_visit_row, ser, user_id_to_text,
};
use crate::repository::{ProgressEvents, RecordedQuiz, RecordedVisit, StorageError};

#[async_trait::async_trait]
impl ProgressEvents for SqliteRepository {
    async fn record_page_visit(
        &self,
        visit: PageVisit,
        patch: &SectionPatch,
    ) -> Result<RecordedVisit, StorageError> {
        let key = visit.key();
        let mut tx = self.pool.begin().await.map_err(conn)?;

        let res = sqlx::query(
            r"
                INSERT INTO page_visits (user_id, module_id, section_id, page_number, visited_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
            ",
        )
        .bind(user_id_to_text(visit.user_id))
        .bind(i64::from(visit.module_id))
        .bind(i64::from(visit.section_id))
        .bind(i64::from(visit.page_number))
        .bind(visit.visited_at)
        .execute(&mut *tx)
        .await
        .map_err(conn)?;

        let upsert = apply_section_patch(&mut tx, key, patch, visit.visited_at).await?;
        tx.commit().await.map_err(conn)?;

        Ok(RecordedVisit {
            visit_id: res.last_insert_rowid(),
            upsert,
        })
    }

    async fn record_quiz_attempt(
        &self,
        attempt: NewQuizAttempt,
        patch: &SectionPatch,
    ) -> Result<RecordedQuiz, StorageError> {
        let key = attempt.key;
        let user = user_id_to_text(key.user_id);
        let mut tx = self.pool.begin().await.map_err(conn)?;
        claim_section_row(&mut tx, key, attempt.completed_at).await?;

        if let Some(idem) = attempt.idempotency_key.as_deref() {
            let existing = sqlx::query(
                r"
                    SELECT a.id, a.module_id, a.section_id
                    FROM quiz_idempotency_keys k
                    JOIN quiz_attempts a ON a.id = k.attempt_id
                    WHERE k.user_id = ?1 AND k.idempotency_key = ?2
                ",
            )
            .bind(user.as_str())
            .bind(idem)
            .fetch_optional(&mut *tx)
            .await
            .map_err(conn)?;

            if let Some(row) = existing {
                let attempt_id: i64 = row.try_get("id").map_err(ser)?;
                let module: i64 = row.try_get("module_id").map_err(ser)?;
                let section: i64 = row.try_get("section_id").map_err(ser)?;
                if module != i64::from(key.module_id) || section != i64::from(key.section_id) {
                    return Err(StorageError::Conflict(format!(
                        "idempotency key {idem} belongs to another section"
                    )));
                }

                // Dropping the transaction rolls back the claimed row.
                let completion = load_section_row(&mut tx, key).await?;

                tracing::debug!(user_id = %key.user_id, idempotency_key = idem, "duplicate quiz submission");
                return Ok(RecordedQuiz {
                    attempt_id: QuizAttemptId::new(attempt_id),
                    duplicate: true,
                    upsert: SectionUpsert {
                        was_complete: completion.is_complete,
                        completion,
                        module: None,
                    },
                });
            }
        }

        let res = sqlx::query(
            r"
                INSERT INTO quiz_attempts (
                    user_id, module_id, section_id, page_number, score,
                    total_questions, idempotency_key, completed_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ",
        )
        .bind(user.as_str())
        .bind(i64::from(key.module_id))
        .bind(i64::from(key.section_id))
        .bind(i64::from(attempt.page_number))
        .bind(i64::from(attempt.score))
        .bind(i64::from(attempt.total_questions))
        .bind(attempt.idempotency_key.as_deref())
        .bind(attempt.completed_at)
        .execute(&mut *tx)
        .await
        .map_err(conn)?;
        let attempt_id = res.last_insert_rowid();

        for answer in &attempt.answers {
            sqlx::query(
                r"
                    INSERT INTO quiz_answers (attempt_id, question_index, selected_option, is_correct)
                    VALUES (?1, ?2, ?3, ?4)
                ",
            )
            .bind(attempt_id)
            .bind(i64::from(answer.question_index))
            .bind(answer.selected_option.as_str())
            .bind(answer.is_correct)
            .execute(&mut *tx)
            .await
            .map_err(conn)?;
        }

        if let Some(idem) = attempt.idempotency_key.as_deref() {
            sqlx::query(
                r"
                    INSERT INTO quiz_idempotency_keys (user_id, idempotency_key, attempt_id, created_at)
                    VALUES (?1, ?2, ?3, ?4)
                ",
            )
            .bind(user.as_str())
            .bind(idem)
            .bind(attempt_id)
            .bind(attempt.completed_at)
            .execute(&mut *tx)
            .await
            .map_err(conn)?;
        }

        let upsert = apply_section_patch(&mut tx, key, patch, attempt.completed_at).await?;
        tx.commit().await.map_err(conn)?;

        Ok(RecordedQuiz {
            attempt_id: QuizAttemptId::new(attempt_id),
            duplicate: false,
            upsert,
        })
    }

    async fn page_visits(&self, key: SectionKey) -> Result<Vec<PageVisit>, StorageError> {
        let rows = sqlx::query(
            r"
                SELECT user_id, module_id, section_id, page_number, visited_at
                FROM page_visits
                WHERE user_id = ?1 AND module_id = ?2 AND section_id = ?3
                ORDER BY visited_at ASC, id ASC
            ",
        )
        .bind(user_id_to_text(key.user_id))
        .bind(i64::from(key.module_id))
        .bind(i64::from(key.section_id))
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(map_visit_row(&row)?);
        }
        Ok(out)
    }

    async fn quiz_attempts(&self, key: SectionKey) -> Result<Vec<QuizAttempt>, StorageError> {
        let user = user_id_to_text(key.user_id);
        let module = i64::from(key.module_id);
        let section = i64::from(key.section_id);

        let rows = sqlx::query(
            r"
                SELECT id, user_id, module_id, section_id, page_number, score,
                       total_questions, idempotency_key, completed_at
                FROM quiz_attempts
                WHERE user_id = ?1 AND module_id = ?2 AND section_id = ?3
                ORDER BY completed_at ASC, id ASC
            ",
        )
        .bind(user.as_str())
        .bind(module)
        .bind(section)
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        let answer_rows = sqlx::query(
            r"
                SELECT q.attempt_id, q.question_index, q.selected_option, q.is_correct
                FROM quiz_answers q
                JOIN quiz_attempts a ON a.id = q.attempt_id
                WHERE a.user_id = ?1 AND a.module_id = ?2 AND a.section_id = ?3
                ORDER BY q.attempt_id ASC, q.id ASC
            ",
        )
        .bind(user.as_str())
        .bind(module)
        .bind(section)
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        let mut answers: HashMap<i64, Vec<_>> = HashMap::new();
        for row in &answer_rows {
            let (attempt_id, answer) = map_answer_row(row)?;
            answers.entry(attempt_id).or_default().push(answer);
        }

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let mut attempt = map_attempt_row(&row)?;
            attempt.answers = answers.remove(&attempt.id.value()).unwrap_or_default();
            out.push(attempt);
        }
        Ok(out)
    }
}
