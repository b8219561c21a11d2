use chrono::{DateTime, Utc};
use progress_core::model::{
    ModuleId, ModulePatch, ModuleProgress, SectionCompletion, SectionKey, SectionPatch,
    SectionUpsert, UserId,
};
use sqlx::SqliteConnection;

use super::SqliteRepository;
use super::mapping::{conn, map_completion_row, map_module_row, user_id_to_text};
use crate::repository::{CompletionStore, StorageError, WipeReport};

const SELECT_COMPLETION: &str = r"
    SELECT user_id, module_id, section_id, total_pages, pages_visited,
           quizzes_total, quizzes_completed, is_complete, completed_at, updated_at
    FROM section_completions
    WHERE user_id = ?1 AND module_id = ?2 AND section_id = ?3
";

const SELECT_MODULE: &str = r"
    SELECT user_id, module_id, unlocked_section, completed, updated_at
    FROM module_progress
    WHERE user_id = ?1 AND module_id = ?2
";

/// Inserts the empty row for `key` unless one exists. Returns whether a row
/// was already there.
///
/// This is a write, so `SQLite` hands the transaction the writer lock before
/// anything is read; concurrent events for the same key wait on
/// `busy_timeout` instead of reading a stale counter.
pub(super) async fn claim_section_row(
    tx: &mut SqliteConnection,
    key: SectionKey,
    now: DateTime<Utc>,
) -> Result<bool, StorageError> {
    let inserted = sqlx::query(
        r"
            INSERT INTO section_completions (
                user_id, module_id, section_id, total_pages, pages_visited,
                quizzes_total, quizzes_completed, is_complete, completed_at, updated_at
            )
            VALUES (?1, ?2, ?3, 0, 0, 0, 0, 0, NULL, ?4)
            ON CONFLICT(user_id, module_id, section_id) DO NOTHING
        ",
    )
    .bind(user_id_to_text(key.user_id))
    .bind(i64::from(key.module_id))
    .bind(i64::from(key.section_id))
    .bind(now)
    .execute(&mut *tx)
    .await
    .map_err(conn)?
    .rows_affected();
    Ok(inserted == 0)
}

pub(super) async fn load_section_row(
    tx: &mut SqliteConnection,
    key: SectionKey,
) -> Result<SectionCompletion, StorageError> {
    let row = sqlx::query(SELECT_COMPLETION)
        .bind(user_id_to_text(key.user_id))
        .bind(i64::from(key.module_id))
        .bind(i64::from(key.section_id))
        .fetch_one(&mut *tx)
        .await
        .map_err(conn)?;
    map_completion_row(&row)
}

/// Applies a section patch inside an open transaction.
pub(super) async fn apply_section_patch(
    tx: &mut SqliteConnection,
    key: SectionKey,
    patch: &SectionPatch,
    now: DateTime<Utc>,
) -> Result<SectionUpsert, StorageError> {
    let existed = claim_section_row(tx, key, now).await?;
    let current = load_section_row(tx, key).await?;
    let previous = existed.then_some(&current);
    let was_complete = current.is_complete;

    let next = patch.apply(previous, key, now);
    write_completion(tx, &next).await?;

    let module_progress = match patch.cascade {
        Some(cascade) if !was_complete && next.is_complete => Some(
            apply_module_patch(
                tx,
                key.user_id,
                key.module_id,
                &cascade.patch_for(key.section_id),
                now,
            )
            .await?,
        ),
        _ => None,
    };

    Ok(SectionUpsert {
        was_complete,
        completion: next,
        module: module_progress,
    })
}

async fn write_completion(
    tx: &mut SqliteConnection,
    completion: &SectionCompletion,
) -> Result<(), StorageError> {
    sqlx::query(
        r"
            UPDATE section_completions SET
                total_pages = ?4,
                pages_visited = ?5,
                quizzes_total = ?6,
                quizzes_completed = ?7,
                is_complete = ?8,
                completed_at = ?9,
                updated_at = ?10
            WHERE user_id = ?1 AND module_id = ?2 AND section_id = ?3
        ",
    )
    .bind(user_id_to_text(completion.user_id))
    .bind(i64::from(completion.module_id))
    .bind(i64::from(completion.section_id))
    .bind(i64::from(completion.total_pages))
    .bind(i64::from(completion.pages_visited))
    .bind(i64::from(completion.quizzes_total))
    .bind(i64::from(completion.quizzes_completed))
    .bind(completion.is_complete)
    .bind(completion.completed_at)
    .bind(completion.updated_at)
    .execute(&mut *tx)
    .await
    .map_err(conn)?;
    Ok(())
}

/// Applies a module patch inside an open transaction.
pub(super) async fn apply_module_patch(
    tx: &mut SqliteConnection,
    user_id: UserId,
    module_id: ModuleId,
    patch: &ModulePatch,
    now: DateTime<Utc>,
) -> Result<ModuleProgress, StorageError> {
    let user = user_id_to_text(user_id);
    let module = i64::from(module_id);

    let row = sqlx::query(SELECT_MODULE)
        .bind(user.as_str())
        .bind(module)
        .fetch_optional(&mut *tx)
        .await
        .map_err(conn)?;
    let previous = row.as_ref().map(map_module_row).transpose()?;
    let next = patch.apply(previous.as_ref(), user_id, module_id, now);

    sqlx::query(
        r"
            INSERT INTO module_progress (user_id, module_id, unlocked_section, completed, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(user_id, module_id) DO UPDATE SET
                unlocked_section = excluded.unlocked_section,
                completed = excluded.completed,
                updated_at = excluded.updated_at
        ",
    )
    .bind(user.as_str())
    .bind(module)
    .bind(i64::from(next.unlocked_section))
    .bind(next.completed)
    .bind(next.updated_at)
    .execute(&mut *tx)
    .await
    .map_err(conn)?;

    Ok(next)
}

#[async_trait::async_trait]
impl CompletionStore for SqliteRepository {
    async fn get_section_completion(
        &self,
        key: SectionKey,
    ) -> Result<Option<SectionCompletion>, StorageError> {
        let row = sqlx::query(SELECT_COMPLETION)
            .bind(user_id_to_text(key.user_id))
            .bind(i64::from(key.module_id))
            .bind(i64::from(key.section_id))
            .fetch_optional(&self.pool)
            .await
            .map_err(conn)?;
        row.as_ref().map(map_completion_row).transpose()
    }

    async fn upsert_section_completion(
        &self,
        key: SectionKey,
        patch: &SectionPatch,
        now: DateTime<Utc>,
    ) -> Result<SectionUpsert, StorageError> {
        let mut tx = self.pool.begin().await.map_err(conn)?;
        let upsert = apply_section_patch(&mut tx, key, patch, now).await?;
        tx.commit().await.map_err(conn)?;
        Ok(upsert)
    }

    async fn get_module_progress(
        &self,
        user_id: UserId,
        module_id: ModuleId,
    ) -> Result<Option<ModuleProgress>, StorageError> {
        let row = sqlx::query(SELECT_MODULE)
            .bind(user_id_to_text(user_id))
            .bind(i64::from(module_id))
            .fetch_optional(&self.pool)
            .await
            .map_err(conn)?;
        row.as_ref().map(map_module_row).transpose()
    }

    async fn upsert_module_progress(
        &self,
        user_id: UserId,
        module_id: ModuleId,
        patch: &ModulePatch,
        now: DateTime<Utc>,
    ) -> Result<ModuleProgress, StorageError> {
        let mut tx = self.pool.begin().await.map_err(conn)?;
        // Take the writer lock before reading the pointer.
        sqlx::query(
            r"
                INSERT INTO module_progress (user_id, module_id, unlocked_section, completed, updated_at)
                VALUES (?1, ?2, 1, 0, ?3)
                ON CONFLICT(user_id, module_id) DO NOTHING
            ",
        )
        .bind(user_id_to_text(user_id))
        .bind(i64::from(module_id))
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(conn)?;
        let progress = apply_module_patch(&mut tx, user_id, module_id, patch, now).await?;
        tx.commit().await.map_err(conn)?;
        Ok(progress)
    }

    async fn list_section_completions(
        &self,
        user_id: UserId,
        module_id: ModuleId,
    ) -> Result<Vec<SectionCompletion>, StorageError> {
        let rows = sqlx::query(
            r"
                SELECT user_id, module_id, section_id, total_pages, pages_visited,
                       quizzes_total, quizzes_completed, is_complete, completed_at, updated_at
                FROM section_completions
                WHERE user_id = ?1 AND module_id = ?2
                ORDER BY section_id ASC
            ",
        )
        .bind(user_id_to_text(user_id))
        .bind(i64::from(module_id))
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(map_completion_row(&row)?);
        }
        Ok(out)
    }

    async fn wipe_user_progress(&self, user_id: UserId) -> Result<WipeReport, StorageError> {
        let user = user_id_to_text(user_id);
        let mut tx = self.pool.begin().await.map_err(conn)?;

        sqlx::query("DELETE FROM quiz_idempotency_keys WHERE user_id = ?1")
            .bind(user.as_str())
            .execute(&mut *tx)
            .await
            .map_err(conn)?;
        sqlx::query(
            "DELETE FROM quiz_answers WHERE attempt_id IN (SELECT id FROM quiz_attempts WHERE user_id = ?1)",
        )
        .bind(user.as_str())
        .execute(&mut *tx)
        .await
        .map_err(conn)?;

        let mut report = WipeReport::default();
        for (table, slot) in [
            ("quiz_attempts", &mut report.quiz_attempts),
            ("page_visits", &mut report.page_visits),
            ("section_completions", &mut report.section_completions),
            ("module_progress", &mut report.module_progress),
        ] {
            *slot = sqlx::query(&format!("DELETE FROM {table} WHERE user_id = ?1"))
                .bind(user.as_str())
                .execute(&mut *tx)
                .await
                .map_err(conn)?
                .rows_affected();
        }

        tx.commit().await.map_err(conn)?;
        tracing::info!(user_id = %user_id, ?report, "wiped learner progress");
        Ok(report)
    }
}
