use async_trait::async_trait;
use chrono::{DateTime, Utc};
use progress_core::model::{
    ModuleId, ModulePatch, ModuleProgress, NewQuizAttempt, PageVisit, QuizAttempt, QuizAttemptId,
    SectionCompletion, SectionKey, SectionPatch, SectionUpsert, UserId,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Outcome of appending a page visit together with its section update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedVisit {
    pub visit_id: i64,
    pub upsert: SectionUpsert,
}

/// Outcome of recording a quiz attempt together with its section update.
///
/// When `duplicate` is true the idempotency key had already been used: no
/// rows were written and `attempt_id` is the original attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedQuiz {
    pub attempt_id: QuizAttemptId,
    pub duplicate: bool,
    pub upsert: SectionUpsert,
}

/// Row counts removed by an admin data wipe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WipeReport {
    pub page_visits: u64,
    pub quiz_attempts: u64,
    pub section_completions: u64,
    pub module_progress: u64,
}

/// Read/write access to completion state.
///
/// Every `upsert_*` call applies its patch against the current row while
/// holding the adapter's serialization for that key, so concurrent callers
/// never lose an increment.
#[async_trait]
pub trait CompletionStore: Send + Sync {
    /// Fetch the counters of one section.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be read.
    async fn get_section_completion(
        &self,
        key: SectionKey,
    ) -> Result<Option<SectionCompletion>, StorageError>;

    /// Create (with zeroed counters) or update a section row.
    ///
    /// If the patch carries a cascade and this write flips the section to
    /// complete, the module pointer is advanced in the same unit.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the write cannot be applied.
    async fn upsert_section_completion(
        &self,
        key: SectionKey,
        patch: &SectionPatch,
        now: DateTime<Utc>,
    ) -> Result<SectionUpsert, StorageError>;

    /// Fetch the unlock pointer of one module.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be read.
    async fn get_module_progress(
        &self,
        user_id: UserId,
        module_id: ModuleId,
    ) -> Result<Option<ModuleProgress>, StorageError>;

    /// Create (unlocked section 1) or update a module row.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the write cannot be applied.
    async fn upsert_module_progress(
        &self,
        user_id: UserId,
        module_id: ModuleId,
        patch: &ModulePatch,
        now: DateTime<Utc>,
    ) -> Result<ModuleProgress, StorageError>;

    /// All section rows of a module for one learner, ordered by section.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be read.
    async fn list_section_completions(
        &self,
        user_id: UserId,
        module_id: ModuleId,
    ) -> Result<Vec<SectionCompletion>, StorageError>;

    /// Delete every progress row that belongs to `user_id`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the wipe cannot be applied.
    async fn wipe_user_progress(&self, user_id: UserId) -> Result<WipeReport, StorageError>;
}

/// Event writes that must land atomically with their section update.
#[async_trait]
pub trait ProgressEvents: Send + Sync {
    /// Append a visit and apply `patch` to the visited section as one unit.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if either write fails; nothing is persisted then.
    async fn record_page_visit(
        &self,
        visit: PageVisit,
        patch: &SectionPatch,
    ) -> Result<RecordedVisit, StorageError>;

    /// Insert an attempt with its answers and apply `patch` as one unit.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the idempotency key was used for a
    /// different section, or other storage errors.
    async fn record_quiz_attempt(
        &self,
        attempt: NewQuizAttempt,
        patch: &SectionPatch,
    ) -> Result<RecordedQuiz, StorageError>;

    /// Visit log of a section, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be read.
    async fn page_visits(&self, key: SectionKey) -> Result<Vec<PageVisit>, StorageError>;

    /// Quiz attempts of a section, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be read.
    async fn quiz_attempts(&self, key: SectionKey) -> Result<Vec<QuizAttempt>, StorageError>;
}

//
// ─── IN-MEMORY ─────────────────────────────────────────────────────────────────
//

#[derive(Default)]
struct Tables {
    visits: Vec<PageVisit>,
    completions: HashMap<SectionKey, SectionCompletion>,
    modules: HashMap<(UserId, ModuleId), ModuleProgress>,
    attempts: Vec<QuizAttempt>,
    idempotency: HashMap<(UserId, String), QuizAttemptId>,
    next_visit_id: i64,
    next_attempt_id: i64,
}

impl Tables {
    fn apply_module(
        &mut self,
        user_id: UserId,
        module_id: ModuleId,
        patch: &ModulePatch,
        now: DateTime<Utc>,
    ) -> ModuleProgress {
        let progress = patch.apply(self.modules.get(&(user_id, module_id)), user_id, module_id, now);
        self.modules.insert((user_id, module_id), progress.clone());
        progress
    }

    fn apply_section(
        &mut self,
        key: SectionKey,
        patch: &SectionPatch,
        now: DateTime<Utc>,
    ) -> SectionUpsert {
        let was_complete = self.completions.get(&key).is_some_and(|c| c.is_complete);
        let completion = patch.apply(self.completions.get(&key), key, now);
        self.completions.insert(key, completion.clone());

        let module = match patch.cascade {
            Some(cascade) if !was_complete && completion.is_complete => Some(self.apply_module(
                key.user_id,
                key.module_id,
                &cascade.patch_for(key.section_id),
                now,
            )),
            _ => None,
        };

        SectionUpsert {
            was_complete,
            completion,
            module,
        }
    }
}

/// In-memory adapter for tests and prototyping. One lock guards all tables,
/// so each call is atomic.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, StorageError> {
        self.tables
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }
}

#[async_trait]
impl CompletionStore for InMemoryRepository {
    async fn get_section_completion(
        &self,
        key: SectionKey,
    ) -> Result<Option<SectionCompletion>, StorageError> {
        Ok(self.lock()?.completions.get(&key).cloned())
    }

    async fn upsert_section_completion(
        &self,
        key: SectionKey,
        patch: &SectionPatch,
        now: DateTime<Utc>,
    ) -> Result<SectionUpsert, StorageError> {
        Ok(self.lock()?.apply_section(key, patch, now))
    }

    async fn get_module_progress(
        &self,
        user_id: UserId,
        module_id: ModuleId,
    ) -> Result<Option<ModuleProgress>, StorageError> {
        Ok(self.lock()?.modules.get(&(user_id, module_id)).cloned())
    }

    async fn upsert_module_progress(
        &self,
        user_id: UserId,
        module_id: ModuleId,
        patch: &ModulePatch,
        now: DateTime<Utc>,
    ) -> Result<ModuleProgress, StorageError> {
        Ok(self.lock()?.apply_module(user_id, module_id, patch, now))
    }

    async fn list_section_completions(
        &self,
        user_id: UserId,
        module_id: ModuleId,
    ) -> Result<Vec<SectionCompletion>, StorageError> {
        let guard = self.lock()?;
        let mut rows: Vec<SectionCompletion> = guard
            .completions
            .values()
            .filter(|c| c.user_id == user_id && c.module_id == module_id)
            .cloned()
            .collect();
        rows.sort_by_key(|c| c.section_id);
        Ok(rows)
    }

    async fn wipe_user_progress(&self, user_id: UserId) -> Result<WipeReport, StorageError> {
        let mut guard = self.lock()?;
        let tables = &mut *guard;

        let visits_before = tables.visits.len();
        tables.visits.retain(|v| v.user_id != user_id);
        let attempts_before = tables.attempts.len();
        tables.attempts.retain(|a| a.user_id != user_id);
        let completions_before = tables.completions.len();
        tables.completions.retain(|k, _| k.user_id != user_id);
        let modules_before = tables.modules.len();
        tables.modules.retain(|(u, _), _| *u != user_id);
        tables.idempotency.retain(|(u, _), _| *u != user_id);

        let removed = |before: usize, after: usize| (before - after) as u64;
        Ok(WipeReport {
            page_visits: removed(visits_before, tables.visits.len()),
            quiz_attempts: removed(attempts_before, tables.attempts.len()),
            section_completions: removed(completions_before, tables.completions.len()),
            module_progress: removed(modules_before, tables.modules.len()),
        })
    }
}

#[async_trait]
impl ProgressEvents for InMemoryRepository {
    async fn record_page_visit(
        &self,
        visit: PageVisit,
        patch: &SectionPatch,
    ) -> Result<RecordedVisit, StorageError> {
        let mut guard = self.lock()?;
        guard.next_visit_id += 1;
        let visit_id = guard.next_visit_id;
        let key = visit.key();
        let now = visit.visited_at;
        guard.visits.push(visit);
        let upsert = guard.apply_section(key, patch, now);
        Ok(RecordedVisit { visit_id, upsert })
    }

    async fn record_quiz_attempt(
        &self,
        attempt: NewQuizAttempt,
        patch: &SectionPatch,
    ) -> Result<RecordedQuiz, StorageError> {
        let mut guard = self.lock()?;
        let key = attempt.key;

        if let Some(idem) = &attempt.idempotency_key {
            if let Some(&existing) = guard.idempotency.get(&(key.user_id, idem.clone())) {
                let original = guard
                    .attempts
                    .iter()
                    .find(|a| a.id == existing)
                    .ok_or(StorageError::NotFound)?;
                if SectionKey::new(original.user_id, original.module_id, original.section_id) != key {
                    return Err(StorageError::Conflict(format!(
                        "idempotency key {idem} belongs to another section"
                    )));
                }
                let completion = guard
                    .completions
                    .get(&key)
                    .cloned()
                    .ok_or(StorageError::NotFound)?;
                return Ok(RecordedQuiz {
                    attempt_id: existing,
                    duplicate: true,
                    upsert: SectionUpsert {
                        was_complete: completion.is_complete,
                        completion,
                        module: None,
                    },
                });
            }
        }

        guard.next_attempt_id += 1;
        let attempt_id = QuizAttemptId::new(guard.next_attempt_id);
        let now = attempt.completed_at;
        if let Some(idem) = &attempt.idempotency_key {
            guard
                .idempotency
                .insert((key.user_id, idem.clone()), attempt_id);
        }
        guard.attempts.push(attempt.assign_id(attempt_id));
        let upsert = guard.apply_section(key, patch, now);

        Ok(RecordedQuiz {
            attempt_id,
            duplicate: false,
            upsert,
        })
    }

    async fn page_visits(&self, key: SectionKey) -> Result<Vec<PageVisit>, StorageError> {
        Ok(self
            .lock()?
            .visits
            .iter()
            .filter(|v| v.key() == key)
            .cloned()
            .collect())
    }

    async fn quiz_attempts(&self, key: SectionKey) -> Result<Vec<QuizAttempt>, StorageError> {
        Ok(self
            .lock()?
            .attempts
            .iter()
            .filter(|a| SectionKey::new(a.user_id, a.module_id, a.section_id) == key)
            .cloned()
            .collect())
    }
}

/// Aggregates the store traits behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub completions: Arc<dyn CompletionStore>,
    pub events: Arc<dyn ProgressEvents>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        let repo = InMemoryRepository::new();
        let completions: Arc<dyn CompletionStore> = Arc::new(repo.clone());
        let events: Arc<dyn ProgressEvents> = Arc::new(repo);
        Self {
            completions,
            events,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use progress_core::model::{ModuleCascade, PageNumber, QuizAnswer, SectionId};
    use progress_core::time::fixed_now;

    fn key(user: UserId, section: i64) -> SectionKey {
        SectionKey::new(
            user,
            ModuleId::try_from_raw(1).unwrap(),
            SectionId::try_from_raw(section).unwrap(),
        )
    }

    fn page(n: i64) -> PageNumber {
        PageNumber::try_from_raw(n).unwrap()
    }

    fn attempt(key: SectionKey, idem: Option<&str>) -> NewQuizAttempt {
        NewQuizAttempt::new(
            key,
            page(2),
            1,
            1,
            vec![QuizAnswer {
                question_index: 0,
                selected_option: "a".into(),
                is_correct: true,
            }],
            idem.map(str::to_string),
            fixed_now(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn visit_and_section_update_land_together() {
        let repo = InMemoryRepository::new();
        let key = key(UserId::random(), 1);
        let patch = SectionPatch::page_visited()
            .with_totals(Some(1), Some(0))
            .with_cascade(ModuleCascade { total_sections: 3 });

        let recorded = repo
            .record_page_visit(PageVisit::new(key, page(1), fixed_now()), &patch)
            .await
            .unwrap();

        assert!(recorded.upsert.became_complete());
        assert_eq!(recorded.upsert.module.as_ref().unwrap().unlocked_section, 2);
        assert_eq!(repo.page_visits(key).await.unwrap().len(), 1);
        let stored = repo.get_module_progress(key.user_id, key.module_id).await.unwrap();
        assert_eq!(stored.unwrap().unlocked_section, 2);
    }

    #[tokio::test]
    async fn cascade_only_runs_on_the_completion_edge() {
        let repo = InMemoryRepository::new();
        let key = key(UserId::random(), 1);
        let patch = SectionPatch::page_visited()
            .with_totals(Some(1), Some(0))
            .with_cascade(ModuleCascade { total_sections: 3 });

        let first = repo
            .upsert_section_completion(key, &patch, fixed_now())
            .await
            .unwrap();
        let second = repo
            .upsert_section_completion(key, &patch, fixed_now())
            .await
            .unwrap();

        assert!(first.module.is_some());
        assert!(second.module.is_none());
        assert_eq!(second.completion.pages_visited, 2);
    }

    #[tokio::test]
    async fn duplicate_idempotency_key_is_a_no_op() {
        let repo = InMemoryRepository::new();
        let key = key(UserId::random(), 1);
        let patch = SectionPatch::quiz_completed().with_totals(Some(3), Some(2));

        let first = repo
            .record_quiz_attempt(attempt(key, Some("q-1")), &patch)
            .await
            .unwrap();
        let again = repo
            .record_quiz_attempt(attempt(key, Some("q-1")), &patch)
            .await
            .unwrap();

        assert!(!first.duplicate);
        assert!(again.duplicate);
        assert_eq!(again.attempt_id, first.attempt_id);
        assert_eq!(again.upsert.completion.quizzes_completed, 1);
        assert_eq!(repo.quiz_attempts(key).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn idempotency_key_reused_across_sections_conflicts() {
        let repo = InMemoryRepository::new();
        let user = UserId::random();
        let patch = SectionPatch::quiz_completed();

        repo.record_quiz_attempt(attempt(key(user, 1), Some("shared")), &patch)
            .await
            .unwrap();
        let err = repo
            .record_quiz_attempt(attempt(key(user, 2), Some("shared")), &patch)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
    }

    #[tokio::test]
    async fn wipe_only_touches_one_user() {
        let repo = InMemoryRepository::new();
        let alice = key(UserId::random(), 1);
        let bob = key(UserId::random(), 1);
        let patch = SectionPatch::page_visited()
            .with_totals(Some(1), Some(0))
            .with_cascade(ModuleCascade { total_sections: 3 });
        for k in [alice, bob] {
            repo.record_page_visit(PageVisit::new(k, page(1), fixed_now()), &patch)
                .await
                .unwrap();
            repo.record_quiz_attempt(attempt(k, None), &SectionPatch::quiz_completed())
                .await
                .unwrap();
        }

        let report = repo.wipe_user_progress(alice.user_id).await.unwrap();
        assert_eq!(
            report,
            WipeReport {
                page_visits: 1,
                quiz_attempts: 1,
                section_completions: 1,
                module_progress: 1,
            }
        );
        assert!(repo.get_section_completion(alice).await.unwrap().is_none());
        assert!(repo.get_section_completion(bob).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn list_orders_sections() {
        let repo = InMemoryRepository::new();
        let user = UserId::random();
        for s in [3, 1, 2] {
            repo.upsert_section_completion(key(user, s), &SectionPatch::page_visited(), fixed_now())
                .await
                .unwrap();
        }
        let rows = repo
            .list_section_completions(user, ModuleId::try_from_raw(1).unwrap())
            .await
            .unwrap();
        let ids: Vec<u32> = rows.iter().map(|r| r.section_id.value()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }
}
