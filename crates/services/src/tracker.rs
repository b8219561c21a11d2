use std::sync::Arc;

use chrono::{DateTime, Utc};

use progress_core::Clock;
use progress_core::model::{
    ModuleCascade, ModuleId, ModuleProgress, NewQuizAttempt, PageNumber, PageVisit,
    SectionCompletion, SectionId, SectionKey, SectionPatch, UserId,
};
use progress_core::policy;
use storage::repository::{CompletionStore, ProgressEvents, Storage, WipeReport};

use crate::config::{DegradedMode, TrackerConfig};
use crate::error::ProgressError;
use crate::requests::{
    AccessDecision, AccessRequest, ForceCompleteResponse, ModuleOverview, ModuleRequest,
    PageVisitRequest, PageVisitResponse, QuizCompletionRequest, QuizCompletionResponse,
    SectionRequest, SectionStatus,
};

//
// ─── VALIDATION ────────────────────────────────────────────────────────────────
//

fn require_user(user_id: Option<UserId>) -> Result<UserId, ProgressError> {
    user_id.ok_or(ProgressError::Unauthorized)
}

fn count(field: &str, raw: i64) -> Result<u32, ProgressError> {
    u32::try_from(raw).map_err(|_| {
        ProgressError::BadRequest(format!("{field} must be a non-negative integer, got {raw}"))
    })
}

//
// ─── TRACKER ───────────────────────────────────────────────────────────────────
//

/// Drives the per-section `Locked → InProgress → Complete` state machine.
///
/// Holds no cached state: every call re-reads the store, and every write is a
/// single store operation that applies the section change and, on the
/// completion edge, the module unlock.
#[derive(Clone)]
pub struct ProgressTracker {
    clock: Clock,
    config: TrackerConfig,
    completions: Arc<dyn CompletionStore>,
    events: Arc<dyn ProgressEvents>,
}

impl ProgressTracker {
    #[must_use]
    pub fn new(
        clock: Clock,
        completions: Arc<dyn CompletionStore>,
        events: Arc<dyn ProgressEvents>,
    ) -> Self {
        Self {
            clock,
            config: TrackerConfig::default(),
            completions,
            events,
        }
    }

    #[must_use]
    pub fn from_storage(clock: Clock, storage: &Storage) -> Self {
        Self::new(
            clock,
            Arc::clone(&storage.completions),
            Arc::clone(&storage.events),
        )
    }

    #[must_use]
    pub fn with_config(mut self, config: TrackerConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn section_key(
        &self,
        user_id: Option<UserId>,
        module_id: i64,
        section_id: i64,
    ) -> Result<SectionKey, ProgressError> {
        let user_id = require_user(user_id)?;
        let module_id = ModuleId::try_from_raw(module_id)?;
        let section_id = SectionId::try_from_raw(section_id)?;
        self.config.curriculum.check_section(module_id, section_id)?;
        Ok(SectionKey::new(user_id, module_id, section_id))
    }

    fn cascade(&self, module_id: ModuleId) -> ModuleCascade {
        ModuleCascade {
            total_sections: self.config.curriculum.total_sections_for_module(module_id),
        }
    }

    /// Section patch for a learner event, with totals from the request or the curriculum.
    fn event_patch(
        &self,
        base: SectionPatch,
        key: SectionKey,
        total_pages: Option<u32>,
        quizzes_total: Option<u32>,
    ) -> SectionPatch {
        let layout = self
            .config
            .curriculum
            .section_layout(key.module_id, key.section_id);
        base.with_totals(
            total_pages.or(layout.map(|l| l.total_pages)),
            quizzes_total.or(layout.map(|l| l.quizzes_total)),
        )
        .with_cascade(self.cascade(key.module_id))
    }

    async fn unlocked_section(
        &self,
        user_id: UserId,
        module_id: ModuleId,
    ) -> Result<u32, ProgressError> {
        let progress = self
            .completions
            .get_module_progress(user_id, module_id)
            .await?;
        Ok(progress.map_or(1, |p| p.unlocked_section))
    }

    async fn ensure_unlocked(&self, key: SectionKey) -> Result<(), ProgressError> {
        let unlocked_section = self.unlocked_section(key.user_id, key.module_id).await?;
        if policy::has_access(key.section_id, unlocked_section) {
            return Ok(());
        }
        tracing::debug!(
            user_id = %key.user_id,
            module_id = %key.module_id,
            section_id = %key.section_id,
            unlocked_section,
            "rejected event for locked section"
        );
        Err(ProgressError::SectionLocked {
            module: key.module_id.value(),
            section: key.section_id.value(),
            unlocked_section,
        })
    }

    fn log_transition(key: SectionKey, module: Option<&ModuleProgress>) {
        if let Some(progress) = module {
            tracing::info!(
                user_id = %key.user_id,
                module_id = %key.module_id,
                section_id = %key.section_id,
                unlocked_section = progress.unlocked_section,
                module_completed = progress.completed,
                "section completed"
            );
        }
    }

    /// Records that the learner opened a page of a section.
    ///
    /// Every visit counts, including revisits of the same page.
    ///
    /// # Errors
    ///
    /// Returns `Unauthorized` without a user, `BadRequest` for invalid ids,
    /// `SectionLocked` if the section is not unlocked yet, and
    /// `StoreUnavailable` if the store fails.
    pub async fn record_page_visit(
        &self,
        req: PageVisitRequest,
    ) -> Result<PageVisitResponse, ProgressError> {
        let key = self.section_key(req.user_id, req.module_id, req.section_id)?;
        let page_number = PageNumber::try_from_raw(req.page_number)?;
        self.ensure_unlocked(key).await?;

        let patch = self.event_patch(
            SectionPatch::page_visited(),
            key,
            req.total_pages,
            req.quizzes_total,
        );
        let recorded = self
            .events
            .record_page_visit(PageVisit::new(key, page_number, self.now()), &patch)
            .await?;

        Self::log_transition(key, recorded.upsert.module.as_ref());
        let unlocked_next = recorded.upsert.module.as_ref().map(|m| m.unlocked_section);
        Ok(PageVisitResponse {
            section_completion: recorded.upsert.completion,
            module_progress: recorded.upsert.module,
            unlocked_next,
        })
    }

    /// Records a scored quiz submission.
    ///
    /// A submission whose idempotency key was already used returns the
    /// original attempt id and the current section state without counting
    /// again.
    ///
    /// # Errors
    ///
    /// Returns `Unauthorized` without a user, `BadRequest` for invalid ids,
    /// scores or a key reused on another section, `SectionLocked` if the
    /// section is not unlocked yet, and `StoreUnavailable` if the store fails.
    pub async fn record_quiz_completion(
        &self,
        req: QuizCompletionRequest,
    ) -> Result<QuizCompletionResponse, ProgressError> {
        let key = self.section_key(req.user_id, req.module_id, req.section_id)?;
        let page_number = PageNumber::try_from_raw(req.page_number)?;
        let attempt = NewQuizAttempt::new(
            key,
            page_number,
            count("score", req.score)?,
            count("totalQuestions", req.total_questions)?,
            req.answers,
            req.idempotency_key,
            self.now(),
        )?;
        self.ensure_unlocked(key).await?;

        let patch = self.event_patch(
            SectionPatch::quiz_completed(),
            key,
            req.total_pages,
            req.quizzes_total,
        );
        let recorded = self.events.record_quiz_attempt(attempt, &patch).await?;

        if recorded.duplicate {
            tracing::info!(
                user_id = %key.user_id,
                attempt_id = %recorded.attempt_id,
                "ignored repeated quiz submission"
            );
        }
        Self::log_transition(key, recorded.upsert.module.as_ref());
        Ok(QuizCompletionResponse {
            quiz_attempt_id: recorded.attempt_id,
            section_completion: recorded.upsert.completion,
            duplicate: recorded.duplicate,
            module_progress: recorded.upsert.module,
        })
    }

    /// Answers whether the learner may open a section. Read-only.
    ///
    /// With `DegradedMode::UnlockAll`, a store failure yields an
    /// all-unlocked answer flagged `degraded` instead of an error.
    ///
    /// # Errors
    ///
    /// Returns `Unauthorized` without a user, `BadRequest` for invalid ids,
    /// and `StoreUnavailable` if the store fails in strict mode.
    pub async fn check_access(&self, req: AccessRequest) -> Result<AccessDecision, ProgressError> {
        let key = self.section_key(req.user_id, req.module_id, req.section_id)?;

        match self.unlocked_section(key.user_id, key.module_id).await {
            Ok(unlocked_section) => Ok(AccessDecision {
                has_access: policy::has_access(key.section_id, unlocked_section),
                unlocked_section,
                degraded: false,
            }),
            Err(ProgressError::StoreUnavailable(e))
                if self.config.degraded_mode == DegradedMode::UnlockAll =>
            {
                let total = self
                    .config
                    .curriculum
                    .total_sections_for_module(key.module_id);
                tracing::warn!(
                    user_id = %key.user_id,
                    module_id = %key.module_id,
                    error = %e,
                    "progress store unavailable, granting access in degraded mode"
                );
                Ok(AccessDecision {
                    has_access: true,
                    unlocked_section: total,
                    degraded: true,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Marks a section complete regardless of its counters and unlocks the next one.
    ///
    /// Does not check access; callers restrict this to administrators.
    ///
    /// # Errors
    ///
    /// Returns `Unauthorized` without a user, `BadRequest` for invalid ids,
    /// and `StoreUnavailable` if the store fails.
    pub async fn force_complete_section(
        &self,
        req: SectionRequest,
    ) -> Result<ForceCompleteResponse, ProgressError> {
        let key = self.section_key(req.user_id, req.module_id, req.section_id)?;
        let now = self.now();
        let cascade = self.cascade(key.module_id);

        let upsert = self
            .completions
            .upsert_section_completion(
                key,
                &SectionPatch::force_complete().with_cascade(cascade),
                now,
            )
            .await?;

        let module_progress = match upsert.module {
            Some(progress) => progress,
            // Already complete: the cascade did not fire, but the pointer
            // must still sit past this section.
            None => {
                self.completions
                    .upsert_module_progress(
                        key.user_id,
                        key.module_id,
                        &cascade.patch_for(key.section_id),
                        now,
                    )
                    .await?
            }
        };

        tracing::info!(
            user_id = %key.user_id,
            module_id = %key.module_id,
            section_id = %key.section_id,
            unlocked_section = module_progress.unlocked_section,
            "section force-completed"
        );
        Ok(ForceCompleteResponse {
            section_completion: upsert.completion,
            module_progress,
        })
    }

    /// Takes back one completed quiz and recomputes completion.
    ///
    /// The section may return to in-progress; the module's unlock pointer is
    /// left where it is.
    ///
    /// # Errors
    ///
    /// Returns `Unauthorized` without a user, `BadRequest` for invalid ids or
    /// a section with no recorded progress, and `StoreUnavailable` if the
    /// store fails.
    pub async fn reset_quiz(
        &self,
        req: SectionRequest,
    ) -> Result<SectionCompletion, ProgressError> {
        let key = self.section_key(req.user_id, req.module_id, req.section_id)?;
        if self.completions.get_section_completion(key).await?.is_none() {
            return Err(ProgressError::BadRequest(format!(
                "no progress recorded for section {} of module {}",
                key.section_id, key.module_id
            )));
        }

        let upsert = self
            .completions
            .upsert_section_completion(key, &SectionPatch::quiz_reset(), self.now())
            .await?;

        if upsert.was_complete && !upsert.completion.is_complete {
            tracing::info!(
                user_id = %key.user_id,
                module_id = %key.module_id,
                section_id = %key.section_id,
                "quiz reset reopened section"
            );
        }
        Ok(upsert.completion)
    }

    /// Summarizes every section of a module for one learner.
    ///
    /// # Errors
    ///
    /// Returns `Unauthorized` without a user, `BadRequest` for an invalid
    /// module id, and `StoreUnavailable` if the store fails.
    pub async fn module_overview(
        &self,
        req: ModuleRequest,
    ) -> Result<ModuleOverview, ProgressError> {
        let user_id = require_user(req.user_id)?;
        let module_id = ModuleId::try_from_raw(req.module_id)?;
        let total_sections = self.config.curriculum.total_sections_for_module(module_id);

        let progress = self
            .completions
            .get_module_progress(user_id, module_id)
            .await?;
        let (unlocked_section, completed) =
            progress.map_or((1, false), |p| (p.unlocked_section, p.completed));
        let mut completions = self
            .completions
            .list_section_completions(user_id, module_id)
            .await?;

        let mut sections = Vec::new();
        for n in 1..=total_sections {
            let section_id = SectionId::try_from_raw(i64::from(n))?;
            let completion = completions
                .iter()
                .position(|c| c.section_id == section_id)
                .map(|i| completions.swap_remove(i));
            sections.push(SectionStatus {
                section_id,
                state: policy::section_state(section_id, unlocked_section, completion.as_ref()),
                completion,
            });
        }

        Ok(ModuleOverview {
            module_id,
            total_sections,
            unlocked_section,
            completed,
            sections,
        })
    }

    /// Deletes every progress record of one learner. The only way the unlock
    /// pointer ever moves back.
    ///
    /// # Errors
    ///
    /// Returns `Unauthorized` without a user and `StoreUnavailable` if the
    /// store fails.
    pub async fn wipe_user(&self, user_id: Option<UserId>) -> Result<WipeReport, ProgressError> {
        let user_id = require_user(user_id)?;
        let report = self.completions.wipe_user_progress(user_id).await?;
        tracing::info!(user_id = %user_id, ?report, "wiped learner progress");
        Ok(report)
    }
}
