use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::ids::{ModuleId, SectionId, SectionKey, UserId};
use crate::model::progress::{ModuleProgress, SectionCompletion};
use crate::policy;

//
// ─── COUNTERS ──────────────────────────────────────────────────────────────────
//

/// Change to apply to a monotonic counter inside the store's critical section.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CounterOp {
    #[default]
    Keep,
    Increment(u32),
    /// Saturates at zero. Only the admin quiz reset emits this.
    Decrement(u32),
}

impl CounterOp {
    #[must_use]
    pub fn apply(self, value: u32) -> u32 {
        match self {
            CounterOp::Keep => value,
            CounterOp::Increment(n) => value.saturating_add(n),
            CounterOp::Decrement(n) => value.saturating_sub(n),
        }
    }

    #[must_use]
    pub fn is_decrement(self) -> bool {
        matches!(self, CounterOp::Decrement(n) if n > 0)
    }
}

//
// ─── SECTION PATCH ─────────────────────────────────────────────────────────────
//

/// Unlock cascade to run in the same unit as a section write, if that write
/// flips the section to complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleCascade {
    pub total_sections: u32,
}

impl ModuleCascade {
    #[must_use]
    pub fn patch_for(self, completed_section: SectionId) -> ModulePatch {
        ModulePatch::UnlockThrough {
            completed_section,
            total_sections: self.total_sections,
        }
    }
}

/// Describes one event's effect on a `SectionCompletion` row.
///
/// Stores apply it to the current row (or to the empty row) while holding
/// whatever serializes writes for that key, so increments never get lost.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SectionPatch {
    pub total_pages: Option<u32>,
    pub quizzes_total: Option<u32>,
    pub pages_visited: CounterOp,
    pub quizzes_completed: CounterOp,
    pub force_complete: bool,
    pub cascade: Option<ModuleCascade>,
}

impl SectionPatch {
    #[must_use]
    pub fn page_visited() -> Self {
        Self {
            pages_visited: CounterOp::Increment(1),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn quiz_completed() -> Self {
        Self {
            quizzes_completed: CounterOp::Increment(1),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn force_complete() -> Self {
        Self {
            force_complete: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn quiz_reset() -> Self {
        Self {
            quizzes_completed: CounterOp::Decrement(1),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_totals(mut self, total_pages: Option<u32>, quizzes_total: Option<u32>) -> Self {
        if total_pages.is_some() {
            self.total_pages = total_pages;
        }
        if quizzes_total.is_some() {
            self.quizzes_total = quizzes_total;
        }
        self
    }

    #[must_use]
    pub fn with_cascade(mut self, cascade: ModuleCascade) -> Self {
        self.cascade = Some(cascade);
        self
    }

    fn decrements(&self) -> bool {
        self.pages_visited.is_decrement() || self.quizzes_completed.is_decrement()
    }

    /// Computes the row that results from applying this patch.
    ///
    /// Completion sticks once reached, unless this patch decrements a
    /// counter, in which case it is recomputed from the counters.
    #[must_use]
    pub fn apply(
        &self,
        previous: Option<&SectionCompletion>,
        key: SectionKey,
        now: DateTime<Utc>,
    ) -> SectionCompletion {
        let mut next = previous
            .cloned()
            .unwrap_or_else(|| SectionCompletion::empty(key, now));
        let was_complete = next.is_complete;

        if let Some(total) = self.total_pages {
            next.total_pages = total;
        }
        if let Some(total) = self.quizzes_total {
            next.quizzes_total = total;
        }
        next.pages_visited = self.pages_visited.apply(next.pages_visited);
        next.quizzes_completed = self.quizzes_completed.apply(next.quizzes_completed);

        let sticky = was_complete && !self.decrements();
        next.is_complete = self.force_complete || sticky || policy::is_section_complete(&next);

        next.completed_at = match (was_complete, next.is_complete) {
            (_, false) => None,
            (false, true) => Some(now),
            (true, true) if self.force_complete => Some(now),
            (true, true) => next.completed_at.or(Some(now)),
        };
        next.updated_at = now;
        next
    }
}

/// Result of applying a `SectionPatch`, as reported by a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionUpsert {
    pub was_complete: bool,
    pub completion: SectionCompletion,
    /// Present when the patch carried a cascade and this write completed the section.
    pub module: Option<ModuleProgress>,
}

impl SectionUpsert {
    /// True only on the false→true edge.
    #[must_use]
    pub fn became_complete(&self) -> bool {
        !self.was_complete && self.completion.is_complete
    }
}

//
// ─── MODULE PATCH ──────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModulePatch {
    /// Advance the pointer past `completed_section`.
    UnlockThrough {
        completed_section: SectionId,
        total_sections: u32,
    },
}

impl ModulePatch {
    #[must_use]
    pub fn apply(
        &self,
        previous: Option<&ModuleProgress>,
        user_id: UserId,
        module_id: ModuleId,
        now: DateTime<Utc>,
    ) -> ModuleProgress {
        let mut next = previous
            .cloned()
            .unwrap_or_else(|| ModuleProgress::initial(user_id, module_id, now));

        match *self {
            ModulePatch::UnlockThrough {
                completed_section,
                total_sections,
            } => {
                next.unlocked_section =
                    policy::next_unlocked_section(next.unlocked_section, completed_section);
                next.completed = policy::is_module_complete(next.unlocked_section, total_sections);
            }
        }
        next.updated_at = now;
        next
    }
}
