use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::ids::{ModuleId, PageNumber, SectionId, SectionKey, UserId};

//
// ─── PAGE VISIT ────────────────────────────────────────────────────────────────
//

/// Append-only log entry written once per page view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageVisit {
    pub user_id: UserId,
    pub module_id: ModuleId,
    pub section_id: SectionId,
    pub page_number: PageNumber,
    pub visited_at: DateTime<Utc>,
}

impl PageVisit {
    #[must_use]
    pub fn new(key: SectionKey, page_number: PageNumber, visited_at: DateTime<Utc>) -> Self {
        Self {
            user_id: key.user_id,
            module_id: key.module_id,
            section_id: key.section_id,
            page_number,
            visited_at,
        }
    }

    #[must_use]
    pub fn key(&self) -> SectionKey {
        SectionKey::new(self.user_id, self.module_id, self.section_id)
    }
}

//
// ─── SECTION COMPLETION ────────────────────────────────────────────────────────
//

/// Per-learner counters for one section, plus the derived completion flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionCompletion {
    pub user_id: UserId,
    pub module_id: ModuleId,
    pub section_id: SectionId,
    pub total_pages: u32,
    pub pages_visited: u32,
    pub quizzes_total: u32,
    pub quizzes_completed: u32,
    pub is_complete: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl SectionCompletion {
    /// The row a store creates on first touch: all counters zero, not complete.
    #[must_use]
    pub fn empty(key: SectionKey, now: DateTime<Utc>) -> Self {
        Self {
            user_id: key.user_id,
            module_id: key.module_id,
            section_id: key.section_id,
            total_pages: 0,
            pages_visited: 0,
            quizzes_total: 0,
            quizzes_completed: 0,
            is_complete: false,
            completed_at: None,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn key(&self) -> SectionKey {
        SectionKey::new(self.user_id, self.module_id, self.section_id)
    }
}

//
// ─── MODULE PROGRESS ───────────────────────────────────────────────────────────
//

/// Per-learner unlock pointer for a module.
///
/// `unlocked_section` is the highest section the learner may open; it may be
/// one past the module's last section once everything is complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleProgress {
    pub user_id: UserId,
    pub module_id: ModuleId,
    pub unlocked_section: u32,
    pub completed: bool,
    pub updated_at: DateTime<Utc>,
}

impl ModuleProgress {
    /// Fresh progress: only section 1 unlocked.
    #[must_use]
    pub fn initial(user_id: UserId, module_id: ModuleId, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            module_id,
            unlocked_section: 1,
            completed: false,
            updated_at: now,
        }
    }
}
