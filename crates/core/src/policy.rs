//! Pure unlock decisions. Nothing in here touches storage.

use serde::{Deserialize, Serialize};

use crate::model::{SectionCompletion, SectionId};

/// Where a single section stands for one learner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionState {
    Locked,
    InProgress,
    Complete,
}

impl SectionState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SectionState::Locked => "locked",
            SectionState::InProgress => "in_progress",
            SectionState::Complete => "complete",
        }
    }
}

/// A section is complete once every page was seen and every quiz was taken.
#[must_use]
pub fn is_section_complete(completion: &SectionCompletion) -> bool {
    completion.pages_visited >= completion.total_pages
        && completion.quizzes_completed >= completion.quizzes_total
}

/// Unlock pointer after `completed` finishes. Never moves backwards.
#[must_use]
pub fn next_unlocked_section(current_unlocked: u32, completed: SectionId) -> u32 {
    current_unlocked.max(completed.value().saturating_add(1))
}

#[must_use]
pub fn has_access(section: SectionId, unlocked_section: u32) -> bool {
    section.value() <= unlocked_section
}

/// A module is complete once the pointer has moved past its last section.
/// A single-section module therefore completes with its only section.
#[must_use]
pub fn is_module_complete(unlocked_section: u32, total_sections: u32) -> bool {
    unlocked_section > total_sections
}

/// Classifies a section given the module's unlock pointer and the stored counters.
#[must_use]
pub fn section_state(
    section: SectionId,
    unlocked_section: u32,
    completion: Option<&SectionCompletion>,
) -> SectionState {
    match completion {
        Some(c) if c.is_complete => SectionState::Complete,
        _ if has_access(section, unlocked_section) => SectionState::InProgress,
        _ => SectionState::Locked,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ModuleId, SectionKey, UserId};
    use crate::time::fixed_now;

    fn section(n: i64) -> SectionId {
        SectionId::try_from_raw(n).unwrap()
    }

    fn completion(pages: (u32, u32), quizzes: (u32, u32)) -> SectionCompletion {
        let key = SectionKey::new(UserId::random(), ModuleId::try_from_raw(1).unwrap(), section(1));
        SectionCompletion {
            total_pages: pages.1,
            pages_visited: pages.0,
            quizzes_total: quizzes.1,
            quizzes_completed: quizzes.0,
            ..SectionCompletion::empty(key, fixed_now())
        }
    }

    #[test]
    fn completion_needs_both_pages_and_quizzes() {
        assert!(!is_section_complete(&completion((1, 2), (1, 1))));
        assert!(!is_section_complete(&completion((2, 2), (0, 1))));
        assert!(is_section_complete(&completion((2, 2), (1, 1))));
        assert!(is_section_complete(&completion((3, 2), (2, 1))));
    }

    #[test]
    fn next_unlocked_never_decreases() {
        assert_eq!(next_unlocked_section(1, section(1)), 2);
        assert_eq!(next_unlocked_section(3, section(1)), 3);
        assert_eq!(next_unlocked_section(2, section(2)), 3);
        for current in 1..6 {
            for done in 1..6 {
                assert!(next_unlocked_section(current, section(done)) >= current);
            }
        }
    }

    #[test]
    fn access_is_gated_by_unlock_pointer() {
        for unlocked in 1..=4 {
            for s in 1..=6 {
                assert_eq!(has_access(section(s), unlocked), s <= i64::from(unlocked));
            }
        }
    }

    #[test]
    fn module_completion_follows_pointer() {
        assert!(!is_module_complete(3, 3));
        assert!(is_module_complete(4, 3));
        assert!(!is_module_complete(1, 1));
        assert!(is_module_complete(next_unlocked_section(1, section(1)), 1));
    }

    #[test]
    fn section_state_classification() {
        let done = SectionCompletion {
            is_complete: true,
            ..completion((0, 0), (0, 0))
        };
        assert_eq!(section_state(section(1), 1, None), SectionState::InProgress);
        assert_eq!(section_state(section(2), 1, None), SectionState::Locked);
        assert_eq!(section_state(section(1), 1, Some(&done)), SectionState::Complete);
        assert_eq!(SectionState::InProgress.as_str(), "in_progress");
    }
}
