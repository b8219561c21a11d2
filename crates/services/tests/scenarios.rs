use std::sync::Arc;

use progress_core::model::{ModuleId, QuizAnswer, UserId};
use progress_core::time::fixed_now;
use progress_core::{Curriculum, SectionLayout};
use services::{
    Clock, ModuleRequest, PageVisitRequest, ProgressError, ProgressTracker, QuizCompletionRequest,
    SectionRequest, TrackerConfig,
};
use storage::repository::{CompletionStore, InMemoryRepository, Storage};

fn tracker(repo: &InMemoryRepository) -> ProgressTracker {
    ProgressTracker::new(
        Clock::fixed(fixed_now()),
        Arc::new(repo.clone()),
        Arc::new(repo.clone()),
    )
}

fn section(user: UserId, module: i64, section: i64) -> SectionRequest {
    SectionRequest {
        user_id: Some(user),
        module_id: module,
        section_id: section,
    }
}

fn visit(user: UserId, module: i64, section: i64, page: i64) -> PageVisitRequest {
    PageVisitRequest {
        user_id: Some(user),
        module_id: module,
        section_id: section,
        page_number: page,
        total_pages: Some(2),
        quizzes_total: Some(1),
    }
}

fn quiz(user: UserId, module: i64, section: i64, idem: Option<&str>) -> QuizCompletionRequest {
    QuizCompletionRequest {
        user_id: Some(user),
        module_id: module,
        section_id: section,
        page_number: 2,
        score: 2,
        total_questions: 3,
        answers: vec![QuizAnswer {
            question_index: 0,
            selected_option: "c".into(),
            is_correct: true,
        }],
        idempotency_key: idem.map(str::to_string),
        total_pages: Some(2),
        quizzes_total: Some(1),
    }
}

fn module(n: i64) -> ModuleId {
    ModuleId::try_from_raw(n).unwrap()
}

#[tokio::test]
async fn two_pages_and_a_quiz_complete_the_first_section() {
    let repo = InMemoryRepository::new();
    let tracker = tracker(&repo);
    let user = UserId::random();

    tracker.record_page_visit(visit(user, 1, 1, 1)).await.unwrap();
    tracker.record_page_visit(visit(user, 1, 1, 2)).await.unwrap();
    let done = tracker
        .record_quiz_completion(quiz(user, 1, 1, None))
        .await
        .unwrap();

    assert!(done.section_completion.is_complete);
    assert_eq!(done.section_completion.pages_visited, 2);
    assert_eq!(done.section_completion.quizzes_completed, 1);
    let progress = repo
        .get_module_progress(user, module(1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(progress.unlocked_section, 2);
    assert!(!progress.completed);
}

#[tokio::test]
async fn fresh_learner_cannot_open_section_two() {
    let tracker = tracker(&InMemoryRepository::new());
    let user = UserId::random();

    let decision = tracker.check_access(section(user, 1, 2)).await.unwrap();
    assert!(!decision.has_access);
    assert_eq!(decision.unlocked_section, 1);
    assert!(!decision.degraded);

    assert!(tracker.check_access(section(user, 1, 1)).await.unwrap().has_access);
}

#[tokio::test]
async fn single_section_module_completes_with_its_section() {
    let repo = InMemoryRepository::new();
    let tracker = tracker(&repo);
    let user = UserId::random();

    tracker.record_page_visit(visit(user, 6, 1, 1)).await.unwrap();
    tracker.record_page_visit(visit(user, 6, 1, 2)).await.unwrap();
    let done = tracker
        .record_quiz_completion(quiz(user, 6, 1, None))
        .await
        .unwrap();

    let progress = done.module_progress.expect("cascade ran");
    assert!(progress.completed);
    assert_eq!(progress.unlocked_section, 2);
}

#[tokio::test]
async fn force_complete_without_visits_still_unlocks() {
    let repo = InMemoryRepository::new();
    let tracker = tracker(&repo);
    let user = UserId::random();

    let forced = tracker
        .force_complete_section(section(user, 3, 1))
        .await
        .unwrap();

    assert!(forced.section_completion.is_complete);
    assert_eq!(forced.section_completion.pages_visited, 0);
    assert_eq!(forced.section_completion.completed_at, Some(fixed_now()));
    assert_eq!(forced.module_progress.unlocked_section, 2);
    assert!(tracker.check_access(section(user, 3, 2)).await.unwrap().has_access);
}

#[tokio::test]
async fn retried_quiz_submission_counts_once() {
    let repo = InMemoryRepository::new();
    let tracker = tracker(&repo);
    let user = UserId::random();

    let first = tracker
        .record_quiz_completion(quiz(user, 1, 1, Some("sub-1")))
        .await
        .unwrap();
    let retry = tracker
        .record_quiz_completion(quiz(user, 1, 1, Some("sub-1")))
        .await
        .unwrap();

    assert!(!first.duplicate);
    assert!(retry.duplicate);
    assert_eq!(retry.quiz_attempt_id, first.quiz_attempt_id);
    assert_eq!(retry.section_completion.quizzes_completed, 1);

    let other = tracker
        .record_quiz_completion(quiz(user, 1, 1, Some("sub-2")))
        .await
        .unwrap();
    assert!(!other.duplicate);
    assert_eq!(other.section_completion.quizzes_completed, 2);
}

#[tokio::test]
async fn idempotency_key_reused_on_another_section_is_rejected() {
    let tracker = tracker(&InMemoryRepository::new());
    let user = UserId::random();

    tracker.force_complete_section(section(user, 1, 1)).await.unwrap();
    tracker
        .record_quiz_completion(quiz(user, 1, 1, Some("shared")))
        .await
        .unwrap();
    let err = tracker
        .record_quiz_completion(quiz(user, 1, 2, Some("shared")))
        .await
        .unwrap_err();
    assert!(matches!(err, ProgressError::BadRequest(_)));
}

#[tokio::test]
async fn quiz_reset_reopens_section_but_keeps_unlock() {
    let repo = InMemoryRepository::new();
    let tracker = tracker(&repo);
    let user = UserId::random();

    tracker.record_page_visit(visit(user, 2, 1, 1)).await.unwrap();
    tracker.record_page_visit(visit(user, 2, 1, 2)).await.unwrap();
    tracker
        .record_quiz_completion(quiz(user, 2, 1, None))
        .await
        .unwrap();

    let reopened = tracker.reset_quiz(section(user, 2, 1)).await.unwrap();
    assert!(!reopened.is_complete);
    assert_eq!(reopened.quizzes_completed, 0);
    assert!(reopened.completed_at.is_none());

    let decision = tracker.check_access(section(user, 2, 2)).await.unwrap();
    assert!(decision.has_access);
    assert_eq!(decision.unlocked_section, 2);
}

#[tokio::test]
async fn wipe_relocks_everything_for_one_learner() {
    let repo = InMemoryRepository::new();
    let tracker = tracker(&repo);
    let alice = UserId::random();
    let bob = UserId::random();

    for user in [alice, bob] {
        tracker.force_complete_section(section(user, 1, 1)).await.unwrap();
    }
    let report = tracker.wipe_user(Some(alice)).await.unwrap();
    assert_eq!(report.section_completions, 1);
    assert_eq!(report.module_progress, 1);

    assert!(!tracker.check_access(section(alice, 1, 2)).await.unwrap().has_access);
    assert!(tracker.check_access(section(bob, 1, 2)).await.unwrap().has_access);
    assert!(matches!(
        tracker.wipe_user(None).await.unwrap_err(),
        ProgressError::Unauthorized
    ));
}

#[tokio::test]
async fn curriculum_layout_supplies_missing_totals() {
    let curriculum = Curriculum::default()
        .with_section(
            module(4),
            progress_core::model::SectionId::FIRST,
            SectionLayout {
                total_pages: 1,
                quizzes_total: 0,
            },
        )
        .unwrap();
    let tracker = ProgressTracker::from_storage(Clock::fixed(fixed_now()), &Storage::in_memory())
        .with_config(TrackerConfig::default().with_curriculum(curriculum));
    let user = UserId::random();

    let mut req = visit(user, 4, 1, 1);
    req.total_pages = None;
    req.quizzes_total = None;
    let res = tracker.record_page_visit(req).await.unwrap();

    assert_eq!(res.section_completion.total_pages, 1);
    assert!(res.section_completion.is_complete);
    assert_eq!(res.unlocked_next, Some(2));
}

#[tokio::test]
async fn overview_tracks_the_module_through_completion() {
    let tracker = tracker(&InMemoryRepository::new());
    let user = UserId::random();
    let overview = ModuleRequest {
        user_id: Some(user),
        module_id: 5,
    };

    let start = tracker.module_overview(overview.clone()).await.unwrap();
    assert_eq!(start.total_sections, 3);
    assert_eq!(start.unlocked_section, 1);

    for s in 1..=3 {
        tracker.force_complete_section(section(user, 5, s)).await.unwrap();
    }
    let end = tracker.module_overview(overview).await.unwrap();
    assert!(end.completed);
    assert_eq!(end.unlocked_section, 4);
    assert!(end.sections.iter().all(|s| s.completion.is_some()));
}

#[tokio::test]
async fn sqlite_backed_tracker_runs_the_same_flow() {
    let storage = Storage::sqlite("sqlite:file:memdb_tracker_flow?mode=memory&cache=shared")
        .await
        .expect("sqlite storage");
    let tracker = ProgressTracker::from_storage(Clock::fixed(fixed_now()), &storage);
    let user = UserId::random();

    tracker.record_page_visit(visit(user, 1, 1, 1)).await.unwrap();
    tracker.record_page_visit(visit(user, 1, 1, 2)).await.unwrap();
    let done = tracker
        .record_quiz_completion(quiz(user, 1, 1, Some("sqlite-1")))
        .await
        .unwrap();
    assert!(done.section_completion.is_complete);
    assert_eq!(done.module_progress.unwrap().unlocked_section, 2);

    let retry = tracker
        .record_quiz_completion(quiz(user, 1, 1, Some("sqlite-1")))
        .await
        .unwrap();
    assert!(retry.duplicate);

    let locked = tracker
        .record_page_visit(visit(user, 1, 3, 1))
        .await
        .unwrap_err();
    assert!(matches!(locked, ProgressError::SectionLocked { .. }));
}
