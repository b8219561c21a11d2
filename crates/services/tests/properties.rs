//! Exhaustive checks over small event sequences.

use progress_core::model::{ModuleId, SectionId, UserId};
use progress_core::policy;
use progress_core::time::fixed_now;
use services::{
    Clock, PageVisitRequest, ProgressError, ProgressTracker, QuizCompletionRequest,
    SectionRequest,
};
use storage::repository::{CompletionStore, ProgressEvents, Storage};

#[derive(Debug, Clone, Copy)]
enum Event {
    Visit(i64),
    Quiz(i64),
    Force(i64),
}

const EVENTS: [Event; 9] = [
    Event::Visit(1),
    Event::Visit(2),
    Event::Visit(3),
    Event::Quiz(1),
    Event::Quiz(2),
    Event::Quiz(3),
    Event::Force(1),
    Event::Force(2),
    Event::Force(3),
];

fn sequences(len: usize) -> Vec<Vec<Event>> {
    let mut out = vec![Vec::new()];
    for _ in 0..len {
        out = out
            .into_iter()
            .flat_map(|prefix| {
                EVENTS.iter().map(move |e| {
                    let mut next = prefix.clone();
                    next.push(*e);
                    next
                })
            })
            .collect();
    }
    out
}

async fn apply(tracker: &ProgressTracker, user: UserId, event: Event) -> Result<(), ProgressError> {
    match event {
        Event::Visit(section) => tracker
            .record_page_visit(PageVisitRequest {
                user_id: Some(user),
                module_id: 1,
                section_id: section,
                page_number: 1,
                total_pages: Some(1),
                quizzes_total: Some(1),
            })
            .await
            .map(drop),
        Event::Quiz(section) => tracker
            .record_quiz_completion(QuizCompletionRequest {
                user_id: Some(user),
                module_id: 1,
                section_id: section,
                page_number: 1,
                score: 1,
                total_questions: 1,
                answers: Vec::new(),
                idempotency_key: None,
                total_pages: Some(1),
                quizzes_total: Some(1),
            })
            .await
            .map(drop),
        Event::Force(section) => tracker
            .force_complete_section(SectionRequest {
                user_id: Some(user),
                module_id: 1,
                section_id: section,
            })
            .await
            .map(drop),
    }
}

#[tokio::test]
async fn unlock_pointer_never_decreases_and_module_completion_tracks_it() {
    let module = ModuleId::try_from_raw(1).unwrap();

    for seq in sequences(4) {
        let storage = Storage::in_memory();
        let tracker = ProgressTracker::from_storage(Clock::fixed(fixed_now()), &storage);
        let user = UserId::random();
        let mut last = 1;

        for event in &seq {
            match apply(&tracker, user, *event).await {
                Ok(()) | Err(ProgressError::SectionLocked { .. }) => {}
                Err(other) => panic!("{seq:?}: unexpected {other:?}"),
            }

            let unlocked = storage
                .completions
                .get_module_progress(user, module)
                .await
                .unwrap()
                .map_or((1, false), |p| (p.unlocked_section, p.completed));
            assert!(unlocked.0 >= last, "{seq:?}: pointer went back");
            assert_eq!(unlocked.1, unlocked.0 > 3, "{seq:?}: completed flag");
            last = unlocked.0;
        }
    }
}

#[tokio::test]
async fn access_matches_the_pointer_for_every_section() {
    let storage = Storage::in_memory();
    let tracker = ProgressTracker::from_storage(Clock::fixed(fixed_now()), &storage);
    let user = UserId::random();

    for completed in 0..=3 {
        if completed > 0 {
            apply(&tracker, user, Event::Force(completed)).await.unwrap();
        }
        let unlocked = u32::try_from(completed + 1).unwrap();
        for section in 1..=3 {
            let decision = tracker
                .check_access(SectionRequest {
                    user_id: Some(user),
                    module_id: 1,
                    section_id: section,
                })
                .await
                .unwrap();
            assert_eq!(decision.unlocked_section, unlocked);
            assert_eq!(
                decision.has_access,
                policy::has_access(SectionId::try_from_raw(section).unwrap(), unlocked)
            );
            assert_eq!(decision.has_access, section <= completed + 1);
        }
    }
}

#[tokio::test]
async fn revisits_count_but_cascade_fires_once() {
    let storage = Storage::in_memory();
    let tracker = ProgressTracker::from_storage(Clock::fixed(fixed_now()), &storage);
    let user = UserId::random();
    let visit = PageVisitRequest {
        user_id: Some(user),
        module_id: 2,
        section_id: 1,
        page_number: 1,
        total_pages: Some(1),
        quizzes_total: Some(0),
    };

    let first = tracker.record_page_visit(visit.clone()).await.unwrap();
    let second = tracker.record_page_visit(visit).await.unwrap();

    assert!(first.module_progress.is_some());
    assert!(second.module_progress.is_none());
    assert_eq!(second.section_completion.pages_visited, 2);
    assert_eq!(second.section_completion.completed_at, first.section_completion.completed_at);

    let key = second.section_completion.key();
    assert_eq!(storage.events.page_visits(key).await.unwrap().len(), 2);
}

#[tokio::test]
async fn concurrent_quiz_submissions_lose_no_increment() {
    let storage = Storage::in_memory();
    let tracker = ProgressTracker::from_storage(Clock::system(), &storage);
    let user = UserId::random();

    let mut handles = Vec::new();
    for _ in 0..16 {
        let tracker = tracker.clone();
        handles.push(tokio::spawn(async move {
            tracker
                .record_quiz_completion(QuizCompletionRequest {
                    user_id: Some(user),
                    module_id: 1,
                    section_id: 1,
                    page_number: 1,
                    score: 0,
                    total_questions: 1,
                    answers: Vec::new(),
                    idempotency_key: None,
                    total_pages: Some(5),
                    quizzes_total: Some(20),
                })
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let key = progress_core::model::SectionKey::new(
        user,
        ModuleId::try_from_raw(1).unwrap(),
        SectionId::FIRST,
    );
    let completion = storage
        .completions
        .get_section_completion(key)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(completion.quizzes_completed, 16);
}
