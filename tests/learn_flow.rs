use coursetrack::config::LearnConfig;
use coursetrack::learn::{
    Answer, CertificateStatus, Chapter, Course, CourseEngine, DisplayMode, Grade,
    InMemoryLearningStore, LearnError, LearningStore, Part, PartId, PartIntent, Question, Quiz,
    QuizSubmission,
};
use serde_json::json;

const USER: i32 = 42;
const PASSWORD: &str = "open-sesame";

fn question(part_id: PartId, n: i32) -> Question {
    let id = part_id * 100 + n;
    Question {
        id,
        quiz_id: part_id * 10,
        text: format!("Question {}", id),
        answers: vec![
            Answer {
                id: id * 10 + 1,
                question_id: id,
                text: format!("right {}", id),
                is_correct: true,
            },
            Answer {
                id: id * 10 + 2,
                question_id: id,
                text: format!("wrong {}", id),
                is_correct: false,
            },
        ],
    }
}

fn part(id: PartId, title: &str, index: i32, questions: i32) -> Part {
    let quizzes = if questions > 0 {
        vec![Quiz {
            id: id * 10,
            part_id: id,
            title: Some(format!("{} quiz", title)),
            questions: (1..=questions).map(|n| question(id, n)).collect(),
        }]
    } else {
        Vec::new()
    };
    Part {
        id,
        chapter_id: 1,
        title: title.to_string(),
        description: String::new(),
        index,
        quizzes,
    }
}

/// Chapter 1: Introduction, Part A with a two-question quiz.
fn uk_course() -> Course {
    Course {
        id: 1,
        title: "UK".into(),
        chapters: vec![Chapter {
            id: 1,
            course_id: 1,
            title: "Chapter 1".into(),
            index: 1,
            parts: vec![part(1, "Introduction", 1, 0), part(2, "Part A", 2, 2)],
        }],
    }
}

/// Introduction, Part A (five questions), Part B (reading only), Part C (two questions).
fn long_course() -> Course {
    Course {
        id: 2,
        title: "History".into(),
        chapters: vec![Chapter {
            id: 2,
            course_id: 2,
            title: "Chapter 1".into(),
            index: 1,
            parts: vec![
                part(10, "Introduction", 1, 0),
                part(11, "Part A", 2, 5),
                part(12, "Part B", 3, 0),
                part(13, "Part C", 4, 2),
            ],
        }],
    }
}

/// Answers the first `right` questions of the part correctly and the rest wrongly.
fn answers(part_id: PartId, questions: i32, right: i32) -> QuizSubmission {
    (1..=questions).fold(QuizSubmission::new(), |submission, n| {
        let qid = part_id * 100 + n;
        let answer = if n <= right { qid * 10 + 1 } else { qid * 10 + 2 };
        submission.answer(qid, answer)
    })
}

async fn engine() -> CourseEngine<InMemoryLearningStore> {
    let store = InMemoryLearningStore::new();
    store.insert_course(uk_course()).await;
    store.insert_course(long_course()).await;
    CourseEngine::new(store, LearnConfig::default().with_master_password(PASSWORD))
}

#[tokio::test]
async fn uk_course_walkthrough() {
    let engine = engine().await;

    let nav = engine.resume(USER, "UK").await.unwrap();
    assert_eq!(nav.part_id, Some(1));
    assert_eq!(nav.mode, DisplayMode::Content);
    assert_eq!(nav.progress.percent, 0);

    engine.mark_part_viewed(USER, "UK", 1).await.unwrap();
    let nav = engine.resume(USER, "UK").await.unwrap();
    assert_eq!(nav.part_id, Some(2));
    assert_eq!(nav.mode, DisplayMode::Content);
    assert_eq!(nav.locked_quiz_ids, vec![20]);

    engine.mark_part_viewed(USER, "UK", 2).await.unwrap();
    let failed = engine
        .submit_quiz(USER, "UK", 2, answers(2, 2, 1))
        .await
        .unwrap();
    assert!(!failed.passed);
    assert_eq!(failed.percent, 50);
    assert_eq!(failed.attempt_count, 1);
    assert_eq!(failed.navigation.progress.percent, 0);
    assert_eq!(failed.navigation.part_id, Some(2));
    assert!(failed.navigation.actions.show_reattempt);
    assert_eq!(failed.navigation.certificate, CertificateStatus::NotEligible);

    let passed = engine
        .submit_quiz(USER, "UK", 2, answers(2, 2, 2))
        .await
        .unwrap();
    assert!(passed.passed);
    assert_eq!(passed.attempt_count, 0);
    assert_eq!(passed.navigation.progress.percent, 100);

    let store = engine.store();
    assert!(store.get_attempts(USER, 1, &[2]).await.unwrap().is_empty());
    let scores = store.get_scores(USER, 1).await.unwrap();
    assert_eq!(scores.len(), 1);
    assert_eq!(scores[0].correct_answers, 2);

    match passed.navigation.certificate {
        CertificateStatus::Issued(cert) => {
            assert_eq!(cert.grade, Grade::APlus);
            assert_eq!(cert.code.len(), 8);
        }
        other => panic!("expected an issued certificate, got {:?}", other),
    }
}

#[tokio::test]
async fn reset_is_idempotent() {
    let engine = engine().await;
    engine.mark_part_viewed(USER, "UK", 1).await.unwrap();
    engine
        .submit_quiz(USER, "UK", 2, answers(2, 2, 2))
        .await
        .unwrap();
    assert!(engine.store().get_certificate(USER, 1).await.unwrap().is_some());

    engine.reset_user_course(USER, "UK").await.unwrap();
    engine.reset_user_course(USER, "UK").await.unwrap();

    let store = engine.store();
    assert!(store.get_viewed_parts(USER).await.unwrap().is_empty());
    assert!(store.get_scores(USER, 1).await.unwrap().is_empty());
    assert!(store.get_certificate(USER, 1).await.unwrap().is_none());
    assert!(store.get_resume_pointer(USER, 1).await.unwrap().is_none());

    let nav = engine.resume(USER, "UK").await.unwrap();
    assert_eq!(nav.part_id, Some(1));
    assert_eq!(nav.progress.percent, 0);
}

#[tokio::test]
async fn resubmission_replaces_the_score_record() {
    let engine = engine().await;
    engine
        .submit_quiz(USER, "History", 11, answers(11, 5, 1))
        .await
        .unwrap();
    engine
        .submit_quiz(USER, "History", 11, answers(11, 5, 4))
        .await
        .unwrap();

    let scores = engine.store().get_scores(USER, 2).await.unwrap();
    assert_eq!(scores.len(), 1);
    assert_eq!(scores[0].correct_answers, 4);
    assert_eq!(scores[0].incorrect_answers, 1);
}

#[tokio::test]
async fn attempt_ladder_climbs_and_clears() {
    let engine = engine().await;
    let store = engine.store();

    for expected in 1..=3u8 {
        let outcome = engine
            .submit_quiz(USER, "History", 11, answers(11, 5, 0))
            .await
            .unwrap();
        assert_eq!(outcome.attempt_count, expected);

        let track = store.get_attempts(USER, 2, &[11]).await.unwrap()[&11];
        assert_eq!(track.attempt_count, expected);
        assert_eq!(track.window_closed_time.is_some(), expected >= 2);
    }

    // Locked out: resume moves past the part instead of offering a retry.
    engine.mark_part_viewed(USER, "History", 10).await.unwrap();
    let nav = engine.resume(USER, "History").await.unwrap();
    assert_eq!(nav.part_id, Some(12));
    assert!(nav.parts[&11].attempt_count == 3 && !nav.parts[&11].complete);

    engine
        .submit_quiz(USER, "History", 11, answers(11, 5, 5))
        .await
        .unwrap();
    assert!(store.get_attempts(USER, 2, &[11]).await.unwrap().is_empty());
}

#[tokio::test]
async fn second_failure_reports_cooldown() {
    let engine = engine().await;
    engine.mark_part_viewed(USER, "History", 10).await.unwrap();
    for _ in 0..2 {
        engine
            .submit_quiz(USER, "History", 11, answers(11, 5, 1))
            .await
            .unwrap();
    }

    let nav = engine
        .open_part(USER, "History", 11, PartIntent::Quiz)
        .await
        .unwrap();
    assert_eq!(nav.mode, DisplayMode::QuizResult);
    let retry = nav.retry.expect("retry window");
    assert_eq!(retry.attempts_remaining, 1);
    let closed = retry.window_closed_time.expect("window stamp");
    assert_eq!(
        retry.retry_available_at,
        Some(closed + chrono::Duration::seconds(300))
    );
    assert_eq!(nav.answers.len(), 5);
    assert_eq!(nav.answers.iter().filter(|a| a.is_correct).count(), 1);
}

#[tokio::test]
async fn certificate_grade_is_frozen() {
    let engine = engine().await;
    engine.mark_part_viewed(USER, "History", 10).await.unwrap();
    engine.mark_part_viewed(USER, "History", 12).await.unwrap();
    engine
        .submit_quiz(USER, "History", 11, answers(11, 5, 3))
        .await
        .unwrap();
    let outcome = engine
        .submit_quiz(USER, "History", 13, answers(13, 2, 2))
        .await
        .unwrap();

    // 5 of 7 questions right = 71%.
    let issued = outcome
        .navigation
        .certificate
        .certificate()
        .cloned()
        .expect("certificate issued");
    assert_eq!(issued.grade, Grade::BPlus);

    engine
        .submit_quiz(USER, "History", 11, answers(11, 5, 5))
        .await
        .unwrap();
    let nav = engine.resume(USER, "History").await.unwrap();
    assert_eq!(nav.certificate, CertificateStatus::Issued(issued.clone()));

    let verification = engine.verify_certificate(&issued.code).await.unwrap();
    assert!(verification.is_valid);
    assert_eq!(verification.certificate, Some(issued));
}

#[tokio::test]
async fn introduction_gates_a_fresh_learner() {
    let engine = engine().await;
    engine
        .store()
        .insert_raw_score(
            USER,
            2,
            json!({
                "part_id": 13,
                "quiz_id": 130,
                "total_questions_in_quiz": 2,
                "correct_option": {},
                "quiz_result": {"correct_answers": 2, "incorrect_answers": 0},
            }),
        )
        .await;

    let nav = engine.resume(USER, "History").await.unwrap();
    assert_eq!(nav.part_id, Some(10));
    assert_eq!(nav.mode, DisplayMode::Content);
}

#[tokio::test]
async fn locked_quiz_serves_content() {
    let engine = engine().await;
    let nav = engine
        .open_part(USER, "History", 13, PartIntent::Quiz)
        .await
        .unwrap();
    assert_eq!(nav.mode, DisplayMode::Content);
    assert_eq!(nav.part_id, Some(13));

    engine.mark_part_viewed(USER, "History", 13).await.unwrap();
    let nav = engine
        .open_part(USER, "History", 13, PartIntent::Quiz)
        .await
        .unwrap();
    assert_eq!(nav.mode, DisplayMode::QuizForm);

    let err = engine
        .open_part(USER, "History", 2, PartIntent::Content)
        .await
        .unwrap_err();
    assert!(matches!(err, LearnError::NotFound(_)));
}

#[tokio::test]
async fn autocomplete_requires_the_master_password() {
    let engine = engine().await;

    let err = engine
        .autocomplete(USER, "History", Some("guess"))
        .await
        .unwrap_err();
    assert!(matches!(err, LearnError::Unauthorized(_)));
    assert!(engine.store().get_viewed_parts(USER).await.unwrap().is_empty());
    assert!(engine.store().get_scores(USER, 2).await.unwrap().is_empty());

    engine
        .submit_quiz(USER, "History", 11, answers(11, 5, 0))
        .await
        .unwrap();

    let summary = engine
        .autocomplete(USER, "History", Some(PASSWORD))
        .await
        .unwrap();
    assert_eq!(summary.parts_marked, 4);
    assert_eq!(summary.quizzes_scored, 2);
    assert!(engine
        .store()
        .get_attempts(USER, 2, &[11, 13])
        .await
        .unwrap()
        .is_empty());

    let nav = engine.resume(USER, "History").await.unwrap();
    assert_eq!(nav.progress.percent, 100);
    assert_eq!(nav.part_id, Some(13));
    match nav.certificate {
        CertificateStatus::Issued(cert) => assert_eq!(cert.grade, Grade::APlus),
        other => panic!("expected an issued certificate, got {:?}", other),
    }
}

#[tokio::test]
async fn malformed_and_legacy_scores_are_tolerated() {
    let engine = engine().await;
    let store = engine.store();
    store
        .insert_raw_score(USER, 2, json!({"part_id": "eleven"}))
        .await;
    store
        .insert_raw_score(
            USER,
            2,
            json!({"part_id": 13, "quiz_id": 130, "correct_answers": 2, "incorrect_answers": 0}),
        )
        .await;
    for part_id in [10, 12, 13] {
        engine.mark_part_viewed(USER, "History", part_id).await.unwrap();
    }

    let nav = engine.resume(USER, "History").await.unwrap();
    assert_eq!(nav.part_id, Some(11));
    assert!(nav.parts[&13].complete);
    assert_eq!(nav.progress.completed_parts, 2);
    assert_eq!(nav.progress.total_parts, 3);
}

#[tokio::test]
async fn catalogue_and_bulk_reset() {
    let engine = engine().await;
    engine.mark_part_viewed(USER, "History", 10).await.unwrap();
    engine.mark_part_viewed(7, "History", 10).await.unwrap();

    let statuses = engine.course_statuses(USER).await.unwrap();
    let history = statuses.iter().find(|s| s.course == "History").unwrap();
    assert_eq!(
        history.status,
        coursetrack::learn::CourseStatus::InProgress
    );

    engine.reset_course_for_all_users("History").await.unwrap();
    assert!(engine.store().get_viewed_parts(USER).await.unwrap().is_empty());
    assert!(engine.store().get_viewed_parts(7).await.unwrap().is_empty());
}
