//! End-to-end scenario coverage driving the real `ReviewEngine` the way the
//! HTTP and MCP surfaces do, exercising the review lifecycle top to bottom
//! rather than re-checking individual transition guards (covered in
//! `engine.rs`'s own unit tests).

use plan_review_server::diff::{DiffKind, diff_lines};
use plan_review_server::engine::{QuestionInput, ReviewEngine};
use plan_review_server::events::ReviewEvent;
use plan_review_server::model::{QuestionType, ReviewStatus, TextPosition};
use plan_review_server::store::ContentStore;

fn test_engine() -> (ReviewEngine, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = ContentStore::new(dir.path());
    let engine = ReviewEngine::new(store, plan_review_server::events::EventBus::new());
    (engine, dir)
}

#[tokio::test]
async fn s1_direct_approval() {
    let (engine, _dir) = test_engine();
    let mut rx = {
        let review = engine.create("# Step 1\nDo X".into(), None).await.unwrap();
        engine.bus().subscribe(review.id)
    };

    let review = engine.latest(None).await.unwrap();
    let approved = engine.approve(review.id, None, None).await.unwrap();

    assert_eq!(approved.status, ReviewStatus::Approved);
    assert_eq!(approved.document_versions.len(), 1);

    match rx.recv().await.unwrap() {
        ReviewEvent::StatusChanged {
            previous_status,
            status,
            plan_content,
        } => {
            assert_eq!(previous_status, ReviewStatus::Open);
            assert_eq!(status, ReviewStatus::Approved);
            assert_eq!(plan_content.as_deref(), Some("# Step 1\nDo X"));
        }
        other => panic!("expected status_changed, got {other:?}"),
    }
}

#[tokio::test]
async fn s2_feedback_loop() {
    let (engine, _dir) = test_engine();
    let review = engine
        .create("line one\nline two\nline three".into(), None)
        .await
        .unwrap();

    let comment = engine
        .add_comment(
            review.id,
            None,
            "line one".into(),
            "rename".into(),
            TextPosition::new(0, 8).unwrap(),
        )
        .await
        .unwrap();

    let requested = engine.request_changes(review.id, None).await.unwrap();
    assert_eq!(requested.status, ReviewStatus::ChangesRequested);

    let mut rx = engine.bus().subscribe(review.id);
    let updated = engine
        .update_plan(
            review.id,
            None,
            "line ONE\nline two\nline three".into(),
            None,
            Default::default(),
        )
        .await
        .unwrap();

    assert_eq!(updated.status, ReviewStatus::Updated);
    assert_eq!(updated.document_versions.len(), 2);
    let resolved = updated
        .comments
        .iter()
        .find(|c| c.id == comment.id)
        .cloned()
        .expect("comment still present");
    assert!(resolved.resolved);
    assert_eq!(
        resolved.resolution.as_ref().unwrap().message,
        "已在修订版本中处理"
    );
    assert_eq!(
        resolved.resolution.as_ref().unwrap().resolved_in_version,
        Some(updated.current_version)
    );

    match rx.recv().await.unwrap() {
        ReviewEvent::VersionUpdated {
            resolved_comments, ..
        } => {
            assert_eq!(resolved_comments.len(), 1);
            assert_eq!(resolved_comments[0].comment_id, comment.id);
            assert_eq!(resolved_comments[0].resolution, "已在修订版本中处理");
        }
        other => panic!("expected version_updated, got {other:?}"),
    }
}

#[tokio::test]
async fn s3_question_cycle() {
    let (engine, _dir) = test_engine();
    let review = engine
        .create("line one\nline two\nline three".into(), None)
        .await
        .unwrap();
    let comment = engine
        .add_comment(
            review.id,
            None,
            "line one".into(),
            "rename".into(),
            TextPosition::new(0, 8).unwrap(),
        )
        .await
        .unwrap();
    engine.request_changes(review.id, None).await.unwrap();

    let mut rx = engine.bus().subscribe(review.id);
    let outcome = engine
        .apply_ask_questions(
            review.id,
            None,
            vec![QuestionInput {
                comment_id: comment.id,
                kind: QuestionType::Choice,
                message: "Which name?".into(),
                options: Some(vec!["lineOne".into(), "LINE_ONE".into()]),
            }],
        )
        .await
        .unwrap();
    assert!(outcome.entered_discussing);
    assert_eq!(
        engine.current_status(review.id, None).await.unwrap(),
        ReviewStatus::Discussing
    );

    match rx.recv().await.unwrap() {
        ReviewEvent::QuestionsUpdated { questions } => assert_eq!(questions.len(), 1),
        other => panic!("expected questions_updated, got {other:?}"),
    }

    engine
        .answer_comment(review.id, None, comment.id, "LINE_ONE".into())
        .await
        .unwrap();

    let answers = engine.collect_answers(review.id, None).await.unwrap();
    assert_eq!(answers.len(), 1);
    assert_eq!(answers[0].comment_id, comment.id);
    assert_eq!(answers[0].answer, "LINE_ONE");
}

#[tokio::test]
async fn s4_revision_approval() {
    let (engine, _dir) = test_engine();
    let review = engine
        .create("line one\nline two\nline three".into(), None)
        .await
        .unwrap();
    engine
        .add_comment(
            review.id,
            None,
            "line one".into(),
            "rename".into(),
            TextPosition::new(0, 8).unwrap(),
        )
        .await
        .unwrap();
    engine.request_changes(review.id, None).await.unwrap();
    engine
        .update_plan(
            review.id,
            None,
            "line ONE\nline two\nline three".into(),
            None,
            Default::default(),
        )
        .await
        .unwrap();

    let mut rx = engine.bus().subscribe(review.id);
    let approved = engine.approve(review.id, None, None).await.unwrap();
    assert_eq!(approved.status, ReviewStatus::Approved);

    match rx.recv().await.unwrap() {
        ReviewEvent::StatusChanged {
            previous_status,
            status,
            ..
        } => {
            assert_eq!(previous_status, ReviewStatus::Updated);
            assert_eq!(status, ReviewStatus::Approved);
        }
        other => panic!("expected status_changed, got {other:?}"),
    }
}

#[tokio::test]
async fn s5_invalid_transition_leaves_state_unchanged() {
    let (engine, _dir) = test_engine();
    let review = engine.create("# Step 1\nDo X".into(), None).await.unwrap();
    engine.approve(review.id, None, None).await.unwrap();

    let err = engine.request_changes(review.id, None).await.unwrap_err();
    assert!(matches!(
        err,
        plan_review_server::errors::AppError::InvalidTransition(_)
    ));

    let unchanged = engine.get(review.id, None).await.unwrap();
    assert_eq!(unchanged.status, ReviewStatus::Approved);
}

#[tokio::test]
async fn s6_diff_correctness() {
    let result = diff_lines("a\nb\nc", "a\nX\nc");

    assert_eq!(result.stats.additions, 1);
    assert_eq!(result.stats.deletions, 1);
    assert_eq!(result.stats.unchanged, 2);

    let kinds: Vec<DiffKind> = result.lines.iter().map(|l| l.kind).collect();
    assert_eq!(
        kinds,
        vec![
            DiffKind::Unchanged,
            DiffKind::Removed,
            DiffKind::Added,
            DiffKind::Unchanged,
        ]
    );
    assert_eq!(result.lines[0].old_line, Some(1));
    assert_eq!(result.lines[0].new_line, Some(1));
    assert_eq!(result.lines[1].old_line, Some(2));
    assert_eq!(result.lines[2].new_line, Some(2));
    assert_eq!(result.lines[3].old_line, Some(3));
    assert_eq!(result.lines[3].new_line, Some(3));
}
