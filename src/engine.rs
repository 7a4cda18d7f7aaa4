//! Review State Engine: the only component allowed to mutate a Review.
//!
//! Every operation loads the aggregate from the [`ContentStore`], validates
//! transition legality, mutates the in-memory copy, writes it back, then
//! publishes events to the [`EventBus`] — strictly after the write succeeds,
//! so subscribers never observe an event whose effect isn't yet durable.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::digest::ContentDigest;
use crate::diff::{DiffResult, diff_lines};
use crate::errors::AppError;
use crate::events::{EventBus, QuestionEntry, ResolvedComment, ReviewEvent, VersionSummary};
use crate::model::{Author, Comment, CommentQuestion, DocumentVersion, QuestionType, Review, ReviewStatus, TextPosition, comment::DEFAULT_RESOLUTION_MESSAGE};
use crate::store::ContentStore;

/// One posted question, as accepted by `ask_questions` (both the blocking
/// agent tool and the non-blocking HTTP variant share this shape).
#[derive(Debug, Clone)]
pub struct QuestionInput {
    pub comment_id: Uuid,
    pub kind: QuestionType,
    pub message: String,
    pub options: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct AskQuestionsOutcome {
    /// Whether the review transitioned into `discussing` (i.e. at least one
    /// posted question was not `accepted`). When `false`, nothing blocks —
    /// every question was self-resolving.
    pub entered_discussing: bool,
}

#[derive(Debug, Clone)]
pub struct AnswerTuple {
    pub comment_id: Uuid,
    pub question: CommentQuestion,
    pub answer: String,
}

#[derive(Clone)]
pub struct ReviewEngine {
    store: ContentStore,
    bus: EventBus,
    locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
}

impl ReviewEngine {
    pub fn new(store: ContentStore, bus: EventBus) -> Self {
        Self {
            store,
            bus,
            locks: Arc::new(DashMap::new()),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    fn lock_for(&self, id: Uuid) -> Arc<Mutex<()>> {
        self.locks.entry(id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Load → mutate → save → publish, serialized per review ID.
    async fn mutate<F>(
        &self,
        id: Uuid,
        project_path: Option<&str>,
        f: F,
    ) -> Result<Review, AppError>
    where
        F: FnOnce(&mut Review) -> Result<Vec<ReviewEvent>, AppError>,
    {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let mut review = self
            .store
            .load(id, project_path)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("review {id}")))?;

        let events = f(&mut review)?;
        self.store.save(&review).await?;

        for event in events {
            self.bus.publish(id, event);
        }

        Ok(review)
    }

    pub async fn create(
        &self,
        plan: String,
        project_path: Option<String>,
    ) -> Result<Review, AppError> {
        if plan.trim().is_empty() {
            return Err(AppError::ValidationError("plan content must not be empty".into()));
        }
        let review = Review::new(plan, project_path);
        self.store.save(&review).await?;
        Ok(review)
    }

    pub async fn get(&self, id: Uuid, project_path: Option<&str>) -> Result<Review, AppError> {
        self.store
            .load(id, project_path)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("review {id}")))
    }

    pub async fn latest(&self, project_path: Option<&str>) -> Result<Review, AppError> {
        self.store
            .latest(project_path)
            .await?
            .ok_or_else(|| AppError::NotFound("no reviews for project".into()))
    }

    pub async fn list_pending(&self, project_path: &str) -> Result<Vec<Review>, AppError> {
        self.store.list_pending(project_path).await
    }

    pub async fn add_comment(
        &self,
        id: Uuid,
        project_path: Option<&str>,
        quote: String,
        comment_text: String,
        position: TextPosition,
    ) -> Result<Comment, AppError> {
        let mut created = None;
        self.mutate(id, project_path, |review| {
            if !matches!(review.status, ReviewStatus::Open | ReviewStatus::Updated) {
                return Err(AppError::InvalidTransition(format!(
                    "cannot add comments while review is {}",
                    review.status
                )));
            }
            let len = review.plan_content.chars().count() as u32;
            if position.end_offset > len {
                return Err(AppError::ValidationError(format!(
                    "comment end_offset {} exceeds plan length {}",
                    position.end_offset, len
                )));
            }
            let comment = Comment::new(quote, comment_text, position, review.current_version);
            created = Some(comment.clone());
            review.comments.push(comment);
            Ok(Vec::new())
        })
        .await?;
        Ok(created.expect("set on success path"))
    }

    pub async fn edit_comment(
        &self,
        id: Uuid,
        project_path: Option<&str>,
        comment_id: Uuid,
        new_text: String,
    ) -> Result<Comment, AppError> {
        let mut edited = None;
        self.mutate(id, project_path, |review| {
            if !matches!(review.status, ReviewStatus::Open | ReviewStatus::Updated) {
                return Err(AppError::InvalidTransition(format!(
                    "cannot edit comments while review is {}",
                    review.status
                )));
            }
            let comment = review
                .comment_mut(comment_id)
                .ok_or_else(|| AppError::NotFound(format!("comment {comment_id}")))?;
            comment.comment = new_text;
            edited = Some(comment.clone());
            Ok(Vec::new())
        })
        .await?;
        Ok(edited.expect("set on success path"))
    }

    pub async fn delete_comment(
        &self,
        id: Uuid,
        project_path: Option<&str>,
        comment_id: Uuid,
    ) -> Result<(), AppError> {
        self.mutate(id, project_path, |review| {
            if !matches!(review.status, ReviewStatus::Open | ReviewStatus::Updated) {
                return Err(AppError::InvalidTransition(format!(
                    "cannot delete comments while review is {}",
                    review.status
                )));
            }
            let before = review.comments.len();
            review.comments.retain(|c| c.id != comment_id);
            if review.comments.len() == before {
                return Err(AppError::NotFound(format!("comment {comment_id}")));
            }
            Ok(Vec::new())
        })
        .await?;
        Ok(())
    }

    pub async fn answer_comment(
        &self,
        id: Uuid,
        project_path: Option<&str>,
        comment_id: Uuid,
        answer: String,
    ) -> Result<Review, AppError> {
        self.mutate(id, project_path, |review| {
            if review.status != ReviewStatus::Discussing {
                return Err(AppError::InvalidTransition(
                    "comments can only be answered while the review is discussing".into(),
                ));
            }
            let comment = review
                .comment_mut(comment_id)
                .ok_or_else(|| AppError::NotFound(format!("comment {comment_id}")))?;
            comment.answer = Some(answer);

            let mut events = Vec::new();
            if all_questions_closed(review) {
                let previous_status = review.status;
                let target = ReviewStatus::ChangesRequested;
                if !previous_status.can_transition_to(target) {
                    return Err(AppError::InvalidTransition(format!(
                        "cannot move from {previous_status} to {target}"
                    )));
                }
                review.status = target;
                events.push(ReviewEvent::StatusChanged {
                    status: review.status,
                    previous_status,
                    plan_content: None,
                });
            }
            Ok(events)
        })
        .await
    }

    /// Applies the non-blocking half of `ask_questions`: attach questions,
    /// auto-resolve any `accepted` ones, transition to `discussing` iff at
    /// least one question is not self-resolving. The caller decides whether
    /// and how to suspend afterward.
    pub async fn apply_ask_questions(
        &self,
        id: Uuid,
        project_path: Option<&str>,
        questions: Vec<QuestionInput>,
    ) -> Result<AskQuestionsOutcome, AppError> {
        let mut outcome = AskQuestionsOutcome {
            entered_discussing: false,
        };

        self.mutate(id, project_path, |review| {
            if !review.status.can_transition_to(ReviewStatus::Discussing) {
                return Err(AppError::InvalidTransition(format!(
                    "ask_questions requires changes_requested, review is {}",
                    review.status
                )));
            }

            let covered: std::collections::HashSet<Uuid> =
                questions.iter().map(|q| q.comment_id).collect();
            let missing: Vec<Uuid> = review
                .unresolved_comments()
                .map(|c| c.id)
                .filter(|id| !covered.contains(id))
                .collect();
            if !missing.is_empty() {
                return Err(AppError::ValidationError(format!(
                    "ask_questions must cover every unresolved comment; missing {missing:?}"
                )));
            }

            let mut question_entries = Vec::with_capacity(questions.len());
            let mut any_non_accepted = false;
            for input in &questions {
                let question =
                    CommentQuestion::new(input.kind, input.message.clone(), input.options.clone())
                        .map_err(AppError::ValidationError)?;
                let comment = review
                    .comment_mut(input.comment_id)
                    .ok_or_else(|| AppError::NotFound(format!("comment {}", input.comment_id)))?;
                comment.question = Some(question.clone());
                if question.kind.is_terminal() {
                    comment.resolve(Some(review.current_version), DEFAULT_RESOLUTION_MESSAGE);
                } else {
                    any_non_accepted = true;
                }
                question_entries.push(QuestionEntry {
                    comment_id: input.comment_id,
                    question,
                });
            }

            let mut events = vec![ReviewEvent::QuestionsUpdated {
                questions: question_entries,
            }];

            if any_non_accepted {
                let previous_status = review.status;
                review.status = ReviewStatus::Discussing;
                events.push(ReviewEvent::StatusChanged {
                    status: review.status,
                    previous_status,
                    plan_content: None,
                });
                outcome.entered_discussing = true;
            }

            Ok(events)
        })
        .await?;

        Ok(outcome)
    }

    /// Snapshot of `{commentId, question, answer}` for every comment carrying
    /// a non-terminal question, used once a blocked `ask_questions` wakes.
    pub async fn collect_answers(
        &self,
        id: Uuid,
        project_path: Option<&str>,
    ) -> Result<Vec<AnswerTuple>, AppError> {
        let review = self.get(id, project_path).await?;
        Ok(review
            .comments
            .iter()
            .filter_map(|c| {
                let question = c.question.clone()?;
                if question.kind.is_terminal() {
                    return None;
                }
                c.answer
                    .clone()
                    .map(|answer| AnswerTuple {
                        comment_id: c.id,
                        question,
                        answer,
                    })
            })
            .collect())
    }

    pub async fn current_status(
        &self,
        id: Uuid,
        project_path: Option<&str>,
    ) -> Result<ReviewStatus, AppError> {
        Ok(self.get(id, project_path).await?.status)
    }

    /// Agent-submitted revision. Strict: only from `changes_requested` or
    /// `discussing`. Auto-resolves every still-unresolved comment.
    pub async fn update_plan(
        &self,
        id: Uuid,
        project_path: Option<&str>,
        content: String,
        description: Option<String>,
        resolution_overrides: std::collections::HashMap<Uuid, String>,
    ) -> Result<Review, AppError> {
        self.mutate(id, project_path, |review| {
            if !review.status.can_transition_to(ReviewStatus::Updated) {
                return Err(AppError::InvalidTransition(format!(
                    "update_plan requires changes_requested or discussing, review is {}",
                    review.status
                )));
            }

            let (new_digest, duplicate) = append_version(review, content, Author::Agent, description);
            if duplicate {
                return Ok(Vec::new());
            }

            let mut resolved_comments = Vec::new();
            for comment in review.comments.iter_mut().filter(|c| !c.resolved) {
                let message = resolution_overrides
                    .get(&comment.id)
                    .cloned()
                    .unwrap_or_else(|| DEFAULT_RESOLUTION_MESSAGE.to_string());
                comment.resolve(Some(new_digest), message.clone());
                resolved_comments.push(ResolvedComment {
                    comment_id: comment.id,
                    resolution: message,
                });
            }

            let version = review.version(&new_digest).expect("just appended").clone();
            let mut events = vec![ReviewEvent::VersionUpdated {
                version: VersionSummary {
                    digest: version.digest,
                    created_at: version.created_at,
                    description: version.description,
                    author: version.author,
                },
                content: review.plan_content.clone(),
                resolved_comments,
            }];

            let previous_status = review.status;
            review.status = ReviewStatus::Updated;
            events.push(ReviewEvent::StatusChanged {
                status: review.status,
                previous_status,
                plan_content: None,
            });

            Ok(events)
        })
        .await
    }

    /// Human rollback: appends a version equal in content to the target,
    /// without the agent-submission comment auto-resolution side effect.
    /// A no-op when the target is already the current version (property 6).
    pub async fn rollback_to_version(
        &self,
        id: Uuid,
        project_path: Option<&str>,
        target_digest: ContentDigest,
    ) -> Result<Review, AppError> {
        self.mutate(id, project_path, |review| {
            if !matches!(review.status, ReviewStatus::Open | ReviewStatus::Updated) {
                return Err(AppError::InvalidTransition(format!(
                    "cannot rollback while review is {}",
                    review.status
                )));
            }
            let target = review
                .version(&target_digest)
                .ok_or_else(|| AppError::NotFound(format!("version {target_digest}")))?
                .clone();

            let description = format!("Rollback to {}", target_digest.short());
            let (new_digest, duplicate) =
                append_version(review, target.content, Author::Human, Some(description));
            if duplicate {
                return Ok(Vec::new());
            }

            let version = review.version(&new_digest).expect("just appended").clone();
            Ok(vec![ReviewEvent::VersionUpdated {
                version: VersionSummary {
                    digest: version.digest,
                    created_at: version.created_at,
                    description: version.description,
                    author: version.author,
                },
                content: review.plan_content.clone(),
                resolved_comments: Vec::new(),
            }])
        })
        .await
    }

    /// Unconditional from any non-terminal state (invariant 4 guards the
    /// other direction: once `approved`, no further mutation is legal).
    pub async fn approve(
        &self,
        id: Uuid,
        project_path: Option<&str>,
        note: Option<String>,
    ) -> Result<Review, AppError> {
        self.mutate(id, project_path, |review| {
            if !review.status.can_approve() {
                return Err(AppError::InvalidTransition(
                    "approved is terminal".into(),
                ));
            }
            let previous_status = review.status;
            review.status = ReviewStatus::Approved;
            review.approval_note = note;
            Ok(vec![ReviewEvent::StatusChanged {
                status: review.status,
                previous_status,
                plan_content: Some(review.plan_content.clone()),
            }])
        })
        .await
    }

    /// Human submits feedback: requires at least one unresolved comment.
    pub async fn request_changes(
        &self,
        id: Uuid,
        project_path: Option<&str>,
    ) -> Result<Review, AppError> {
        self.mutate(id, project_path, |review| {
            // `can_transition_to(ChangesRequested)` also admits `discussing`,
            // which reaches `changes_requested` only via the answer-driven
            // handback in `answer_comment`, never via this human-submitted
            // action — so this action's eligible sources are checked
            // directly rather than through the general edge-set query.
            if !matches!(review.status, ReviewStatus::Open | ReviewStatus::Updated) {
                return Err(AppError::InvalidTransition(format!(
                    "request_changes requires open or updated, review is {}",
                    review.status
                )));
            }
            if !review.has_unresolved_comments() {
                return Err(AppError::ValidationError(
                    "request_changes requires at least one unresolved comment".into(),
                ));
            }
            let previous_status = review.status;
            review.status = ReviewStatus::ChangesRequested;
            Ok(vec![ReviewEvent::StatusChanged {
                status: review.status,
                previous_status,
                plan_content: None,
            }])
        })
        .await
    }

    pub async fn diff(
        &self,
        id: Uuid,
        project_path: Option<&str>,
        from: ContentDigest,
        to: ContentDigest,
    ) -> Result<DiffResult, AppError> {
        let review = self.get(id, project_path).await?;
        let from_content = &review
            .version(&from)
            .ok_or_else(|| AppError::NotFound(format!("version {from}")))?
            .content;
        let to_content = &review
            .version(&to)
            .ok_or_else(|| AppError::NotFound(format!("version {to}")))?
            .content;
        Ok(diff_lines(from_content, to_content))
    }
}

/// Returns true once no comment still needs a human answer — i.e. every
/// comment that carries a non-terminal question has either been resolved or
/// already received an answer. Drives the `discussing → changes_requested`
/// handback once the human finishes answering, unblocking the agent's
/// suspended `ask_questions` call (scenario S3).
fn all_questions_closed(review: &Review) -> bool {
    review.comments.iter().all(|c| match &c.question {
        Some(q) if !q.kind.is_terminal() => c.resolved || c.answer.is_some(),
        _ => true,
    })
}

/// Computes the content digest, no-ops on duplicate content (invariant 5 /
/// property 6), otherwise appends a new version and updates the current
/// pointer. Returns `(digest, was_duplicate)`.
fn append_version(
    review: &mut Review,
    content: String,
    author: Author,
    description: Option<String>,
) -> (ContentDigest, bool) {
    let digest = ContentDigest::compute(&content);
    if digest == review.current_version {
        return (digest, true);
    }
    let version = DocumentVersion::new(content, author, description, Some(review.current_version));
    review.plan_content = version.content.clone();
    review.current_version = version.digest;
    review.document_versions.push(version);
    (digest, false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_engine() -> (ReviewEngine, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ContentStore::new(dir.path());
        let engine = ReviewEngine::new(store, EventBus::new());
        (engine, dir)
    }

    #[tokio::test]
    async fn test_s1_direct_approval() {
        let (engine, _dir) = new_engine();
        let review = engine.create("# Step 1\nDo X".into(), None).await.unwrap();

        let mut rx = engine.bus().subscribe(review.id);
        let approved = engine.approve(review.id, None, None).await.unwrap();

        assert_eq!(approved.status, ReviewStatus::Approved);
        assert_eq!(approved.document_versions.len(), 1);

        let event = rx.recv().await.unwrap();
        match event {
            ReviewEvent::StatusChanged {
                status,
                previous_status,
                plan_content,
            } => {
                assert_eq!(status, ReviewStatus::Approved);
                assert_eq!(previous_status, ReviewStatus::Open);
                assert_eq!(plan_content.as_deref(), Some("# Step 1\nDo X"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_s2_feedback_loop_auto_resolves_comment() {
        let (engine, _dir) = new_engine();
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

        let updated = engine
            .update_plan(
                review.id,
                None,
                "line ONE\nline two\nline three".into(),
                None,
                std::collections::HashMap::new(),
            )
            .await
            .unwrap();

        assert_eq!(updated.status, ReviewStatus::Updated);
        assert_eq!(updated.document_versions.len(), 2);
        let stored_comment = updated.comments.iter().find(|c| c.id == comment.id).unwrap();
        assert!(stored_comment.resolved);
        assert_eq!(
            stored_comment.resolution.as_ref().unwrap().message,
            DEFAULT_RESOLUTION_MESSAGE
        );
    }

    #[tokio::test]
    async fn test_s3_question_cycle() {
        let (engine, _dir) = new_engine();
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

        engine
            .answer_comment(review.id, None, comment.id, "LINE_ONE".into())
            .await
            .unwrap();

        assert_eq!(
            engine.current_status(review.id, None).await.unwrap(),
            ReviewStatus::ChangesRequested
        );

        let answers = engine.collect_answers(review.id, None).await.unwrap();
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].answer, "LINE_ONE");
    }

    #[tokio::test]
    async fn test_s5_invalid_transition_from_approved() {
        let (engine, _dir) = new_engine();
        let review = engine.create("content".into(), None).await.unwrap();
        engine.approve(review.id, None, None).await.unwrap();

        let result = engine.request_changes(review.id, None).await;
        assert!(matches!(result, Err(AppError::InvalidTransition(_))));

        let unchanged = engine.get(review.id, None).await.unwrap();
        assert_eq!(unchanged.status, ReviewStatus::Approved);
    }

    #[tokio::test]
    async fn test_duplicate_content_update_plan_is_noop() {
        let (engine, _dir) = new_engine();
        let review = engine.create("content".into(), None).await.unwrap();
        engine
            .add_comment(
                review.id,
                None,
                "content".into(),
                "note".into(),
                TextPosition::new(0, 7).unwrap(),
            )
            .await
            .unwrap();
        engine.request_changes(review.id, None).await.unwrap();

        let result = engine
            .update_plan(review.id, None, "content".into(), None, Default::default())
            .await
            .unwrap();

        assert_eq!(result.document_versions.len(), 1);
        assert_eq!(result.status, ReviewStatus::ChangesRequested);
    }

    #[tokio::test]
    async fn test_rollback_is_noop_on_current_version() {
        let (engine, _dir) = new_engine();
        let review = engine.create("content".into(), None).await.unwrap();
        let digest = review.current_version;

        let result = engine
            .rollback_to_version(review.id, None, digest)
            .await
            .unwrap();
        assert_eq!(result.document_versions.len(), 1);
    }
}
