//! HTTP Control Plane: the REST surface in the external interfaces table,
//! consumed by both the browser SPA and the interceptor script.
//!
//! Stateless per request: every mutation follows load → mutate via the
//! [`ReviewEngine`] → emit events → respond. The only side effects are
//! Content Store writes and Event Bus publications.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, Query, Request, State},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::digest::ContentDigest;
use crate::engine::{QuestionInput, ReviewEngine};
use crate::errors::AppError;
use crate::gateway;
use crate::model::{Author, QuestionType, Review, TextPosition};

/// Tracks wall-clock time of the last request, read by the idle-shutdown
/// watchdog (§5: a 30-minute inactivity timer shuts the process down).
#[derive(Default)]
pub struct ActivityTracker {
    last_activity_ms: AtomicI64,
}

impl ActivityTracker {
    pub fn touch(&self) {
        self.last_activity_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn idle_for(&self) -> Duration {
        let last = self.last_activity_ms.load(Ordering::Relaxed);
        let now = Utc::now().timestamp_millis();
        Duration::from_millis((now - last).max(0) as u64)
    }
}

#[derive(Clone)]
pub struct AppState {
    pub engine: ReviewEngine,
    pub config: ServerConfig,
    pub activity: Arc<ActivityTracker>,
}

impl AppState {
    pub fn new(engine: ReviewEngine, config: ServerConfig) -> Self {
        let activity = Arc::new(ActivityTracker::default());
        activity.touch();
        Self {
            engine,
            config,
            activity,
        }
    }

    /// Falls back to `--project`'s default scope when a request's own
    /// `project` parameter is absent.
    pub fn resolve_project(&self, explicit: Option<String>) -> Option<String> {
        explicit.or_else(|| self.config.default_project.clone())
    }
}

async fn touch_activity(State(state): State<AppState>, request: Request, next: Next) -> Response {
    state.activity.touch();
    next.run(request).await
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/reviews", post(create_review))
        .route("/api/reviews/latest", get(latest_review))
        .route("/api/reviews/{id}", get(get_review))
        .route("/api/reviews/{id}/comments", post(add_comment))
        .route(
            "/api/reviews/{id}/comments/{cid}",
            put(edit_comment).delete(delete_comment),
        )
        .route(
            "/api/reviews/{id}/comments/{cid}/answer",
            post(answer_comment),
        )
        .route("/api/reviews/{id}/plan", put(update_plan))
        .route("/api/reviews/{id}/versions", get(list_versions))
        .route("/api/reviews/{id}/versions/{hash}", get(get_version))
        .route("/api/reviews/{id}/diff", get(get_diff))
        .route("/api/reviews/{id}/rollback", post(rollback))
        .route("/api/reviews/{id}/approve", post(approve))
        .route("/api/reviews/{id}/request-changes", post(request_changes))
        .route("/api/reviews/{id}/ask-questions", post(ask_questions_http))
        .route("/api/reviews/{id}/events", get(stream_events))
        .route_layer(middleware::from_fn_with_state(state.clone(), touch_activity))
        .with_state(state)
}

fn parse_digest(s: &str) -> Result<ContentDigest, AppError> {
    ContentDigest::from_str(s).map_err(AppError::ValidationError)
}

#[derive(Deserialize)]
struct CreateReviewRequest {
    plan: String,
    #[serde(default)]
    project_path: Option<String>,
}

async fn create_review(
    State(state): State<AppState>,
    Json(body): Json<CreateReviewRequest>,
) -> Result<Json<Review>, AppError> {
    let project = state.resolve_project(body.project_path);
    let review = state.engine.create(body.plan, project).await?;
    Ok(Json(review))
}

#[derive(Deserialize)]
struct ProjectQuery {
    project: Option<String>,
}

async fn get_review(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<ProjectQuery>,
) -> Result<Json<Review>, AppError> {
    let project = state.resolve_project(query.project);
    let review = state.engine.get(id, project.as_deref()).await?;
    Ok(Json(review))
}

async fn latest_review(
    State(state): State<AppState>,
    Query(query): Query<ProjectQuery>,
) -> Result<Json<Review>, AppError> {
    let project = state.resolve_project(query.project);
    let review = state.engine.latest(project.as_deref()).await?;
    Ok(Json(review))
}

#[derive(Deserialize)]
struct PositionInput {
    start_offset: u32,
    end_offset: u32,
}

#[derive(Deserialize)]
struct AddCommentRequest {
    quote: String,
    comment: String,
    position: PositionInput,
}

async fn add_comment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<ProjectQuery>,
    Json(body): Json<AddCommentRequest>,
) -> Result<Json<crate::model::Comment>, AppError> {
    let position = TextPosition::new(body.position.start_offset, body.position.end_offset)
        .map_err(AppError::ValidationError)?;
    let project = state.resolve_project(query.project);
    let comment = state
        .engine
        .add_comment(id, project.as_deref(), body.quote, body.comment, position)
        .await?;
    Ok(Json(comment))
}

#[derive(Deserialize)]
struct EditCommentRequest {
    comment: String,
}

async fn edit_comment(
    State(state): State<AppState>,
    Path((id, cid)): Path<(Uuid, Uuid)>,
    Query(query): Query<ProjectQuery>,
    Json(body): Json<EditCommentRequest>,
) -> Result<Json<crate::model::Comment>, AppError> {
    let project = state.resolve_project(query.project);
    let comment = state
        .engine
        .edit_comment(id, project.as_deref(), cid, body.comment)
        .await?;
    Ok(Json(comment))
}

async fn delete_comment(
    State(state): State<AppState>,
    Path((id, cid)): Path<(Uuid, Uuid)>,
    Query(query): Query<ProjectQuery>,
) -> Result<impl IntoResponse, AppError> {
    let project = state.resolve_project(query.project);
    state.engine.delete_comment(id, project.as_deref(), cid).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct AnswerRequest {
    answer: String,
}

async fn answer_comment(
    State(state): State<AppState>,
    Path((id, cid)): Path<(Uuid, Uuid)>,
    Query(query): Query<ProjectQuery>,
    Json(body): Json<AnswerRequest>,
) -> Result<Json<Review>, AppError> {
    let project = state.resolve_project(query.project);
    let review = state
        .engine
        .answer_comment(id, project.as_deref(), cid, body.answer)
        .await?;
    Ok(Json(review))
}

#[derive(Deserialize)]
struct UpdatePlanRequest {
    content: String,
    #[serde(default)]
    #[allow(dead_code)]
    author: Option<Author>,
    #[serde(default)]
    change_description: Option<String>,
    #[serde(default)]
    resolved_comments: Option<HashMap<Uuid, String>>,
}

async fn update_plan(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<ProjectQuery>,
    Json(body): Json<UpdatePlanRequest>,
) -> Result<Json<Review>, AppError> {
    let project = state.resolve_project(query.project);
    let review = state
        .engine
        .update_plan(
            id,
            project.as_deref(),
            body.content,
            body.change_description,
            body.resolved_comments.unwrap_or_default(),
        )
        .await?;
    Ok(Json(review))
}

#[derive(Serialize)]
struct VersionSummaryWire {
    digest: ContentDigest,
    created_at: chrono::DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    author: Author,
}

async fn list_versions(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<ProjectQuery>,
) -> Result<Json<Vec<VersionSummaryWire>>, AppError> {
    let project = state.resolve_project(query.project);
    let review = state.engine.get(id, project.as_deref()).await?;
    let summaries = review
        .document_versions
        .iter()
        .map(|v| VersionSummaryWire {
            digest: v.digest,
            created_at: v.created_at,
            description: v.description.clone(),
            author: v.author,
        })
        .collect();
    Ok(Json(summaries))
}

async fn get_version(
    State(state): State<AppState>,
    Path((id, hash)): Path<(Uuid, String)>,
    Query(query): Query<ProjectQuery>,
) -> Result<Json<crate::model::DocumentVersion>, AppError> {
    let digest = parse_digest(&hash)?;
    let project = state.resolve_project(query.project);
    let review = state.engine.get(id, project.as_deref()).await?;
    let version = review
        .version(&digest)
        .cloned()
        .ok_or_else(|| AppError::NotFound(format!("version {hash}")))?;
    Ok(Json(version))
}

#[derive(Deserialize)]
struct DiffQuery {
    from: String,
    to: String,
    project: Option<String>,
}

async fn get_diff(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<DiffQuery>,
) -> Result<Json<crate::diff::DiffResult>, AppError> {
    let from = parse_digest(&query.from)?;
    let to = parse_digest(&query.to)?;
    let project = state.resolve_project(query.project);
    let result = state.engine.diff(id, project.as_deref(), from, to).await?;
    Ok(Json(result))
}

#[derive(Deserialize)]
struct RollbackRequest {
    version_hash: String,
}

async fn rollback(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<ProjectQuery>,
    Json(body): Json<RollbackRequest>,
) -> Result<Json<Review>, AppError> {
    let digest = parse_digest(&body.version_hash)?;
    let project = state.resolve_project(query.project);
    let review = state
        .engine
        .rollback_to_version(id, project.as_deref(), digest)
        .await?;
    Ok(Json(review))
}

#[derive(Deserialize, Default)]
struct ApproveRequest {
    #[serde(default)]
    note: Option<String>,
}

async fn approve(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<ProjectQuery>,
    body: Option<Json<ApproveRequest>>,
) -> Result<Json<Review>, AppError> {
    let note = body.map(|Json(b)| b.note).unwrap_or(None);
    let project = state.resolve_project(query.project);
    let review = state.engine.approve(id, project.as_deref(), note).await?;
    Ok(Json(review))
}

async fn request_changes(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<ProjectQuery>,
) -> Result<Json<Review>, AppError> {
    let project = state.resolve_project(query.project);
    let review = state.engine.request_changes(id, project.as_deref()).await?;
    Ok(Json(review))
}

#[derive(Deserialize)]
struct QuestionWire {
    #[serde(rename = "commentId")]
    comment_id: Uuid,
    #[serde(rename = "type")]
    kind: QuestionType,
    message: String,
    #[serde(default)]
    options: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct AskQuestionsRequest {
    questions: Vec<QuestionWire>,
}

/// Non-blocking HTTP variant: unlike the agent tool's `ask_questions`, this
/// applies the state transition and returns immediately without suspending.
async fn ask_questions_http(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<ProjectQuery>,
    Json(body): Json<AskQuestionsRequest>,
) -> Result<Json<Review>, AppError> {
    let questions = body
        .questions
        .into_iter()
        .map(|q| QuestionInput {
            comment_id: q.comment_id,
            kind: q.kind,
            message: q.message,
            options: q.options,
        })
        .collect();
    let project = state.resolve_project(query.project);
    state
        .engine
        .apply_ask_questions(id, project.as_deref(), questions)
        .await?;
    let review = state.engine.get(id, project.as_deref()).await?;
    Ok(Json(review))
}

async fn stream_events(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<ProjectQuery>,
) -> Result<impl IntoResponse, AppError> {
    let project = state.resolve_project(query.project);
    let snapshot = state.engine.get(id, project.as_deref()).await?;
    let heartbeat = Duration::from_secs(state.config.heartbeat_interval_secs);
    Ok(gateway::review_event_stream(
        state.engine.bus(),
        id,
        snapshot,
        heartbeat,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::store::ContentStore;
    use axum::body::Body;
    use axum::http::{Request as HttpRequest, StatusCode};
    use tower::ServiceExt;

    fn test_state() -> (AppState, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ContentStore::new(dir.path());
        let engine = ReviewEngine::new(store, EventBus::new());
        (AppState::new(engine, ServerConfig::default()), dir)
    }

    #[tokio::test]
    async fn test_create_and_fetch_review() {
        let (state, _dir) = test_state();
        let app = router(state);

        let response = app
            .clone()
            .oneshot(
                HttpRequest::builder()
                    .method("POST")
                    .uri("/api/reviews")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"plan":"# Step 1\nDo X"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let review: Review = serde_json::from_slice(&body).unwrap();
        assert_eq!(review.plan_content, "# Step 1\nDo X");

        let response = app
            .oneshot(
                HttpRequest::builder()
                    .uri(format!("/api/reviews/{}", review.id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_invalid_transition_returns_400() {
        let (state, _dir) = test_state();
        let app = router(state.clone());
        let review = state.engine.create("content".into(), None).await.unwrap();
        state.engine.approve(review.id, None, None).await.unwrap();

        let response = app
            .oneshot(
                HttpRequest::builder()
                    .method("POST")
                    .uri(format!("/api/reviews/{}/request-changes", review.id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_review_returns_404() {
        let (state, _dir) = test_state();
        let app = router(state);
        let response = app
            .oneshot(
                HttpRequest::builder()
                    .uri(format!("/api/reviews/{}", Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
