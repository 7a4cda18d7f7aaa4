//! Agent Tool Surface: the MCP server the plan-authoring agent talks to.
//!
//! Grounded on plan-forge's `PlanForgeServer` (`rmcp::tool`/`tool_router`
//! wiring, `ServerHandler::get_info`), widened with a `review://` resource
//! surface and one blocking tool, `ask_questions`, whose suspend-and-wait
//! behavior has no plan-forge analogue — it subscribes to the Event Bus and
//! waits for the review to leave `discussing`, bounded by a timeout.

use std::str::FromStr;
use std::time::Duration;

use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{
    CallToolResult, Content, ErrorCode, ErrorData, Implementation, ListResourcesResult,
    PaginatedRequestParam, ReadResourceRequestParam, ReadResourceResult, ResourceContents, Role,
    ServerCapabilities, ServerInfo,
};
use rmcp::schemars::JsonSchema;
use rmcp::service::RequestContext;
use rmcp::{RoleServer, ServerHandler, tool, tool_handler, tool_router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::{AnswerTuple, QuestionInput, ReviewEngine};
use crate::errors::AppError;
use crate::events::ReviewEvent;
use crate::model::{QuestionType, ReviewStatus};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct QuestionParam {
    /// ID of the unresolved comment this question answers.
    pub comment_id: String,
    /// One of `clarification`, `choice`, `multiChoice`, `accepted`.
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    /// Required (non-empty) for `choice` and `multiChoice`.
    #[serde(default)]
    pub options: Option<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct AskQuestionsParams {
    /// UUID of the review being discussed.
    pub review_id: String,
    #[serde(default)]
    pub project_path: Option<String>,
    /// Must cover every comment `requestChanges` left unresolved.
    pub questions: Vec<QuestionParam>,
}

fn to_error_data(err: AppError) -> ErrorData {
    ErrorData::new(ErrorCode::INTERNAL_ERROR, err.to_string(), None)
}

/// MCP-facing server exposing the agent half of the review protocol.
#[derive(Clone)]
pub struct PlanReviewMcpServer {
    tool_router: ToolRouter<Self>,
    engine: ReviewEngine,
    ask_questions_timeout: Duration,
    default_project: Option<String>,
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for PlanReviewMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "plan-review".to_string(),
                version: env!("CARGO_PKG_VERSION").to_owned(),
                title: Some("Plan Review".to_string()),
                icons: None,
                website_url: None,
            },
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_resources()
                .build(),
            instructions: Some(
                "Coordinates human review of a plan document. Use ask_questions to surface \
                 clarifying questions for comments left by request_changes; the call blocks \
                 until the human answers or the wait times out. Read review://{id} for a \
                 snapshot, or review://project/{path}/pending and .../current to discover \
                 reviews scoped to a project."
                    .to_string(),
            ),
            ..Default::default()
        }
    }

    async fn list_resources(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, ErrorData> {
        // Resources here are templated by review id / project path, supplied
        // by the caller rather than enumerable up front.
        Ok(ListResourcesResult {
            resources: Vec::new(),
            next_cursor: None,
        })
    }

    async fn read_resource(
        &self,
        request: ReadResourceRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, ErrorData> {
        let uri = request.uri.clone();
        let body = resolve_resource(&self.engine, &uri).await.map_err(to_error_data)?;
        Ok(ReadResourceResult {
            contents: vec![ResourceContents::text(body, uri)],
        })
    }
}

/// `review://{id}` for a single review snapshot, or
/// `review://project/{path}/pending|current` for project-scoped lookups.
/// `path` is taken as-is except for `%2F`/`%3A` escapes, since project paths
/// are filesystem paths rather than arbitrary URI text. Shared by both the
/// stdio MCP resource handler and the stateless HTTP JSON-RPC fallback.
pub(crate) async fn resolve_resource(engine: &ReviewEngine, uri: &str) -> Result<String, AppError> {
    let rest = uri
        .strip_prefix("review://")
        .ok_or_else(|| AppError::ValidationError(format!("unsupported resource uri: {uri}")))?;

    if let Some(project_and_suffix) = rest.strip_prefix("project/") {
        let (encoded_path, suffix) = project_and_suffix
            .rsplit_once('/')
            .ok_or_else(|| AppError::ValidationError(format!("malformed resource uri: {uri}")))?;
        let project_path = decode_uri_path_segment(encoded_path);
        match suffix {
            "pending" => {
                let reviews = engine.list_pending(&project_path).await?;
                Ok(serde_json::to_string_pretty(&reviews)?)
            }
            "current" => {
                let review = engine.latest(Some(&project_path)).await?;
                Ok(serde_json::to_string_pretty(&review)?)
            }
            other => Err(AppError::ValidationError(format!(
                "unknown project resource suffix: {other}"
            ))),
        }
    } else {
        let id = Uuid::parse_str(rest).map_err(|e| AppError::ValidationError(e.to_string()))?;
        let review = engine.get(id, None).await?;
        Ok(serde_json::to_string_pretty(&review)?)
    }
}

#[tool_router(router = tool_router)]
impl PlanReviewMcpServer {
    pub fn new(engine: ReviewEngine, ask_questions_timeout: Duration) -> Self {
        Self::with_default_project(engine, ask_questions_timeout, None)
    }

    pub fn with_default_project(
        engine: ReviewEngine,
        ask_questions_timeout: Duration,
        default_project: Option<String>,
    ) -> Self {
        Self {
            tool_router: Self::tool_router(),
            engine,
            ask_questions_timeout,
            default_project,
        }
    }

    /// Posts one question per still-unresolved comment and blocks until the
    /// human finishes answering (or the wait bound elapses), then returns
    /// the collected answers. A batch where every question is `accepted`
    /// never blocks: there is nothing left for the human to answer.
    #[tool(
        name = "ask_questions",
        description = "Ask the human reviewer clarifying questions about comments left on the plan. Blocks until answered or the wait times out."
    )]
    pub async fn ask_questions(
        &self,
        params: Parameters<AskQuestionsParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let AskQuestionsParams {
            review_id,
            project_path,
            questions,
        } = params.0;
        let project_path = project_path.or_else(|| self.default_project.clone());

        let result = ask_questions_core(
            &self.engine,
            &review_id,
            project_path.as_deref(),
            questions,
            self.ask_questions_timeout,
        )
        .await;

        // A timeout is a structured, successful result (§7: "returned as
        // {success:false, error:"timeout"}, not an RPC error frame") — the
        // review stays in `discussing` for the human to finish asynchronously.
        let body = match result {
            Ok(answers) => answers_to_json(answers),
            Err(AppError::Timeout) => serde_json::json!({ "success": false, "error": "timeout" }),
            Err(err) => return Err(to_error_data(err)),
        };
        Ok(CallToolResult::success(vec![
            Content::text(body.to_string()).with_audience(vec![Role::Assistant]),
        ]))
    }
}

fn decode_uri_path_segment(segment: &str) -> String {
    segment.replace("%2F", "/").replace("%3A", ":")
}

pub(crate) fn answers_to_json(answers: Vec<AnswerTuple>) -> serde_json::Value {
    serde_json::json!({
        "answers": answers.into_iter().map(|a| serde_json::json!({
            "commentId": a.comment_id,
            "question": a.question,
            "answer": a.answer,
        })).collect::<Vec<_>>(),
    })
}

/// Shared by the stdio `ask_questions` tool and the stateless HTTP JSON-RPC
/// fallback: parse, apply, optionally suspend, then collect answers.
pub(crate) async fn ask_questions_core(
    engine: &ReviewEngine,
    review_id: &str,
    project_path: Option<&str>,
    questions: Vec<QuestionParam>,
    timeout: Duration,
) -> Result<Vec<AnswerTuple>, AppError> {
    let review_id =
        Uuid::parse_str(review_id).map_err(|e| AppError::ValidationError(e.to_string()))?;

    let mut inputs = Vec::with_capacity(questions.len());
    for q in questions {
        let comment_id =
            Uuid::parse_str(&q.comment_id).map_err(|e| AppError::ValidationError(e.to_string()))?;
        let kind = QuestionType::from_str(&q.kind).map_err(AppError::ValidationError)?;
        inputs.push(QuestionInput {
            comment_id,
            kind,
            message: q.message,
            options: q.options,
        });
    }

    let outcome = engine
        .apply_ask_questions(review_id, project_path, inputs)
        .await?;

    if outcome.entered_discussing {
        wait_until_not_discussing(engine, review_id, project_path, timeout).await?;
    }

    engine.collect_answers(review_id, project_path).await
}

/// Suspends until `review_id` leaves `discussing`, waking on either a Bus
/// event or a periodic re-check, and erroring with [`AppError::Timeout`]
/// once `timeout` elapses without that happening.
pub(crate) async fn wait_until_not_discussing(
    engine: &ReviewEngine,
    review_id: Uuid,
    project_path: Option<&str>,
    timeout: Duration,
) -> Result<(), AppError> {
    let mut rx = engine.bus().subscribe(review_id);
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        if engine.current_status(review_id, project_path).await? != ReviewStatus::Discussing {
            return Ok(());
        }

        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return Err(AppError::Timeout);
        }

        match tokio::time::timeout(remaining, rx.recv()).await {
            Ok(Ok(ReviewEvent::StatusChanged { status, .. })) if status != ReviewStatus::Discussing => {
                return Ok(());
            }
            Ok(Ok(_)) => continue,
            // Lagged or closed: fall through to re-poll the store directly.
            Ok(Err(_)) => continue,
            Err(_) => return Err(AppError::Timeout),
        }
    }
}
