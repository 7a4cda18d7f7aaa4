//! Stateless HTTP carrier for agent JSON-RPC frames.
//!
//! Mounted at a single `/mcp` endpoint when the server is started with
//! `--transport http`: each POST handles exactly one RPC, with no session
//! state between requests. Dispatches into the same engine calls as the
//! stdio tool surface in [`crate::mcp`] — this module is framing only.

use std::time::Duration;

use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::AppError;
use crate::http::AppState;
use crate::mcp::{self, QuestionParam};

#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcErrorBody>,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcErrorBody {
    pub code: i32,
    pub message: String,
}

pub async fn handle(State(state): State<AppState>, Json(request): Json<JsonRpcRequest>) -> Json<JsonRpcResponse> {
    let id = request.id.clone();
    match dispatch(&state, &request).await {
        Ok(result) => Json(JsonRpcResponse {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }),
        Err(err) => Json(JsonRpcResponse {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(JsonRpcErrorBody {
                code: -32000,
                message: err.to_string(),
            }),
        }),
    }
}

async fn dispatch(state: &AppState, request: &JsonRpcRequest) -> Result<Value, AppError> {
    match request.method.as_str() {
        "ask_questions" => handle_ask_questions(state, &request.params).await,
        "resources/read" => handle_read_resource(state, &request.params).await,
        other => Err(AppError::ValidationError(format!("unknown method: {other}"))),
    }
}

#[derive(Deserialize)]
struct AskQuestionsParams {
    review_id: String,
    #[serde(default)]
    project_path: Option<String>,
    questions: Vec<QuestionParam>,
}

async fn handle_ask_questions(state: &AppState, params: &Value) -> Result<Value, AppError> {
    let params: AskQuestionsParams = serde_json::from_value(params.clone())
        .map_err(|e| AppError::ValidationError(e.to_string()))?;

    let timeout = Duration::from_secs(state.config.ask_questions_timeout_secs);
    let project = state.resolve_project(params.project_path);
    let result = mcp::ask_questions_core(
        &state.engine,
        &params.review_id,
        project.as_deref(),
        params.questions,
        timeout,
    )
    .await;

    // A timeout is a structured, successful RPC result, not a JSON-RPC error
    // frame (§7) — the review stays in `discussing` for the human to finish.
    match result {
        Ok(answers) => Ok(mcp::answers_to_json(answers)),
        Err(AppError::Timeout) => Ok(serde_json::json!({ "success": false, "error": "timeout" })),
        Err(err) => Err(err),
    }
}

#[derive(Deserialize)]
struct ReadResourceParams {
    uri: String,
}

async fn handle_read_resource(state: &AppState, params: &Value) -> Result<Value, AppError> {
    let params: ReadResourceParams = serde_json::from_value(params.clone())
        .map_err(|e| AppError::ValidationError(e.to_string()))?;
    let body = mcp::resolve_resource(&state.engine, &params.uri).await?;
    Ok(serde_json::json!({ "uri": params.uri, "text": body }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::engine::ReviewEngine;
    use crate::events::EventBus;
    use crate::store::ContentStore;

    fn test_state() -> (AppState, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ContentStore::new(dir.path());
        let engine = ReviewEngine::new(store, EventBus::new());
        (AppState::new(engine, ServerConfig::default()), dir)
    }

    #[tokio::test]
    async fn test_unknown_method_yields_json_rpc_error() {
        let (state, _dir) = test_state();
        let request = JsonRpcRequest {
            id: serde_json::json!(1),
            method: "bogus".into(),
            params: Value::Null,
        };
        let Json(response) = handle(State(state), Json(request)).await;
        assert!(response.result.is_none());
        assert!(response.error.is_some());
    }

    #[tokio::test]
    async fn test_read_resource_returns_review_snapshot() {
        let (state, _dir) = test_state();
        let review = state.engine.create("content".into(), None).await.unwrap();

        let request = JsonRpcRequest {
            id: serde_json::json!(2),
            method: "resources/read".into(),
            params: serde_json::json!({ "uri": format!("review://{}", review.id) }),
        };
        let Json(response) = handle(State(state), Json(request)).await;
        assert!(response.error.is_none());
        let result = response.result.unwrap();
        assert!(result["text"].as_str().unwrap().contains(&review.id.to_string()));
    }

    #[tokio::test]
    async fn test_ask_questions_timeout_is_a_successful_result_not_an_rpc_error() {
        use crate::model::TextPosition;

        let (mut state, _dir) = test_state();
        state.config.ask_questions_timeout_secs = 0;
        let review = state
            .engine
            .create("line one\nline two".into(), None)
            .await
            .unwrap();
        let comment = state
            .engine
            .add_comment(
                review.id,
                None,
                "line one".into(),
                "rename".into(),
                TextPosition::new(0, 8).unwrap(),
            )
            .await
            .unwrap();
        state.engine.request_changes(review.id, None).await.unwrap();

        let request = JsonRpcRequest {
            id: serde_json::json!(3),
            method: "ask_questions".into(),
            params: serde_json::json!({
                "review_id": review.id.to_string(),
                "questions": [{
                    "comment_id": comment.id.to_string(),
                    "type": "choice",
                    "message": "Which name?",
                    "options": ["lineOne", "LINE_ONE"],
                }],
            }),
        };
        let Json(response) = handle(State(state), Json(request)).await;
        assert!(response.error.is_none(), "timeout must not be an RPC error frame");
        let result = response.result.unwrap();
        assert_eq!(result["success"], serde_json::json!(false));
        assert_eq!(result["error"], serde_json::json!("timeout"));
    }
}
