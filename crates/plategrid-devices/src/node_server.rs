//! HTTP front for any `NodeClient`.
//!
//! Serves the node contract so an in-process node (or a proxy to another
//! node) can be reached by a `RestNodeClient`.
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/health` | `{"healthy": bool}` |
//! | GET | `/definition` | Node definition |
//! | POST | `/actions/{action}` | Run an action synchronously |
//! | POST | `/action` | Same, action taken from the body |
//! | POST | `/actions/{action}/submit` | Queue an action |
//! | GET | `/actions/status/{execution_id}` | Submission status |

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use serde_json::json;

use crate::node::{NodeActionRequest, NodeClient};

/// Shared state for node handlers.
#[derive(Clone)]
pub struct NodeServerState {
    pub node: Arc<dyn NodeClient>,
}

/// Build the node contract router.
pub fn node_router(node: Arc<dyn NodeClient>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/definition", get(definition))
        .route("/action", post(call_action_body))
        .route("/actions/{action}", post(call_action))
        .route("/actions/{action}/submit", post(submit_action))
        .route("/actions/status/{execution_id}", get(action_status))
        .with_state(NodeServerState { node })
}

/// GET /health
async fn health(State(state): State<NodeServerState>) -> impl IntoResponse {
    Json(json!({ "healthy": state.node.health().await }))
}

/// GET /definition
async fn definition(State(state): State<NodeServerState>) -> impl IntoResponse {
    match state.node.get_definition().await {
        Ok(def) => Json(def).into_response(),
        Err(e) => (
            StatusCode::BAD_GATEWAY,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

/// POST /actions/{action}
async fn call_action(
    State(state): State<NodeServerState>,
    Path(action): Path<String>,
    Json(mut req): Json<NodeActionRequest>,
) -> impl IntoResponse {
    // The path wins over the body.
    req.action = action;
    Json(state.node.call_action(req).await)
}

/// POST /action
async fn call_action_body(
    State(state): State<NodeServerState>,
    Json(req): Json<NodeActionRequest>,
) -> impl IntoResponse {
    Json(state.node.call_action(req).await)
}

/// POST /actions/{action}/submit
async fn submit_action(
    State(state): State<NodeServerState>,
    Path(action): Path<String>,
    Json(mut req): Json<NodeActionRequest>,
) -> impl IntoResponse {
    req.action = action;
    Json(state.node.submit_action(req).await)
}

/// GET /actions/status/{execution_id}
async fn action_status(
    State(state): State<NodeServerState>,
    Path(execution_id): Path<String>,
) -> impl IntoResponse {
    Json(state.node.get_action_status(&execution_id).await)
}
