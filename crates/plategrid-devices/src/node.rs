//! Remote node contract.
//!
//! A node is an external process exposing instrument actions. Actions run
//! either synchronously (`call_action`) or as tracked executions
//! (`submit_action` then `get_action_status`). Submissions are idempotent
//! on `request_id`.
//!
//! Failures never surface as errors from the action calls: they come back
//! as a response with `success = false` and an error message, so callers
//! can log and move on.

use async_trait::async_trait;
use plategrid_core::new_id;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::NodeResult;

/// Lifecycle of a submitted execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl ActionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ActionStatus::Succeeded | ActionStatus::Failed | ActionStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Queued => "queued",
            ActionStatus::Running => "running",
            ActionStatus::Succeeded => "succeeded",
            ActionStatus::Failed => "failed",
            ActionStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeAction {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub args_schema: Map<String, Value>,
}

impl NodeAction {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            args_schema: Map::new(),
        }
    }
}

/// What a node says about itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDefinition {
    #[serde(default, alias = "id")]
    pub node_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub actions: Vec<NodeAction>,
}

impl NodeDefinition {
    pub fn action(&self, name: &str) -> Option<&NodeAction> {
        self.actions.iter().find(|a| a.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeActionRequest {
    #[serde(default = "new_id")]
    pub request_id: String,
    pub action: String,
    #[serde(default)]
    pub args: Map<String, Value>,
    #[serde(default)]
    pub locations: Map<String, Value>,
}

impl NodeActionRequest {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            request_id: new_id(),
            action: action.into(),
            args: Map::new(),
            locations: Map::new(),
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: Value) -> Self {
        self.args.insert(key.into(), value);
        self
    }

    pub fn with_location(mut self, key: impl Into<String>, value: Value) -> Self {
        self.locations.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeActionResponse {
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
    pub status: ActionStatus,
    pub success: bool,
    #[serde(default)]
    pub result: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NodeActionResponse {
    pub fn succeeded(request_id: impl Into<String>, result: Map<String, Value>) -> Self {
        Self {
            request_id: request_id.into(),
            execution_id: None,
            status: ActionStatus::Succeeded,
            success: true,
            result,
            error: None,
        }
    }

    pub fn failed(request_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            execution_id: None,
            status: ActionStatus::Failed,
            success: false,
            result: Map::new(),
            error: Some(error.into()),
        }
    }

    pub fn with_execution_id(mut self, execution_id: impl Into<String>) -> Self {
        self.execution_id = Some(execution_id.into());
        self
    }
}

/// Client side of the node contract.
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// `true` when the node answers and reports itself healthy.
    async fn health(&self) -> bool;

    async fn get_definition(&self) -> NodeResult<NodeDefinition>;

    /// Run an action and wait for its result.
    async fn call_action(&self, request: NodeActionRequest) -> NodeActionResponse;

    /// Queue an action for asynchronous execution.
    async fn submit_action(&self, request: NodeActionRequest) -> NodeActionResponse {
        NodeActionResponse::failed(request.request_id, "asynchronous actions are not supported")
    }

    async fn get_action_status(&self, execution_id: &str) -> NodeActionResponse {
        NodeActionResponse::failed("", "asynchronous actions are not supported")
            .with_execution_id(execution_id)
    }
}
