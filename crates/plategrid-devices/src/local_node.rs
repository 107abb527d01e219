//! In-process node with a job store.
//!
//! `LocalNode` implements the node contract without a network hop. Actions
//! are registered as either synchronous handlers (served by `call_action`)
//! or asynchronous handlers (served by `submit_action`). Submitted jobs run
//! on their own tokio task and are tracked by execution id:
//!
//! ```text
//! submit_action(request_id) ──▶ queued ──▶ running ──▶ succeeded | failed
//!        │
//!        └── same request_id again ⇒ same execution, no second run
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use plategrid_core::new_id;
use serde_json::{Map, Value, json};
use tracing::{debug, info};

use crate::error::NodeResult;
use crate::node::{
    ActionStatus, NodeAction, NodeActionRequest, NodeActionResponse, NodeClient, NodeDefinition,
};

/// Output of an action handler: a result object or an error message.
pub type ActionOutput = Result<Map<String, Value>, String>;

/// Boxed future returned by asynchronous action handlers.
pub type ActionFuture = Pin<Box<dyn Future<Output = ActionOutput> + Send>>;

type SyncHandler = Arc<dyn Fn(&NodeActionRequest) -> ActionOutput + Send + Sync>;
type AsyncHandler = Arc<dyn Fn(NodeActionRequest) -> ActionFuture + Send + Sync>;

#[derive(Clone)]
enum Handler {
    Sync(SyncHandler),
    Async(AsyncHandler),
}

struct Job {
    request_id: String,
    execution_id: String,
    status: ActionStatus,
    success: bool,
    result: Map<String, Value>,
    error: Option<String>,
}

impl Job {
    fn response(&self) -> NodeActionResponse {
        let terminal = self.status.is_terminal();
        NodeActionResponse {
            request_id: self.request_id.clone(),
            execution_id: Some(self.execution_id.clone()),
            status: self.status,
            success: if terminal { self.success } else { true },
            result: if self.status == ActionStatus::Succeeded {
                self.result.clone()
            } else {
                Map::new()
            },
            error: if self.status == ActionStatus::Failed {
                self.error.clone()
            } else {
                None
            },
        }
    }
}

#[derive(Default)]
struct JobStore {
    by_execution_id: HashMap<String, Job>,
    execution_id_by_request_id: HashMap<String, String>,
}

/// A node served from inside this process.
pub struct LocalNode {
    definition: NodeDefinition,
    handlers: HashMap<String, Handler>,
    jobs: Arc<Mutex<JobStore>>,
    healthy: AtomicBool,
}

impl LocalNode {
    pub fn new(node_id: impl Into<String>, name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            definition: NodeDefinition {
                node_id: node_id.into(),
                name: name.into(),
                kind: kind.into(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                actions: Vec::new(),
            },
            handlers: HashMap::new(),
            jobs: Arc::new(Mutex::new(JobStore::default())),
            healthy: AtomicBool::new(true),
        }
    }

    /// The reference node: `echo` runs synchronously, `sleep` is submitted.
    pub fn template() -> Self {
        let mut echo = NodeAction::new("echo", "Echo input payload (sync action).");
        echo.args_schema.insert("message".into(), json!({"type": "string"}));
        let mut sleep = NodeAction::new("sleep", "Sleep for N seconds (async action).");
        sleep
            .args_schema
            .insert("seconds".into(), json!({"type": "number", "minimum": 0}));

        let mut node = Self::new("NODE_TEMPLATE", "node-template", "template.node")
            .with_sync_action(echo, |req| {
                let mut result = Map::new();
                result.insert(
                    "message".into(),
                    req.args.get("message").cloned().unwrap_or(Value::Null),
                );
                result.insert("locations".into(), Value::Object(req.locations.clone()));
                Ok(result)
            })
            .with_async_action(sleep, |req| {
                Box::pin(async move {
                    let seconds = req.args.get("seconds").and_then(Value::as_f64).unwrap_or(0.0);
                    let wait = Duration::try_from_secs_f64(seconds).unwrap_or(Duration::ZERO);
                    tokio::time::sleep(wait).await;
                    let mut result = Map::new();
                    result.insert("slept".into(), json!(seconds));
                    Ok(result)
                })
            });
        node.definition.version = "0.0.1".to_string();
        node
    }

    pub fn with_sync_action<F>(mut self, action: NodeAction, handler: F) -> Self
    where
        F: Fn(&NodeActionRequest) -> ActionOutput + Send + Sync + 'static,
    {
        self.add_action(action, Handler::Sync(Arc::new(handler)));
        self
    }

    pub fn with_async_action<F>(mut self, action: NodeAction, handler: F) -> Self
    where
        F: Fn(NodeActionRequest) -> ActionFuture + Send + Sync + 'static,
    {
        self.add_action(action, Handler::Async(Arc::new(handler)));
        self
    }

    fn add_action(&mut self, action: NodeAction, handler: Handler) {
        self.definition.actions.retain(|a| a.name != action.name);
        self.handlers.insert(action.name.clone(), handler);
        self.definition.actions.push(action);
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Number of distinct submissions seen.
    pub fn job_count(&self) -> usize {
        self.lock_jobs().by_execution_id.len()
    }

    fn lock_jobs(&self) -> std::sync::MutexGuard<'_, JobStore> {
        self.jobs.lock().expect("node job store poisoned")
    }
}

#[async_trait]
impl NodeClient for LocalNode {
    async fn health(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    async fn get_definition(&self) -> NodeResult<NodeDefinition> {
        Ok(self.definition.clone())
    }

    async fn call_action(&self, request: NodeActionRequest) -> NodeActionResponse {
        match self.handlers.get(&request.action) {
            Some(Handler::Sync(handler)) => match handler(&request) {
                Ok(result) => NodeActionResponse::succeeded(request.request_id, result),
                Err(e) => NodeActionResponse::failed(request.request_id, e),
            },
            _ => NodeActionResponse::failed(
                request.request_id,
                format!(
                    "use submit for long-running actions or unknown sync action: {}",
                    request.action
                ),
            ),
        }
    }

    async fn submit_action(&self, request: NodeActionRequest) -> NodeActionResponse {
        let execution_id = {
            let mut jobs = self.lock_jobs();
            if let Some(existing) = jobs.execution_id_by_request_id.get(&request.request_id) {
                if let Some(job) = jobs.by_execution_id.get(existing) {
                    debug!(request_id = %request.request_id, execution_id = %existing, "duplicate submission");
                    return job.response();
                }
            }

            let execution_id = new_id();
            jobs.by_execution_id.insert(
                execution_id.clone(),
                Job {
                    request_id: request.request_id.clone(),
                    execution_id: execution_id.clone(),
                    status: ActionStatus::Queued,
                    success: true,
                    result: Map::new(),
                    error: None,
                },
            );
            jobs.execution_id_by_request_id
                .insert(request.request_id.clone(), execution_id.clone());
            execution_id
        };

        info!(
            node = %self.definition.name,
            action = %request.action,
            %execution_id,
            "action submitted"
        );

        let handler = self.handlers.get(&request.action).cloned();
        let jobs = Arc::clone(&self.jobs);
        let response = NodeActionResponse {
            request_id: request.request_id.clone(),
            execution_id: Some(execution_id.clone()),
            status: ActionStatus::Queued,
            success: true,
            result: Map::new(),
            error: None,
        };
        tokio::spawn(run_job(jobs, execution_id, handler, request));
        response
    }

    async fn get_action_status(&self, execution_id: &str) -> NodeActionResponse {
        match self.lock_jobs().by_execution_id.get(execution_id) {
            Some(job) => job.response(),
            None => NodeActionResponse::failed("", "unknown execution_id")
                .with_execution_id(execution_id),
        }
    }
}

async fn run_job(
    jobs: Arc<Mutex<JobStore>>,
    execution_id: String,
    handler: Option<Handler>,
    request: NodeActionRequest,
) {
    set_status(&jobs, &execution_id, ActionStatus::Running);

    let action = request.action.clone();
    let output = match handler {
        Some(Handler::Sync(handler)) => handler(&request),
        Some(Handler::Async(handler)) => handler(request).await,
        None => Err(format!("Unknown action: {action}")),
    };

    let mut store = jobs.lock().expect("node job store poisoned");
    if let Some(job) = store.by_execution_id.get_mut(&execution_id) {
        match output {
            Ok(result) => {
                job.status = ActionStatus::Succeeded;
                job.success = true;
                job.result = result;
                job.error = None;
            }
            Err(e) => {
                job.status = ActionStatus::Failed;
                job.success = false;
                job.error = Some(e);
            }
        }
        debug!(%execution_id, %action, status = %job.status, "job finished");
    }
}

fn set_status(jobs: &Mutex<JobStore>, execution_id: &str, status: ActionStatus) {
    let mut store = jobs.lock().expect("node job store poisoned");
    if let Some(job) = store.by_execution_id.get_mut(execution_id) {
        job.status = status;
    }
}
