//! HTTP node client.
//!
//! Endpoints, relative to the node's base URL:
//!
//! ```text
//! GET  /health                        {"healthy": bool}   (missing ⇒ healthy)
//! GET  /definition                    NodeDefinition
//! POST /actions/{action}              run synchronously; falls back to POST /action
//! POST /actions/{action}/submit       queue; returns an execution_id
//! GET  /actions/status/{execution_id} current status of a submission
//! ```
//!
//! Each request opens its own HTTP/1 connection over a plain TCP stream.
//! Responses are decoded leniently: absent fields take defaults rather
//! than failing the call.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{Method, Request, Uri, header};
use http_body_util::{BodyExt, Full};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{NodeError, NodeResult};
use crate::node::{ActionStatus, NodeActionRequest, NodeActionResponse, NodeClient, NodeDefinition};

const HEALTH_TIMEOUT: Duration = Duration::from_secs(3);
const DEFINITION_TIMEOUT: Duration = Duration::from_secs(5);
const ACTION_TIMEOUT: Duration = Duration::from_secs(30);
const SUBMIT_TIMEOUT: Duration = Duration::from_secs(10);
const STATUS_TIMEOUT: Duration = Duration::from_secs(10);

/// `NodeClient` over HTTP/1.1 with JSON bodies.
#[derive(Debug, Clone)]
pub struct RestNodeClient {
    base_url: String,
    action_timeout: Duration,
}

impl RestNodeClient {
    /// `base_url` must be an `http://host:port[/prefix]` URL.
    pub fn new(base_url: impl Into<String>) -> NodeResult<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let uri: Uri = base_url
            .parse()
            .map_err(|e| NodeError::InvalidUrl(format!("{base_url}: {e}")))?;
        if uri.scheme_str() != Some("http") || uri.authority().is_none() {
            return Err(NodeError::InvalidUrl(format!(
                "{base_url}: expected http://host:port"
            )));
        }
        Ok(Self {
            base_url,
            action_timeout: ACTION_TIMEOUT,
        })
    }

    /// Override the timeout for synchronous action calls.
    pub fn with_action_timeout(mut self, timeout: Duration) -> Self {
        self.action_timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}/{path}", self.base_url)
        }
    }

    async fn get_json(&self, path: &str, timeout: Duration) -> NodeResult<Value> {
        self.send(Method::GET, path, None, timeout).await
    }

    async fn post_json(&self, path: &str, payload: &Value, timeout: Duration) -> NodeResult<Value> {
        let body = serde_json::to_vec(payload).map_err(|e| NodeError::Request(e.to_string()))?;
        self.send(Method::POST, path, Some(body), timeout).await
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
        timeout: Duration,
    ) -> NodeResult<Value> {
        let url = self.url(path);
        let uri: Uri = url
            .parse()
            .map_err(|e| NodeError::InvalidUrl(format!("{url}: {e}")))?;
        let authority = uri
            .authority()
            .ok_or_else(|| NodeError::InvalidUrl(url.clone()))?
            .to_string();
        let target = uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());

        let exchange = async {
            let stream = tokio::net::TcpStream::connect(&authority)
                .await
                .map_err(|e| NodeError::Connect(format!("{url}: {e}")))?;
            let io = hyper_util::rt::TokioIo::new(stream);
            let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
                .await
                .map_err(|e| NodeError::Connect(format!("{url}: {e}")))?;

            // Drive the connection in the background.
            tokio::spawn(async move {
                let _ = conn.await;
            });

            let mut builder = Request::builder()
                .method(method.clone())
                .uri(target)
                .header(header::HOST, authority.as_str())
                .header(header::USER_AGENT, "plategrid/0.1")
                .header(header::ACCEPT, "application/json");
            if body.is_some() {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
            }
            let req = builder
                .body(Full::new(Bytes::from(body.unwrap_or_default())))
                .map_err(|e| NodeError::Request(e.to_string()))?;

            let resp = sender
                .send_request(req)
                .await
                .map_err(|e| NodeError::Request(format!("{method} {url}: {e}")))?;
            let status = resp.status();
            let bytes = resp
                .into_body()
                .collect()
                .await
                .map_err(|e| NodeError::Request(format!("{method} {url}: {e}")))?
                .to_bytes();

            if !status.is_success() {
                return Err(NodeError::Http {
                    method: method.to_string(),
                    url: url.clone(),
                    status: status.as_u16(),
                    body: String::from_utf8_lossy(&bytes).into_owned(),
                });
            }
            if bytes.is_empty() {
                return Ok(Value::Object(Map::new()));
            }
            serde_json::from_slice(&bytes).map_err(|e| NodeError::Decode(format!("{url}: {e}")))
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(NodeError::Timeout(url)),
        }
    }
}

#[async_trait]
impl NodeClient for RestNodeClient {
    async fn health(&self) -> bool {
        match self.get_json("/health", HEALTH_TIMEOUT).await {
            Ok(data) => data.get("healthy").and_then(Value::as_bool).unwrap_or(true),
            Err(e) => {
                debug!(error = %e, url = %self.base_url, "node health check failed");
                false
            }
        }
    }

    async fn get_definition(&self) -> NodeResult<NodeDefinition> {
        let data = self.get_json("/definition", DEFINITION_TIMEOUT).await?;
        serde_json::from_value(data).map_err(|e| NodeError::Decode(e.to_string()))
    }

    async fn call_action(&self, request: NodeActionRequest) -> NodeActionResponse {
        let payload = match serde_json::to_value(&request) {
            Ok(p) => p,
            Err(e) => return NodeActionResponse::failed(request.request_id, e.to_string()),
        };
        let primary = format!("/actions/{}", request.action);
        let data = match self.post_json(&primary, &payload, self.action_timeout).await {
            Ok(data) => Ok(data),
            Err(e) => {
                debug!(error = %e, action = %request.action, "falling back to single action endpoint");
                self.post_json("/action", &payload, self.action_timeout).await
            }
        };
        match data {
            Ok(data) => decode_response(&data, &request.request_id, None, |success| {
                if success {
                    ActionStatus::Succeeded
                } else {
                    ActionStatus::Failed
                }
            }),
            Err(e) => NodeActionResponse::failed(request.request_id, e.to_string()),
        }
    }

    async fn submit_action(&self, request: NodeActionRequest) -> NodeActionResponse {
        let payload = match serde_json::to_value(&request) {
            Ok(p) => p,
            Err(e) => return NodeActionResponse::failed(request.request_id, e.to_string()),
        };
        let path = format!("/actions/{}/submit", request.action);
        match self.post_json(&path, &payload, SUBMIT_TIMEOUT).await {
            Ok(data) => decode_response(&data, &request.request_id, None, |_| ActionStatus::Queued),
            Err(e) => NodeActionResponse::failed(request.request_id, e.to_string()),
        }
    }

    async fn get_action_status(&self, execution_id: &str) -> NodeActionResponse {
        let path = format!("/actions/status/{execution_id}");
        match self.get_json(&path, STATUS_TIMEOUT).await {
            Ok(data) => decode_response(&data, "", Some(execution_id), |success| {
                if success {
                    ActionStatus::Running
                } else {
                    ActionStatus::Failed
                }
            }),
            Err(e) => NodeActionResponse::failed("", e.to_string()).with_execution_id(execution_id),
        }
    }
}

/// Decode a node response, filling absent fields from the call context.
fn decode_response(
    data: &Value,
    request_id: &str,
    execution_id: Option<&str>,
    default_status: impl Fn(bool) -> ActionStatus,
) -> NodeActionResponse {
    let text = |key: &str| {
        data.get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    let success = data.get("success").and_then(Value::as_bool).unwrap_or(true);
    let status = data
        .get("status")
        .cloned()
        .and_then(|s| serde_json::from_value::<ActionStatus>(s).ok())
        .unwrap_or_else(|| default_status(success));
    let result = match data.get("result") {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    };

    NodeActionResponse {
        request_id: text("request_id").unwrap_or_else(|| request_id.to_string()),
        execution_id: text("execution_id")
            .or_else(|| text("job_id"))
            .or_else(|| execution_id.map(str::to_string)),
        status,
        success,
        result,
        error: text("error"),
    }
}
