//! REST node client integration tests.
//!
//! Serves a `LocalNode` through the node router on an ephemeral port and
//! drives it with `RestNodeClient` over real TCP.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::post;
use plategrid_devices::{
    ActionStatus, LocalNode, NodeActionRequest, NodeClient, RestNodeClient, node_router,
};
use serde_json::json;

async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

async fn template_client() -> RestNodeClient {
    let url = serve(node_router(Arc::new(LocalNode::template()))).await;
    RestNodeClient::new(url).unwrap()
}

#[tokio::test]
async fn health_and_definition() {
    let client = template_client().await;
    assert!(client.health().await);

    let def = client.get_definition().await.unwrap();
    assert_eq!(def.node_id, "NODE_TEMPLATE");
    assert_eq!(def.kind, "template.node");
    assert!(def.action("echo").is_some());
    assert!(def.action("sleep").is_some());
}

#[tokio::test]
async fn unhealthy_node_reports_false() {
    let node = Arc::new(LocalNode::template());
    node.set_healthy(false);
    let url = serve(node_router(node)).await;
    let client = RestNodeClient::new(url).unwrap();
    assert!(!client.health().await);
}

#[tokio::test]
async fn sync_echo_round_trip() {
    let client = template_client().await;
    let req = NodeActionRequest::new("echo").with_arg("message", json!("hello"));
    let request_id = req.request_id.clone();

    let resp = client.call_action(req).await;
    assert!(resp.success);
    assert_eq!(resp.status, ActionStatus::Succeeded);
    assert_eq!(resp.request_id, request_id);
    assert_eq!(resp.result["message"], json!("hello"));
}

#[tokio::test]
async fn submit_and_poll_until_done() {
    let client = template_client().await;
    let req = NodeActionRequest::new("sleep").with_arg("seconds", json!(0.05));
    let submitted = client.submit_action(req.clone()).await;
    assert!(submitted.success);
    let execution_id = submitted.execution_id.clone().unwrap();

    let again = client.submit_action(req).await;
    assert_eq!(again.execution_id.as_deref(), Some(execution_id.as_str()));

    let mut status = client.get_action_status(&execution_id).await;
    for _ in 0..100 {
        if status.status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        status = client.get_action_status(&execution_id).await;
    }
    assert_eq!(status.status, ActionStatus::Succeeded);
    assert_eq!(status.result["slept"], json!(0.05));
}

#[tokio::test]
async fn falls_back_to_single_action_endpoint() {
    let router = Router::new().route(
        "/action",
        post(|| async { axum::Json(json!({"result": {"ok": true}})) }),
    );
    let client = RestNodeClient::new(serve(router).await).unwrap();

    let resp = client.call_action(NodeActionRequest::new("anything")).await;
    assert!(resp.success);
    assert_eq!(resp.status, ActionStatus::Succeeded);
    assert_eq!(resp.result["ok"], json!(true));
}

#[tokio::test]
async fn http_errors_become_failed_responses() {
    let client = RestNodeClient::new(serve(Router::new()).await).unwrap();
    let resp = client.call_action(NodeActionRequest::new("echo")).await;
    assert!(!resp.success);
    assert!(resp.error.unwrap().contains("404"));
    assert!(client.get_definition().await.is_err());
    // No /health route: the node answers but not with 2xx.
    assert!(!client.health().await);
}
