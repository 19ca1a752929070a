#![allow(dead_code)]

//! In-process mock of the Pub/Sub REST API
//!
//! Serves pull, modifyAckDeadline, acknowledge and publish for any project,
//! plus a metadata-server style token endpoint. Every request is recorded.

use super::constants::METADATA_TOKEN;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

/// A request as seen by the mock server
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// Path below `/v1`, e.g. "projects/p/subscriptions/jobs:pull"
    pub path: String,
    pub authorization: Option<String>,
    pub body: Value,
}

#[derive(Default)]
struct MockState {
    queues: HashMap<String, VecDeque<Value>>,
    requests: Vec<RecordedRequest>,
    fail_next: Option<(StatusCode, String)>,
    token_requests: usize,
    next_message_id: u64,
}

type SharedState = Arc<Mutex<MockState>>;

pub struct MockPubSubServer {
    /// Value for `--endpoint`, e.g. "http://127.0.0.1:12345/v1"
    pub endpoint: String,
    /// Metadata token URL served by this mock
    pub token_url: String,
    state: SharedState,
    _shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl MockPubSubServer {
    pub async fn spawn() -> Self {
        let state: SharedState = Arc::new(Mutex::new(MockState::default()));

        let app = Router::new()
            .route(
                "/v1/projects/{project}/subscriptions/{target}",
                post(subscription_action),
            )
            .route("/v1/projects/{project}/topics/{target}", post(topic_action))
            .route("/token", get(metadata_token))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("Mock server failed");
        });

        let base_url = format!("http://127.0.0.1:{}", port);
        Self {
            endpoint: format!("{}/v1", base_url),
            token_url: format!("{}/token", base_url),
            state,
            _shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Queue a message for delivery on `subscription`
    pub fn push_message(&self, subscription: &str, ack_id: &str, data: &str, attributes: Value) {
        let mut state = self.state.lock().unwrap();
        state.next_message_id += 1;
        let message = json!({
            "ackId": ack_id,
            "message": {
                "data": data,
                "attributes": attributes,
                "messageId": state.next_message_id.to_string(),
                "publishTime": "2024-05-01T10:00:00.123Z",
            }
        });
        state
            .queues
            .entry(subscription.to_string())
            .or_default()
            .push_back(message);
    }

    /// Make the next API call fail with the given status
    pub fn fail_next(&self, status: StatusCode, message: &str) {
        self.state.lock().unwrap().fail_next = Some((status, message.to_string()));
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    /// Recorded requests whose path ends with `:{action}`
    pub fn requests_for(&self, action: &str) -> Vec<RecordedRequest> {
        let suffix = format!(":{}", action);
        self.requests()
            .into_iter()
            .filter(|r| r.path.ends_with(&suffix))
            .collect()
    }

    pub fn token_requests(&self) -> usize {
        self.state.lock().unwrap().token_requests
    }
}

impl Drop for MockPubSubServer {
    fn drop(&mut self) {
        if let Some(tx) = self._shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

fn record(
    state: &mut MockState,
    path: String,
    headers: &HeaderMap,
    body: Value,
) -> Option<Response> {
    let authorization = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    state.requests.push(RecordedRequest {
        path,
        authorization,
        body,
    });

    state.fail_next.take().map(|(status, message)| {
        (
            status,
            Json(json!({
                "error": {
                    "code": status.as_u16(),
                    "message": message,
                    "status": "FAILED_PRECONDITION",
                }
            })),
        )
            .into_response()
    })
}

async fn subscription_action(
    State(state): State<SharedState>,
    Path((project, target)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let mut state = state.lock().unwrap();
    let path = format!("projects/{}/subscriptions/{}", project, target);
    if let Some(failure) = record(&mut state, path, &headers, body.clone()) {
        return failure;
    }

    let Some((subscription, action)) = target.split_once(':') else {
        return StatusCode::NOT_FOUND.into_response();
    };

    match action {
        "pull" => {
            let max = body["maxMessages"].as_u64().unwrap_or(1) as usize;
            let queue = state.queues.entry(subscription.to_string()).or_default();
            let count = queue.len().min(max);
            let messages: Vec<Value> = queue.drain(..count).collect();
            if messages.is_empty() {
                Json(json!({})).into_response()
            } else {
                Json(json!({ "receivedMessages": messages })).into_response()
            }
        }
        "modifyAckDeadline" | "acknowledge" => Json(json!({})).into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn topic_action(
    State(state): State<SharedState>,
    Path((project, target)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let mut state = state.lock().unwrap();
    let path = format!("projects/{}/topics/{}", project, target);
    if let Some(failure) = record(&mut state, path, &headers, body.clone()) {
        return failure;
    }

    if !target.ends_with(":publish") {
        return StatusCode::NOT_FOUND.into_response();
    }
    let count = body["messages"].as_array().map_or(0, Vec::len);
    let ids: Vec<String> = (0..count)
        .map(|_| {
            state.next_message_id += 1;
            state.next_message_id.to_string()
        })
        .collect();
    Json(json!({ "messageIds": ids })).into_response()
}

async fn metadata_token(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    if headers.get("metadata-flavor").and_then(|v| v.to_str().ok()) != Some("Google") {
        return StatusCode::FORBIDDEN.into_response();
    }
    state.lock().unwrap().token_requests += 1;
    Json(json!({
        "access_token": METADATA_TOKEN,
        "expires_in": 3599,
        "token_type": "Bearer",
    }))
    .into_response()
}
