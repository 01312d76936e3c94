//! Thin HTTP provisioner stub shared by the integration tests

#![allow(dead_code)]

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::{Query, State};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

/// One request seen by the stub
#[derive(Debug, Clone)]
pub struct Call {
    pub method: &'static str,
    pub path: String,
    pub body: Value,
}

#[derive(Clone, Default)]
pub struct StubState {
    calls: Arc<Mutex<Vec<Call>>>,
    failing: Arc<Mutex<HashSet<String>>>,
}

impl StubState {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, method: &str, path: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.method == method && c.path == path)
            .collect()
    }

    /// Make every request to `path` answer 500
    pub fn fail(&self, path: &str) {
        self.failing.lock().unwrap().insert(path.to_string());
    }

    fn record(&self, method: &'static str, uri: &Uri, body: Value) -> Option<Response> {
        let path = uri.path().to_string();
        self.calls.lock().unwrap().push(Call {
            method,
            path: path.clone(),
            body,
        });
        if self.failing.lock().unwrap().contains(&path) {
            return Some(
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("stub failure on {}", path),
                )
                    .into_response(),
            );
        }
        None
    }
}

async fn install_host(State(s): State<StubState>, uri: Uri, Json(body): Json<Value>) -> Response {
    if let Some(failure) = s.record("POST", &uri, body) {
        return failure;
    }
    Json(json!({"cpu": 8, "memory": 16384, "disk": 200, "type": "centos"})).into_response()
}

async fn host_usage(
    State(s): State<StubState>,
    uri: Uri,
    Query(query): Query<Value>,
) -> Response {
    if let Some(failure) = s.record("GET", &uri, query) {
        return failure;
    }
    Json(json!({"cpu_load": 0.4, "memory_avail": 8192, "disk_usage": "30%", "engine_status": 0}))
        .into_response()
}

async fn vm_status(State(s): State<StubState>, uri: Uri, Query(query): Query<Value>) -> Response {
    let name = query
        .get("vmName")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    if let Some(failure) = s.record("GET", &uri, query) {
        return failure;
    }
    Json(json!({
        "name": name,
        "status": "running",
        "address": "10.1.0.10/24",
        "vncPort": "5901"
    }))
    .into_response()
}

async fn container(State(s): State<StubState>, uri: Uri, Json(body): Json<Value>) -> Response {
    if let Some(failure) = s.record("POST", &uri, body) {
        return failure;
    }
    Json(json!({
        "status": "running",
        "address": "172.17.0.2",
        "port_mapping": ["3306/tcp -> 0.0.0.0:49153"],
        "additional_infor": {"password": "stub"}
    }))
    .into_response()
}

async fn accept(State(s): State<StubState>, uri: Uri, Json(body): Json<Value>) -> Response {
    if let Some(failure) = s.record("POST", &uri, body) {
        return failure;
    }
    Json(json!({})).into_response()
}

/// Start the stub on an ephemeral port, returning its base URL
pub async fn start_stub() -> (String, StubState) {
    let state = StubState::default();
    let app = Router::new()
        .route("/host", post(install_host).get(host_usage))
        .route("/host/dnat", post(accept))
        .route("/hosts", post(accept))
        .route("/vm", post(accept).get(vm_status))
        .route("/vm/addons", post(accept))
        .route("/k8s", post(accept))
        .route("/container", post(container))
        .route("/container/action", post(container))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind stub provisioner");
    let addr: SocketAddr = listener.local_addr().expect("Failed to get local address");

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}", addr), state)
}
