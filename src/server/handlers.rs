use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::registry::NodeSnapshot;
use crate::server::state::AppState;

/// Health check endpoint
pub async fn health() -> impl IntoResponse {
    StatusCode::OK
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LabStatus {
    pub outstanding_tasks: i64,
    pub nodes: usize,
    pub accounts: usize,
}

/// Lab status endpoint
pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    Json(LabStatus {
        outstanding_tasks: state.engine.outstanding_tasks(),
        nodes: state.registry().node_count(),
        accounts: state.registry().account_count(),
    })
}

/// Node summaries, sorted by name
pub async fn nodes(State(state): State<AppState>) -> Json<Vec<NodeSnapshot>> {
    let mut nodes = state.registry().node_snapshots().await;
    nodes.sort_by(|a, b| a.name.cmp(&b.name));
    Json(nodes)
}

/// Create the Axum router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/status", get(status))
        .route("/v1/nodes", get(nodes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{NodeRole, Resources};
    use crate::workflow::testing::Harness;
    use axum::{
        body::{to_bytes, Body},
        http::Request,
    };
    use tower::ServiceExt;

    async fn get_json(app: Router, uri: &str) -> serde_json::Value {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let h = Harness::new();
        let app = create_router(AppState::new(h.engine.clone()));

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_status_endpoint() {
        let h = Harness::new();
        h.ready_node("n1", NodeRole::Compute, Resources::new(8, 16384, 200))
            .await;
        h.account("alice").await;
        h.account("bob").await;

        let json = get_json(create_router(AppState::new(h.engine.clone())), "/v1/status").await;
        let status: LabStatus = serde_json::from_value(json).unwrap();
        assert_eq!(
            status,
            LabStatus {
                outstanding_tasks: 0,
                nodes: 1,
                accounts: 2,
            }
        );
    }

    #[tokio::test]
    async fn test_nodes_endpoint() {
        let h = Harness::new();
        let node = h
            .ready_node("n2", NodeRole::Container, Resources::new(4, 8192, 100))
            .await;
        h.ready_node("n1", NodeRole::Compute, Resources::new(8, 16384, 200))
            .await;
        node.reserve(&Resources::new(1, 512, 0));

        let json = get_json(create_router(AppState::new(h.engine.clone())), "/v1/nodes").await;
        let nodes = json.as_array().unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0]["name"], "n1");
        assert_eq!(nodes[1]["role"], "container");
        assert_eq!(nodes[1]["status"], "ready");
        assert_eq!(nodes[1]["used"]["memory"], 512);
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let h = Harness::new();
        let app = create_router(AppState::new(h.engine.clone()));

        let response = app
            .oneshot(Request::builder().uri("/v1/vms").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
