//! Read-only introspection HTTP server
//!
//! - `GET /health`: liveness
//! - `GET /v1/status`: outstanding workflow tasks, node and account counts
//! - `GET /v1/nodes`: node summaries

pub mod handlers;
pub mod state;

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub use handlers::create_router;
pub use state::AppState;

/// Serve the introspection endpoints until `cancel` fires
pub async fn spawn_server(
    addr: &str,
    state: AppState,
    cancel: CancellationToken,
) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;
    let app = create_router(state);

    info!("Introspection server listening on {}", local);
    let handle = tokio::spawn(async move {
        let shutdown = async move { cancel.cancelled().await };
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            error!("Server error: {}", e);
        }
        info!("Introspection server stopped");
    });
    Ok((local, handle))
}
