//! HTTP surface: `/healthz`, `/readyz`, `/metrics`.

use crate::collaborators::WorkloadIndex;
use crate::notifier::Notifier;
use crate::queue::QueueHandle;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub notifier: Arc<Notifier>,
    pub workload_index: Arc<dyn WorkloadIndex>,
    pub queue: QueueHandle,
}

/// Always 200: liveness only reflects "the process is alive to handle
/// requests," not cluster connectivity.
async fn liveness_probe() -> impl IntoResponse {
    StatusCode::OK
}

/// 200 once every informer's initial cache sync has completed, 503 before
/// that.
async fn readiness_probe(State(state): State<AppState>) -> impl IntoResponse {
    if state.workload_index.is_synced() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    state.notifier.set_queue_depth(state.queue.len());
    (
        [("content-type", "text/plain; version=0.0.4")],
        state.notifier.render_metrics(),
    )
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(liveness_probe))
        .route("/readyz", get(readiness_probe))
        .route("/metrics", get(metrics))
        .with_state(state)
}

pub async fn serve(addr: std::net::SocketAddr, state: AppState, shutdown: CancellationToken) -> anyhow::Result<()> {
    let app = create_app(state);
    info!(%addr, "starting webserver");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).with_graceful_shutdown(async move { shutdown.cancelled().await }).await?;
    Ok(())
}
