//! Agent status endpoint
//!
//! Read-only observability surface: health probe, a JSON snapshot of the
//! local slicer state, and the metrics registry in Prometheus text format.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use tokio_util::sync::CancellationToken;

use crate::agent::Agent;
use crate::common::metrics::METRICS;
use crate::common::Result;

#[derive(Clone)]
pub struct AgentState {
    pub agent: Arc<Agent>,
}

async fn healthz() -> &'static str {
    "ok"
}

async fn status(State(state): State<AgentState>) -> impl IntoResponse {
    Json(state.agent.snapshot())
}

async fn metrics() -> String {
    METRICS.render()
}

pub fn create_router(state: AgentState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/status", get(status))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serve the status endpoint until the token is cancelled.
pub async fn serve_status(
    agent: Arc<Agent>,
    addr: SocketAddr,
    cancel: CancellationToken,
) -> Result<()> {
    let router = create_router(AgentState { agent });
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("status endpoint listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await?;

    Ok(())
}
