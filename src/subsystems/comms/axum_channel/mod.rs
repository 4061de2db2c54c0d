//! Axum-based HTTP channel serving the query API.
//!
//! Implements [`Component`]: `run()` drives the axum server and the shared
//! [`CancellationToken`] is wired to axum's graceful shutdown.
//!
//! ## URL layout
//!
//! ```text
//! POST /query           {"query": "..."} → {project_key, answer, citations}
//! POST /api/query       same as /query
//! GET  /api/health
//! GET  /api/projects
//! ```

mod api;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::state::CommsState;
use crate::core::error::AppError;
use crate::subsystems::runtime::{Component, ComponentFuture};

/// Upper bound on one query, LLM calls included.
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(120);

/// Router state injected into every handler. Cheap to clone.
#[derive(Clone)]
pub(crate) struct AxumState {
    pub channel_id: Arc<str>,
    pub comms: Arc<CommsState>,
    pub query_timeout: Duration,
}

pub struct AxumChannel {
    channel_id: String,
    bind_addr: String,
    state: Arc<CommsState>,
}

impl AxumChannel {
    pub fn new(
        channel_id: impl Into<String>,
        bind_addr: impl Into<String>,
        state: Arc<CommsState>,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            bind_addr: bind_addr.into(),
            state,
        }
    }
}

impl Component for AxumChannel {
    fn id(&self) -> &str {
        &self.channel_id
    }

    fn run(self: Box<Self>, shutdown: CancellationToken) -> ComponentFuture {
        Box::pin(run_axum(self.channel_id, self.bind_addr, self.state, shutdown))
    }
}

async fn run_axum(
    channel_id: String,
    bind_addr: String,
    comms: Arc<CommsState>,
    shutdown: CancellationToken,
) -> Result<(), AppError> {
    let router = build_router(&channel_id, comms, QUERY_TIMEOUT);

    let listener = TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| AppError::Comms(format!("axum bind failed on {bind_addr}: {e}")))?;

    info!(%channel_id, %bind_addr, "axum channel listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| AppError::Comms(format!("axum server error: {e}")))?;

    info!(%channel_id, "axum channel shut down");
    Ok(())
}

/// Build the API router over `comms`.
pub fn build_router(channel_id: &str, comms: Arc<CommsState>, query_timeout: Duration) -> Router {
    let state = AxumState {
        channel_id: Arc::from(channel_id),
        comms,
        query_timeout,
    };
    Router::new()
        .route("/query", post(api::query))
        .route("/api/query", post(api::query))
        .route("/api/health", get(api::health))
        .route("/api/projects", get(api::projects))
        .fallback(api::not_found)
        .with_state(state)
}
