//! HTTP host for invocable objects.
//!
//! - `GET  /health` - liveness and the names of bound objects
//! - `POST /objects/{object}/{method}` - invoke `method` with the JSON body as
//!   arguments; a 200 carries the JSON result
//!
//! This is the server half of [`HttpInvoker`](crate::invoke::http::HttpInvoker):
//! an [`Handle::Http`](crate::handle::Handle::Http) pointing here reaches the
//! object bound under the same name in the hosted [`LocalDirectory`].

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::InvokeError;
use crate::invoke::LocalDirectory;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub objects: Vec<String>,
}

struct ServerState {
    directory: Arc<LocalDirectory>,
}

async fn health(State(state): State<Arc<ServerState>>) -> Json<HealthResponse> {
    let mut objects = state.directory.names();
    objects.sort();
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        objects,
    })
}

async fn invoke_object(
    State(state): State<Arc<ServerState>>,
    Path((object, method)): Path<(String, String)>,
    Json(args): Json<Value>,
) -> Result<Json<Value>, (StatusCode, String)> {
    tracing::debug!(%object, %method, "remote invocation");
    // Objects block (fan-out, joins), so keep them off the async workers.
    let directory = Arc::clone(&state.directory);
    let result = tokio::task::spawn_blocking(move || directory.call(&object, &method, args))
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("{e}")))?;
    result.map(Json).map_err(|e| (status_for(&e), format!("{e}")))
}

/// HTTP status reported for an invocation failure.
pub fn status_for(error: &InvokeError) -> StatusCode {
    match error {
        InvokeError::UnknownObject { .. } | InvokeError::UnknownMethod { .. } => {
            StatusCode::NOT_FOUND
        }
        InvokeError::BadArguments { .. } => StatusCode::BAD_REQUEST,
        InvokeError::Target { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        InvokeError::Transport { .. } | InvokeError::Remote { .. } | InvokeError::Codec { .. } => {
            StatusCode::BAD_GATEWAY
        }
    }
}

/// Routes serving every object in `directory`.
pub fn router(directory: Arc<LocalDirectory>) -> Router {
    let state = Arc::new(ServerState { directory });
    Router::new()
        .route("/health", get(health))
        .route("/objects/{object}/{method}", post(invoke_object))
        .with_state(state)
}

/// Serve `directory` on an already-bound listener until `shutdown` resolves.
pub async fn serve_listener(
    listener: tokio::net::TcpListener,
    directory: Arc<LocalDirectory>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    axum::serve(listener, router(directory))
        .with_graceful_shutdown(shutdown)
        .await
}

/// Bind `addr` and serve `directory` until SIGINT or SIGTERM.
pub async fn serve(addr: SocketAddr, directory: Arc<LocalDirectory>) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("rulenet listening on {}", listener.local_addr()?);
    serve_listener(listener, directory, shutdown_signal()).await?;
    tracing::info!("rulenet shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot register SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
    tracing::info!("shutdown requested");
}
