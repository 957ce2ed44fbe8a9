//! Administrative HTTP façade.
//!
//! | Route                      | Response                                  |
//! |----------------------------|-------------------------------------------|
//! | `GET /`                    | `{"message": ...}`                        |
//! | `GET /config/`             | running configuration                     |
//! | `GET /inputs/`             | `{"inputs": [InstanceInfo, ...]}`         |
//! | `GET /outputs/`            | `{"outputs": [InstanceInfo, ...]}`        |
//! | `GET /inputs/stop/{id}`    | `{"result": "ok"}` or 503 `{"error": ..}` |
//! | `GET /outputs/stop/{id}`   | `{"result": "ok"}` or 503 `{"error": ..}` |
//!
//! Stopping requests `close` and returns at once; the instance finishes its
//! final flush in the background and reports `closed` when done.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use logferry_core::config::LogferryConfig;
use logferry_pipeline::{IoManager, ManagerError};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Shared handler state.
#[derive(Clone)]
pub struct AdminState {
    pub config: Arc<LogferryConfig>,
    pub manager: Arc<IoManager>,
}

/// Failed stop request.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct AdminError(#[from] ManagerError);

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        tracing::warn!(error = %self, "admin request failed");
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}

pub fn router(state: AdminState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/config/", get(config))
        .route("/inputs/", get(inputs))
        .route("/outputs/", get(outputs))
        .route("/inputs/stop/", get(stop_input_blank))
        .route("/inputs/stop/{id}", get(stop_input))
        .route("/outputs/stop/", get(stop_output_blank))
        .route("/outputs/stop/{id}", get(stop_output))
        .with_state(state)
}

/// Binds `addr` and serves the façade until `cancel` fires.
///
/// Binding happens before this returns so a taken port fails startup.
pub async fn serve(
    addr: SocketAddr,
    state: AdminState,
    cancel: CancellationToken,
) -> anyhow::Result<(SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind admin listener on {}: {}", addr, e))?;
    let local = listener.local_addr()?;
    tracing::info!(listen_addr = %local, "admin endpoint listening");

    let app = router(state);
    let handle = tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(cancel.cancelled_owned());
        if let Err(e) = server.await {
            tracing::error!(error = %e, "admin server error");
        }
        tracing::info!("admin endpoint stopped");
    });
    Ok((local, handle))
}

pub async fn index() -> Json<Value> {
    Json(json!({ "message": "logferry admin" }))
}

pub async fn config(State(state): State<AdminState>) -> Json<LogferryConfig> {
    Json(state.config.as_ref().clone())
}

pub async fn inputs(State(state): State<AdminState>) -> Json<Value> {
    Json(json!({ "inputs": state.manager.get_inputs() }))
}

pub async fn outputs(State(state): State<AdminState>) -> Json<Value> {
    Json(json!({ "outputs": state.manager.get_outputs() }))
}

pub async fn stop_input(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AdminError> {
    state.manager.close_input(&id)?;
    tracing::info!(%id, "input stop requested");
    Ok(ok())
}

pub async fn stop_output(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AdminError> {
    state.manager.close_output(&id)?;
    tracing::info!(%id, "output stop requested");
    Ok(ok())
}

async fn stop_input_blank(State(state): State<AdminState>) -> Result<Json<Value>, AdminError> {
    state.manager.close_input("")?;
    Ok(ok())
}

async fn stop_output_blank(State(state): State<AdminState>) -> Result<Json<Value>, AdminError> {
    state.manager.close_output("")?;
    Ok(ok())
}

fn ok() -> Json<Value> {
    Json(json!({ "result": "ok" }))
}
