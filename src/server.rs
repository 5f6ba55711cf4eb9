//! HTTP surface: `POST /api/chat` and `GET /health`.

use std::future::Future;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::gateway::{ChatReply, ChatRequest, Gateway, GatewayError};

/// Caller-facing body for transport and parse failures.
pub const PROCESSING_FAILURE: &str = "Failed to process request";

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::NotConfigured => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            Self::AccessDenied(_) => (StatusCode::FORBIDDEN, self.to_string()),
            Self::Transport(_) | Self::Parse(_) | Self::Internal(_) => {
                error!(error = %self, "chat request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, PROCESSING_FAILURE.to_owned())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Build the gateway router.
pub fn router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route("/api/chat", post(chat))
        .route("/health", get(health))
        .with_state(gateway)
}

async fn chat(
    State(gateway): State<Arc<Gateway>>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatReply>, GatewayError> {
    let Json(request) = payload.map_err(|e| GatewayError::BadRequest(e.body_text()))?;
    // Detached so a caller disconnect cannot skip validation or auditing.
    let task = tokio::spawn(async move { gateway.answer(request).await });
    let reply = task
        .await
        .map_err(|e| GatewayError::Internal(format!("request task failed: {e}")))??;
    Ok(Json(reply))
}

async fn health(State(gateway): State<Arc<Gateway>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "engineConfigured": gateway.engine_configured(),
    }))
}

/// Serve the gateway until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if the server fails while accepting connections.
pub async fn serve(
    listener: TcpListener,
    gateway: Arc<Gateway>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "viewguard listening");
    }
    axum::serve(listener, router(gateway))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| anyhow::anyhow!("server error: {e}"))
}
