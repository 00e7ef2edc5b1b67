use crate::backends::Backend;
use crate::hardening::CircuitState;
use crate::main_helper::AppState;
use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::sync::Arc;

#[derive(Serialize)]
pub struct LivenessResponse {
    pub status: &'static str,
}

#[derive(Serialize)]
pub struct BackendStatus {
    pub configured: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit: Option<CircuitState>,
}

#[derive(Serialize)]
pub struct ReadinessResponse {
    pub status: String,
    pub database: String,
    pub chat: BackendStatus,
    pub chat_degraded: bool,
    pub reasoning: BackendStatus,
    pub image: BackendStatus,
}

pub async fn liveness() -> Json<LivenessResponse> {
    Json(LivenessResponse { status: "ok" })
}

async fn backend_status(backend: &Backend) -> BackendStatus {
    BackendStatus {
        configured: backend.is_configured(),
        circuit: backend.circuit_state().await,
    }
}

/// Ready when the store answers and the default backend has credentials.
/// Alternate backends are reported but never block readiness.
pub async fn readiness(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<ReadinessResponse>) {
    let mut db_ok = true;
    if let Err(e) = sqlx::query("SELECT 1").fetch_one(&state.db).await {
        tracing::error!("Readiness check: DB error: {}", e);
        db_ok = false;
    }

    let chat = backend_status(&state.backends.chat).await;
    if !chat.configured {
        tracing::error!("Readiness check: default chat backend not configured");
    }
    let ready = db_ok && chat.configured;

    let status_code = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(ReadinessResponse {
            status: if ready { "ready" } else { "unready" }.to_string(),
            database: if db_ok { "ok" } else { "error" }.to_string(),
            chat,
            chat_degraded: state.health.is_degraded(),
            reasoning: backend_status(&state.backends.reasoning).await,
            image: backend_status(&state.backends.image).await,
        }),
    )
}
