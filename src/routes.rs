use crate::constants::*;
use crate::engine::{GatewayEngine, Plan};
use crate::health;
use crate::logging::{log_request_summary, request_id_middleware};
use crate::main_helper::AppState;
use crate::redaction::{redact_value, RedactionLevel};
use crate::types::*;
use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, HeaderName, HeaderValue, Method},
    middleware,
    response::{sse::KeepAlive, IntoResponse, Response, Sse},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::Instrument;

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(state.args.cors_origin.as_deref());
    let router = Router::new()
        .route("/v1/chat/stream", post(chat_stream_handler))
        .route("/chat/stream", post(chat_stream_handler))
        .route("/health", get(health::liveness))
        .route("/readyz", get(health::readiness))
        .layer(axum::extract::DefaultBodyLimit::max(state.args.max_body_size))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state);

    match cors {
        Some(layer) => router.layer(layer),
        None => router,
    }
}

fn cors_layer(origin: Option<&str>) -> Option<CorsLayer> {
    let origin = origin?.trim();
    if origin.is_empty() {
        return None;
    }
    let allow_origin = if origin == "*" {
        AllowOrigin::from(Any)
    } else {
        match HeaderValue::from_str(origin) {
            Ok(v) => AllowOrigin::exact(v),
            Err(e) => {
                tracing::warn!("Ignoring invalid CORS origin '{}': {}", origin, e);
                return None;
            }
        }
    };
    Some(
        CorsLayer::new()
            .allow_origin(allow_origin)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([
                header::AUTHORIZATION,
                header::CONTENT_TYPE,
                HeaderName::from_static(DEADLINE_HEADER),
            ])
            .expose_headers([HeaderName::from_static(REQUEST_ID_HEADER)]),
    )
}

fn request_id_from(headers: &HeaderMap) -> RequestId {
    match headers.get(REQUEST_ID_HEADER).and_then(|h| h.to_str().ok()) {
        Some(id) => RequestId(id.to_string()),
        None => RequestId::new(),
    }
}

#[tracing::instrument(
    name = "gateway.request",
    skip_all,
    fields(
        request_id = tracing::field::Empty,
        subject = tracing::field::Empty,
        backend = tracing::field::Empty,
        outcome = tracing::field::Empty,
    )
)]
pub async fn chat_stream_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let span = tracing::Span::current();
    let request_id = request_id_from(&headers);
    span.record("request_id", request_id.0.as_str());

    let payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            span.record("outcome", "client_error");
            return ObservedError::from(GatewayError::InvalidRequest(format!(
                "body is not valid JSON: {}",
                e
            )))
            .into_response();
        }
    };

    let mut logged = payload.clone();
    redact_value(&mut logged, RedactionLevel::default());
    tracing::debug!(target: "flight_recorder", "[🖥️  -> ⚙️ ] Body: {}", logged);

    let request: ChatRequest = match serde_json::from_value(payload) {
        Ok(r) => r,
        Err(e) => {
            span.record("outcome", "client_error");
            return ObservedError::from(GatewayError::InvalidRequest(e.to_string()))
                .into_response();
        }
    };
    span.record("subject", request.subject_id.0.as_str());
    log_request_summary(&request, &request_id);

    let prepared = match GatewayEngine::prepare(&state, &headers, request, request_id).await {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!("[🖥️  -> ⚙️ ] Request rejected: {}", e.inner);
            span.record("outcome", "rejected");
            return e.into_response();
        }
    };
    span.record("outcome", prepared.outcome());
    if let Plan::Deliver { dispatched, .. } = &prepared.plan {
        span.record("backend", dispatched.backend.name());
    }

    let (tx, rx) = mpsc::channel(100);
    let task_state = state.clone();
    tokio::spawn(
        async move {
            GatewayEngine::deliver(&task_state, prepared, tx).await;
        }
        .instrument(span),
    );

    Sse::new(ReceiverStream::new(rx))
        .keep_alive(
            KeepAlive::new()
                .interval(Duration::from_secs(15))
                .text("keepalive"),
        )
        .into_response()
}
