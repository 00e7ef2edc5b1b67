use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing_error::SpanTrace;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct SubjectId(pub String);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct RequestId(pub String);

impl From<String> for SubjectId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SubjectId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl RequestId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn short(&self) -> &str {
        crate::text::prefix_chars(&self.0, 8)
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

use std::sync::atomic::{AtomicU32, AtomicU64};
use std::time::Instant;

/// Counters for the default chat backend, surfaced on `/readyz`.
pub struct UpstreamHealth {
    pub consecutive_failures: AtomicU32,
    pub total_requests: AtomicU64,
    pub failed_requests: AtomicU64,
    pub last_success: std::sync::RwLock<Option<Instant>>,
    pub last_failure: std::sync::RwLock<Option<Instant>>,
}

impl Default for UpstreamHealth {
    fn default() -> Self {
        Self {
            consecutive_failures: AtomicU32::new(0),
            total_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            last_success: std::sync::RwLock::new(None),
            last_failure: std::sync::RwLock::new(None),
        }
    }
}

impl UpstreamHealth {
    pub fn record_success(&self) {
        self.total_requests
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.consecutive_failures
            .store(0, std::sync::atomic::Ordering::Relaxed);
        if let Ok(mut last) = self.last_success.write() {
            *last = Some(Instant::now());
        }
    }

    pub fn record_failure(&self) {
        self.total_requests
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.failed_requests
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.consecutive_failures
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        if let Ok(mut last) = self.last_failure.write() {
            *last = Some(Instant::now());
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.consecutive_failures
            .load(std::sync::atomic::Ordering::Relaxed)
            > 0
    }
}

/// The three upstream capability profiles, plus the lightweight title call
/// which rides on the chat backend's endpoint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Image,
    Reasoning,
    Chat,
    Title,
}

impl BackendKind {
    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::Image => "image",
            BackendKind::Reasoning => "reasoning",
            BackendKind::Chat => "chat",
            BackendKind::Title => "title",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Backend {0} unavailable: {1}")]
    BackendUnavailable(BackendKind, String),

    #[error("Backend transient error (status {0}): {1}")]
    BackendTransient(axum::http::StatusCode, String),

    #[error("Upstream error (status {0}): {1}")]
    Upstream(axum::http::StatusCode, String),

    #[error("Malformed upstream payload: {0}")]
    MalformedUpstream(String),

    #[error("Deadline exceeded waiting for {0} backend")]
    DeadlineExceeded(BackendKind),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String, SpanTrace),
}

impl GatewayError {
    pub fn internal(msg: impl Into<String>) -> Self {
        GatewayError::Internal(msg.into(), SpanTrace::capture())
    }
}

impl axum::response::IntoResponse for ObservedError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let (status, msg, code) = match &self.inner {
            GatewayError::Unauthenticated(m) => {
                (StatusCode::UNAUTHORIZED, m.clone(), "UNAUTHENTICATED")
            }
            GatewayError::InvalidRequest(m) => {
                (StatusCode::BAD_REQUEST, m.clone(), "INVALID_REQUEST")
            }
            GatewayError::BackendUnavailable(kind, m) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("{} backend unavailable: {}", kind, m),
                "BACKEND_UNAVAILABLE",
            ),
            GatewayError::BackendTransient(s, m) => (*s, m.clone(), "BACKEND_TRANSIENT"),
            GatewayError::Upstream(_, m) => (StatusCode::BAD_GATEWAY, m.clone(), "UPSTREAM_ERROR"),
            GatewayError::MalformedUpstream(m) => {
                (StatusCode::BAD_GATEWAY, m.clone(), "MALFORMED_UPSTREAM")
            }
            GatewayError::Network(e) => (StatusCode::BAD_GATEWAY, e.to_string(), "NETWORK_ERROR"),
            GatewayError::DeadlineExceeded(kind) => (
                StatusCode::GATEWAY_TIMEOUT,
                format!("{} backend did not answer before the deadline", kind),
                "DEADLINE_EXCEEDED",
            ),
            GatewayError::Database(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                e.to_string(),
                "DATABASE_ERROR",
            ),
            GatewayError::Serialization(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                e.to_string(),
                "SERIALIZATION_ERROR",
            ),
            GatewayError::Io(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string(), "IO_ERROR"),
            GatewayError::Configuration(m) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                m.clone(),
                "CONFIGURATION_ERROR",
            ),
            GatewayError::Internal(m, _) => {
                (StatusCode::INTERNAL_SERVER_ERROR, m.clone(), "INTERNAL_ERROR")
            }
        };
        (
            status,
            axum::Json(serde_json::json!({
                "error": msg,
                "code": code,
            })),
        )
            .into_response()
    }
}

#[derive(Debug)]
pub struct ObservedError {
    pub inner: GatewayError,
    pub span_trace: SpanTrace,
}

impl std::fmt::Display for ObservedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}\n\nSpan Trace:\n{}", self.inner, self.span_trace)
    }
}

impl std::error::Error for ObservedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.inner)
    }
}

impl<E> From<E> for ObservedError
where
    E: Into<GatewayError>,
{
    fn from(error: E) -> Self {
        Self {
            inner: error.into(),
            span_trace: SpanTrace::capture(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ObservedError>;

/// --- CONVERSATION MODEL ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            attachments: Vec::new(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            attachments: Vec::new(),
        }
    }
}

/// An uploaded file. The payload travels base64-encoded on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    #[serde(with = "base64_payload")]
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Image,
    Text,
    Opaque,
}

mod base64_payload {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        // Browsers hand over data URLs; accept both forms.
        let encoded = match raw.split_once(";base64,") {
            Some((_, data)) => data,
            None => raw.as_str(),
        };
        STANDARD.decode(encoded.trim()).map_err(serde::de::Error::custom)
    }
}

/// Inbound body of the streaming endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub turns: Vec<ConversationTurn>,
    pub subject_id: SubjectId,
    #[serde(default)]
    pub files: Vec<Attachment>,
    #[serde(default)]
    pub project_context: Option<serde_json::Value>,
}

impl ChatRequest {
    pub fn validate(&self) -> Result<()> {
        let last = match self.turns.last() {
            Some(t) => t,
            None => {
                return Err(GatewayError::InvalidRequest("turns must not be empty".to_string()).into())
            }
        };
        if last.role != Role::User {
            return Err(GatewayError::InvalidRequest(
                "the latest turn must come from the user".to_string(),
            )
            .into());
        }
        if self.subject_id.0.trim().is_empty() {
            return Err(GatewayError::InvalidRequest("subjectId is required".to_string()).into());
        }
        Ok(())
    }

    /// Text of the latest user turn. `validate` guarantees one exists.
    pub fn latest_user_text(&self) -> &str {
        match self.turns.last() {
            Some(t) => t.content.as_str(),
            None => "",
        }
    }

    pub fn prior_turn_count(&self) -> usize {
        self.turns.len().saturating_sub(1)
    }
}

/// --- STORE RECORDS ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Clearance {
    pub subject_id: SubjectId,
    pub issued_at: chrono::DateTime<chrono::Utc>,
    pub expires_at: chrono::DateTime<chrono::Utc>,
    pub verified: bool,
}


#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemoryFact {
    pub subject_id: SubjectId,
    pub key: String,
    pub value: String,
}

/// --- OUTBOUND FRAMES ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RedirectSuggestion {
    pub module: String,
    pub label: String,
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageResult {
    pub url: String,
    pub caption: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFrame {
    ContentDelta(String),
    RedirectSuggestion(RedirectSuggestion),
    ImageResult(ImageResult),
    ConversationTitle(String),
    Terminator,
}

impl StreamFrame {
    pub fn kind(&self) -> &'static str {
        match self {
            StreamFrame::ContentDelta(_) => "content",
            StreamFrame::RedirectSuggestion(_) => "redirect",
            StreamFrame::ImageResult(_) => "image",
            StreamFrame::ConversationTitle(_) => "title",
            StreamFrame::Terminator => "done",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_rejects_trailing_assistant_turn() {
        let req = ChatRequest {
            turns: vec![
                ConversationTurn::user("hi"),
                ConversationTurn::assistant("hello"),
            ],
            subject_id: "alice".into(),
            files: Vec::new(),
            project_context: None,
        };
        let err = match req.validate() {
            Err(e) => e,
            Ok(_) => panic!("Expected validation failure"),
        };
        assert!(matches!(err.inner, GatewayError::InvalidRequest(_)));
    }

    #[test]
    fn test_attachment_payload_accepts_data_url() {
        let json = r#"{"name":"a.txt","mimeType":"text/plain","payload":"data:text/plain;base64,aGVsbG8="}"#;
        let att: Attachment = match serde_json::from_str(json) {
            Ok(a) => a,
            Err(e) => panic!("Failed to parse attachment: {}", e),
        };
        assert_eq!(att.payload, b"hello");
    }
}
