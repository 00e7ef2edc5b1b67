#![allow(dead_code)]

use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use chatgate::consumer::StreamConsumer;
use chatgate::db::{init_db, register_credential, DbPool};
use chatgate::intent::KeywordTables;
use chatgate::main_helper::BackendKeys;
use chatgate::routes::build_router;
use chatgate::{AppState, Args, SubjectId};
use clap::Parser;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::util::ServiceExt;

pub const TOKEN: &str = "tok-alice";
pub const SUBJECT: &str = "alice";
pub const TITLE_MODEL: &str = "title-model";
pub const IMAGE_URL: &str = "https://img.example/red-car.png";
pub const REASONING_CHUNKS: &[&str] = &["Phase ", "detector ", "compares; ", "loop filter settles."];

/// Behavior of the fake upstream.
#[derive(Clone)]
pub struct MockConfig {
    pub chat_status: u16,
    pub chat_answer: String,
    pub chat_delay: Duration,
    pub image_status: u16,
    pub reasoning_status: u16,
    pub title: String,
    pub title_status: u16,
    pub title_delay: Duration,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            chat_status: 200,
            chat_answer: "Use a 100nF ceramic capacitor close to each supply pin.".to_string(),
            chat_delay: Duration::ZERO,
            image_status: 200,
            reasoning_status: 200,
            title: "\"Buck Converter Basics\"".to_string(),
            title_status: 200,
            title_delay: Duration::ZERO,
        }
    }
}

#[derive(Default)]
pub struct Calls {
    pub chat: AtomicUsize,
    pub title: AtomicUsize,
    pub image: AtomicUsize,
    pub reasoning: AtomicUsize,
}

struct Mock {
    config: MockConfig,
    calls: Arc<Calls>,
}

fn completion(text: &str) -> Value {
    json!({
        "id": "cmpl-1",
        "choices": [{ "index": 0, "message": { "role": "assistant", "content": text }, "finish_reason": "stop" }]
    })
}

fn status(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

async fn mock_chat(State(mock): State<Arc<Mock>>, Json(body): Json<Value>) -> Response {
    if body["model"] == TITLE_MODEL {
        mock.calls.title.fetch_add(1, Ordering::SeqCst);
        if !mock.config.title_delay.is_zero() {
            tokio::time::sleep(mock.config.title_delay).await;
        }
        if mock.config.title_status != 200 {
            return (status(mock.config.title_status), "title model down").into_response();
        }
        return Json(completion(&mock.config.title)).into_response();
    }
    mock.calls.chat.fetch_add(1, Ordering::SeqCst);
    if !mock.config.chat_delay.is_zero() {
        tokio::time::sleep(mock.config.chat_delay).await;
    }
    if mock.config.chat_status != 200 {
        return (status(mock.config.chat_status), "quota exceeded").into_response();
    }
    Json(completion(&mock.config.chat_answer)).into_response()
}

async fn mock_image(State(mock): State<Arc<Mock>>, Json(_body): Json<Value>) -> Response {
    mock.calls.image.fetch_add(1, Ordering::SeqCst);
    if mock.config.image_status != 200 {
        return (status(mock.config.image_status), "image model exploded").into_response();
    }
    Json(json!({ "created": 1, "data": [{ "url": IMAGE_URL }] })).into_response()
}

async fn mock_reasoning(State(mock): State<Arc<Mock>>, Json(body): Json<Value>) -> Response {
    mock.calls.reasoning.fetch_add(1, Ordering::SeqCst);
    if mock.config.reasoning_status != 200 {
        return (status(mock.config.reasoning_status), "overloaded").into_response();
    }
    assert_eq!(body["stream"], true);
    let mut sse = String::new();
    for chunk in REASONING_CHUNKS {
        let line = json!({ "id": "r1", "choices": [{ "index": 0, "delta": { "content": chunk } }] });
        sse.push_str(&format!("data: {}\n\n", line));
    }
    sse.push_str("data: [DONE]\n\n");
    ([(header::CONTENT_TYPE, "text/event-stream")], sse).into_response()
}

pub struct Harness {
    pub app: Router,
    pub state: Arc<AppState>,
    pub db: DbPool,
    pub calls: Arc<Calls>,
    _dir: TempDir,
}

pub async fn harness(config: MockConfig) -> Harness {
    harness_with(config, None).await
}

pub async fn harness_with(config: MockConfig, passphrase: Option<&str>) -> Harness {
    let calls = Arc::new(Calls::default());
    let mock = Arc::new(Mock {
        config,
        calls: calls.clone(),
    });
    let upstream = Router::new()
        .route("/chat", post(mock_chat))
        .route("/image", post(mock_image))
        .route("/reasoning", post(mock_reasoning))
        .with_state(mock);
    let listener = match tokio::net::TcpListener::bind("127.0.0.1:0").await {
        Ok(l) => l,
        Err(e) => panic!("Failed to bind mock upstream: {}", e),
    };
    let addr = match listener.local_addr() {
        Ok(a) => a,
        Err(e) => panic!("No local addr: {}", e),
    };
    tokio::spawn(async move {
        let _ = axum::serve(listener, upstream).await;
    });

    let dir = match tempfile::tempdir() {
        Ok(d) => d,
        Err(e) => panic!("Failed to create temp dir: {:?}", e),
    };
    let db = match init_db(dir.path().join("gateway.db")).await {
        Ok(p) => p,
        Err(e) => panic!("Failed to init DB: {:?}", e),
    };
    if let Err(e) = register_credential(&SubjectId::from(SUBJECT), TOKEN, &db).await {
        panic!("Failed to register credential: {:?}", e);
    }

    let base = format!("http://{}", addr);
    let args = Args::parse_from([
        "chatgate".to_string(),
        "--chat-url".to_string(),
        format!("{}/chat", base),
        "--chat-model".to_string(),
        "chat-model".to_string(),
        "--reasoning-url".to_string(),
        format!("{}/reasoning", base),
        "--image-url".to_string(),
        format!("{}/image", base),
        "--title-model".to_string(),
        TITLE_MODEL.to_string(),
        "--request-timeout-secs".to_string(),
        "10".to_string(),
    ]);
    let keys = BackendKeys {
        chat: "chat-key".to_string(),
        reasoning: Some("reasoning-key".to_string()),
        image: Some("image-key".to_string()),
    };
    let state = match AppState::new(
        args,
        db.clone(),
        keys,
        KeywordTables::default(),
        passphrase.map(str::to_string),
    ) {
        Ok(s) => Arc::new(s),
        Err(e) => panic!("Failed to build state: {:?}", e),
    };

    Harness {
        app: build_router(state.clone()),
        state,
        db,
        calls,
        _dir: dir,
    }
}

pub fn chat_body(turns: &[(&str, &str)]) -> Value {
    let turns: Vec<Value> = turns
        .iter()
        .map(|(role, content)| json!({ "role": role, "content": content }))
        .collect();
    json!({ "turns": turns, "subjectId": SUBJECT })
}

pub fn chat_request(body: &Value, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/v1/chat/stream")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(t) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", t));
    }
    match builder.body(Body::from(body.to_string())) {
        Ok(r) => r,
        Err(e) => panic!("Failed to build request: {}", e),
    }
}

pub async fn send(app: &Router, request: Request<Body>) -> Response {
    match app.clone().oneshot(request).await {
        Ok(r) => r,
        Err(e) => match e {},
    }
}

/// Reads the whole event stream into a consumer.
pub async fn consume(response: Response) -> StreamConsumer {
    let bytes = match axum::body::to_bytes(response.into_body(), usize::MAX).await {
        Ok(b) => b,
        Err(e) => panic!("Failed to read stream: {}", e),
    };
    let mut consumer = StreamConsumer::with_placeholder("Thinking...");
    consumer.feed(&bytes);
    consumer.finish_input();
    consumer
}

pub async fn json_body(response: Response) -> Value {
    let bytes = match axum::body::to_bytes(response.into_body(), 64 * 1024).await {
        Ok(b) => b,
        Err(e) => panic!("Failed to read body: {}", e),
    };
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}
