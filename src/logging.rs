use crate::constants::REQUEST_ID_HEADER;
use crate::types::{ChatRequest, RequestId, StreamFrame};
use axum::{
    body::Body,
    http::{HeaderValue, Request, Response},
    middleware::Next,
};
use std::panic;
use tracing::{error, info};
use tracing::{info_span, Instrument};

/// Sets up a global panic hook that logs panics using tracing.
pub fn setup_panic_hook() {
    let original_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        let backtrace = std::backtrace::Backtrace::capture();

        let payload = panic_info.payload();
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            *s
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.as_str()
        } else {
            "Unknown panic payload"
        };

        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown location".to_string());

        error!(
            target: "panic",
            message = %message,
            location = %location,
            backtrace = %backtrace,
            "FATAL: Application panicked"
        );

        original_hook(panic_info);
    }));
}

/// Stamps every request with an id (kept if the caller sent one), echoes it
/// on the response and runs the handler inside a `request` span.
pub async fn request_id_middleware(mut req: Request<Body>, next: Next) -> Response<Body> {
    let request_id = match req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|h| h.to_str().ok())
        .filter(|s| !s.is_empty() && s.len() <= 128)
    {
        Some(existing) => existing.to_string(),
        None => RequestId::new().0,
    };

    let header = HeaderValue::from_str(&request_id).ok();
    if let Some(val) = &header {
        req.headers_mut().insert(REQUEST_ID_HEADER, val.clone());
    }

    let span = info_span!("request", request_id = %request_id);
    let mut response = next.run(req).instrument(span).await;
    if let Some(val) = header {
        response.headers_mut().insert(REQUEST_ID_HEADER, val);
    }
    response
}

pub fn log_request_summary(request: &ChatRequest, request_id: &RequestId) {
    let attachments: usize = request
        .turns
        .iter()
        .map(|t| t.attachments.len())
        .sum::<usize>()
        + request.files.len();

    info!(
        target: "flight_recorder",
        "[REQ] {} | Subject: {} | Turns: {} | Attachments: {} | Project: {}",
        request_id.short(),
        request.subject_id,
        request.turns.len(),
        attachments,
        request.project_context.is_some()
    );
}

/// Per-stream frame counters, logged once when the stream terminates.
#[derive(Default)]
pub struct StreamMetric {
    pub content_frames: usize,
    pub content_chars: usize,
    pub images: usize,
    pub redirects: usize,
    pub titles: usize,
    pub terminated: bool,
    started: Option<std::time::Instant>,
}

impl StreamMetric {
    pub fn new() -> Self {
        Self {
            started: Some(std::time::Instant::now()),
            ..Self::default()
        }
    }

    pub fn record(&mut self, frame: &StreamFrame) {
        match frame {
            StreamFrame::ContentDelta(text) => {
                self.content_frames += 1;
                self.content_chars += text.chars().count();
            }
            StreamFrame::ImageResult(_) => self.images += 1,
            StreamFrame::RedirectSuggestion(_) => self.redirects += 1,
            StreamFrame::ConversationTitle(_) => self.titles += 1,
            StreamFrame::Terminator => self.terminated = true,
        }
    }

    pub fn log_summary(&self, request_id: &RequestId) {
        let elapsed_ms = match self.started {
            Some(s) => s.elapsed().as_millis(),
            None => 0,
        };
        info!(
            target: "flight_recorder",
            "[STREAM END] {} | Content: {} frames / {} chars | Image: {} | Redirect: {} | Title: {} | Done: {} | {}ms",
            request_id.short(),
            self.content_frames,
            self.content_chars,
            self.images,
            self.redirects,
            self.titles,
            self.terminated,
            elapsed_ms
        );
    }
}
