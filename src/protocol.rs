//! SSE wire encoding for [`StreamFrame`] and the ordered frame writers.
//!
//! Every frame is one `data:` line carrying a JSON envelope shaped like an
//! OpenAI streaming chunk:
//!
//! ```text
//! data: {"choices":[{"delta":{"content":"Hel"}}]}
//! data: {"choices":[{"delta":{"redirect":{"module":"simulator","label":"Open Simulator","prompt":"..."}}}]}
//! data: {"choices":[{"delta":{"conversationTitle":"Buck Converter Ripple"}}]}
//! data: [DONE]
//! ```
//!
//! Frame order is enforced by the writer types rather than checked at
//! runtime: [`ContentWriter`] only accepts content and image frames, turning
//! it into a [`SideChannelWriter`] emits the redirect, and only
//! [`SideChannelWriter::terminate`] (or dropping the writer) emits `[DONE]`.

use crate::constants::DONE_MARKER;
use crate::logging::StreamMetric;
use crate::types::*;
use axum::response::sse::Event;
use serde_json::{json, Value};
use std::convert::Infallible;
use tokio::sync::mpsc;

pub type SseItem = std::result::Result<Event, Infallible>;
pub type SseSender = mpsc::Sender<SseItem>;

/// JSON envelope for a frame. The terminator has no envelope.
pub fn envelope(frame: &StreamFrame) -> Option<Value> {
    let delta = match frame {
        StreamFrame::ContentDelta(text) => json!({ "content": text }),
        StreamFrame::RedirectSuggestion(r) => json!({
            "redirect": { "module": r.module, "label": r.label, "prompt": r.prompt }
        }),
        StreamFrame::ConversationTitle(title) => json!({ "conversationTitle": title }),
        StreamFrame::ImageResult(img) => json!({ "image_url": img.url }),
        StreamFrame::Terminator => return None,
    };
    Some(json!({ "choices": [{ "delta": delta }] }))
}

/// The payload after `data: `.
pub fn encode_data(frame: &StreamFrame) -> Result<String> {
    match envelope(frame) {
        Some(v) => Ok(serde_json::to_string(&v)?),
        None => Ok(DONE_MARKER.to_string()),
    }
}

/// A complete SSE event as it appears on the wire.
pub fn encode_line(frame: &StreamFrame) -> Result<String> {
    Ok(format!("data: {}\n\n", encode_data(frame)?))
}

/// Inverse of [`encode_data`]. Returns `None` for payloads that are not a
/// recognizable frame. Image frames decode with an empty caption since the
/// caption travels as its own content frame.
pub fn decode_data(data: &str) -> Option<StreamFrame> {
    let data = data.trim();
    if data == DONE_MARKER {
        return Some(StreamFrame::Terminator);
    }
    let value: Value = serde_json::from_str(data).ok()?;
    let delta = value.get("choices")?.get(0)?.get("delta")?;

    if let Some(text) = delta.get("content").and_then(|c| c.as_str()) {
        return Some(StreamFrame::ContentDelta(text.to_string()));
    }
    if let Some(redirect) = delta.get("redirect") {
        let suggestion: RedirectSuggestion = serde_json::from_value(redirect.clone()).ok()?;
        return Some(StreamFrame::RedirectSuggestion(suggestion));
    }
    if let Some(title) = delta.get("conversationTitle").and_then(|t| t.as_str()) {
        return Some(StreamFrame::ConversationTitle(title.to_string()));
    }
    if let Some(url) = delta.get("image_url").and_then(|u| u.as_str()) {
        return Some(StreamFrame::ImageResult(ImageResult {
            url: url.to_string(),
            caption: String::new(),
        }));
    }
    None
}

/// Shared state behind both writer stages. Dropping it without an explicit
/// terminate still emits `[DONE]`, so the terminator goes out exactly once on
/// every path.
struct FrameSink {
    tx: SseSender,
    request_id: RequestId,
    metric: StreamMetric,
    terminated: bool,
    disconnected: bool,
}

impl FrameSink {
    async fn send(&mut self, frame: StreamFrame) -> bool {
        if self.disconnected || self.terminated {
            return false;
        }
        let data = match encode_data(&frame) {
            Ok(d) => d,
            Err(e) => {
                tracing::error!("Failed to encode {} frame: {}", frame.kind(), e);
                return false;
            }
        };
        if self.tx.send(Ok(Event::default().data(data))).await.is_err() {
            tracing::info!("[⚙️  -> 🖥️ ] Client disconnected before {} frame", frame.kind());
            self.disconnected = true;
            return false;
        }
        self.metric.record(&frame);
        true
    }

    fn is_closed(&self) -> bool {
        self.disconnected || self.tx.is_closed()
    }

    async fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        self.send(StreamFrame::Terminator).await;
        self.terminated = true;
        self.metric.log_summary(&self.request_id);
    }
}

impl Drop for FrameSink {
    fn drop(&mut self) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        if !self.disconnected {
            match self.tx.try_send(Ok(Event::default().data(DONE_MARKER))) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => tracing::warn!(
                    "[⚙️  -> 🖥️ ] Stream buffer full, [DONE] for {} dropped",
                    self.request_id.short()
                ),
                Err(mpsc::error::TrySendError::Closed(_)) => tracing::debug!(
                    "[⚙️  -> 🖥️ ] Client gone before [DONE] for {}",
                    self.request_id.short()
                ),
            }
        }
        self.metric.log_summary(&self.request_id);
    }
}

/// First stage: content deltas and image results.
pub struct ContentWriter {
    sink: FrameSink,
}

impl ContentWriter {
    pub fn open(tx: SseSender, request_id: RequestId) -> Self {
        Self {
            sink: FrameSink {
                tx,
                request_id,
                metric: StreamMetric::new(),
                terminated: false,
                disconnected: false,
            },
        }
    }

    /// Returns false once the client is gone.
    pub async fn content(&mut self, text: &str) -> bool {
        if text.is_empty() {
            return !self.sink.is_closed();
        }
        self.sink
            .send(StreamFrame::ContentDelta(text.to_string()))
            .await
    }

    pub async fn image(&mut self, image: &ImageResult) -> bool {
        self.sink.send(StreamFrame::ImageResult(image.clone())).await
    }

    pub fn is_closed(&self) -> bool {
        self.sink.is_closed()
    }

    /// Resolves once the client side of the stream has gone away.
    pub async fn closed(&self) {
        self.sink.tx.closed().await
    }

    /// Closes the content stage, emitting the redirect if there is one.
    pub async fn finish(mut self, redirect: Option<RedirectSuggestion>) -> SideChannelWriter {
        if let Some(r) = redirect {
            self.sink.send(StreamFrame::RedirectSuggestion(r)).await;
        }
        SideChannelWriter { sink: self.sink }
    }

    /// Single-frame reply followed by the terminator.
    pub async fn reply_and_close(mut self, text: &str) {
        self.content(text).await;
        self.finish(None).await.terminate().await;
    }
}

/// Second stage: only the title may still be written.
pub struct SideChannelWriter {
    sink: FrameSink,
}

impl SideChannelWriter {
    pub async fn title(&mut self, title: &str) -> bool {
        self.sink
            .send(StreamFrame::ConversationTitle(title.to_string()))
            .await
    }

    pub fn is_closed(&self) -> bool {
        self.sink.is_closed()
    }

    /// Resolves once the client side of the stream has gone away.
    pub async fn closed(&self) {
        self.sink.tx.closed().await
    }

    pub async fn terminate(mut self) {
        self.sink.terminate().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payloads(rx: &mut mpsc::Receiver<SseItem>) -> usize {
        let mut n = 0;
        while rx.try_recv().is_ok() {
            n += 1;
        }
        n
    }

    #[test]
    fn test_envelopes_match_wire_shape() {
        let data = encode_data(&StreamFrame::ContentDelta("hi\nthere".into())).unwrap_or_default();
        assert_eq!(data, r#"{"choices":[{"delta":{"content":"hi\nthere"}}]}"#);
        assert!(!data.contains('\n'));

        let data = encode_data(&StreamFrame::ConversationTitle("Buck Ripple".into())).unwrap_or_default();
        assert_eq!(data, r#"{"choices":[{"delta":{"conversationTitle":"Buck Ripple"}}]}"#);

        assert_eq!(encode_data(&StreamFrame::Terminator).unwrap_or_default(), "[DONE]");
        assert_eq!(
            encode_line(&StreamFrame::Terminator).unwrap_or_default(),
            "data: [DONE]\n\n"
        );
    }

    #[test]
    fn test_decode_recognizes_every_frame_kind() {
        let frames = vec![
            StreamFrame::ContentDelta("a".into()),
            StreamFrame::RedirectSuggestion(RedirectSuggestion {
                module: "simulator".into(),
                label: "Open Simulator".into(),
                prompt: "simulate it".into(),
            }),
            StreamFrame::ConversationTitle("T".into()),
            StreamFrame::Terminator,
        ];
        for frame in frames {
            let data = encode_data(&frame).unwrap_or_default();
            assert_eq!(decode_data(&data), Some(frame));
        }
        let image = decode_data(r#"{"choices":[{"delta":{"image_url":"https://x/y.png"}}]}"#);
        assert!(matches!(image, Some(StreamFrame::ImageResult(i)) if i.url == "https://x/y.png"));
        assert_eq!(decode_data("{not json"), None);
        assert_eq!(decode_data(r#"{"choices":[]}"#), None);
    }

    #[tokio::test]
    async fn test_terminator_sent_exactly_once_on_explicit_close() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut writer = ContentWriter::open(tx, RequestId::new());
        assert!(writer.content("hello").await);
        let side = writer.finish(None).await;
        side.terminate().await;
        // content + [DONE]
        assert_eq!(payloads(&mut rx), 2);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_dropped_writer_still_terminates() {
        let (tx, mut rx) = mpsc::channel(16);
        {
            let mut writer = ContentWriter::open(tx, RequestId::new());
            writer.content("partial").await;
        }
        assert_eq!(payloads(&mut rx), 2);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_closed_client_stops_writes() {
        let (tx, rx) = mpsc::channel(16);
        let mut writer = ContentWriter::open(tx, RequestId::new());
        drop(rx);
        assert!(!writer.content("nobody listening").await);
        assert!(writer.is_closed());
    }

    #[tokio::test]
    async fn test_empty_content_is_not_a_frame() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut writer = ContentWriter::open(tx, RequestId::new());
        assert!(writer.content("").await);
        writer.reply_and_close("done").await;
        assert_eq!(payloads(&mut rx), 2);
    }

    #[tokio::test]
    async fn test_drop_with_full_buffer_does_not_block() {
        let (tx, mut rx) = mpsc::channel(1);
        {
            let mut writer = ContentWriter::open(tx, RequestId::new());
            assert!(writer.content("fills the buffer").await);
        }
        assert!(matches!(rx.recv().await, Some(Ok(_))));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_side_channel_writer_observes_disconnect() {
        let (tx, rx) = mpsc::channel(16);
        let side = ContentWriter::open(tx, RequestId::new()).finish(None).await;
        assert!(!side.is_closed());
        drop(rx);
        let closed = tokio::time::timeout(std::time::Duration::from_secs(1), side.closed()).await;
        assert!(closed.is_ok());
        assert!(side.is_closed());
    }
}
