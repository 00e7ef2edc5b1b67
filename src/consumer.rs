//! Client-side reducer for the gateway's SSE stream.
//!
//! Bytes may arrive split anywhere, including inside a multi-byte character;
//! lines are only decoded once complete. Lines that are not `data:` lines
//! (keep-alive comments, blank separators) and payloads that fail to parse
//! are skipped.

use crate::protocol::decode_data;
use crate::types::{RedirectSuggestion, StreamFrame};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageKind {
    #[default]
    Text,
    Image,
}

/// The assistant message being rendered for the current turn.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClientMessage {
    pub content: String,
    pub kind: MessageKind,
    pub image_url: Option<String>,
    pub redirect: Option<RedirectSuggestion>,
}

#[derive(Debug, Default)]
pub struct StreamConsumer {
    buffer: Vec<u8>,
    message: ClientMessage,
    received_content: bool,
    title: Option<String>,
    finished: bool,
    skipped_lines: usize,
    frames: Vec<StreamFrame>,
}

impl StreamConsumer {
    /// A consumer whose message shows `placeholder` until the first delta.
    pub fn with_placeholder(placeholder: &str) -> Self {
        Self {
            message: ClientMessage {
                content: placeholder.to_string(),
                ..ClientMessage::default()
            },
            ..Self::default()
        }
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.handle_line(&line[..line.len() - 1]);
        }
    }

    /// Flushes a final unterminated line.
    pub fn finish_input(&mut self) {
        if !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            self.handle_line(&line);
        }
    }

    fn handle_line(&mut self, raw: &[u8]) {
        if self.finished {
            return;
        }
        let line = match std::str::from_utf8(raw) {
            Ok(l) => l.trim_end_matches('\r'),
            Err(_) => {
                self.skipped_lines += 1;
                return;
            }
        };
        let data = match line.strip_prefix("data:") {
            Some(d) => d.strip_prefix(' ').unwrap_or(d),
            None => return,
        };
        match decode_data(data) {
            Some(frame) => self.apply(frame),
            None => {
                tracing::debug!("Skipping undecodable stream line");
                self.skipped_lines += 1;
            }
        }
    }

    fn apply(&mut self, frame: StreamFrame) {
        match &frame {
            StreamFrame::ContentDelta(text) => {
                if self.received_content {
                    self.message.content.push_str(text);
                } else {
                    self.message.content = text.clone();
                    self.received_content = true;
                }
            }
            StreamFrame::ImageResult(image) => {
                self.message.kind = MessageKind::Image;
                self.message.image_url = Some(image.url.clone());
            }
            StreamFrame::RedirectSuggestion(r) => self.message.redirect = Some(r.clone()),
            StreamFrame::ConversationTitle(t) => self.title = Some(t.clone()),
            StreamFrame::Terminator => self.finished = true,
        }
        self.frames.push(frame);
    }

    pub fn message(&self) -> &ClientMessage {
        &self.message
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn skipped_lines(&self) -> usize {
        self.skipped_lines
    }

    /// Every frame applied so far, in arrival order.
    pub fn frames(&self) -> &[StreamFrame] {
        &self.frames
    }
}
