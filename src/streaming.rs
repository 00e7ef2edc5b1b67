//! Turns backend output into ordered content frames.

use crate::backends::Deadline;
use crate::protocol::ContentWriter;
use crate::specs::openai::{parse_stream_line, LineEvent};
use bytes::Bytes;
use futures_util::Stream;
use futures_util::StreamExt;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};

const MAX_STREAM_LINES: usize = 100_000;

/// What the assembler delivered.
#[derive(Debug, Default)]
pub struct Assembled {
    /// Concatenation of every content delta sent, in order.
    pub text: String,
    /// False once the client went away mid-stream.
    pub client_connected: bool,
}

pub struct StreamAssembler {
    delta_chunk_chars: usize,
    deadline: Deadline,
}

enum NextLine {
    Line(Option<std::result::Result<String, LinesCodecError>>),
    Disconnected,
    DeadlineExpired,
}

impl StreamAssembler {
    pub fn new(delta_chunk_chars: usize, deadline: Deadline) -> Self {
        Self {
            delta_chunk_chars,
            deadline,
        }
    }

    /// Splits a single complete answer into deltas.
    pub async fn forward_complete(&self, text: &str, writer: &mut ContentWriter) -> Assembled {
        let mut assembled = Assembled {
            text: String::with_capacity(text.len()),
            client_connected: true,
        };
        for piece in crate::text::chunk_for_deltas(text, self.delta_chunk_chars) {
            if !writer.content(piece).await {
                assembled.client_connected = false;
                break;
            }
            assembled.text.push_str(piece);
        }
        assembled
    }

    /// Relays a natively streaming backend, one delta per upstream chunk.
    pub async fn forward_native(
        &self,
        response: reqwest::Response,
        writer: &mut ContentWriter,
    ) -> Assembled {
        let bytes_stream = response
            .bytes_stream()
            .map(|r| r.map_err(std::io::Error::other));
        let lines = FramedRead::new(
            tokio_util::io::StreamReader::new(bytes_stream),
            LinesCodec::new_with_max_length(1024 * 1024),
        );
        self.forward_lines(lines, writer).await
    }

    pub async fn forward_lines<R>(
        &self,
        mut lines: FramedRead<tokio_util::io::StreamReader<R, Bytes>, LinesCodec>,
        writer: &mut ContentWriter,
    ) -> Assembled
    where
        R: Stream<Item = std::result::Result<Bytes, std::io::Error>> + Unpin + Send,
    {
        let mut assembled = Assembled {
            text: String::new(),
            client_connected: true,
        };
        let mut line_count = 0;

        loop {
            let next = tokio::select! {
                line = lines.next() => NextLine::Line(line),
                _ = writer.closed() => NextLine::Disconnected,
                _ = tokio::time::sleep_until(self.deadline.instant()) => NextLine::DeadlineExpired,
            };

            let line = match next {
                NextLine::Line(Some(Ok(line))) => line,
                NextLine::Line(Some(Err(e))) => {
                    tracing::error!("[☁️  -> ⚙️ ] Line Parse Error: {}", e);
                    break;
                }
                NextLine::Line(None) => {
                    tracing::debug!("[☁️  -> ⚙️ ] Upstream closed without [DONE]");
                    break;
                }
                NextLine::Disconnected => {
                    tracing::info!("[⚙️  -> 🖥️ ] Client disconnected, cancelling upstream stream");
                    assembled.client_connected = false;
                    break;
                }
                NextLine::DeadlineExpired => {
                    tracing::warn!("[☁️  -> ⚙️ ] Deadline reached mid-stream, closing");
                    break;
                }
            };

            line_count += 1;
            if line_count > MAX_STREAM_LINES {
                tracing::error!(
                    "[☁️  -> ⚙️ ] Stream exceeded max line limit ({})",
                    MAX_STREAM_LINES
                );
                break;
            }

            let data = match line.strip_prefix("data:") {
                Some(d) => d.trim_start(),
                None => continue,
            };
            if data == "[DONE]" {
                tracing::debug!("[☁️  -> ⚙️ ] Stream end marker [DONE] received");
                break;
            }

            match parse_stream_line(data) {
                LineEvent::Chunk(chunk) => {
                    for choice in &chunk.choices {
                        let piece = match choice.delta.content.as_deref() {
                            Some(p) if !p.is_empty() => p,
                            _ => continue,
                        };
                        if !writer.content(piece).await {
                            assembled.client_connected = false;
                            return assembled;
                        }
                        assembled.text.push_str(piece);
                    }
                }
                LineEvent::Error(err) => {
                    tracing::error!(
                        "[☁️  -> ⚙️ ] Provider error mid-stream: {}",
                        err.error.message
                    );
                    break;
                }
                LineEvent::Unknown(raw) => {
                    tracing::debug!(
                        "[☁️  -> ⚙️ ] Skipping unrecognized line: {}",
                        crate::text::prefix_chars(&raw, 120)
                    );
                }
            }
        }
        assembled
    }
}
