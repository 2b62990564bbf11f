//! SSE framing for both sides of the relay
//!
//! Upstream side: raw byte chunks are split into complete lines and each
//! `data:` line is parsed into a [`LineEvent`]. Downstream side: normalized
//! [`ClientFrame`]s are encoded as `data: <json>` events.
//!
//! ```text
//! upstream:  data: {"type":"content_block_delta","delta":{"type":"text_delta","text":"Hi"}}
//! client:    data: {"text":"Hi"}
//! ```

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Payload marking the end of a stream
pub const DONE_MARKER: &str = "[DONE]";

/// Longest unterminated line the decoder will buffer
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Incremental line splitter
///
/// Bytes are buffered until a `\n` arrives, so a line (or a UTF-8 sequence)
/// split across chunks is only decoded once it is complete.
#[derive(Debug, Default)]
pub struct LineDecoder {
    pending: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every line it completed, without terminators
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let Some(last_newline) = self.pending.iter().rposition(|b| *b == b'\n') else {
            return Vec::new();
        };

        let rest = self.pending.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.pending, rest);

        complete[..last_newline]
            .split(|b| *b == b'\n')
            .map(|line| {
                let line = line.strip_suffix(b"\r").unwrap_or(line);
                String::from_utf8_lossy(line).into_owned()
            })
            .collect()
    }

    /// Bytes of the trailing, not yet terminated line
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// The trailing line has grown past [`MAX_LINE_BYTES`]
    pub fn is_overflowing(&self) -> bool {
        self.pending.len() > MAX_LINE_BYTES
    }
}

/// What one upstream line means to the relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    /// Incremental text to append and forward
    Text(String),
    /// End of the upstream message
    Stop,
    /// A `data:` line whose payload is not valid JSON
    Malformed,
    /// Blank lines, `event:` lines, comments and unrelated event types
    Ignored,
}

/// Upstream event payloads the relay understands
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum UpstreamEvent {
    ContentBlockDelta { delta: Delta },
    MessageStop,
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Delta {
    TextDelta { text: String },
    #[serde(other)]
    Other,
}

/// Classify one complete upstream line
pub fn parse_line(line: &str) -> LineEvent {
    let Some(payload) = line.strip_prefix("data:") else {
        return LineEvent::Ignored;
    };
    let payload = payload.trim();

    if payload.is_empty() {
        return LineEvent::Ignored;
    }
    if payload == DONE_MARKER {
        return LineEvent::Stop;
    }

    match serde_json::from_str::<UpstreamEvent>(payload) {
        Ok(UpstreamEvent::ContentBlockDelta {
            delta: Delta::TextDelta { text },
        }) => LineEvent::Text(text),
        Ok(UpstreamEvent::MessageStop) => LineEvent::Stop,
        Ok(_) => LineEvent::Ignored,
        Err(_) => {
            // Valid JSON of an unexpected shape is not a framing error.
            if serde_json::from_str::<serde_json::Value>(payload).is_ok() {
                LineEvent::Ignored
            } else {
                LineEvent::Malformed
            }
        }
    }
}

#[derive(Serialize)]
struct TextPayload<'a> {
    text: &'a str,
}

/// Normalized frame sent to the browser
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    Text(String),
    Done,
}

impl ClientFrame {
    /// Encode as one SSE event, including the blank-line separator
    pub fn encode(&self) -> Bytes {
        match self {
            ClientFrame::Text(text) => {
                let json = serde_json::to_string(&TextPayload { text })
                    .unwrap_or_else(|_| "{\"text\":\"\"}".to_string());
                Bytes::from(format!("data: {json}\n\n"))
            }
            ClientFrame::Done => Bytes::from(format!("data: {DONE_MARKER}\n\n")),
        }
    }
}
