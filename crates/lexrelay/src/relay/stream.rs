//! The relay loop: one upstream body in, normalized frames out
//!
//! Frames reach the client as soon as the chunk that completes them has been
//! decoded. The transcript is assembled alongside, in the same order.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::Serialize;
use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

use super::sse::{ClientFrame, LineDecoder, LineEvent, MAX_LINE_BYTES, parse_line};

/// Why the relay loop stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEnd {
    /// Upstream sent its stop event; the client got `[DONE]`
    Completed,
    /// Upstream closed the body without a stop event
    UpstreamClosed,
    /// Reading the upstream body failed mid-stream
    UpstreamFailed(String),
    /// The client went away; upstream was dropped
    ClientGone,
}

impl RelayEnd {
    /// Whether the stream ran to its natural end and should be recorded
    pub fn is_finished(&self) -> bool {
        matches!(self, RelayEnd::Completed | RelayEnd::UpstreamClosed)
    }
}

/// Result of one relay session
#[derive(Debug, Clone)]
pub struct RelayOutcome {
    /// Concatenation of every forwarded text delta
    pub transcript: String,
    pub end: RelayEnd,
    pub frames_forwarded: usize,
    pub frames_skipped: usize,
}

/// Process-wide relay counters
#[derive(Debug, Default)]
pub struct RelayMetrics {
    streams_opened: AtomicU64,
    streams_completed: AtomicU64,
    upstream_failures: AtomicU64,
    client_disconnects: AtomicU64,
    frames_forwarded: AtomicU64,
    frames_skipped: AtomicU64,
}

/// Point-in-time copy of [`RelayMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RelaySnapshot {
    pub streams_opened: u64,
    pub streams_completed: u64,
    pub upstream_failures: u64,
    pub client_disconnects: u64,
    pub frames_forwarded: u64,
    pub frames_skipped: u64,
}

impl RelayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_opened(&self) {
        self.streams_opened.fetch_add(1, Ordering::Relaxed);
    }

    /// Upstream refused the call or could not be reached
    pub fn record_upstream_failure(&self) {
        self.upstream_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_outcome(&self, outcome: &RelayOutcome) {
        match outcome.end {
            RelayEnd::Completed | RelayEnd::UpstreamClosed => {
                self.streams_completed.fetch_add(1, Ordering::Relaxed);
            }
            RelayEnd::UpstreamFailed(_) => {
                self.upstream_failures.fetch_add(1, Ordering::Relaxed);
            }
            RelayEnd::ClientGone => {
                self.client_disconnects.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.frames_forwarded
            .fetch_add(outcome.frames_forwarded as u64, Ordering::Relaxed);
        self.frames_skipped
            .fetch_add(outcome.frames_skipped as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RelaySnapshot {
        RelaySnapshot {
            streams_opened: self.streams_opened.load(Ordering::Relaxed),
            streams_completed: self.streams_completed.load(Ordering::Relaxed),
            upstream_failures: self.upstream_failures.load(Ordering::Relaxed),
            client_disconnects: self.client_disconnects.load(Ordering::Relaxed),
            frames_forwarded: self.frames_forwarded.load(Ordering::Relaxed),
            frames_skipped: self.frames_skipped.load(Ordering::Relaxed),
        }
    }
}

/// Streaming relay between one upstream body and one client channel
pub struct StreamingRelay;

impl StreamingRelay {
    /// Relay `upstream` into `client` until either side ends.
    ///
    /// The client sender is consumed and dropped on return, which closes the
    /// client body. A closed client channel stops the loop at the next await
    /// and drops the upstream stream with it.
    pub async fn run<S, E>(upstream: S, client: mpsc::Sender<Bytes>) -> RelayOutcome
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Display,
    {
        let mut upstream = std::pin::pin!(upstream);
        let mut decoder = LineDecoder::new();
        let mut transcript = String::new();
        let mut frames_forwarded = 0usize;
        let mut frames_skipped = 0usize;

        let end = 'relay: loop {
            let next = tokio::select! {
                biased;
                _ = client.closed() => break 'relay RelayEnd::ClientGone,
                next = upstream.next() => next,
            };

            let chunk = match next {
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Upstream stream failed mid-relay");
                    break 'relay RelayEnd::UpstreamFailed(e.to_string());
                }
                None => {
                    if decoder.pending_len() > 0 {
                        tracing::debug!(
                            bytes = decoder.pending_len(),
                            "Dropping unterminated trailing line"
                        );
                    }
                    break 'relay RelayEnd::UpstreamClosed;
                }
            };

            for line in decoder.push(&chunk) {
                match parse_line(&line) {
                    LineEvent::Text(text) => {
                        transcript.push_str(&text);
                        if client.send(ClientFrame::Text(text).encode()).await.is_err() {
                            break 'relay RelayEnd::ClientGone;
                        }
                        frames_forwarded += 1;
                    }
                    LineEvent::Stop => {
                        if client.send(ClientFrame::Done.encode()).await.is_err() {
                            break 'relay RelayEnd::ClientGone;
                        }
                        break 'relay RelayEnd::Completed;
                    }
                    LineEvent::Malformed => {
                        frames_skipped += 1;
                        tracing::debug!(line = %line, "Skipping malformed upstream frame");
                    }
                    LineEvent::Ignored => {}
                }
            }

            if decoder.is_overflowing() {
                tracing::warn!(
                    bytes = decoder.pending_len(),
                    "Upstream line exceeded buffer limit"
                );
                break 'relay RelayEnd::UpstreamFailed(format!(
                    "upstream line longer than {MAX_LINE_BYTES} bytes"
                ));
            }
        };

        RelayOutcome {
            transcript,
            end,
            frames_forwarded,
            frames_skipped,
        }
    }
}
