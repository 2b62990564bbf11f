//! Test doubles for lexrelay
//!
//! - `ManualClock`: a clock tests move by hand
//! - `ScriptedUpstream`: an `UpstreamClient` that replays canned SSE chunks
//!   and counts how often it was called
//! - `RecordingSink`: a `TranscriptSink` that keeps what it receives

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, stream};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::chat::ChatTurn;
use crate::gate::Clock;
use crate::relay::{ByteStream, UpstreamClient, UpstreamError};
use crate::transcript::{ChatTranscriptRecord, TranscriptError, TranscriptSink};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Clock whose time only changes when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(start_ms),
        }
    }

    pub fn advance(&self, ms: u64) {
        self.now_ms.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set(&self, ms: u64) {
        self.now_ms.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Messages API `content_block_delta` line carrying `text`
pub fn text_delta_event(text: &str) -> String {
    let payload = serde_json::json!({
        "type": "content_block_delta",
        "index": 0,
        "delta": { "type": "text_delta", "text": text },
    });
    format!("event: content_block_delta\ndata: {payload}\n\n")
}

/// Messages API `message_stop` line
pub fn message_stop_event() -> String {
    "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n".to_string()
}

#[derive(Debug, Clone)]
enum Script {
    Chunks {
        chunks: Vec<Bytes>,
        then: Tail,
    },
    Refuse(UpstreamError),
}

#[derive(Debug, Clone)]
enum Tail {
    End,
    Fail(String),
    Hang,
}

/// Upstream that replays a fixed script
#[derive(Debug)]
pub struct ScriptedUpstream {
    configured: bool,
    script: Script,
    invocations: AtomicUsize,
    questions: Mutex<Vec<String>>,
}

impl ScriptedUpstream {
    fn with_script(script: Script) -> Self {
        Self {
            configured: true,
            script,
            invocations: AtomicUsize::new(0),
            questions: Mutex::new(Vec::new()),
        }
    }

    /// Yield `chunks` in order, then close the body
    pub fn chunks<I, B>(chunks: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        Self::with_script(Script::Chunks {
            chunks: chunks.into_iter().map(Into::into).collect(),
            then: Tail::End,
        })
    }

    /// Text deltas for each piece, then a stop event
    pub fn answer(pieces: &[&str]) -> Self {
        let mut chunks: Vec<String> = pieces.iter().map(|p| text_delta_event(p)).collect();
        chunks.push(message_stop_event());
        Self::chunks(chunks)
    }

    /// Yield `chunks`, then fail the body read
    pub fn chunks_then_error<I, B>(chunks: I, error: &str) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        Self::with_script(Script::Chunks {
            chunks: chunks.into_iter().map(Into::into).collect(),
            then: Tail::Fail(error.to_string()),
        })
    }

    /// Yield `chunks`, then never produce another item
    pub fn chunks_then_hang<I, B>(chunks: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        Self::with_script(Script::Chunks {
            chunks: chunks.into_iter().map(Into::into).collect(),
            then: Tail::Hang,
        })
    }

    /// Refuse to open the stream
    pub fn refusing(error: UpstreamError) -> Self {
        Self::with_script(Script::Refuse(error))
    }

    /// Report no credentials
    pub fn unconfigured() -> Self {
        Self {
            configured: false,
            ..Self::answer(&[])
        }
    }

    /// Number of `open_stream` calls so far
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    /// Questions received, in call order
    pub fn questions(&self) -> Vec<String> {
        lock(&self.questions).clone()
    }
}

#[async_trait]
impl UpstreamClient for ScriptedUpstream {
    fn is_configured(&self) -> bool {
        self.configured
    }

    async fn open_stream(&self, turn: &ChatTurn) -> Result<ByteStream, UpstreamError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        lock(&self.questions).push(turn.question.clone());

        match &self.script {
            Script::Refuse(error) => Err(error.clone()),
            Script::Chunks { chunks, then } => {
                let head = stream::iter(chunks.clone().into_iter().map(Ok));
                let body = match then.clone() {
                    Tail::End => head.boxed(),
                    Tail::Fail(message) => head
                        .chain(stream::once(async move {
                            Err(UpstreamError::Stream(message))
                        }))
                        .boxed(),
                    Tail::Hang => head.chain(stream::pending()).boxed(),
                };
                Ok(body)
            }
        }
    }
}

/// Sink that stores every record it is given
#[derive(Debug, Default)]
pub struct RecordingSink {
    records: Mutex<Vec<ChatTranscriptRecord>>,
    fail: bool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores records but reports every write as failed
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn records(&self) -> Vec<ChatTranscriptRecord> {
        lock(&self.records).clone()
    }

    /// Wait up to five seconds for at least `count` records
    pub async fn wait_for(&self, count: usize) -> Vec<ChatTranscriptRecord> {
        let _ = tokio::time::timeout(Duration::from_secs(5), async {
            while lock(&self.records).len() < count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        self.records()
    }
}

#[async_trait]
impl TranscriptSink for RecordingSink {
    async fn record(&self, record: ChatTranscriptRecord) -> Result<(), TranscriptError> {
        lock(&self.records).push(record);
        if self.fail {
            return Err(TranscriptError::Rejected("recording sink set to fail".to_string()));
        }
        Ok(())
    }
}
