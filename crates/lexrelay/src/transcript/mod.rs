//! Transcript logging
//!
//! After a stream completes, one `ChatTranscriptRecord` is handed to the
//! configured sink on a detached task. The client response is already sent by
//! then, so sink failures are logged and dropped.

mod http;

pub use http::HttpTranscriptSink;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::TranscriptConfig;
use crate::error::Result;

/// One completed question/answer exchange
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatTranscriptRecord {
    pub question: String,
    pub response: String,
    pub session_id: String,
    pub context: Option<String>,
    pub topic: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ChatTranscriptRecord {
    /// Build a record stamped now, truncating `response` to
    /// `max_response_chars` characters
    pub fn new(
        question: impl Into<String>,
        response: &str,
        session_id: impl Into<String>,
        context: Option<String>,
        topic: Option<String>,
        max_response_chars: usize,
    ) -> Self {
        Self {
            question: question.into(),
            response: truncate_chars(response, max_response_chars),
            session_id: session_id.into(),
            context,
            topic,
            created_at: Utc::now(),
        }
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}

/// Errors from writing a transcript
#[derive(Error, Debug)]
pub enum TranscriptError {
    #[error("Transcript request failed: {0}")]
    Request(String),

    #[error("Transcript endpoint returned {status}")]
    Status { status: u16 },

    #[error("Transcript sink rejected record: {0}")]
    Rejected(String),
}

/// Write-only destination for transcript records
#[async_trait]
pub trait TranscriptSink: Send + Sync {
    async fn record(&self, record: ChatTranscriptRecord) -> std::result::Result<(), TranscriptError>;
}

/// Emits each record as a structured `info` event
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

#[async_trait]
impl TranscriptSink for TracingSink {
    async fn record(&self, record: ChatTranscriptRecord) -> std::result::Result<(), TranscriptError> {
        info!(
            target: "lexrelay::transcript",
            session_id = %record.session_id,
            topic = record.topic.as_deref().unwrap_or("-"),
            question_chars = record.question.chars().count(),
            response_chars = record.response.chars().count(),
            has_context = record.context.is_some(),
            "Chat transcript"
        );
        Ok(())
    }
}

/// Discards everything; used when transcripts are disabled
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

#[async_trait]
impl TranscriptSink for NoopSink {
    async fn record(&self, _record: ChatTranscriptRecord) -> std::result::Result<(), TranscriptError> {
        Ok(())
    }
}

/// Pick the sink described by the config
pub fn build_sink(config: &TranscriptConfig) -> Result<Arc<dyn TranscriptSink>> {
    if !config.enabled {
        info!("Transcript logging disabled");
        return Ok(Arc::new(NoopSink));
    }

    match &config.endpoint {
        Some(endpoint) => {
            info!("Transcripts will be posted to {}", endpoint);
            Ok(Arc::new(HttpTranscriptSink::from_config(endpoint, config)?))
        }
        None => {
            info!("Transcripts will be written to the log");
            Ok(Arc::new(TracingSink))
        }
    }
}

/// Record a transcript without waiting for the sink (fire and forget)
pub fn dispatch_transcript(sink: Arc<dyn TranscriptSink>, record: ChatTranscriptRecord) {
    tokio::spawn(async move {
        let session_id = record.session_id.clone();
        match sink.record(record).await {
            Ok(()) => debug!("Recorded transcript for session {}", session_id),
            Err(e) => handle_transcript_error(&session_id, &e),
        }
    });
}

/// Sink failures are logged only; the client already has its answer
pub fn handle_transcript_error(session_id: &str, error: &TranscriptError) {
    warn!(
        error_type = "transcript",
        session_id = %session_id,
        error_message = %error,
        "Transcript logging failed (fire-and-forget), continuing"
    );
}
