//! `POST /api/chat`
//!
//! Order of checks: configuration (500), payload (400), upstream open (502).
//! After the upstream accepts, the response is an SSE body fed by a relay
//! task; nothing after that point can change the status code.

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::header,
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, warn};

use super::error::ChatError;
use super::request::{ChatRequest, ChatTurn};
use crate::relay::{ByteStream, StreamingRelay, UpstreamError};
use crate::server::AppState;
use crate::transcript::{ChatTranscriptRecord, dispatch_transcript};

/// Validate, open the upstream call and stream the answer back
pub async fn chat_handler(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, ChatError> {
    if !state.upstream.is_configured() {
        error!("Chat request rejected: upstream API key is not configured");
        return Err(ChatError::MissingConfig);
    }

    let turn = ChatRequest::parse(&body)
        .and_then(|request| request.validate(&state.config.limits))
        .inspect_err(|e| debug!(error_type = e.category(), "Rejected chat request: {e}"))?;

    let upstream = match state.upstream.open_stream(&turn).await {
        Ok(stream) => stream,
        Err(UpstreamError::NotConfigured) => return Err(ChatError::MissingConfig),
        Err(e) => {
            error!(
                error_type = "upstream",
                session_id = %turn.session_id,
                error_message = %e,
                "Failed to open upstream stream"
            );
            state.metrics.record_upstream_failure();
            return Err(ChatError::UpstreamUnavailable);
        }
    };

    state.metrics.record_opened();
    debug!(
        session_id = %turn.session_id,
        history = turn.history.len(),
        has_context = turn.context.is_some(),
        "Upstream stream opened"
    );

    let (tx, rx) = mpsc::channel(state.config.server.channel_capacity.max(1));
    tokio::spawn(relay_turn(state, turn, upstream, tx));

    let body = Body::from_stream(ReceiverStream::new(rx).map(Ok::<_, Infallible>));
    Ok((
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        body,
    )
        .into_response())
}

/// Relay one turn and, if it ran to completion, log its transcript
async fn relay_turn(
    state: Arc<AppState>,
    turn: ChatTurn,
    upstream: ByteStream,
    client: mpsc::Sender<Bytes>,
) {
    let outcome = StreamingRelay::run(upstream, client).await;
    state.metrics.record_outcome(&outcome);

    debug!(
        session_id = %turn.session_id,
        end = ?outcome.end,
        frames_forwarded = outcome.frames_forwarded,
        frames_skipped = outcome.frames_skipped,
        "Relay finished"
    );

    if !outcome.end.is_finished() {
        warn!(
            session_id = %turn.session_id,
            end = ?outcome.end,
            "Stream did not complete, transcript not recorded"
        );
        return;
    }

    let topic = state.topics.classify(&turn.question).map(str::to_string);
    let record = ChatTranscriptRecord::new(
        turn.question,
        &outcome.transcript,
        turn.session_id,
        turn.context,
        topic,
        state.config.transcript.max_response_chars,
    );
    dispatch_transcript(state.sink.clone(), record);
}

/// Fallback for every method other than POST
pub async fn method_not_allowed() -> ChatError {
    ChatError::MethodNotAllowed
}
