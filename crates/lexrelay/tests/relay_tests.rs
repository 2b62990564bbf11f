//! Integration tests for the streaming relay
//!
//! Frame ordering, chunk-boundary handling, malformed-frame resilience and
//! disconnect behavior of `StreamingRelay::run`.

use bytes::Bytes;
use futures::{Stream, StreamExt, stream};
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::mpsc;

use lexrelay::relay::{
    ClientFrame, LineDecoder, LineEvent, MAX_LINE_BYTES, RelayEnd, StreamingRelay, parse_line,
};
use lexrelay::testing::{message_stop_event, text_delta_event};

// =============================================================================
// Test Fixtures
// =============================================================================

fn body_of(parts: Vec<String>) -> impl Stream<Item = Result<Bytes, Infallible>> {
    stream::iter(parts.into_iter().map(|p| Ok(Bytes::from(p))))
}

/// Split `text` into chunks of `size` bytes, ignoring char boundaries
fn byte_chunks(text: &str, size: usize) -> impl Stream<Item = Result<Bytes, Infallible>> + use<> {
    let chunks: Vec<Bytes> = text
        .as_bytes()
        .chunks(size)
        .map(Bytes::copy_from_slice)
        .collect();
    stream::iter(chunks.into_iter().map(Ok))
}

async fn collect_frames(mut rx: mpsc::Receiver<Bytes>) -> Vec<String> {
    let mut frames = Vec::new();
    while let Some(frame) = rx.recv().await {
        frames.push(String::from_utf8(frame.to_vec()).unwrap());
    }
    frames
}

fn text_frame(text: &str) -> String {
    String::from_utf8(ClientFrame::Text(text.to_string()).encode().to_vec()).unwrap()
}

const DONE_FRAME: &str = "data: [DONE]\n\n";

// =============================================================================
// Frame Ordering Tests
// =============================================================================

mod ordering_tests {
    use super::*;

    #[tokio::test]
    async fn test_hello_scenario() {
        let (tx, rx) = mpsc::channel(8);
        let upstream = body_of(vec![
            "data: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"Hello\"}}\n\n".to_string(),
            "data: {\"type\":\"message_stop\"}\n\n".to_string(),
        ]);

        let outcome = StreamingRelay::run(upstream, tx).await;
        let frames = collect_frames(rx).await;

        assert_eq!(frames, vec![r#"data: {"text":"Hello"}"#.to_string() + "\n\n", DONE_FRAME.to_string()]);
        assert_eq!(outcome.transcript, "Hello");
        assert_eq!(outcome.end, RelayEnd::Completed);
    }

    #[tokio::test]
    async fn test_frames_follow_upstream_order_across_tiny_chunks() {
        let pieces: Vec<String> = (0..50).map(|i| format!("part{i} ")).collect();
        let mut body: String = pieces.iter().map(|p| text_delta_event(p)).collect();
        body.push_str(&message_stop_event());

        for chunk_size in [1, 3, 7, 64, 4096] {
            let (tx, rx) = mpsc::channel(4);
            let relay = tokio::spawn(StreamingRelay::run(byte_chunks(&body, chunk_size), tx));
            let frames = collect_frames(rx).await;
            let outcome = relay.await.unwrap();

            let mut expected: Vec<String> = pieces.iter().map(|p| text_frame(p)).collect();
            expected.push(DONE_FRAME.to_string());
            assert_eq!(frames, expected, "chunk size {chunk_size}");
            assert_eq!(outcome.transcript, pieces.concat());
            assert_eq!(outcome.frames_forwarded, 50);
        }
    }

    #[tokio::test]
    async fn test_multibyte_text_split_mid_character() {
        let body = format!("{}{}", text_delta_event("Grundrechte für Bürger ✓"), message_stop_event());
        let (tx, rx) = mpsc::channel(8);

        let relay = tokio::spawn(StreamingRelay::run(byte_chunks(&body, 5), tx));
        let frames = collect_frames(rx).await;
        let outcome = relay.await.unwrap();

        assert_eq!(frames[0], text_frame("Grundrechte für Bürger ✓"));
        assert_eq!(outcome.transcript, "Grundrechte für Bürger ✓");
    }

    #[tokio::test]
    async fn test_crlf_line_endings() {
        let (tx, rx) = mpsc::channel(8);
        let upstream = body_of(vec![
            text_delta_event("a").replace('\n', "\r\n"),
            message_stop_event().replace('\n', "\r\n"),
        ]);

        let outcome = StreamingRelay::run(upstream, tx).await;
        let frames = collect_frames(rx).await;

        assert_eq!(frames, vec![text_frame("a"), DONE_FRAME.to_string()]);
        assert_eq!(outcome.end, RelayEnd::Completed);
    }

    #[tokio::test]
    async fn test_done_marker_also_stops() {
        let (tx, rx) = mpsc::channel(8);
        let upstream = body_of(vec![
            text_delta_event("x"),
            "data: [DONE]\n\n".to_string(),
            text_delta_event("after"),
        ]);

        let outcome = StreamingRelay::run(upstream, tx).await;
        let frames = collect_frames(rx).await;

        assert_eq!(frames, vec![text_frame("x"), DONE_FRAME.to_string()]);
        assert_eq!(outcome.transcript, "x");
    }

    #[tokio::test]
    async fn test_slow_consumer_with_capacity_one() {
        let pieces: Vec<String> = (0..20).map(|i| i.to_string()).collect();
        let mut body: Vec<String> = pieces.iter().map(|p| text_delta_event(p)).collect();
        body.push(message_stop_event());

        let (tx, mut rx) = mpsc::channel(1);
        let relay = tokio::spawn(StreamingRelay::run(body_of(body), tx));

        let mut frames = Vec::new();
        while let Some(frame) = rx.recv().await {
            tokio::time::sleep(Duration::from_millis(1)).await;
            frames.push(frame);
        }
        let outcome = relay.await.unwrap();

        assert_eq!(frames.len(), 21);
        assert_eq!(outcome.transcript, pieces.concat());
        assert_eq!(outcome.end, RelayEnd::Completed);
    }
}

// =============================================================================
// Malformed Frame Tests
// =============================================================================

mod malformed_frame_tests {
    use super::*;

    #[tokio::test]
    async fn test_malformed_frames_are_skipped() {
        let (tx, rx) = mpsc::channel(8);
        let upstream = body_of(vec![
            text_delta_event("one"),
            "data: {not json\n\n".to_string(),
            "data: {\"type\":\"content_block_delta\",\"delta\":\n\n".to_string(),
            text_delta_event("two"),
            message_stop_event(),
        ]);

        let outcome = StreamingRelay::run(upstream, tx).await;
        let frames = collect_frames(rx).await;

        assert_eq!(frames, vec![text_frame("one"), text_frame("two"), DONE_FRAME.to_string()]);
        assert_eq!(outcome.transcript, "onetwo");
        assert_eq!(outcome.frames_skipped, 2);
        assert_eq!(outcome.end, RelayEnd::Completed);
    }

    #[tokio::test]
    async fn test_unrelated_events_are_ignored_not_counted() {
        let (tx, rx) = mpsc::channel(8);
        let upstream = body_of(vec![
            "event: message_start\ndata: {\"type\":\"message_start\",\"message\":{\"id\":\"m\"}}\n\n".to_string(),
            ": keep-alive comment\n\n".to_string(),
            "data: {\"type\":\"ping\"}\n\n".to_string(),
            "data: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"{\"}}\n\n".to_string(),
            text_delta_event("kept"),
            message_stop_event(),
        ]);

        let outcome = StreamingRelay::run(upstream, tx).await;
        let frames = collect_frames(rx).await;

        assert_eq!(frames, vec![text_frame("kept"), DONE_FRAME.to_string()]);
        assert_eq!(outcome.frames_skipped, 0);
    }

    #[test]
    fn test_parse_line_classification() {
        assert_eq!(parse_line("data: {oops"), LineEvent::Malformed);
        assert_eq!(parse_line("data: [DONE]"), LineEvent::Stop);
        assert_eq!(parse_line("data: {\"type\":\"message_stop\"}"), LineEvent::Stop);
        assert_eq!(parse_line("event: content_block_delta"), LineEvent::Ignored);
        assert_eq!(parse_line(""), LineEvent::Ignored);
        assert_eq!(
            parse_line("data:{\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"t\"}}"),
            LineEvent::Text("t".to_string())
        );
    }

    #[test]
    fn test_trailing_fragment_is_held_back() {
        let mut decoder = LineDecoder::new();
        assert!(decoder.push(b"data: {\"type\"").is_empty());
        assert_eq!(decoder.pending_len(), 13);

        let lines = decoder.push(b":\"ping\"}\ndata: x");
        assert_eq!(lines, vec!["data: {\"type\":\"ping\"}".to_string()]);
        assert_eq!(decoder.pending_len(), 7);
    }
}

// =============================================================================
// Stream End Tests
// =============================================================================

mod stream_end_tests {
    use super::*;

    #[tokio::test]
    async fn test_unterminated_trailing_line_is_dropped() {
        let (tx, rx) = mpsc::channel(8);
        let mut tail = text_delta_event("lost");
        tail.truncate(tail.len() - 2);
        let upstream = body_of(vec![text_delta_event("kept"), tail]);

        let outcome = StreamingRelay::run(upstream, tx).await;
        let frames = collect_frames(rx).await;

        assert_eq!(frames, vec![text_frame("kept")]);
        assert_eq!(outcome.end, RelayEnd::UpstreamClosed);
        assert_eq!(outcome.transcript, "kept");
    }

    #[tokio::test]
    async fn test_client_disconnect_stops_relay() {
        let (tx, mut rx) = mpsc::channel(8);
        let upstream = body_of(vec![text_delta_event("first")]).chain(stream::pending());

        let relay = tokio::spawn(StreamingRelay::run(upstream, tx));

        let first = rx.recv().await.unwrap();
        assert_eq!(first, Bytes::from(text_frame("first")));
        drop(rx);

        let outcome = tokio::time::timeout(Duration::from_secs(5), relay)
            .await
            .expect("relay should stop once the client is gone")
            .unwrap();
        assert_eq!(outcome.end, RelayEnd::ClientGone);
        assert!(!outcome.end.is_finished());
        assert_eq!(outcome.transcript, "first");
    }

    #[tokio::test]
    async fn test_endless_line_aborts_relay() {
        let (tx, rx) = mpsc::channel(8);
        let flood = "z".repeat(64 * 1024);
        let upstream = body_of(vec![text_delta_event("before")])
            .chain(stream::repeat_with(move || Ok(Bytes::from(flood.clone()))));

        let relay = tokio::spawn(StreamingRelay::run(upstream, tx));
        let frames = collect_frames(rx).await;
        let outcome = tokio::time::timeout(Duration::from_secs(5), relay)
            .await
            .expect("relay should give up on an unterminated line")
            .unwrap();

        assert_eq!(frames, vec![text_frame("before")]);
        assert!(matches!(outcome.end, RelayEnd::UpstreamFailed(ref e) if e.contains(&MAX_LINE_BYTES.to_string())));
        assert!(!outcome.end.is_finished());
    }

    #[tokio::test]
    async fn test_body_error_after_frames() {
        let (tx, rx) = mpsc::channel(8);
        let upstream = stream::iter(vec![
            Ok(Bytes::from(text_delta_event("half"))),
            Err("connection reset by peer"),
        ]);

        let outcome = StreamingRelay::run(upstream, tx).await;
        let frames = collect_frames(rx).await;

        assert_eq!(frames, vec![text_frame("half")]);
        assert!(matches!(outcome.end, RelayEnd::UpstreamFailed(ref e) if e.contains("reset")));
    }
}
