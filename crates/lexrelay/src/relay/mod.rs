//! Streaming Relay: upstream SSE in, normalized client SSE out
//!
//! - `sse`: line decoding, upstream event parsing, client frame encoding
//! - `stream`: the relay loop and its counters
//! - `upstream`: the upstream client seam and the Messages API client

pub mod sse;
mod stream;
mod upstream;

pub use sse::{ClientFrame, DONE_MARKER, LineDecoder, LineEvent, MAX_LINE_BYTES, parse_line};
pub use stream::{RelayEnd, RelayMetrics, RelayOutcome, RelaySnapshot, StreamingRelay};
pub use upstream::{AnthropicClient, ByteStream, UpstreamClient, UpstreamError};
