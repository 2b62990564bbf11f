//! lexrelay - Rate-limited streaming chat relay for a regulation explorer
//!
//! This crate provides an HTTP service that gates chat requests per client,
//! relays the upstream language model's streamed answer to the browser as
//! normalized SSE frames, and logs each completed exchange asynchronously.

pub mod chat;
pub mod config;
pub mod error;
pub mod gate;
pub mod relay;
pub mod server;
pub mod testing;
pub mod transcript;

pub use error::LexError;
