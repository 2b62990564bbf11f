//! Error types for lexrelay

use thiserror::Error;

/// Main error type for service setup and plumbing
#[derive(Error, Debug)]
pub enum LexError {
    /// Configuration errors (bad file, bad address, bad pattern)
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP server errors (bind, serve)
    #[error("Server error: {0}")]
    Server(String),

    /// Upstream client construction errors
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Transcript sink construction errors
    #[error("Transcript error: {0}")]
    Transcript(String),
}

/// Result type alias for lexrelay operations
pub type Result<T> = std::result::Result<T, LexError>;
