use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{LexError, Result};

/// Main configuration structure for lexrelay
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// HTTP listener configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Upstream language-model API configuration
    #[serde(default)]
    pub upstream: UpstreamConfig,
    /// Per-client request quota for the chat endpoint
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Input caps enforced before any upstream call
    #[serde(default)]
    pub limits: ChatLimits,
    /// Post-completion transcript logging
    #[serde(default)]
    pub transcript: TranscriptConfig,
    /// Ordered topic rules (empty = built-in rules)
    #[serde(default)]
    pub topics: Vec<TopicRuleConfig>,
}

impl Config {
    /// Parse a config from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| LexError::Config(format!("Failed to parse config: {e}")))
    }

    /// Read and parse a config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            LexError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml(&content)
    }

    /// Load the config from an explicit path, or the first default location
    /// that exists, falling back to built-in defaults.
    pub fn load(config_path: Option<PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            tracing::info!("Loading config from: {}", path.display());
            return Self::from_file(&path);
        }

        let default_paths = [
            dirs::home_dir().map(|h| h.join(".lexrelay").join("config.toml")),
            dirs::config_dir().map(|c| c.join("lexrelay").join("config.toml")),
            Some(PathBuf::from("config.toml")),
        ];

        for path in default_paths.iter().flatten() {
            if path.exists() {
                tracing::info!("Loading config from: {}", path.display());
                return Self::from_file(path);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Config::default())
    }
}

/// HTTP listener configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on (e.g., "127.0.0.1:8787")
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Frames buffered between the relay task and the client body
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

fn default_listen_addr() -> String {
    "127.0.0.1:8787".to_string()
}

fn default_channel_capacity() -> usize {
    64
}

/// Upstream language-model API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// Messages API endpoint
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Model identifier sent upstream
    #[serde(default = "default_model")]
    pub model: String,
    /// Maximum tokens the upstream may generate
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Value of the `anthropic-version` header
    #[serde(default = "default_anthropic_version")]
    pub anthropic_version: String,
    /// System prompt prepended to every conversation
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// Overall request timeout in seconds (covers the streamed body)
    #[serde(default = "default_upstream_timeout_secs")]
    pub timeout_secs: u64,
    /// Connect timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            api_key_env: default_api_key_env(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            anthropic_version: default_anthropic_version(),
            system_prompt: default_system_prompt(),
            timeout_secs: default_upstream_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

fn default_api_url() -> String {
    "https://api.anthropic.com/v1/messages".to_string()
}

fn default_api_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

fn default_model() -> String {
    "claude-3-5-haiku-latest".to_string()
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_anthropic_version() -> String {
    "2023-06-01".to_string()
}

fn default_system_prompt() -> String {
    "You are an assistant that answers questions about the EU Artificial Intelligence Act. \
     Cite articles, recitals or annexes where relevant, keep answers concise, \
     and say so when a question falls outside the regulation."
        .to_string()
}

fn default_upstream_timeout_secs() -> u64 {
    300
}

fn default_connect_timeout_secs() -> u64 {
    10
}

/// Sliding-window quota for the chat endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Requests admitted per key and window
    #[serde(default = "default_rate_limit")]
    pub limit: u32,
    /// Window length in milliseconds
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    /// Minimum time between two sweeps of stale entries, in milliseconds
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit: default_rate_limit(),
            window_ms: default_window_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
        }
    }
}

impl RateLimitConfig {
    /// Reject zero limits and windows, which would make every request fail
    pub fn validate(&self) -> Result<()> {
        if self.limit == 0 {
            return Err(LexError::Config("rate_limit.limit must be > 0".to_string()));
        }
        if self.window_ms == 0 {
            return Err(LexError::Config(
                "rate_limit.window_ms must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_rate_limit() -> u32 {
    20
}

fn default_window_ms() -> u64 {
    60_000
}

fn default_sweep_interval_ms() -> u64 {
    60_000
}

/// Size caps on the inbound chat payload
#[derive(Debug, Clone, Deserialize)]
pub struct ChatLimits {
    /// Maximum number of history messages
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
    /// Maximum characters per history message
    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,
    /// Maximum characters in the current question
    #[serde(default = "default_max_question_chars")]
    pub max_question_chars: usize,
    /// Maximum characters in the optional page context
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
}

impl Default for ChatLimits {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
            max_message_chars: default_max_message_chars(),
            max_question_chars: default_max_question_chars(),
            max_context_chars: default_max_context_chars(),
        }
    }
}

fn default_max_messages() -> usize {
    20
}

fn default_max_message_chars() -> usize {
    4000
}

fn default_max_question_chars() -> usize {
    2000
}

fn default_max_context_chars() -> usize {
    8000
}

/// Transcript logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptConfig {
    /// Record transcripts at all
    #[serde(default = "default_transcript_enabled")]
    pub enabled: bool,
    /// HTTP endpoint receiving records as JSON (None = log through tracing)
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Environment variable holding a bearer token for the endpoint
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Responses longer than this are truncated before recording
    #[serde(default = "default_max_response_chars")]
    pub max_response_chars: usize,
    /// Request timeout for the HTTP sink in seconds
    #[serde(default = "default_transcript_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for TranscriptConfig {
    fn default() -> Self {
        Self {
            enabled: default_transcript_enabled(),
            endpoint: None,
            api_key_env: None,
            max_response_chars: default_max_response_chars(),
            timeout_secs: default_transcript_timeout_secs(),
        }
    }
}

fn default_transcript_enabled() -> bool {
    true
}

fn default_max_response_chars() -> usize {
    10_000
}

fn default_transcript_timeout_secs() -> u64 {
    10
}

/// One topic rule: the label wins if any pattern matches the question
#[derive(Debug, Clone, Deserialize)]
pub struct TopicRuleConfig {
    pub label: String,
    pub patterns: Vec<String>,
}
