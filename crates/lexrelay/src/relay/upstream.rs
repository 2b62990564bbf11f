//! Upstream language-model client
//!
//! The relay only needs "open one streaming call and give me its body".
//! `UpstreamClient` is that seam; `AnthropicClient` speaks the Messages API.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt, stream::BoxStream};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::chat::ChatTurn;
use crate::config::UpstreamConfig;
use crate::error::{LexError, Result};

/// Streaming upstream body
pub type ByteStream = BoxStream<'static, std::result::Result<Bytes, UpstreamError>>;

/// Errors from opening or reading the upstream call
#[derive(Error, Debug, Clone, PartialEq)]
pub enum UpstreamError {
    /// No API key available
    #[error("Upstream API key is not configured")]
    NotConfigured,

    /// Connection, TLS or timeout failure before a response arrived
    #[error("Failed to reach upstream: {0}")]
    Connect(String),

    /// Upstream answered with a non-success status
    #[error("Upstream returned {status}: {body}")]
    Status { status: u16, body: String },

    /// Reading the streamed body failed
    #[error("Upstream stream error: {0}")]
    Stream(String),
}

/// Opens one streaming completion per call
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Whether credentials are present; checked before any request work
    fn is_configured(&self) -> bool;

    /// Issue the streaming request and return its body once headers arrive
    async fn open_stream(&self, turn: &ChatTurn) -> std::result::Result<ByteStream, UpstreamError>;
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: String,
    messages: Vec<WireMessage<'a>>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

/// Anthropic Messages API client
#[derive(Debug, Clone)]
pub struct AnthropicClient {
    client: reqwest::Client,
    config: UpstreamConfig,
    api_url: Url,
    api_key: Option<String>,
}

impl AnthropicClient {
    /// Build a client reading the API key from `config.api_key_env`.
    ///
    /// A missing key is not an error here: the service starts and answers
    /// chat requests with 500 until it is configured.
    pub fn from_env(config: &UpstreamConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty());
        if api_key.is_none() {
            tracing::warn!(
                "Upstream API key env var '{}' is not set; chat requests will fail",
                config.api_key_env
            );
        }
        Self::new(config, api_key)
    }

    pub fn new(config: &UpstreamConfig, api_key: Option<String>) -> Result<Self> {
        let api_url = Url::parse(&config.api_url)
            .map_err(|e| LexError::Config(format!("Invalid upstream api_url: {e}")))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| LexError::Upstream(format!("Failed to create HTTP client: {e}")))?;

        tracing::info!(
            "Upstream client initialized with model: {}, api_url: {}",
            config.model,
            api_url
        );

        Ok(Self {
            client,
            config: config.clone(),
            api_url,
            api_key,
        })
    }

    fn system_prompt(&self, turn: &ChatTurn) -> String {
        match &turn.context {
            Some(context) => format!(
                "{}\n\nThe user is currently viewing this part of the regulation:\n{}",
                self.config.system_prompt, context
            ),
            None => self.config.system_prompt.clone(),
        }
    }

    fn request_body<'a>(&'a self, turn: &'a ChatTurn) -> MessagesRequest<'a> {
        let mut messages: Vec<WireMessage<'a>> = turn
            .history
            .iter()
            .map(|m| WireMessage {
                role: m.role.as_str(),
                content: &m.content,
            })
            .collect();
        messages.push(WireMessage {
            role: "user",
            content: &turn.question,
        });

        MessagesRequest {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            system: self.system_prompt(turn),
            messages,
            stream: true,
        }
    }
}

#[async_trait]
impl UpstreamClient for AnthropicClient {
    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn open_stream(&self, turn: &ChatTurn) -> std::result::Result<ByteStream, UpstreamError> {
        let api_key = self.api_key.as_deref().ok_or(UpstreamError::NotConfigured)?;

        let response = self
            .client
            .post(self.api_url.clone())
            .header("x-api-key", api_key)
            .header("anthropic-version", &self.config.anthropic_version)
            .header("accept", "text/event-stream")
            .json(&self.request_body(turn))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    UpstreamError::Connect(format!("Request timed out: {e}"))
                } else {
                    UpstreamError::Connect(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response
            .bytes_stream()
            .map_err(|e| UpstreamError::Stream(e.to_string()))
            .boxed())
    }
}
