use async_trait::async_trait;
use std::time::Duration;
use url::Url;

use super::{ChatTranscriptRecord, TranscriptError, TranscriptSink};
use crate::config::TranscriptConfig;
use crate::error::{LexError, Result};

/// Posts each record as JSON to a logging endpoint
#[derive(Debug, Clone)]
pub struct HttpTranscriptSink {
    client: reqwest::Client,
    endpoint: Url,
    bearer_token: Option<String>,
}

impl HttpTranscriptSink {
    pub fn new(endpoint: &str, bearer_token: Option<String>, timeout: Duration) -> Result<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| LexError::Config(format!("Invalid transcript endpoint: {e}")))?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LexError::Transcript(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            bearer_token,
        })
    }

    /// Bearer token comes from `config.api_key_env` when set
    pub fn from_config(endpoint: &str, config: &TranscriptConfig) -> Result<Self> {
        let bearer_token = config
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|token| !token.trim().is_empty());

        if config.api_key_env.is_some() && bearer_token.is_none() {
            tracing::warn!("Transcript token env var is set in config but empty or missing");
        }

        Self::new(
            endpoint,
            bearer_token,
            Duration::from_secs(config.timeout_secs),
        )
    }
}

#[async_trait]
impl TranscriptSink for HttpTranscriptSink {
    async fn record(&self, record: ChatTranscriptRecord) -> std::result::Result<(), TranscriptError> {
        let mut request = self.client.post(self.endpoint.clone()).json(&record);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TranscriptError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TranscriptError::Status {
                status: status.as_u16(),
            });
        }

        Ok(())
    }
}
