//! HTTP server for the chat relay
//!
//! Routes:
//! - `POST /api/chat`: rate gated, streams the answer as SSE
//! - `GET /health`: liveness plus relay counters

use axum::{
    Json, Router,
    extract::State,
    middleware,
    routing::{get, post},
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::TraceLayer;

use crate::chat::{TopicClassifier, chat_handler, method_not_allowed};
use crate::config::Config;
use crate::error::{LexError, Result};
use crate::gate::{RateGate, rate_limit_middleware, spawn_sweeper};
use crate::relay::{AnthropicClient, RelayMetrics, UpstreamClient};
use crate::transcript::{TranscriptSink, build_sink};

/// Shared application state for all handlers
pub struct AppState {
    /// Service configuration
    pub config: Config,
    /// Rate gate in front of the chat route
    pub gate: Arc<RateGate>,
    /// Upstream language-model client
    pub upstream: Arc<dyn UpstreamClient>,
    /// Destination for completed transcripts
    pub sink: Arc<dyn TranscriptSink>,
    /// Topic labels for transcripts
    pub topics: Arc<TopicClassifier>,
    /// Relay counters
    pub metrics: Arc<RelayMetrics>,
}

impl AppState {
    /// State over explicit upstream and sink implementations
    pub fn new(
        config: Config,
        upstream: Arc<dyn UpstreamClient>,
        sink: Arc<dyn TranscriptSink>,
    ) -> Result<Self> {
        config.rate_limit.validate()?;
        let topics = TopicClassifier::from_config(&config.topics)?;

        Ok(Self {
            gate: Arc::new(RateGate::new(&config.rate_limit)),
            upstream,
            sink,
            topics: Arc::new(topics),
            metrics: Arc::new(RelayMetrics::new()),
            config,
        })
    }

    /// Production state: Messages API client and the configured sink
    pub fn from_config(config: Config) -> Result<Self> {
        let upstream = Arc::new(AnthropicClient::from_env(&config.upstream)?);
        let sink = build_sink(&config.transcript)?;
        Self::new(config, upstream, sink)
    }

    /// Replace the rate gate (custom store or clock)
    pub fn with_gate(mut self, gate: Arc<RateGate>) -> Self {
        self.gate = gate;
        self
    }
}

/// The chat relay server
pub struct ChatServer {
    config: Config,
}

impl ChatServer {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Bind the listener and serve until Ctrl+C or SIGTERM
    pub async fn serve(&self) -> Result<()> {
        let state = Arc::new(AppState::from_config(self.config.clone())?);

        let addr: SocketAddr = self
            .config
            .server
            .listen_addr
            .parse()
            .map_err(|e| LexError::Config(format!("Invalid listen address: {e}")))?;

        let sweep_every = Duration::from_millis(self.config.rate_limit.sweep_interval_ms.max(1));
        let sweeper = spawn_sweeper(state.gate.clone(), sweep_every);

        tracing::info!("Starting chat relay on {addr}");
        tracing::info!(
            "Rate limit: {} requests per {} ms",
            self.config.rate_limit.limit,
            self.config.rate_limit.window_ms
        );
        tracing::info!("Topic rules: {}", state.topics.len());

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| LexError::Server(format!("Failed to bind to {addr}: {e}")))?;

        let app = create_router(state).into_make_service_with_connect_info::<SocketAddr>();
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| LexError::Server(format!("Server error: {e}")));

        sweeper.abort();
        served?;

        tracing::info!("Chat relay shut down gracefully");
        Ok(())
    }
}

/// Create the router with all routes configured
pub fn create_router(state: Arc<AppState>) -> Router {
    let gate = middleware::from_fn_with_state(state.gate.clone(), rate_limit_middleware);

    // Only the POST endpoint is gated; the 405 fallback does not count.
    let chat = post(chat_handler)
        .route_layer(gate)
        .fallback(method_not_allowed);

    Router::new()
        .route("/api/chat", chat)
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "relay": state.metrics.snapshot(),
        "rate_limit": {
            "tracked_keys": state.gate.store().len(),
        },
    }))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        },
    }
}
