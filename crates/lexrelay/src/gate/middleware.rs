use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use std::sync::Arc;

use super::{RateDecision, RateGate, client_key};
use crate::chat::ChatError;

pub const LIMIT_HEADER: &str = "x-ratelimit-limit";
pub const REMAINING_HEADER: &str = "x-ratelimit-remaining";

/// axum middleware applying the gate before the wrapped handler runs
///
/// Admitted responses carry `X-RateLimit-Limit` and `X-RateLimit-Remaining`;
/// rejected requests get a 429 with `Retry-After` and never reach the handler.
pub async fn rate_limit_middleware(
    State(gate): State<Arc<RateGate>>,
    request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let key = client_key(request.headers(), peer, request.uri().path());

    match gate.check(&key) {
        RateDecision::Admitted { limit, remaining } => {
            let mut response = next.run(request).await;
            insert_quota_headers(response.headers_mut(), limit, remaining);
            response
        }
        RateDecision::Limited {
            limit,
            retry_after_secs,
        } => {
            tracing::warn!(key = %key, retry_after_secs, "Rejected rate-limited request");
            ChatError::RateLimited {
                limit,
                retry_after_secs,
            }
            .into_response()
        }
    }
}

pub(crate) fn insert_quota_headers(headers: &mut HeaderMap, limit: u32, remaining: u32) {
    headers.insert(LIMIT_HEADER, HeaderValue::from(limit));
    headers.insert(REMAINING_HEADER, HeaderValue::from(remaining));
}
