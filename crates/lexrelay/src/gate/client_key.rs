//! Rate-limit key derivation
//!
//! The key is the best-effort client address followed by the request path.
//! Method and caller identity are not part of it.

use axum::http::HeaderMap;
use std::net::SocketAddr;

/// Shared key prefix for requests whose origin cannot be determined
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Best-effort originating address of a request
///
/// Order: first `X-Forwarded-For` entry, `X-Real-IP`, socket peer address,
/// then [`UNKNOWN_CLIENT`].
pub fn client_address(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(addr) = forwarded {
        return addr.to_string();
    }

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(addr) = real_ip {
        return addr.to_string();
    }

    match peer {
        Some(addr) => addr.ip().to_string(),
        None => UNKNOWN_CLIENT.to_string(),
    }
}

/// Compose the store key from client address and path (query stripped)
pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>, path: &str) -> String {
    let path = path.split('?').next().unwrap_or(path);
    format!("{}{}", client_address(headers, peer), path)
}
