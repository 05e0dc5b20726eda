//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"`, or `"degraded"` when the message store cannot be read.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Current open WebSocket connection count.
    pub connections: usize,
    /// Sockets still held by session writers, including ones being torn down.
    pub transports: usize,
    /// Persisted message count, absent when the store is unavailable.
    pub messages: Option<u64>,
}

impl HealthResponse {
    pub fn is_healthy(&self) -> bool {
        self.status == "ok"
    }
}

/// Build a health response from live counters.
pub fn health_check(
    start_time: Instant,
    connections: usize,
    transports: usize,
    messages: Option<u64>,
) -> HealthResponse {
    HealthResponse {
        status: if messages.is_some() { "ok" } else { "degraded" }.into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        transports,
        messages,
    }
}
