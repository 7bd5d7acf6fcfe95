//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Open WebSocket connections, registered or not.
    pub connections: usize,
    /// Identities with at least one registered connection.
    pub identities: usize,
}

/// Build a health response from live counters.
pub fn health_check(start_time: Instant, connections: usize, identities: usize) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        identities,
    }
}
