//! `/health` endpoint.

use std::time::Instant;

use serde::Serialize;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Name of this instance.
    pub instance_id: String,
    /// Open push connections on this instance.
    pub connections: usize,
    /// Recipients with at least one connection on this instance.
    pub recipients: usize,
}

/// Build a health response from live counters.
pub fn health_check(
    start_time: Instant,
    instance_id: &str,
    connections: usize,
    recipients: usize,
) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        instance_id: instance_id.to_owned(),
        connections,
        recipients,
    }
}
