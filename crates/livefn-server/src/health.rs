//! `/health` endpoint body.

use serde::Serialize;
use std::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// Configured application name.
    pub name: String,
    /// Seconds since the runtime started.
    pub uptime_secs: u64,
    /// Live connection count.
    pub connections: usize,
    /// Registered route handlers.
    pub handlers: usize,
}

/// Build a health response from live counters.
pub fn health_check(
    name: &str,
    start_time: Instant,
    connections: usize,
    handlers: usize,
) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        name: name.to_owned(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        handlers,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_is_ok() {
        let resp = health_check("livefn", Instant::now(), 0, 0);
        assert_eq!(resp.status, "ok");
        assert!(resp.uptime_secs < 2);
    }

    #[test]
    fn uptime_increases() {
        let start = Instant::now()
            .checked_sub(std::time::Duration::from_secs(60))
            .unwrap();
        assert!(health_check("livefn", start, 0, 0).uptime_secs >= 59);
    }

    #[test]
    fn serialization() {
        let resp = health_check("demo", Instant::now(), 2, 1);
        let parsed: serde_json::Value = serde_json::to_value(&resp).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["name"], "demo");
        assert_eq!(parsed["connections"], 2);
        assert_eq!(parsed["handlers"], 1);
        assert!(parsed["uptime_secs"].is_number());
    }
}
