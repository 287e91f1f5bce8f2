//! Settings types for the livefn runtime.
//!
//! Every struct uses `#[serde(rename_all = "camelCase", default)]`, so a
//! settings file only has to name the keys it changes.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LiveSettings {
    /// Settings schema version.
    pub version: String,
    /// Service name, reported by the health endpoint.
    pub name: String,
    /// Network, session and dispatch settings.
    pub server: ServerSettings,
    /// Connection cache settings.
    pub cache: CacheSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl Default for LiveSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            name: "livefn".to_string(),
            server: ServerSettings::default(),
            cache: CacheSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl LiveSettings {
    /// Reject values that would leave the runtime unable to operate.
    pub fn validate(&self) -> Result<()> {
        const POSITIVE: &str = "must be greater than zero";
        let counts = [
            ("cache.defaultTtlMs", self.cache.default_ttl_ms),
            ("server.keepaliveIntervalMs", self.server.keepalive_interval_ms),
            ("server.sendQueueCapacity", self.server.send_queue_capacity as u64),
            ("server.channelCapacity", self.server.channel_capacity as u64),
            ("server.maxConcurrentDispatch", self.server.max_concurrent_dispatch as u64),
            ("server.maxMessageSize", self.server.max_message_size as u64),
        ];
        if let Some((field, _)) = counts.into_iter().find(|(_, value)| *value == 0) {
            return Err(SettingsError::Invalid {
                field,
                requirement: POSITIVE,
            });
        }
        if self.server.session_param.is_empty() {
            return Err(SettingsError::Invalid {
                field: "server.sessionParam",
                requirement: "must not be empty",
            });
        }
        Ok(())
    }
}

/// Server network and session settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port. `0` binds an ephemeral port.
    pub port: u16,
    /// Query parameter carrying the client-chosen connection ID.
    pub session_param: String,
    /// Interval between server keepalive pings, in milliseconds.
    pub keepalive_interval_ms: u64,
    /// Per-connection outbound frame queue depth.
    pub send_queue_capacity: usize,
    /// Capacity of each handler's inbound and outbound channels.
    pub channel_capacity: usize,
    /// Upper bound on inbound dispatches processed concurrently per handler.
    pub max_concurrent_dispatch: usize,
    /// Largest WebSocket frame accepted from or sent to a client, in bytes.
    pub max_message_size: usize,
    /// Grace period for in-flight work during shutdown, in milliseconds.
    pub shutdown_timeout_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            session_param: "livefn_id".to_string(),
            keepalive_interval_ms: 5_000,
            send_queue_capacity: 256,
            channel_capacity: 1024,
            max_concurrent_dispatch: 64,
            max_message_size: 16 * 1024 * 1024,
            shutdown_timeout_ms: 30_000,
        }
    }
}

impl ServerSettings {
    /// Keepalive interval as a [`Duration`].
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }

    /// Shutdown grace period as a [`Duration`].
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Connection cache settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheSettings {
    /// Default entry lifetime, in milliseconds. Also the grace window before
    /// a disconnected connection's store is reclaimed.
    pub default_ttl_ms: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            default_ttl_ms: 30 * 60 * 1000,
        }
    }
}

impl CacheSettings {
    /// Default entry lifetime as a [`Duration`].
    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Base level for all targets (`trace`..`error`).
    pub level: String,
    /// Emit JSON lines instead of the compact human format.
    pub json: bool,
    /// Disable all output.
    pub silent: bool,
    /// Per-target level overrides, e.g. `{"livefn_cache": "debug"}`.
    pub modules: BTreeMap<String, String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            silent: false,
            modules: BTreeMap::new(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(LiveSettings::default()).unwrap();
        assert_eq!(json["server"]["sessionParam"], "livefn_id");
        assert_eq!(json["server"]["keepaliveIntervalMs"], 5000);
        assert_eq!(json["cache"]["defaultTtlMs"], 1_800_000);
    }

    #[test]
    fn partial_section_fills_defaults() {
        let server: ServerSettings = serde_json::from_str(r#"{"port": 1234}"#).unwrap();
        assert_eq!(server.port, 1234);
        assert_eq!(server.host, "127.0.0.1");
        assert_eq!(server.channel_capacity, 1024);
    }

    #[test]
    fn duration_helpers() {
        let settings = LiveSettings::default();
        assert_eq!(settings.server.keepalive_interval(), Duration::from_secs(5));
        assert_eq!(settings.server.shutdown_timeout(), Duration::from_secs(30));
        assert_eq!(settings.cache.default_ttl(), Duration::from_secs(1800));
    }

    #[test]
    fn defaults_validate() {
        assert!(LiveSettings::default().validate().is_ok());
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let mut settings = LiveSettings::default();
        settings.server.channel_capacity = 0;
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("server.channelCapacity"));
    }

    #[test]
    fn empty_session_param_is_rejected() {
        let mut settings = LiveSettings::default();
        settings.server.session_param.clear();
        assert!(settings.validate().is_err());
    }
}
