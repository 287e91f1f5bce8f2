//! # livefn-settings
//!
//! Configuration management with layered sources for the livefn runtime.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`LiveSettings::default()`]
//! 2. **Settings file**: `~/.livefn/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `LIVEFN_*` overrides (highest priority)
//!
//! The loaded value is handed to the server at construction time; there is
//! no process-wide settings singleton.
//!
//! # Usage
//!
//! ```no_run
//! use livefn_settings::load_settings;
//!
//! let settings = load_settings().unwrap_or_default();
//! println!("listening on {}:{}", settings.server.host, settings.server.port);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let _settings = LiveSettings::default();
        let path = settings_path();
        assert!(path.ends_with(".livefn/settings.json"));
    }

    #[test]
    fn default_settings_are_valid() {
        let settings = LiveSettings::default();
        assert_eq!(settings.name, "livefn");
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.server.session_param, "livefn_id");
        assert_eq!(settings.server.keepalive_interval_ms, 5_000);
        assert_eq!(settings.cache.default_ttl_ms, 1_800_000);
        assert_eq!(settings.logging.level, "info");
        assert!(!settings.logging.silent);
    }
}
