//! # livefn-telemetry
//!
//! Structured logging for the livefn runtime, built on `tracing`.
//!
//! - [`init_telemetry`] installs the global subscriber from
//!   [`LoggingSettings`]: compact human output or JSON lines on stderr.
//! - [`filter_directive`] renders the `EnvFilter` directive those settings
//!   describe, so it can be checked without touching global state.
//! - [`capture_logs`] installs a thread-local capturing subscriber for tests.
//!
//! `RUST_LOG`, when set, takes precedence over the configured level and
//! module overrides.

#![deny(unsafe_code)]

pub mod capture;

pub use capture::{CapturedLogs, capture_logs};

use livefn_settings::LoggingSettings;
use tracing_subscriber::EnvFilter;

/// Build the filter directive described by `settings`.
///
/// `silent` wins over everything else. Module overrides are appended after
/// the base level, so `{"level": "warn", "modules": {"livefn_cache": "debug"}}`
/// becomes `warn,livefn_cache=debug`.
pub fn filter_directive(settings: &LoggingSettings) -> String {
    if settings.silent {
        return "off".to_string();
    }
    let mut directive = settings.level.clone();
    for (module, level) in &settings.modules {
        directive.push(',');
        directive.push_str(module);
        directive.push('=');
        directive.push_str(level);
    }
    directive
}

/// Initialize the global tracing subscriber.
///
/// Call once at application startup. Subsequent calls are no-ops.
pub fn init_telemetry(settings: &LoggingSettings) {
    let directive = filter_directive(settings);
    let filter = if settings.silent {
        EnvFilter::new(directive)
    } else {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&directive))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    // try_init is a no-op if a global subscriber is already set
    if settings.json {
        let _ = builder.json().try_init();
    } else {
        let _ = builder.compact().try_init();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
