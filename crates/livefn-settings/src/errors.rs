//! Settings error types.

use std::path::PathBuf;

use thiserror::Error;

/// Why a settings layer was rejected.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Read {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file, or the merged result, does not fit the settings schema.
    #[error("settings JSON rejected: {0}")]
    Parse(#[from] serde_json::Error),

    /// The file parsed, but its top level is not an object.
    #[error("settings file must contain a JSON object")]
    NotAnObject,

    /// A value the runtime cannot operate with.
    #[error("{field} {requirement}")]
    Invalid {
        /// camelCase path of the offending key.
        field: &'static str,
        /// What the value must satisfy.
        requirement: &'static str,
    },
}

impl SettingsError {
    /// Short classification string for structured logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Read { .. } => "settings_read",
            Self::Parse(_) => "settings_parse",
            Self::NotAnObject => "settings_not_object",
            Self::Invalid { .. } => "settings_invalid",
        }
    }
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_error_names_the_file() {
        let err = SettingsError::Read {
            path: PathBuf::from("/etc/livefn.json"),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        assert!(err.to_string().starts_with("cannot read /etc/livefn.json"));
        assert_eq!(err.error_kind(), "settings_read");
    }

    #[test]
    fn invalid_names_key_and_requirement() {
        let err = SettingsError::Invalid {
            field: "cache.defaultTtlMs",
            requirement: "must be greater than zero",
        };
        assert_eq!(err.to_string(), "cache.defaultTtlMs must be greater than zero");
        assert_eq!(err.error_kind(), "settings_invalid");
    }
}
