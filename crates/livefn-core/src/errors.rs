//! Envelope encoding errors.

use thiserror::Error;

/// Errors raised while decoding or encoding a [`Dispatch`](crate::Dispatch).
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// The frame was not a valid envelope (bad JSON, wrong field types,
    /// or an unknown function tag).
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The `function` field named a tag this runtime does not speak.
    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    /// The encoded frame is larger than the peer accepts.
    #[error("envelope of {size} bytes exceeds the {limit} byte frame limit")]
    TooLarge {
        /// Encoded size.
        size: usize,
        /// Configured limit.
        limit: usize,
    },
}

impl EnvelopeError {
    /// Short classification string for structured logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed_envelope",
            Self::UnknownFunction(_) => "unknown_function",
            Self::TooLarge { .. } => "envelope_too_large",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_function_display() {
        let err = EnvelopeError::UnknownFunction("auth".into());
        assert_eq!(err.to_string(), "unknown function 'auth'");
        assert_eq!(err.error_kind(), "unknown_function");
    }

    #[test]
    fn malformed_from_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{bad").unwrap_err();
        let err: EnvelopeError = json_err.into();
        assert!(err.to_string().starts_with("malformed envelope"));
        assert_eq!(err.error_kind(), "malformed_envelope");
    }
}
