//! Runtime error types.

use livefn_cache::CacheError;
use livefn_core::{ConnId, EnvelopeError, FunctionTag, HandlerId, ListenerId};
use thiserror::Error;

/// Errors raised by the live runtime.
///
/// Errors discovered inside background loops are logged with their
/// [`error_kind`](Self::error_kind); errors from calls made by route code
/// are returned.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// No live connection for the identity.
    #[error("connection '{0}' not found")]
    ConnectionNotFound(ConnId),

    /// No handler registered under the identity.
    #[error("handler '{0}' not found")]
    HandlerNotFound(HandlerId),

    /// The listener was never registered or its connection was purged.
    #[error("event listener with id '{0}' not found")]
    ListenerNotFound(ListenerId),

    /// A routing value required by the call is absent from the context.
    #[error("context missing {0}")]
    MissingContext(&'static str),

    /// The duplex upgrade did not complete.
    #[error("connection failed")]
    ConnectionFailed,

    /// A function tag arrived on a channel that does not handle it.
    #[error("function '{function}' found, not expected on the {direction} channel")]
    UnexpectedFunction {
        /// The offending tag.
        function: FunctionTag,
        /// `inbound` or `outbound`.
        direction: &'static str,
    },

    /// An error envelope sent by the client.
    #[error("client reported: {0}")]
    ClientReported(String),

    /// A handler channel has no receiver any more.
    #[error("{0} channel closed")]
    ChannelClosed(&'static str),

    /// Cache operation failed.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Envelope encode or decode failed.
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    /// Event data did not deserialize.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RuntimeError {
    /// Short classification string for structured logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::ConnectionNotFound(_) => "connection_not_found",
            Self::HandlerNotFound(_) => "handler_not_found",
            Self::ListenerNotFound(_) => "listener_not_found",
            Self::MissingContext(_) => "missing_context",
            Self::ConnectionFailed => "connection_failed",
            Self::UnexpectedFunction { .. } => "unexpected_function",
            Self::ClientReported(_) => "client_error",
            Self::ChannelClosed(_) => "channel_closed",
            Self::Cache(e) => e.error_kind(),
            Self::Envelope(e) => e.error_kind(),
            Self::Json(_) => "json",
        }
    }
}

/// Result type for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_failed_display() {
        assert_eq!(RuntimeError::ConnectionFailed.to_string(), "connection failed");
    }

    #[test]
    fn listener_not_found_display() {
        let err = RuntimeError::ListenerNotFound(ListenerId::from("l-1"));
        assert_eq!(err.to_string(), "event listener with id 'l-1' not found");
        assert_eq!(err.error_kind(), "listener_not_found");
    }

    #[test]
    fn unexpected_function_display() {
        let err = RuntimeError::UnexpectedFunction {
            function: FunctionTag::Render,
            direction: "inbound",
        };
        assert_eq!(
            err.to_string(),
            "function 'render' found, not expected on the inbound channel"
        );
    }

    #[test]
    fn cache_errors_keep_their_kind() {
        let err: RuntimeError = CacheError::StoreNotFound {
            store_key: "c1".into(),
        }
        .into();
        assert_eq!(err.error_kind(), "store_not_found");
        assert!(err.to_string().contains("c1"));
    }

    #[test]
    fn missing_context_display() {
        let err = RuntimeError::MissingContext("event");
        assert_eq!(err.to_string(), "context missing event");
        assert_eq!(err.error_kind(), "missing_context");
    }
}
