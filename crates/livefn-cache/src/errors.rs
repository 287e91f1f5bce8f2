//! Cache error types.

use thiserror::Error;

/// Errors returned by cache operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// No entry exists under the key pair.
    #[error("cache entry '{cache_key}' not found in store '{store_key}'")]
    NotFound {
        /// Store key (connection identity).
        store_key: String,
        /// Cache key.
        cache_key: String,
    },

    /// The store itself is gone (never created, or reclaimed).
    #[error("cache store '{store_key}' not found")]
    StoreNotFound {
        /// Store key (connection identity).
        store_key: String,
    },

    /// `create` collided with an existing entry, of any type.
    #[error("cache entry '{cache_key}' already exists in store '{store_key}'")]
    AlreadyExists {
        /// Store key (connection identity).
        store_key: String,
        /// Cache key.
        cache_key: String,
    },

    /// The entry holds a different type than the one requested.
    #[error("cache entry '{cache_key}' holds {found}, not {expected}")]
    WrongType {
        /// Cache key.
        cache_key: String,
        /// Type the caller asked for.
        expected: &'static str,
        /// Type the entry was created with.
        found: &'static str,
    },
}

impl CacheError {
    /// Short classification string for structured logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "cache_not_found",
            Self::StoreNotFound { .. } => "store_not_found",
            Self::AlreadyExists { .. } => "cache_exists",
            Self::WrongType { .. } => "cache_wrong_type",
        }
    }
}

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_keys() {
        let err = CacheError::NotFound {
            store_key: "c1".into(),
            cache_key: "counter".into(),
        };
        assert_eq!(
            err.to_string(),
            "cache entry 'counter' not found in store 'c1'"
        );
        assert_eq!(err.error_kind(), "cache_not_found");
    }

    #[test]
    fn wrong_type_display() {
        let err = CacheError::WrongType {
            cache_key: "counter".into(),
            expected: "alloc::string::String",
            found: "i32",
        };
        assert!(err.to_string().contains("holds i32"));
        assert_eq!(err.error_kind(), "cache_wrong_type");
    }

    #[test]
    fn kinds_are_distinct() {
        let kinds = [
            CacheError::StoreNotFound {
                store_key: "c".into(),
            }
            .error_kind(),
            CacheError::AlreadyExists {
                store_key: "c".into(),
                cache_key: "k".into(),
            }
            .error_kind(),
        ];
        assert_eq!(kinds, ["store_not_found", "cache_exists"]);
    }
}
