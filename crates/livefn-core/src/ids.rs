//! Branded ID newtypes for type safety.
//!
//! Connections, handlers and event listeners are all addressed by opaque
//! strings. Wrapping each in its own newtype prevents passing a listener ID
//! where a connection ID is expected.
//!
//! Server-generated IDs are UUID v7 (time-ordered). Connection IDs are chosen
//! by the client and enter the system through [`ConnId::from_string`].

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Generate a new UUID v7 string (time-ordered).
fn new_v7() -> String {
    Uuid::now_v7().to_string()
}

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new random ID (UUID v7, time-ordered).
            #[must_use]
            pub fn new() -> Self {
                Self(new_v7())
            }

            /// Create from an existing string value.
            #[must_use]
            pub fn from_string(s: String) -> Self {
                Self(s)
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Whether the ID is the empty string (unset on the wire).
            #[must_use]
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

branded_id! {
    /// Client-chosen identity of a live duplex session.
    ///
    /// Also used as the store key of the connection's cache partition.
    ConnId
}

branded_id! {
    /// Identity of a route-scoped handler.
    HandlerId
}

branded_id! {
    /// Identity of an event listener registered by a render.
    ListenerId
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_id_new_is_uuid_v7() {
        let id = HandlerId::new();
        let parsed = Uuid::parse_str(id.as_str()).expect("should be valid UUID");
        assert_eq!(parsed.get_version(), Some(uuid::Version::SortRand));
    }

    #[test]
    fn ids_are_unique() {
        let a = ListenerId::new();
        let b = ListenerId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn from_string_preserves_client_value() {
        let id = ConnId::from_string("tab-42".to_string());
        assert_eq!(id.as_str(), "tab-42");
        assert_eq!(id.to_string(), "tab-42");
    }

    #[test]
    fn empty_id_is_detected() {
        assert!(ConnId::from("").is_empty());
        assert!(!ConnId::from("c1").is_empty());
    }

    #[test]
    fn serializes_transparently() {
        let id = HandlerId::from("h1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"h1\"");
        let back: HandlerId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn deref_to_str() {
        let id = ConnId::from("abc");
        assert_eq!(id.len(), 3);
        assert!(id.starts_with("ab"));
    }

    #[test]
    fn into_inner_returns_string() {
        let id = ListenerId::from("lsn");
        let s: String = id.clone().into_inner();
        assert_eq!(s, "lsn");
        assert_eq!(String::from(id), "lsn");
    }
}
