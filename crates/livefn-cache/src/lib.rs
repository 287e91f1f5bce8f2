//! # livefn-cache
//!
//! A two-level keyed store (store key → cache key → typed value) scoped to
//! a connection's lifetime.
//!
//! - [`CacheService`] owns every store. Stores are allocated lazily by the
//!   first [`CacheService::create`] under a store key and are only removed
//!   through [`CacheService::remove_store`].
//! - [`CacheEntry`] is a typed handle to one entry. Values are boxed with a
//!   run-time type tag ([`CachedValue`]); reading under the wrong type
//!   yields [`CacheError::WrongType`] and leaves the entry intact.
//! - Every `set` (and the initial `create`) arms an expiry watcher on the
//!   tokio runtime. Only a watcher whose wake time is at or past the entry's
//!   current deadline removes it, so renewing an entry silently retires the
//!   older watchers.
//! - `on_change` / `on_timeout` hooks are keyed by (store key, cache key),
//!   outlive individual entries, and are always invoked with no cache lock
//!   held.

#![deny(unsafe_code)]

pub mod entry;
pub mod errors;
pub mod hooks;
pub mod service;
pub mod value;

pub use entry::{CacheEntry, HistoryRecord};
pub use errors::{CacheError, Result};
pub use hooks::Hook;
pub use service::{CacheService, resolve_ttl};
pub use value::{CacheValue, CachedValue, TypeMismatch};
