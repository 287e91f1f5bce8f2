//! The cache service: store map, entry slots and expiry watchers.
//!
//! Locking: the store map, each store, and the hook table each have their
//! own mutex, and no code path holds two of them at once. Hooks are cloned
//! out of their table and run with nothing locked, so a hook may call back
//! into the cache.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::entry::CacheEntry;
use crate::errors::{CacheError, Result};
use crate::hooks::HookRegistry;
use crate::value::{CacheValue, CachedValue, TypeMismatch};

/// Resolve the lifetime for a `set`.
///
/// A positive duration below `default` is honored. Zero, anything at or
/// above `default`, and `None` all resolve to `default`.
pub fn resolve_ttl(requested: Option<Duration>, default: Duration) -> Duration {
    match requested {
        Some(ttl) if !ttl.is_zero() && ttl < default => ttl,
        _ => default,
    }
}

pub(crate) struct Slot {
    pub(crate) value: CachedValue,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
    pub(crate) updated: Instant,
    pub(crate) ttl: Duration,
    pub(crate) record: bool,
    pub(crate) history: Vec<CachedValue>,
}

impl Slot {
    fn new(value: CachedValue, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            value,
            created_at: now,
            updated_at: now,
            updated: Instant::now(),
            ttl,
            record: false,
            history: Vec::new(),
        }
    }

    pub(crate) fn deadline(&self) -> Instant {
        self.updated + self.ttl
    }
}

#[derive(Default)]
struct StoreState {
    entries: HashMap<String, Slot>,
    /// Set when the store is detached from the service; late writers that
    /// still hold the `Arc` see it as gone.
    reclaimed: bool,
}

#[derive(Default)]
struct Store {
    state: Mutex<StoreState>,
}

pub(crate) fn wrong_type(cache_key: &str, mismatch: TypeMismatch) -> CacheError {
    CacheError::WrongType {
        cache_key: cache_key.to_owned(),
        expected: mismatch.expected,
        found: mismatch.found,
    }
}

fn not_found(store_key: &str, cache_key: &str) -> CacheError {
    CacheError::NotFound {
        store_key: store_key.to_owned(),
        cache_key: cache_key.to_owned(),
    }
}

fn store_not_found(store_key: &str) -> CacheError {
    CacheError::StoreNotFound {
        store_key: store_key.to_owned(),
    }
}

/// Owner of every cache store, shared behind an `Arc`.
pub struct CacheService {
    default_ttl: Duration,
    stores: Mutex<HashMap<String, Arc<Store>>>,
    pub(crate) hooks: HookRegistry,
}

impl CacheService {
    /// Create a service whose entries live `default_ttl` unless told otherwise.
    pub fn new(default_ttl: Duration) -> Arc<Self> {
        Arc::new(Self {
            default_ttl,
            stores: Mutex::new(HashMap::new()),
            hooks: HookRegistry::default(),
        })
    }

    /// The configured default time-to-live.
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Create an entry holding `initial` and arm its expiry watcher.
    ///
    /// Fails with [`CacheError::AlreadyExists`] when any entry, of any type,
    /// already sits under the key pair.
    pub fn create<T: CacheValue>(
        self: &Arc<Self>,
        store_key: &str,
        cache_key: &str,
        initial: T,
    ) -> Result<CacheEntry<T>> {
        let store = self.store_or_create(store_key);
        let deadline = {
            let mut state = store.state.lock();
            if state.reclaimed {
                return Err(store_not_found(store_key));
            }
            if state.entries.contains_key(cache_key) {
                return Err(CacheError::AlreadyExists {
                    store_key: store_key.to_owned(),
                    cache_key: cache_key.to_owned(),
                });
            }
            let slot = Slot::new(CachedValue::new(initial), self.default_ttl);
            let deadline = slot.deadline();
            let _ = state.entries.insert(cache_key.to_owned(), slot);
            deadline
        };
        debug!(store_key, cache_key, type_name = std::any::type_name::<T>(), "cache entry created");
        self.arm_watcher(store_key, cache_key, deadline);
        Ok(CacheEntry::new(Arc::clone(self), store_key, cache_key))
    }

    /// Typed handle to an existing entry.
    pub fn get<T: CacheValue>(
        self: &Arc<Self>,
        store_key: &str,
        cache_key: &str,
    ) -> Result<CacheEntry<T>> {
        let store = self
            .store(store_key)
            .ok_or_else(|| not_found(store_key, cache_key))?;
        {
            let state = store.state.lock();
            let slot = state
                .entries
                .get(cache_key)
                .filter(|_| !state.reclaimed)
                .ok_or_else(|| not_found(store_key, cache_key))?;
            let _ = slot
                .value
                .downcast_ref::<T>()
                .map_err(|m| wrong_type(cache_key, m))?;
        }
        Ok(CacheEntry::new(Arc::clone(self), store_key, cache_key))
    }

    /// Detach and drop a whole store, with its hooks and history.
    ///
    /// Returns `false` if there was no such store.
    pub fn remove_store(&self, store_key: &str) -> bool {
        let Some(store) = self.stores.lock().remove(store_key) else {
            return false;
        };
        let entries = {
            let mut state = store.state.lock();
            state.reclaimed = true;
            std::mem::take(&mut state.entries)
        };
        let hooks = self.hooks.remove_store(store_key);
        debug!(store_key, entries = entries.len(), hooks, "cache store removed");
        true
    }

    /// Whether a store is allocated under `store_key`.
    pub fn store_exists(&self, store_key: &str) -> bool {
        self.stores.lock().contains_key(store_key)
    }

    /// Number of live entries under `store_key`.
    pub fn len(&self, store_key: &str) -> usize {
        self.store(store_key)
            .map_or(0, |store| store.state.lock().entries.len())
    }

    /// Number of allocated stores.
    pub fn store_count(&self) -> usize {
        self.stores.lock().len()
    }

    fn store(&self, store_key: &str) -> Option<Arc<Store>> {
        self.stores.lock().get(store_key).cloned()
    }

    fn store_or_create(&self, store_key: &str) -> Arc<Store> {
        let mut stores = self.stores.lock();
        Arc::clone(stores.entry(store_key.to_owned()).or_insert_with(|| {
            debug!(store_key, "cache store allocated");
            Arc::default()
        }))
    }

    /// Run `f` against the slot under the key pair, with the store locked.
    pub(crate) fn with_slot<R>(
        &self,
        store_key: &str,
        cache_key: &str,
        f: impl FnOnce(&mut Slot) -> Result<R>,
    ) -> Result<R> {
        let store = self
            .store(store_key)
            .ok_or_else(|| store_not_found(store_key))?;
        let mut state = store.state.lock();
        if state.reclaimed {
            return Err(store_not_found(store_key));
        }
        let slot = state
            .entries
            .get_mut(cache_key)
            .ok_or_else(|| not_found(store_key, cache_key))?;
        f(slot)
    }

    /// Remove one entry immediately. Returns whether it existed.
    pub(crate) fn delete_entry(&self, store_key: &str, cache_key: &str) -> bool {
        let Some(store) = self.store(store_key) else {
            debug!(store_key, cache_key, "delete on missing store");
            return false;
        };
        let removed = store.state.lock().entries.remove(cache_key);
        removed.is_some()
    }

    /// Spawn a watcher that expires the entry once `deadline` is reached,
    /// unless it has been renewed in the meantime.
    pub(crate) fn arm_watcher(self: &Arc<Self>, store_key: &str, cache_key: &str, deadline: Instant) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(store_key, cache_key, "no tokio runtime, cache entry will not expire");
            return;
        };
        let service: Weak<Self> = Arc::downgrade(self);
        let store_key = store_key.to_owned();
        let cache_key = cache_key.to_owned();
        let _ = runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(service) = service.upgrade() {
                service.expire_if_due(&store_key, &cache_key);
            }
        });
    }

    fn expire_if_due(&self, store_key: &str, cache_key: &str) {
        let Some(store) = self.store(store_key) else {
            return;
        };
        let expired = {
            let mut state = store.state.lock();
            let due = state
                .entries
                .get(cache_key)
                .is_some_and(|slot| Instant::now() >= slot.deadline());
            due && state.entries.remove(cache_key).is_some()
        };
        if !expired {
            return;
        }
        debug!(store_key, cache_key, "cache entry expired");
        if let Some(hook) = self.hooks.on_timeout(store_key, cache_key) {
            hook();
        }
    }
}

impl std::fmt::Debug for CacheService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheService")
            .field("default_ttl", &self.default_ttl)
            .field("stores", &self.store_count())
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
