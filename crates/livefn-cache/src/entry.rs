//! Typed handles to cache entries.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::time::Instant;
use tracing::debug;

use crate::errors::Result;
use crate::hooks::Hook;
use crate::service::{CacheService, resolve_ttl, wrong_type};
use crate::value::{CacheValue, CachedValue};

/// One recorded transition of an entry with history enabled.
#[derive(Clone, Debug, PartialEq)]
pub struct HistoryRecord<T> {
    /// When the `set` happened.
    pub at: DateTime<Utc>,
    /// Value before the `set`.
    pub previous: T,
    /// Value written by the `set`.
    pub current: T,
}

/// Handle to the entry under (`store_key`, `cache_key`), read as `T`.
///
/// The handle holds no value of its own: every call goes to the store, so
/// a handle observes deletion, expiry and store reclamation as errors.
pub struct CacheEntry<T> {
    service: Arc<CacheService>,
    store_key: String,
    cache_key: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for CacheEntry<T> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            store_key: self.store_key.clone(),
            cache_key: self.cache_key.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for CacheEntry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEntry")
            .field("store_key", &self.store_key)
            .field("cache_key", &self.cache_key)
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T: CacheValue> CacheEntry<T> {
    pub(crate) fn new(service: Arc<CacheService>, store_key: &str, cache_key: &str) -> Self {
        Self {
            service,
            store_key: store_key.to_owned(),
            cache_key: cache_key.to_owned(),
            _marker: PhantomData,
        }
    }

    /// Store key (the owning connection's identity).
    pub fn store_key(&self) -> &str {
        &self.store_key
    }

    /// Cache key.
    pub fn cache_key(&self) -> &str {
        &self.cache_key
    }

    /// Current value.
    pub fn value(&self) -> Result<T> {
        self.service
            .with_slot(&self.store_key, &self.cache_key, |slot| {
                slot.value
                    .downcast_ref::<T>()
                    .cloned()
                    .map_err(|m| wrong_type(&self.cache_key, m))
            })
    }

    /// Replace the value, restart the expiry clock and fire the change hook.
    ///
    /// `ttl` is resolved with [`resolve_ttl`] against the service default.
    pub fn set(&self, value: T, ttl: Option<Duration>) -> Result<()> {
        let ttl = resolve_ttl(ttl, self.service.default_ttl());
        let deadline = self
            .service
            .with_slot(&self.store_key, &self.cache_key, |slot| {
                let record = slot.record;
                let now = Utc::now();
                let current = slot
                    .value
                    .downcast_mut::<T>()
                    .map_err(|m| wrong_type(&self.cache_key, m))?;
                let previous = std::mem::replace(current, value);
                let transition = record.then(|| HistoryRecord {
                    at: now,
                    previous,
                    current: current.clone(),
                });
                if let Some(transition) = transition {
                    slot.history.push(CachedValue::new(transition));
                }
                slot.updated_at = now;
                slot.updated = Instant::now();
                slot.ttl = ttl;
                Ok(slot.deadline())
            })?;

        debug!(
            store_key = %self.store_key,
            cache_key = %self.cache_key,
            ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
            "cache entry updated"
        );
        if let Some(hook) = self.service.hooks.on_change(&self.store_key, &self.cache_key) {
            hook();
        }
        self.service
            .arm_watcher(&self.store_key, &self.cache_key, deadline);
        Ok(())
    }

    /// Remove the entry now. Returns whether it was still present.
    pub fn delete(&self) -> bool {
        self.service.delete_entry(&self.store_key, &self.cache_key)
    }

    /// When the entry was created.
    pub fn created_at(&self) -> Result<DateTime<Utc>> {
        self.service
            .with_slot(&self.store_key, &self.cache_key, |slot| Ok(slot.created_at))
    }

    /// When the entry was last written.
    pub fn updated_at(&self) -> Result<DateTime<Utc>> {
        self.service
            .with_slot(&self.store_key, &self.cache_key, |slot| Ok(slot.updated_at))
    }

    /// Resolved lifetime from the last write.
    pub fn time_to_live(&self) -> Result<Duration> {
        self.service
            .with_slot(&self.store_key, &self.cache_key, |slot| Ok(slot.ttl))
    }

    /// Wall-clock expiry: last write plus time-to-live.
    pub fn expires_at(&self) -> Result<DateTime<Utc>> {
        self.service
            .with_slot(&self.store_key, &self.cache_key, |slot| {
                Ok(TimeDelta::from_std(slot.ttl)
                    .ok()
                    .and_then(|ttl| slot.updated_at.checked_add_signed(ttl))
                    .unwrap_or(DateTime::<Utc>::MAX_UTC))
            })
    }

    /// Turn history recording on or off for subsequent sets.
    pub fn record(&self, enabled: bool) -> Result<()> {
        self.service
            .with_slot(&self.store_key, &self.cache_key, |slot| {
                slot.record = enabled;
                Ok(())
            })
    }

    /// Recorded transitions, oldest first.
    pub fn history(&self) -> Result<Vec<HistoryRecord<T>>> {
        self.service
            .with_slot(&self.store_key, &self.cache_key, |slot| {
                Ok(slot
                    .history
                    .iter()
                    .filter_map(|v| v.downcast_ref::<HistoryRecord<T>>().ok())
                    .cloned()
                    .collect())
            })
    }

    /// Register the change hook for this key pair, replacing any earlier one.
    pub fn on_change(&self, f: impl Fn() + Send + Sync + 'static) {
        let hook: Hook = Arc::new(f);
        self.service
            .hooks
            .set_on_change(&self.store_key, &self.cache_key, hook);
    }

    /// Register the timeout hook for this key pair, replacing any earlier one.
    pub fn on_timeout(&self, f: impl Fn() + Send + Sync + 'static) {
        let hook: Hook = Arc::new(f);
        self.service
            .hooks
            .set_on_timeout(&self.store_key, &self.cache_key, hook);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
