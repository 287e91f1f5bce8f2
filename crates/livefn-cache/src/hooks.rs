//! Change and timeout hooks keyed by (store key, cache key).
//!
//! Hooks live apart from the entries they observe: deleting or expiring an
//! entry leaves its hooks registered, so a re-created entry under the same
//! key pair keeps notifying. Only store reclamation drops them.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

/// A registered callback.
pub type Hook = Arc<dyn Fn() + Send + Sync>;

type KeyPair = (String, String);

#[derive(Default)]
struct HookMaps {
    on_change: HashMap<KeyPair, Hook>,
    on_timeout: HashMap<KeyPair, Hook>,
}

/// Process-wide hook table owned by a [`CacheService`](crate::CacheService).
#[derive(Default)]
pub(crate) struct HookRegistry {
    maps: Mutex<HookMaps>,
}

fn key(store_key: &str, cache_key: &str) -> KeyPair {
    (store_key.to_owned(), cache_key.to_owned())
}

impl HookRegistry {
    pub(crate) fn set_on_change(&self, store_key: &str, cache_key: &str, hook: Hook) {
        let _ = self
            .maps
            .lock()
            .on_change
            .insert(key(store_key, cache_key), hook);
    }

    pub(crate) fn set_on_timeout(&self, store_key: &str, cache_key: &str, hook: Hook) {
        let _ = self
            .maps
            .lock()
            .on_timeout
            .insert(key(store_key, cache_key), hook);
    }

    /// Clone out the change hook so the caller can run it unlocked.
    pub(crate) fn on_change(&self, store_key: &str, cache_key: &str) -> Option<Hook> {
        self.maps
            .lock()
            .on_change
            .get(&key(store_key, cache_key))
            .cloned()
    }

    pub(crate) fn on_timeout(&self, store_key: &str, cache_key: &str) -> Option<Hook> {
        self.maps
            .lock()
            .on_timeout
            .get(&key(store_key, cache_key))
            .cloned()
    }

    /// Drop every hook registered under `store_key`. Returns how many went.
    pub(crate) fn remove_store(&self, store_key: &str) -> usize {
        let mut maps = self.maps.lock();
        let before = maps.on_change.len() + maps.on_timeout.len();
        maps.on_change.retain(|(s, _), _| s != store_key);
        maps.on_timeout.retain(|(s, _), _| s != store_key);
        before - (maps.on_change.len() + maps.on_timeout.len())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn counting() -> (Arc<AtomicUsize>, Hook) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let hook: Hook = Arc::new(move || {
            let _ = c.fetch_add(1, Ordering::SeqCst);
        });
        (count, hook)
    }

    #[test]
    fn later_registration_replaces_earlier() {
        let registry = HookRegistry::default();
        let (first, hook_a) = counting();
        let (second, hook_b) = counting();
        registry.set_on_change("c1", "k", hook_a);
        registry.set_on_change("c1", "k", hook_b);

        registry.on_change("c1", "k").unwrap()();
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn key_pairs_do_not_collide() {
        let registry = HookRegistry::default();
        let (_, hook) = counting();
        registry.set_on_timeout("ab", "c", hook);
        assert!(registry.on_timeout("a", "bc").is_none());
        assert!(registry.on_timeout("ab", "c").is_some());
    }

    #[test]
    fn remove_store_only_touches_that_store() {
        let registry = HookRegistry::default();
        let (_, hook) = counting();
        registry.set_on_change("c1", "a", Arc::clone(&hook));
        registry.set_on_timeout("c1", "a", Arc::clone(&hook));
        registry.set_on_change("c2", "a", hook);

        assert_eq!(registry.remove_store("c1"), 2);
        assert!(registry.on_change("c1", "a").is_none());
        assert!(registry.on_change("c2", "a").is_some());
    }
}
