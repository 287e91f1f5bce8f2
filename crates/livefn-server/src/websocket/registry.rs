//! Connection registry: live sessions by identity, plus deferred reclamation
//! of a departed client's cache store.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use livefn_cache::CacheService;
use livefn_core::{ConnId, HandlerId};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::connection::Connection;
use crate::listeners::ListenerRegistry;
use crate::shutdown::ShutdownCoordinator;

/// A scheduled reclamation. `seq` tells a timer whether the entry is
/// still its own.
struct PendingReclaim {
    seq: u64,
    token: CancellationToken,
}

#[derive(Default)]
struct RegistryState {
    conns: HashMap<ConnId, Arc<Connection>>,
    reclaim: HashMap<ConnId, PendingReclaim>,
    next_seq: u64,
}

impl RegistryState {
    fn forget_reclaim(&mut self, id: &ConnId, seq: u64) {
        if self.reclaim.get(id).is_some_and(|p| p.seq == seq) {
            let _ = self.reclaim.remove(id);
        }
    }
}

/// Tracks at most one live [`Connection`] per [`ConnId`].
///
/// Ownership is decided by identity plus object: a reconnect under the same
/// identity replaces the previous entry, and every later operation on the
/// replaced connection (publish, close) becomes a no-op for the registry.
pub struct ConnectionRegistry {
    inner: Mutex<RegistryState>,
    listeners: Arc<ListenerRegistry>,
    cache: Arc<CacheService>,
    grace: Duration,
    send_queue_capacity: usize,
    shutdown: ShutdownCoordinator,
}

impl ConnectionRegistry {
    /// Create a registry. `grace` is how long a closed connection's cache
    /// store survives before it is reclaimed. Reclamation timers are
    /// spawned under `shutdown` and end with it.
    pub fn new(
        listeners: Arc<ListenerRegistry>,
        cache: Arc<CacheService>,
        grace: Duration,
        send_queue_capacity: usize,
        shutdown: ShutdownCoordinator,
    ) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(RegistryState::default()),
            listeners,
            cache,
            grace,
            send_queue_capacity,
            shutdown,
        })
    }

    /// Register a new connection and return it with the receiving half of
    /// its outbound queue.
    ///
    /// Cancels any pending store reclamation for the identity and tells a
    /// connection it replaces to shut.
    pub fn register(
        &self,
        id: ConnId,
        handler_id: HandlerId,
    ) -> (Arc<Connection>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(self.send_queue_capacity);
        let conn = Arc::new(Connection::new(id.clone(), handler_id, tx));
        let (replaced, pending) = {
            let mut state = self.inner.lock();
            let pending = state.reclaim.remove(&id);
            let replaced = state.conns.insert(id.clone(), Arc::clone(&conn));
            (replaced, pending)
        };
        if let Some(pending) = pending {
            pending.token.cancel();
            debug!(conn_id = %id, "reconnected within grace window, reclamation cancelled");
        }
        if let Some(old) = replaced {
            old.closed().cancel();
            info!(conn_id = %id, "connection replaced by reconnect");
        }
        (conn, rx)
    }

    /// Current occupant of an identity.
    pub fn lookup(&self, id: &ConnId) -> Option<Arc<Connection>> {
        self.inner.lock().conns.get(id).cloned()
    }

    /// Drop the registry entry for an identity without any cleanup.
    pub fn remove(&self, id: &ConnId) -> Option<Arc<Connection>> {
        self.inner.lock().conns.remove(id)
    }

    /// Whether `conn` is still the occupant of its identity.
    pub fn is_current(&self, conn: &Arc<Connection>) -> bool {
        self.inner
            .lock()
            .conns
            .get(conn.id())
            .is_some_and(|current| Arc::ptr_eq(current, conn))
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.inner.lock().conns.len()
    }

    /// Whether no connection is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of store reclamations waiting out their grace window.
    pub fn pending_reclaims(&self) -> usize {
        self.inner.lock().reclaim.len()
    }

    /// Queue a frame on `conn`.
    ///
    /// A connection that no longer occupies its identity gets nothing.
    /// Returns whether the frame was queued.
    pub fn publish(&self, conn: &Arc<Connection>, frame: String) -> bool {
        if !self.is_current(conn) {
            warn!(conn_id = %conn.id(), "publish to stale connection skipped");
            return false;
        }
        if conn.send(frame) {
            true
        } else {
            warn!(
                conn_id = %conn.id(),
                dropped = conn.drop_count(),
                "outbound queue full or closed, frame dropped"
            );
            false
        }
    }

    /// Close the current occupant of an identity. Returns `false` if there
    /// was none.
    pub fn close(self: &Arc<Self>, id: &ConnId) -> bool {
        match self.lookup(id) {
            Some(conn) => self.close_connection(&conn),
            None => false,
        }
    }

    /// Shut `conn`'s transport and, if it still occupies its identity,
    /// unregister it, purge its listeners and schedule reclamation of its
    /// cache store.
    ///
    /// Safe to call repeatedly; only the first call on the current occupant
    /// does any cleanup.
    pub fn close_connection(self: &Arc<Self>, conn: &Arc<Connection>) -> bool {
        conn.closed().cancel();
        let listeners = {
            let mut state = self.inner.lock();
            let current = state
                .conns
                .get(conn.id())
                .is_some_and(|current| Arc::ptr_eq(current, conn));
            if !current {
                return false;
            }
            let _ = state.conns.remove(conn.id());
            // Purge before a reconnect can register listeners under this id.
            // Lock order: registry, then listeners.
            self.listeners.delete(conn.id())
        };
        info!(
            conn_id = %conn.id(),
            listeners,
            dropped = conn.drop_count(),
            age_secs = conn.age().as_secs(),
            "connection closed"
        );
        self.schedule_reclaim(conn.id().clone());
        true
    }

    /// Close every live connection.
    pub fn close_all(self: &Arc<Self>) -> usize {
        let conns: Vec<_> = self.inner.lock().conns.values().cloned().collect();
        conns
            .iter()
            .filter(|conn| self.close_connection(conn))
            .count()
    }

    /// Arm the grace timer for `id`. A newer timer for the same identity
    /// supersedes this one, and a reconnect cancels it.
    fn schedule_reclaim(self: &Arc<Self>, id: ConnId) {
        if tokio::runtime::Handle::try_current().is_err() {
            warn!(conn_id = %id, "no tokio runtime, cache store will not be reclaimed");
            return;
        }
        let token = CancellationToken::new();
        let (seq, previous) = {
            let mut state = self.inner.lock();
            let seq = state.next_seq;
            state.next_seq += 1;
            let pending = PendingReclaim {
                seq,
                token: token.clone(),
            };
            (seq, state.reclaim.insert(id.clone(), pending))
        };
        if let Some(previous) = previous {
            previous.token.cancel();
        }

        let registry: Weak<Self> = Arc::downgrade(self);
        let grace = self.grace;
        let stop = self.shutdown.token();
        let _ = self.shutdown.spawn(async move {
            let elapsed = tokio::select! {
                () = token.cancelled() => false,
                () = stop.cancelled() => false,
                () = tokio::time::sleep(grace) => true,
            };
            if let Some(registry) = registry.upgrade() {
                registry.finish_reclaim(&id, seq, elapsed);
            }
        });
    }

    /// Drop the timer's pending entry and, if its grace window ran out with
    /// the identity still absent, the identity's cache store.
    fn finish_reclaim(&self, id: &ConnId, seq: u64, elapsed: bool) {
        {
            let mut state = self.inner.lock();
            state.forget_reclaim(id, seq);
            if !elapsed || state.conns.contains_key(id) {
                return;
            }
        }
        let removed = self.cache.remove_store(id.as_str());
        debug!(conn_id = %id, removed, "grace window elapsed, cache store reclaimed");
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("ConnectionRegistry")
            .field("connections", &state.conns.len())
            .field("pending_reclaims", &state.reclaim.len())
            .field("grace", &self.grace)
            .finish_non_exhaustive()
    }
}
