//! Event listener registry.
//!
//! Listeners bind a rendered element and a DOM event kind to a server
//! callback. They are partitioned by connection and purged together when
//! their connection closes, so "not found" is the normal outcome of an
//! event that arrives after a disconnect.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use livefn_core::{ConnId, EventPayload, ListenerId};
use parking_lot::Mutex;
use serde_json::Value;

use crate::context::{HandleFn, RequestInfo};

/// A binding from a rendered element to a server callback.
pub struct EventListener {
    /// Listener identity, echoed back by the client in event envelopes.
    pub id: ListenerId,
    /// Element the client attaches the listener to.
    pub target_id: String,
    /// DOM event kind.
    pub on: String,
    /// Request that produced the render which registered this listener.
    pub origin: Arc<RequestInfo>,
    /// Callback invoked when the event fires.
    pub handler: HandleFn,
}

impl EventListener {
    /// Create a listener with a fresh identity.
    pub fn new(
        target_id: impl Into<String>,
        on: impl Into<String>,
        origin: Arc<RequestInfo>,
        handler: HandleFn,
    ) -> Self {
        Self {
            id: ListenerId::new(),
            target_id: target_id.into(),
            on: on.into(),
            origin,
            handler,
        }
    }

    /// The binding as sent to the client inside a render payload.
    pub fn payload(&self) -> EventPayload {
        EventPayload {
            id: self.id.to_string(),
            target_id: self.target_id.clone(),
            on: self.on.clone(),
            data: Value::Null,
        }
    }
}

impl fmt::Debug for EventListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventListener")
            .field("id", &self.id)
            .field("target_id", &self.target_id)
            .field("on", &self.on)
            .field("path", &self.origin.path)
            .finish_non_exhaustive()
    }
}

/// Per-connection listener sets behind one registry-wide lock.
#[derive(Default)]
pub struct ListenerRegistry {
    inner: Mutex<HashMap<ConnId, HashMap<ListenerId, Arc<EventListener>>>>,
}

impl ListenerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` under `conn_id`.
    pub fn add(&self, conn_id: &ConnId, listener: EventListener) -> Arc<EventListener> {
        let listener = Arc::new(listener);
        let _ = self
            .inner
            .lock()
            .entry(conn_id.clone())
            .or_default()
            .insert(listener.id.clone(), Arc::clone(&listener));
        listener
    }

    /// Look up a listener within one connection's set.
    pub fn get(&self, listener_id: &ListenerId, conn_id: &ConnId) -> Option<Arc<EventListener>> {
        self.inner
            .lock()
            .get(conn_id)
            .and_then(|set| set.get(listener_id))
            .cloned()
    }

    /// Purge every listener of a connection. Returns how many were dropped.
    pub fn delete(&self, conn_id: &ConnId) -> usize {
        self.inner.lock().remove(conn_id).map_or(0, |set| set.len())
    }

    /// Number of listeners registered for a connection.
    pub fn count(&self, conn_id: &ConnId) -> usize {
        self.inner.lock().get(conn_id).map_or(0, HashMap::len)
    }

    /// Number of connections holding at least one listener.
    pub fn connection_count(&self) -> usize {
        self.inner.lock().len()
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("connections", &self.connection_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::FnComponent;
    use crate::context::handle_fn;

    fn listener(target: &str, on: &str) -> EventListener {
        EventListener::new(
            target,
            on,
            Arc::new(RequestInfo::default()),
            handle_fn(|ctx| async move { FnComponent::new(ctx) }),
        )
    }

    #[test]
    fn add_then_get() {
        let reg = ListenerRegistry::new();
        let conn = ConnId::from("c1");
        let added = reg.add(&conn, listener("fncmp-1", "click"));
        let found = reg.get(&added.id, &conn).unwrap();
        assert!(Arc::ptr_eq(&added, &found));
        assert_eq!(found.on, "click");
        assert_eq!(reg.count(&conn), 1);
    }

    #[test]
    fn get_is_scoped_to_connection() {
        let reg = ListenerRegistry::new();
        let added = reg.add(&ConnId::from("c1"), listener("fncmp-1", "click"));
        assert!(reg.get(&added.id, &ConnId::from("c2")).is_none());
    }

    #[test]
    fn delete_purges_only_that_connection() {
        let reg = ListenerRegistry::new();
        let c1 = ConnId::from("c1");
        let c2 = ConnId::from("c2");
        let a = reg.add(&c1, listener("x", "click"));
        let _ = reg.add(&c1, listener("x", "input"));
        let b = reg.add(&c2, listener("y", "click"));

        assert_eq!(reg.delete(&c1), 2);
        assert!(reg.get(&a.id, &c1).is_none());
        assert!(reg.get(&b.id, &c2).is_some());
        assert_eq!(reg.connection_count(), 1);
        assert_eq!(reg.delete(&c1), 0);
    }

    #[test]
    fn payload_mirrors_binding() {
        let l = listener("fncmp-9", "submit");
        let p = l.payload();
        assert_eq!(p.id, l.id.as_str());
        assert_eq!(p.target_id, "fncmp-9");
        assert_eq!(p.on, "submit");
        assert!(p.data.is_null());
    }

    #[test]
    fn debug_omits_callback() {
        let l = listener("fncmp-1", "click");
        let dbg = format!("{l:?}");
        assert!(dbg.contains("fncmp-1"));
        assert!(dbg.contains(".."));
    }
}
