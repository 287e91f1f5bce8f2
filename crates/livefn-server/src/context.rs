//! Route context handed to route and event callbacks.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use livefn_cache::{CacheEntry, CacheValue};
use livefn_core::{ClassPayload, ConnId, HandlerId, ListenerId, Payload};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::component::FnComponent;
use crate::errors::{Result, RuntimeError};
use crate::runtime::Runtime;
use crate::websocket::connection::Connection;

/// A route or event callback.
pub type HandleFn = Arc<dyn Fn(RouteContext) -> BoxFuture<'static, FnComponent> + Send + Sync>;

/// Wrap an async closure as a [`HandleFn`].
pub fn handle_fn<F, Fut>(f: F) -> HandleFn
where
    F: Fn(RouteContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = FnComponent> + Send + 'static,
{
    Arc::new(move |ctx| f(ctx).boxed())
}

/// The HTTP request a route was entered through.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestInfo {
    /// Request path.
    pub path: String,
    /// Decoded query parameters.
    pub query: HashMap<String, String>,
}

/// The event that triggered a callback.
#[derive(Clone, Debug, PartialEq)]
pub struct EventDetails {
    /// Listener that matched.
    pub listener_id: ListenerId,
    /// Element the listener is bound to.
    pub target_id: String,
    /// DOM event kind.
    pub on: String,
    /// Client-side event data.
    pub data: Value,
}

#[derive(Clone, Debug)]
struct Binding {
    conn_id: ConnId,
    handler_id: HandlerId,
    conn: Option<Arc<Connection>>,
}

/// Everything a callback may need: the runtime, the request, and when the
/// callback runs inside a live session, the connection and handler it
/// belongs to.
#[derive(Clone)]
pub struct RouteContext {
    runtime: Runtime,
    request: Arc<RequestInfo>,
    binding: Option<Binding>,
    event: Option<Arc<EventDetails>>,
}

impl RouteContext {
    /// A context with no live session, as used for plain HTML responses.
    pub fn new(runtime: Runtime, request: RequestInfo) -> Self {
        Self {
            runtime,
            request: Arc::new(request),
            binding: None,
            event: None,
        }
    }

    /// Bind to a live connection and the handler that owns it.
    #[must_use]
    pub fn bind(self, conn: Arc<Connection>) -> Self {
        let handler_id = conn.handler_id().clone();
        self.bind_via(conn, handler_id)
    }

    /// Bind to a live connection, with responses routed through
    /// `handler_id` rather than the connection's own handler.
    #[must_use]
    pub(crate) fn bind_via(mut self, conn: Arc<Connection>, handler_id: HandlerId) -> Self {
        self.binding = Some(Binding {
            conn_id: conn.id().clone(),
            handler_id,
            conn: Some(conn),
        });
        self
    }

    /// Bind to identities only, without a connection object.
    #[must_use]
    pub fn bind_ids(mut self, conn_id: ConnId, handler_id: HandlerId) -> Self {
        self.binding = Some(Binding {
            conn_id,
            handler_id,
            conn: None,
        });
        self
    }

    /// Copy the session binding of `other`.
    #[must_use]
    pub(crate) fn rebind(mut self, other: &RouteContext) -> Self {
        self.binding.clone_from(&other.binding);
        self
    }

    /// Attach the event that triggered the callback.
    #[must_use]
    pub(crate) fn with_event(mut self, event: EventDetails) -> Self {
        self.event = Some(Arc::new(event));
        self
    }

    /// Rebuild a context from a listener's originating request.
    pub(crate) fn from_origin(runtime: Runtime, request: Arc<RequestInfo>) -> Self {
        Self {
            runtime,
            request,
            binding: None,
            event: None,
        }
    }

    /// The runtime this context belongs to.
    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub(crate) fn request_arc(&self) -> &Arc<RequestInfo> {
        &self.request
    }

    /// The originating request.
    pub fn request(&self) -> &RequestInfo {
        &self.request
    }

    /// Request path.
    pub fn path(&self) -> &str {
        &self.request.path
    }

    /// One query parameter.
    pub fn query(&self, key: &str) -> Option<&str> {
        self.request.query.get(key).map(String::as_str)
    }

    /// Connection identity, when bound to a session.
    pub fn conn_id(&self) -> Option<&ConnId> {
        self.binding.as_ref().map(|b| &b.conn_id)
    }

    /// Handler identity, when bound to a session.
    pub fn handler_id(&self) -> Option<&HandlerId> {
        self.binding.as_ref().map(|b| &b.handler_id)
    }

    /// The live connection, when bound to one.
    pub fn connection(&self) -> Option<&Arc<Connection>> {
        self.binding.as_ref().and_then(|b| b.conn.as_ref())
    }

    /// The triggering event, inside an event callback.
    pub fn event(&self) -> Option<&EventDetails> {
        self.event.as_deref()
    }

    /// Deserialize the triggering event's data.
    pub fn event_data<T: DeserializeOwned>(&self) -> Result<T> {
        let event = self.event().ok_or(RuntimeError::MissingContext("event"))?;
        Ok(serde_json::from_value(event.data.clone())?)
    }

    fn store_key(&self) -> Result<&str> {
        self.conn_id()
            .map(ConnId::as_str)
            .ok_or(RuntimeError::MissingContext("dispatch"))
    }

    /// Create a cache entry in this connection's store.
    pub fn new_cache<T: CacheValue>(&self, key: &str, initial: T) -> Result<CacheEntry<T>> {
        let store_key = self.store_key()?;
        Ok(self.runtime.cache().create(store_key, key, initial)?)
    }

    /// Open an existing cache entry in this connection's store.
    pub fn use_cache<T: CacheValue>(&self, key: &str) -> Result<CacheEntry<T>> {
        let store_key = self.store_key()?;
        Ok(self.runtime.cache().get(store_key, key)?)
    }

    /// A fresh component bound to this context.
    pub fn component(&self) -> FnComponent {
        FnComponent::new(self.clone())
    }

    /// A component that navigates the client to `url`.
    pub fn redirect(&self, url: impl Into<String>) -> FnComponent {
        self.component().with_redirect(url)
    }

    /// A component that reports `message` to the client.
    pub fn error(&self, message: impl Into<String>) -> FnComponent {
        self.component().with_error(message)
    }

    /// Call a client function now.
    pub async fn js(&self, function: impl Into<String>, arg: Value) -> Result<()> {
        self.component().js(function, arg).dispatch().await
    }

    /// Add CSS classes to an element now.
    pub async fn add_classes(&self, target_id: &str, names: &[&str]) -> Result<()> {
        self.class_change(target_id, names, false).await
    }

    /// Remove CSS classes from an element now.
    pub async fn remove_classes(&self, target_id: &str, names: &[&str]) -> Result<()> {
        self.class_change(target_id, names, true).await
    }

    async fn class_change(&self, target_id: &str, names: &[&str], remove: bool) -> Result<()> {
        let payload = Payload::Class(ClassPayload {
            target_id: target_id.to_owned(),
            remove,
            names: names.iter().map(|n| (*n).to_owned()).collect(),
        });
        self.component().with_action(payload).dispatch().await
    }

    /// Remove an element by ID now.
    pub async fn remove_element(&self, target_id: &str) -> Result<()> {
        self.component().remove_element(target_id).dispatch().await
    }

    /// Remove every element with the given tag now.
    pub async fn remove_tag(&self, tag: &str) -> Result<()> {
        self.component().remove_tag(tag).dispatch().await
    }
}

impl std::fmt::Debug for RouteContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteContext")
            .field("path", &self.request.path)
            .field("conn_id", &self.conn_id())
            .field("handler_id", &self.handler_id())
            .field("event", &self.event)
            .finish_non_exhaustive()
    }
}
