//! Handler pool and dispatch router.
//!
//! One [`Handler`] per route. Each owns an inbound channel of decoded
//! envelopes and an outbound channel of [`FnComponent`]s, drained by two
//! long-lived loops:
//!
//! - **inbound**: answers pings, routes events to their listener and
//!   records client errors. Listener callbacks run concurrently, bounded by
//!   a semaphore, so responses to distinct events may publish in any order.
//! - **outbound**: strictly sequential. Turns each component into an
//!   envelope, skips envelopes with nothing to say, and publishes through
//!   the connection registry.
//!
//! Nothing discovered inside a loop stops it; failures are logged with an
//! `error_kind` and counted.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use livefn_core::{ConnId, Dispatch, EventPayload, FunctionTag, HandlerId, ListenerId, Payload};
use parking_lot::Mutex;
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, error};

use crate::component::FnComponent;
use crate::context::{EventDetails, HandleFn, RouteContext};
use crate::errors::{Result, RuntimeError};
use crate::runtime::Runtime;
use crate::websocket::connection::Connection;

/// A decoded inbound envelope and the connection it arrived on.
#[derive(Debug)]
pub struct InboundDispatch {
    /// The envelope.
    pub dispatch: Dispatch,
    /// Receiving connection, when known.
    pub conn: Option<Arc<Connection>>,
}

/// Per-handler counters.
#[derive(Debug, Default)]
pub struct HandlerStats {
    /// Listener callbacks completed.
    pub events_handled: AtomicU64,
    /// Failures logged by either loop.
    pub errors_reported: AtomicU64,
    /// Frames queued on a connection.
    pub frames_published: AtomicU64,
}

impl HandlerStats {
    /// Snapshot of `(events_handled, errors_reported, frames_published)`.
    pub fn snapshot(&self) -> (u64, u64, u64) {
        (
            self.events_handled.load(Ordering::Relaxed),
            self.errors_reported.load(Ordering::Relaxed),
            self.frames_published.load(Ordering::Relaxed),
        )
    }
}

/// Route-scoped router shared by every connection opened on its route.
pub struct Handler {
    id: HandlerId,
    path: String,
    route: HandleFn,
    inbound: mpsc::Sender<InboundDispatch>,
    outbound: mpsc::Sender<FnComponent>,
    /// Loop counters.
    pub stats: HandlerStats,
}

impl Handler {
    /// Create a handler and start its loops on the current tokio runtime,
    /// under the runtime's shutdown coordinator.
    pub fn spawn(runtime: &Runtime, path: impl Into<String>, route: HandleFn) -> Arc<Self> {
        let capacity = runtime.settings().server.channel_capacity;
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity);
        let handler = Arc::new(Self {
            id: HandlerId::new(),
            path: path.into(),
            route,
            inbound: inbound_tx,
            outbound: outbound_tx,
            stats: HandlerStats::default(),
        });

        let tasks = runtime.shutdown();
        let _ = tasks.spawn(run_inbound(
            runtime.clone(),
            Arc::clone(&handler),
            inbound_rx,
        ));
        let _ = tasks.spawn(run_outbound(
            runtime.clone(),
            Arc::clone(&handler),
            outbound_rx,
        ));
        debug!(handler_id = %handler.id, path = %handler.path, "handler started");
        handler
    }

    /// Handler identity.
    pub fn id(&self) -> &HandlerId {
        &self.id
    }

    /// Route path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The route callback producing each connection's initial render.
    pub fn route(&self) -> &HandleFn {
        &self.route
    }

    /// Hand an inbound envelope to the inbound loop.
    pub async fn deliver(&self, item: InboundDispatch) -> Result<()> {
        self.inbound
            .send(item)
            .await
            .map_err(|_| RuntimeError::ChannelClosed("inbound"))
    }

    /// Hand a component to the outbound loop.
    pub async fn submit(&self, component: FnComponent) -> Result<()> {
        self.outbound
            .send(component)
            .await
            .map_err(|_| RuntimeError::ChannelClosed("outbound"))
    }

    /// Send a server ping to `conn`.
    pub fn send_ping(&self, runtime: &Runtime, conn: &Arc<Connection>) -> bool {
        let ping = Dispatch::server_ping(conn.id().clone(), self.id.clone());
        self.publish(runtime, conn, ping)
    }

    fn report(&self, err: &RuntimeError, conn_id: &ConnId) {
        let _ = self.stats.errors_reported.fetch_add(1, Ordering::Relaxed);
        error!(
            handler_id = %self.id,
            conn_id = %conn_id,
            error_kind = err.error_kind(),
            error = %err,
            "dispatch failed"
        );
    }

    // ── inbound ─────────────────────────────────────────────────────────

    async fn route_inbound(
        self: &Arc<Self>,
        runtime: &Runtime,
        permits: &Arc<Semaphore>,
        item: InboundDispatch,
    ) {
        let InboundDispatch { dispatch, conn } = item;
        match dispatch.payload {
            Payload::Ping(ping) if ping.client => {
                if let Some(conn) = &conn {
                    conn.touch();
                }
            }
            Payload::Ping(_) => {
                match conn.or_else(|| runtime.connections().lookup(&dispatch.conn_id)) {
                    Some(conn) => {
                        let _ = self.send_ping(runtime, &conn);
                    }
                    None => self.report(
                        &RuntimeError::ConnectionNotFound(dispatch.conn_id.clone()),
                        &dispatch.conn_id,
                    ),
                }
            }
            Payload::Event(event) => {
                let Ok(permit) = Arc::clone(permits).acquire_owned().await else {
                    return;
                };
                let tasks = runtime.shutdown().clone();
                let handler = Arc::clone(self);
                let runtime = runtime.clone();
                let conn_id = dispatch.conn_id;
                let _ = tasks.spawn(async move {
                    let _permit = permit;
                    handler.handle_event(&runtime, conn_id, conn, event).await;
                });
            }
            Payload::Custom(custom) => {
                debug!(
                    handler_id = %self.id,
                    conn_id = %dispatch.conn_id,
                    function = %custom.function,
                    result = %custom.result,
                    "client function result"
                );
            }
            Payload::Error(err) => {
                self.report(&RuntimeError::ClientReported(err.message), &dispatch.conn_id);
            }
            other => self.report(
                &RuntimeError::UnexpectedFunction {
                    function: other.tag(),
                    direction: "inbound",
                },
                &dispatch.conn_id,
            ),
        }
    }

    async fn handle_event(
        &self,
        runtime: &Runtime,
        conn_id: ConnId,
        conn: Option<Arc<Connection>>,
        event: EventPayload,
    ) {
        let listener_id = ListenerId::from(event.id);
        let Some(listener) = runtime.listeners().get(&listener_id, &conn_id) else {
            self.report(&RuntimeError::ListenerNotFound(listener_id), &conn_id);
            return;
        };

        let ctx = RouteContext::from_origin(runtime.clone(), Arc::clone(&listener.origin));
        let ctx = match conn {
            Some(conn) => ctx.bind_via(conn, self.id.clone()),
            None => ctx.bind_ids(conn_id.clone(), self.id.clone()),
        }
        .with_event(EventDetails {
            listener_id: listener.id.clone(),
            target_id: listener.target_id.clone(),
            on: listener.on.clone(),
            data: event.data,
        });

        debug!(
            handler_id = %self.id,
            conn_id = %conn_id,
            listener_id = %listener.id,
            on = %listener.on,
            "event"
        );
        let response = (listener.handler)(ctx.clone()).await.bound_to(&ctx);
        let _ = self.stats.events_handled.fetch_add(1, Ordering::Relaxed);
        if let Err(err) = self.submit(response).await {
            self.report(&err, &conn_id);
        }
    }

    // ── outbound ────────────────────────────────────────────────────────

    fn route_outbound(&self, runtime: &Runtime, component: FnComponent) {
        let dispatch = component.to_dispatch();
        if nothing_to_publish(&dispatch.payload) {
            debug!(key = %dispatch.key, function = %dispatch.function(), "nothing to publish");
            return;
        }
        if dispatch.function() == FunctionTag::Event {
            self.report(
                &RuntimeError::UnexpectedFunction {
                    function: FunctionTag::Event,
                    direction: "outbound",
                },
                &dispatch.conn_id,
            );
            return;
        }
        let conn = component.context().connection().cloned().or_else(|| {
            component
                .context()
                .conn_id()
                .and_then(|id| runtime.connections().lookup(id))
        });
        let Some(conn) = conn else {
            self.report(
                &RuntimeError::ConnectionNotFound(dispatch.conn_id.clone()),
                &dispatch.conn_id,
            );
            return;
        };
        let _ = self.publish(runtime, &conn, dispatch);
    }

    /// Encode and queue on `conn`. An envelope that fails to encode, or
    /// outgrows the frame limit, is reported and replaced by an error
    /// envelope.
    fn publish(&self, runtime: &Runtime, conn: &Arc<Connection>, dispatch: Dispatch) -> bool {
        let limit = runtime.settings().server.max_message_size;
        let frame = match dispatch.encode_within(limit) {
            Ok(frame) => frame,
            Err(err) => {
                let message = err.to_string();
                self.report(&RuntimeError::from(err), conn.id());
                match dispatch.into_error(message).encode_within(limit) {
                    Ok(frame) => frame,
                    Err(_) => return false,
                }
            }
        };
        let published = runtime.connections().publish(conn, frame);
        if published {
            let _ = self.stats.frames_published.fetch_add(1, Ordering::Relaxed);
        }
        published
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

/// Envelopes that would not change anything on the client.
fn nothing_to_publish(payload: &Payload) -> bool {
    match payload {
        Payload::Render(r) => r.html.is_empty() && !r.remove,
        Payload::Class(c) => c.names.is_empty(),
        Payload::Redirect(r) => r.url.is_empty(),
        Payload::Custom(c) => c.function.is_empty(),
        Payload::Ping(_) | Payload::Event(_) | Payload::Error(_) => false,
    }
}

async fn run_inbound(runtime: Runtime, handler: Arc<Handler>, mut rx: mpsc::Receiver<InboundDispatch>) {
    let shutdown = runtime.shutdown_token();
    let permits = Arc::new(Semaphore::new(
        runtime.settings().server.max_concurrent_dispatch,
    ));
    loop {
        let item = tokio::select! {
            () = shutdown.cancelled() => break,
            item = rx.recv() => match item {
                Some(item) => item,
                None => break,
            },
        };
        handler.route_inbound(&runtime, &permits, item).await;
    }
    debug!(handler_id = %handler.id, "inbound loop stopped");
}

async fn run_outbound(runtime: Runtime, handler: Arc<Handler>, mut rx: mpsc::Receiver<FnComponent>) {
    let shutdown = runtime.shutdown_token();
    loop {
        let component = tokio::select! {
            () = shutdown.cancelled() => break,
            component = rx.recv() => match component {
                Some(component) => component,
                None => break,
            },
        };
        handler.route_outbound(&runtime, component);
    }
    debug!(handler_id = %handler.id, "outbound loop stopped");
}

/// Every handler of a runtime, by identity.
#[derive(Default)]
pub struct HandlerPool {
    handlers: Mutex<HashMap<HandlerId, Arc<Handler>>>,
}

impl HandlerPool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a handler for `path` and register it.
    pub fn create(&self, runtime: &Runtime, path: impl Into<String>, route: HandleFn) -> Arc<Handler> {
        let handler = Handler::spawn(runtime, path, route);
        let _ = self
            .handlers
            .lock()
            .insert(handler.id.clone(), Arc::clone(&handler));
        handler
    }

    /// Look up a handler.
    pub fn get(&self, id: &HandlerId) -> Option<Arc<Handler>> {
        self.handlers.lock().get(id).cloned()
    }

    /// Every registered handler.
    pub fn all(&self) -> Vec<Arc<Handler>> {
        self.handlers.lock().values().cloned().collect()
    }

    /// Number of handlers.
    pub fn len(&self) -> usize {
        self.handlers.lock().len()
    }

    /// Whether the pool is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for HandlerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerPool")
            .field("handlers", &self.len())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{RequestInfo, handle_fn};
    use assert_matches::assert_matches;
    use livefn_core::{ClassPayload, PingPayload};
    use livefn_settings::LiveSettings;
    use livefn_telemetry::capture_logs;
    use serde_json::{Value, json};
    use std::time::Duration;
    use tokio::time::timeout;

    const TIMEOUT: Duration = Duration::from_secs(2);

    struct Fixture {
        runtime: Runtime,
        handler: Arc<Handler>,
        conn: Arc<Connection>,
        rx: mpsc::Receiver<String>,
    }

    fn fixture() -> Fixture {
        fixture_with(LiveSettings::default())
    }

    fn fixture_with(settings: LiveSettings) -> Fixture {
        let runtime = Runtime::new(settings).unwrap();
        let handler = runtime.create_handler(
            "/",
            handle_fn(|ctx| async move { ctx.component().child("<p>home</p>") }),
        );
        let (conn, rx) = runtime
            .connections()
            .register(ConnId::from("c1"), handler.id().clone());
        Fixture {
            runtime,
            handler,
            conn,
            rx,
        }
    }

    impl Fixture {
        fn ctx(&self) -> RouteContext {
            RouteContext::new(self.runtime.clone(), RequestInfo::default())
                .bind(Arc::clone(&self.conn))
        }

        async fn next_frame(&mut self) -> Value {
            let frame = timeout(TIMEOUT, self.rx.recv())
                .await
                .expect("timed out waiting for frame")
                .expect("queue closed");
            serde_json::from_str(&frame).unwrap()
        }

        async fn deliver(&self, payload: Payload) {
            let dispatch = Dispatch::new("k", payload)
                .routed(self.conn.id().clone(), self.handler.id().clone());
            self.handler
                .deliver(InboundDispatch {
                    dispatch,
                    conn: Some(Arc::clone(&self.conn)),
                })
                .await
                .unwrap();
        }

        /// Wait until the loops have drained and nothing else arrives.
        async fn assert_silent(&mut self) {
            tokio::time::sleep(Duration::from_millis(50)).await;
            assert!(self.rx.try_recv().is_err());
        }
    }

    #[tokio::test]
    async fn render_component_is_published() {
        let mut f = fixture();
        f.ctx().component().child("<b>hi</b>").dispatch().await.unwrap();
        let frame = f.next_frame().await;
        assert_eq!(frame["function"], "render");
        assert_eq!(frame["conn_id"], "c1");
        assert!(frame["render"]["html"].as_str().unwrap().contains("<b>hi</b>"));
        assert_eq!(f.handler.stats.snapshot().2, 1);
    }

    #[tokio::test]
    async fn empty_outbound_components_are_skipped() {
        let mut f = fixture();
        let ctx = f.ctx();
        ctx.component().dispatch().await.unwrap();
        ctx.component().with_redirect("").dispatch().await.unwrap();
        ctx.component().js("", Value::Null).dispatch().await.unwrap();
        ctx.add_classes("el", &[]).await.unwrap();
        f.assert_silent().await;
        assert_eq!(f.handler.stats.snapshot(), (0, 0, 0));
    }

    #[tokio::test]
    async fn removal_is_published_without_markup() {
        let mut f = fixture();
        f.ctx().remove_element("row-3").await.unwrap();
        let frame = f.next_frame().await;
        assert_eq!(frame["render"]["remove"], true);
        assert_eq!(frame["render"]["target_id"], "row-3");
    }

    #[tokio::test]
    async fn class_redirect_and_custom_pass_through() {
        let mut f = fixture();
        let ctx = f.ctx();
        ctx.add_classes("el", &["active"]).await.unwrap();
        ctx.redirect("/next").dispatch().await.unwrap();
        ctx.js("focus", json!("#name")).await.unwrap();

        let class = f.next_frame().await;
        assert_eq!(class["function"], "class");
        assert_eq!(class["class"]["names"], json!(["active"]));
        assert_eq!(class["class"]["remove"], false);
        assert_eq!(f.next_frame().await["redirect"]["url"], "/next");
        assert_eq!(f.next_frame().await["custom"]["function"], "focus");
    }

    #[tokio::test]
    async fn plain_ping_gets_server_ping() {
        let mut f = fixture();
        f.deliver(Payload::Ping(PingPayload::default())).await;
        let frame = f.next_frame().await;
        assert_eq!(frame["function"], "ping");
        assert_eq!(frame["ping"]["server"], true);
        assert_eq!(frame["handler_id"], f.handler.id().as_str());
    }

    #[tokio::test(start_paused = true)]
    async fn client_ping_only_touches() {
        let mut f = fixture();
        tokio::time::sleep(Duration::from_secs(30)).await;
        f.deliver(Payload::Ping(PingPayload {
            server: true,
            client: true,
        }))
        .await;
        f.assert_silent().await;
        assert!(f.conn.last_seen_elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn event_runs_listener_and_publishes_response() {
        let mut f = fixture();
        let on_click = handle_fn(|ctx: RouteContext| async move {
            let data: Value = ctx.event_data().unwrap_or_default();
            ctx.component()
                .swap_element_inner("out")
                .child(format!("<i>{}</i>", data["n"]))
        });
        let rendered = f.ctx().component().with_events(&on_click, &["click"]);
        let listener_id = rendered.event_listeners()[0].id.clone();

        f.deliver(Payload::Event(EventPayload {
            id: listener_id,
            target_id: rendered.id().to_owned(),
            on: "click".into(),
            data: json!({"n": 5}),
        }))
        .await;

        let frame = f.next_frame().await;
        assert_eq!(frame["function"], "render");
        assert_eq!(frame["render"]["target_id"], "out");
        assert!(frame["render"]["html"].as_str().unwrap().contains("<i>5</i>"));
        assert_eq!(frame["conn_id"], "c1");
        assert_eq!(frame["handler_id"], f.handler.id().as_str());
        assert_eq!(f.handler.stats.snapshot().0, 1);
    }

    #[tokio::test]
    async fn unknown_listener_is_reported_not_fatal() {
        let (logs, _guard) = capture_logs();
        let mut f = fixture();
        f.deliver(Payload::Event(EventPayload {
            id: "ghost".into(),
            ..EventPayload::default()
        }))
        .await;
        f.assert_silent().await;
        f.deliver(Payload::Ping(PingPayload::default())).await;

        assert_eq!(f.next_frame().await["function"], "ping");
        assert_eq!(f.handler.stats.snapshot().1, 1);
        assert!(logs.has_field("error_kind", "listener_not_found"));
    }

    #[tokio::test]
    async fn unexpected_inbound_tags_are_reported() {
        let mut f = fixture();
        f.deliver(Payload::Class(ClassPayload::default())).await;
        f.deliver(Payload::error("client blew up")).await;
        f.deliver(Payload::Ping(PingPayload::default())).await;
        assert_eq!(f.next_frame().await["function"], "ping");
        assert_eq!(f.handler.stats.snapshot().1, 2);
    }

    #[tokio::test]
    async fn custom_result_is_recorded_silently() {
        let mut f = fixture();
        f.deliver(Payload::Custom(livefn_core::CustomPayload {
            function: "prompt".into(),
            data: Value::Null,
            result: json!("ok"),
        }))
        .await;
        f.assert_silent().await;
        assert_eq!(f.handler.stats.snapshot(), (0, 0, 0));
    }

    #[tokio::test]
    async fn response_after_close_is_dropped() {
        let mut f = fixture();
        let ctx = f.ctx();
        let _ = f.runtime.connections().close(f.conn.id());
        ctx.component().child("late").dispatch().await.unwrap();
        f.assert_silent().await;
        assert_eq!(f.handler.stats.snapshot().2, 0);
    }

    #[tokio::test]
    async fn concurrent_events_both_answer() {
        let mut f = fixture();
        let reply = |tag: &'static str| {
            handle_fn(move |ctx: RouteContext| async move { ctx.component().child(tag) })
        };
        let a = f.ctx().component().with_events(&reply("<a/>"), &["click"]);
        let b = f.ctx().component().with_events(&reply("<b/>"), &["click"]);
        for listener in [&a, &b] {
            f.deliver(Payload::Event(EventPayload {
                id: listener.event_listeners()[0].id.clone(),
                ..EventPayload::default()
            }))
            .await;
        }

        let mut seen = Vec::new();
        for _ in 0..2 {
            seen.push(f.next_frame().await["render"]["html"].as_str().unwrap().to_owned());
        }
        assert!(seen.iter().any(|h| h.contains("<a/>")));
        assert!(seen.iter().any(|h| h.contains("<b/>")));
    }

    #[tokio::test]
    async fn pool_get_and_len() {
        let f = fixture();
        let pool = f.runtime.handlers();
        assert_eq!(pool.len(), 1);
        assert!(pool.get(f.handler.id()).is_some());
        assert!(pool.get(&HandlerId::from("missing")).is_none());
    }

    #[tokio::test]
    async fn loops_stop_on_shutdown() {
        let f = fixture();
        assert_eq!(f.runtime.shutdown().task_count(), 2);
        assert!(f.runtime.shutdown().graceful_shutdown(Vec::new(), TIMEOUT).await);
        assert_eq!(f.runtime.shutdown().task_count(), 0);
        assert_matches!(
            f.ctx().component().child("late").dispatch().await,
            Err(RuntimeError::ChannelClosed("outbound"))
        );
    }

    #[tokio::test]
    async fn event_response_is_routed_through_the_envelope_handler() {
        let mut f = fixture();
        let other = f.runtime.create_handler(
            "/other",
            handle_fn(|ctx| async move { FnComponent::new(ctx) }),
        );
        let on_click = handle_fn(|ctx: RouteContext| async move {
            ctx.component().swap_element_inner("out").child("clicked")
        });
        let rendered = f.ctx().component().with_events(&on_click, &["click"]);
        assert_ne!(f.conn.handler_id(), other.id());

        let dispatch = Dispatch::new(
            "k",
            Payload::Event(EventPayload {
                id: rendered.event_listeners()[0].id.clone(),
                ..EventPayload::default()
            }),
        )
        .routed(f.conn.id().clone(), other.id().clone());
        other
            .deliver(InboundDispatch {
                dispatch,
                conn: Some(Arc::clone(&f.conn)),
            })
            .await
            .unwrap();

        let frame = f.next_frame().await;
        assert_eq!(frame["function"], "render");
        assert_eq!(frame["handler_id"], other.id().as_str());
        assert_eq!(frame["conn_id"], "c1");
        assert_eq!(other.stats.snapshot().0, 1);
        assert_eq!(f.handler.stats.snapshot().0, 0);
    }

    #[tokio::test]
    async fn oversized_frame_is_replaced_by_error_envelope() {
        let mut settings = LiveSettings::default();
        settings.server.max_message_size = 1_024;
        let mut f = fixture_with(settings);

        f.ctx()
            .component()
            .child("x".repeat(4_096))
            .dispatch()
            .await
            .unwrap();

        let frame = f.next_frame().await;
        assert_eq!(frame["function"], "error");
        assert_eq!(frame["conn_id"], "c1");
        assert!(
            frame["error"]["message"]
                .as_str()
                .unwrap()
                .contains("exceeds the 1024 byte frame limit")
        );
        assert_eq!(f.handler.stats.snapshot(), (0, 1, 1));
    }

    #[test]
    fn skip_rules() {
        assert!(nothing_to_publish(&Payload::Render(Default::default())));
        assert!(!nothing_to_publish(&Payload::Render(livefn_core::RenderPayload {
            remove: true,
            ..Default::default()
        })));
        assert!(!nothing_to_publish(&Payload::error("")));
        assert!(!nothing_to_publish(&Payload::Ping(PingPayload::default())));
    }
}
