//! Duplex session lifecycle: one connected client from upgrade through
//! disconnect.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use livefn_core::{ConnId, Dispatch};
use tracing::{debug, info, instrument, warn};

use super::connection::Connection;
use super::keepalive::run_keepalive;
use crate::context::{RequestInfo, RouteContext};
use crate::handler::{Handler, InboundDispatch};
use crate::runtime::Runtime;

/// Run a session for a freshly upgraded socket.
///
/// 1. Registers the connection, replacing any previous one under `conn_id`
/// 2. Renders the route and queues the result as the first frame
/// 3. Keeps the client alive with server pings
/// 4. Decodes inbound frames and forwards them to their handler
/// 5. Closes the connection when either direction fails or the client leaves
#[instrument(skip_all, fields(conn_id = %conn_id, handler_id = %handler.id()))]
pub async fn run_session(
    socket: WebSocket,
    runtime: Runtime,
    handler: Arc<Handler>,
    conn_id: ConnId,
    request: RequestInfo,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let registry = Arc::clone(runtime.connections());
    let (conn, mut send_rx) = registry.register(conn_id, handler.id().clone());
    info!(path = %request.path, "client connected");

    let writer_conn = Arc::clone(&conn);
    let writer_registry = Arc::clone(&registry);
    let writer = runtime.shutdown().spawn(async move {
        loop {
            tokio::select! {
                () = writer_conn.closed().cancelled() => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
                frame = send_rx.recv() => match frame {
                    Some(text) => {
                        if let Err(e) = ws_tx.send(Message::Text(text.into())).await {
                            warn!(error = %e, "write failed, closing connection");
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
        let _ = writer_registry.close_connection(&writer_conn);
    });

    let keepalive = runtime.shutdown().spawn(run_keepalive(
        runtime.clone(),
        Arc::clone(&handler),
        Arc::clone(&conn),
        runtime.settings().server.keepalive_interval(),
    ));

    let ctx = RouteContext::new(runtime.clone(), request).bind(Arc::clone(&conn));
    let initial = (handler.route())(ctx).await;
    if let Err(e) = handler.submit(initial).await {
        warn!(error = %e, "initial render not queued");
    }

    loop {
        let msg = tokio::select! {
            () = conn.closed().cancelled() => break,
            msg = ws_rx.next() => msg,
        };
        let msg = match msg {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                debug!(error = %e, "read failed");
                break;
            }
            None => break,
        };
        match msg {
            Message::Text(text) => route_frame(&runtime, &handler, &conn, text.as_str()).await,
            Message::Binary(data) => match std::str::from_utf8(&data) {
                Ok(text) => route_frame(&runtime, &handler, &conn, text).await,
                Err(_) => debug!(len = data.len(), "non-UTF8 binary frame ignored"),
            },
            Message::Ping(_) | Message::Pong(_) => conn.touch(),
            Message::Close(_) => {
                info!("client sent close frame");
                break;
            }
        }
    }

    let _ = registry.close_connection(&conn);
    keepalive.abort();
    let _ = writer.await;
    info!(
        age_secs = conn.age().as_secs(),
        dropped = conn.drop_count(),
        "client disconnected"
    );
}

/// Decode one frame and hand it to the handler it names.
///
/// Frames are always attributed to the receiving connection. An empty
/// `handler_id` means the session's own handler. Bad frames and unknown
/// handlers are logged and skipped.
async fn route_frame(runtime: &Runtime, own: &Arc<Handler>, conn: &Arc<Connection>, frame: &str) {
    let mut dispatch = match Dispatch::decode(frame) {
        Ok(dispatch) => dispatch,
        Err(e) => {
            warn!(error_kind = e.error_kind(), error = %e, "malformed frame skipped");
            return;
        }
    };
    conn.touch();
    dispatch.conn_id = conn.id().clone();

    let handler = if dispatch.handler_id.is_empty() || dispatch.handler_id == *own.id() {
        Arc::clone(own)
    } else if let Some(handler) = runtime.handlers().get(&dispatch.handler_id) {
        handler
    } else {
        warn!(target_handler = %dispatch.handler_id, "handler not found, frame skipped");
        return;
    };
    dispatch.handler_id = handler.id().clone();

    let item = InboundDispatch {
        dispatch,
        conn: Some(Arc::clone(conn)),
    };
    if let Err(e) = handler.deliver(item).await {
        warn!(error_kind = e.error_kind(), error = %e, "frame not delivered");
    }
}

#[cfg(test)]
mod tests {
    // Socket-level behaviour is covered end to end in tests/integration.rs.
    use super::*;
    use crate::component::FnComponent;
    use crate::context::handle_fn;
    use livefn_settings::LiveSettings;
    use livefn_telemetry::capture_logs;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn setup() -> (Runtime, Arc<Handler>, Arc<Connection>, mpsc::Receiver<String>) {
        let runtime = Runtime::new(LiveSettings::default()).unwrap();
        let handler =
            runtime.create_handler("/", handle_fn(|ctx| async move { FnComponent::new(ctx) }));
        let (conn, rx) = runtime
            .connections()
            .register(ConnId::from("c1"), handler.id().clone());
        (runtime, handler, conn, rx)
    }

    async fn next_frame(rx: &mut mpsc::Receiver<String>) -> serde_json::Value {
        let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        serde_json::from_str(&frame).unwrap()
    }

    #[tokio::test]
    async fn frame_is_attributed_to_receiving_connection() {
        let (runtime, handler, conn, mut rx) = setup();
        let frame = r#"{"function":"ping","conn_id":"someone-else"}"#;
        route_frame(&runtime, &handler, &conn, frame).await;
        let reply = next_frame(&mut rx).await;
        assert_eq!(reply["conn_id"], "c1");
        assert_eq!(reply["handler_id"], handler.id().as_str());
    }

    #[tokio::test]
    async fn malformed_frame_is_skipped() {
        let (logs, _guard) = capture_logs();
        let (runtime, handler, conn, mut rx) = setup();
        route_frame(&runtime, &handler, &conn, "{nope").await;
        route_frame(&runtime, &handler, &conn, r#"{"function":"teleport"}"#).await;
        route_frame(&runtime, &handler, &conn, r#"{"function":"ping"}"#).await;
        assert_eq!(next_frame(&mut rx).await["function"], "ping");
        assert!(logs.has_field("error_kind", "malformed_envelope"));
        assert!(logs.has_field("error_kind", "unknown_function"));
    }

    #[tokio::test]
    async fn unknown_handler_is_skipped() {
        let (logs, _guard) = capture_logs();
        let (runtime, handler, conn, mut rx) = setup();
        route_frame(
            &runtime,
            &handler,
            &conn,
            r#"{"function":"ping","handler_id":"ghost"}"#,
        )
        .await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
        assert!(logs.has_message("handler not found"));
    }

    #[tokio::test]
    async fn frame_can_target_another_handler() {
        let (runtime, handler, conn, mut rx) = setup();
        let other =
            runtime.create_handler("/other", handle_fn(|ctx| async move { FnComponent::new(ctx) }));
        let frame = format!(r#"{{"function":"ping","handler_id":"{}"}}"#, other.id());
        route_frame(&runtime, &handler, &conn, &frame).await;
        assert_eq!(next_frame(&mut rx).await["handler_id"], other.id().as_str());
    }
}
