//! `LiveServer`: axum routes, the upgrade endpoint and `/health`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::{StatusCode, Uri};
use axum::response::{Html as HtmlResponse, IntoResponse, Json, Response};
use axum::routing::get;
use livefn_core::ConnId;
use livefn_settings::{LiveSettings, SettingsError};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::context::{HandleFn, RequestInfo, RouteContext};
use crate::errors::RuntimeError;
use crate::handler::Handler;
use crate::health::HealthResponse;
use crate::runtime::Runtime;
use crate::websocket::session::run_session;

/// State of one route's axum handler.
#[derive(Clone)]
struct RouteState {
    runtime: Runtime,
    handler: Arc<Handler>,
}

/// A live UI server: a [`Runtime`] plus the routes mounted on it.
pub struct LiveServer {
    runtime: Runtime,
    routes: Vec<(String, Arc<Handler>)>,
}

impl LiveServer {
    /// Create a server from validated settings. Routes must be mounted
    /// inside a tokio runtime, since every route starts a handler.
    pub fn new(settings: LiveSettings) -> Result<Self, SettingsError> {
        Ok(Self {
            runtime: Runtime::new(settings)?,
            routes: Vec::new(),
        })
    }

    /// The runtime shared by every route.
    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Mount `route` at `path`, with its own handler.
    #[must_use]
    pub fn route(mut self, path: &str, route: HandleFn) -> Self {
        let handler = self.runtime.create_handler(path, route);
        info!(path, handler_id = %handler.id(), "route mounted");
        self.routes.push((path.to_owned(), handler));
        self
    }

    /// The handler mounted at `path`.
    pub fn handler_for(&self, path: &str) -> Option<&Arc<Handler>> {
        self.routes
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, handler)| handler)
    }

    /// Build the axum router with every mounted route plus `/health`.
    pub fn router(&self) -> Router {
        let mut router = Router::new()
            .route("/health", get(health_handler))
            .with_state(self.runtime.clone());
        for (path, handler) in &self.routes {
            let state = RouteState {
                runtime: self.runtime.clone(),
                handler: Arc::clone(handler),
            };
            router = router.merge(Router::new().route(path, get(live_route)).with_state(state));
        }
        router
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// Returns the bound address (useful with port 0) and the server task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let server = &self.runtime.settings().server;
        let listener = TcpListener::bind((server.host.as_str(), server.port)).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let token = self.runtime.shutdown_token();
        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await });
            if let Err(e) = serve.await {
                error!(error = %e, "server error");
            }
        });
        info!(%addr, "listening");
        Ok((addr, handle))
    }

    /// Close every connection, then stop every runtime-owned task (handler
    /// loops, event callbacks, keepalives, reclamation timers) and wait for
    /// them and `extra`, up to the configured shutdown timeout.
    ///
    /// Returns `false` if the timeout elapsed first.
    pub async fn shutdown(&self, extra: Vec<JoinHandle<()>>) -> bool {
        let closed = self.runtime.connections().close_all();
        info!(
            connections = closed,
            handlers = self.runtime.handlers().len(),
            "shutting down"
        );
        self.runtime
            .shutdown()
            .graceful_shutdown(extra, self.runtime.settings().server.shutdown_timeout())
            .await
    }
}

impl std::fmt::Debug for LiveServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveServer")
            .field("routes", &self.routes.iter().map(|(p, _)| p).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// GET /health
async fn health_handler(State(runtime): State<Runtime>) -> Json<HealthResponse> {
    Json(runtime.health())
}

/// GET on a mounted route.
///
/// Without a session identity in the query the route renders once as plain
/// HTML. With one, the request must be a socket upgrade.
async fn live_route(
    State(state): State<RouteState>,
    Query(query): Query<HashMap<String, String>>,
    uri: Uri,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let param = &state.runtime.settings().server.session_param;
    let conn_id = query.get(param).filter(|id| !id.is_empty()).cloned();
    let request = RequestInfo {
        path: uri.path().to_owned(),
        query,
    };

    let Some(conn_id) = conn_id else {
        let ctx = RouteContext::new(state.runtime.clone(), request);
        let component = (state.handler.route())(ctx).await;
        return HtmlResponse(component.render_markup()).into_response();
    };

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            warn!(conn_id = %conn_id, error = %rejection, "upgrade failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                RuntimeError::ConnectionFailed.to_string(),
            )
                .into_response();
        }
    };

    let max_message_size = state.runtime.settings().server.max_message_size;
    ws.max_message_size(max_message_size)
        .on_upgrade(move |socket| {
            run_session(
                socket,
                state.runtime,
                state.handler,
                ConnId::from(conn_id),
                request,
            )
        })
        .into_response()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
