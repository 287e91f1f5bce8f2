//! # livefn-server
//!
//! The live UI runtime: server-rendered fragments pushed to browsers over a
//! persistent socket, and browser events routed back to server callbacks.
//!
//! - [`ConnectionRegistry`]: one live connection per client identity, with
//!   grace-period reclamation of the client's cache store after it leaves
//! - [`HandlerPool`]: one [`Handler`] per route, each running an inbound
//!   and an outbound dispatch loop
//! - [`ListenerRegistry`]: per-connection event listeners
//! - [`FnComponent`] and [`RouteContext`]: what route and event callbacks
//!   receive and return
//! - [`LiveServer`]: axum routes, the upgrade endpoint, `/health`, graceful
//!   shutdown

#![deny(unsafe_code)]

pub mod component;
pub mod context;
pub mod errors;
pub mod handler;
pub mod health;
pub mod listeners;
pub mod runtime;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use component::{Component, FnComponent, Html, sanitize_html};
pub use context::{EventDetails, HandleFn, RequestInfo, RouteContext, handle_fn};
pub use errors::{Result, RuntimeError};
pub use handler::{Handler, HandlerPool, HandlerStats, InboundDispatch};
pub use health::HealthResponse;
pub use listeners::{EventListener, ListenerRegistry};
pub use runtime::Runtime;
pub use server::LiveServer;
pub use shutdown::ShutdownCoordinator;
pub use websocket::connection::Connection;
pub use websocket::keepalive::KeepaliveResult;
pub use websocket::registry::ConnectionRegistry;
