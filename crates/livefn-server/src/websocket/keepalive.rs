//! Server-initiated keepalive pings.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, MissedTickBehavior};
use tracing::debug;

use super::connection::Connection;
use crate::handler::Handler;
use crate::runtime::Runtime;

/// Why the keepalive loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepaliveResult {
    /// The identity now maps to another connection, or to none.
    Replaced,
    /// The connection was told to shut.
    Closed,
    /// The runtime is shutting down.
    Cancelled,
}

/// Ping `conn` every `interval` for as long as the registry still maps its
/// identity to this same connection.
pub async fn run_keepalive(
    runtime: Runtime,
    handler: Arc<Handler>,
    conn: Arc<Connection>,
    interval: Duration,
) -> KeepaliveResult {
    let shutdown = runtime.shutdown_token();
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Skip the immediate first tick
    let _ = ticker.tick().await;

    let result = loop {
        tokio::select! {
            () = conn.closed().cancelled() => break KeepaliveResult::Closed,
            () = shutdown.cancelled() => break KeepaliveResult::Cancelled,
            _ = ticker.tick() => {
                if !runtime.connections().is_current(&conn) {
                    break KeepaliveResult::Replaced;
                }
                let _ = handler.send_ping(&runtime, &conn);
            }
        }
    };
    debug!(conn_id = %conn.id(), ?result, "keepalive stopped");
    result
}
