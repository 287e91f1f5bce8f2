//! Duplex sessions: connections, the connection registry, keepalive and the
//! per-socket read/write loops.

pub mod connection;
pub mod keepalive;
pub mod registry;
pub mod session;
