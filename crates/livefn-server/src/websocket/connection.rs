//! A live duplex session with one client.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use livefn_core::{ConnId, HandlerId};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// One connected client, addressed by its client-chosen [`ConnId`].
///
/// Frames are queued on a bounded channel drained by the session's write
/// loop. Cancelling [`closed`](Self::closed) tears the transport down.
pub struct Connection {
    id: ConnId,
    handler_id: HandlerId,
    tx: mpsc::Sender<String>,
    closed: CancellationToken,
    /// When this connection was established.
    pub connected_at: Instant,
    last_seen: Mutex<Instant>,
    /// Count of frames dropped because the queue was full or closed.
    pub dropped_messages: AtomicU64,
}

impl Connection {
    /// Create a connection around the sending half of its frame queue.
    pub fn new(id: ConnId, handler_id: HandlerId, tx: mpsc::Sender<String>) -> Self {
        let now = Instant::now();
        Self {
            id,
            handler_id,
            tx,
            closed: CancellationToken::new(),
            connected_at: now,
            last_seen: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Connection identity.
    pub fn id(&self) -> &ConnId {
        &self.id
    }

    /// Handler that owns the route this connection was opened on.
    pub fn handler_id(&self) -> &HandlerId {
        &self.handler_id
    }

    /// Queue a frame for the write loop.
    ///
    /// Returns `false` if the queue is full or closed, and increments the
    /// dropped message counter.
    pub fn send(&self, frame: String) -> bool {
        if self.tx.try_send(frame).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Total frames dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Record client activity.
    pub fn touch(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    /// Time since the last client activity (or establishment).
    pub fn last_seen_elapsed(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Token cancelled when the transport must shut.
    pub fn closed(&self) -> &CancellationToken {
        &self.closed
    }

    /// Whether the transport has been told to shut.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("handler_id", &self.handler_id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
