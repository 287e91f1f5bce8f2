//! Shutdown of the tasks a runtime owns.
//!
//! Handler loops, event callbacks, keepalives and store-reclamation timers
//! are all spawned through [`ShutdownCoordinator::spawn`], so one call can
//! stop them and wait for them to finish.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

/// Stop signal plus the set of tasks spawned under it.
///
/// Clones share the same signal and task set.
#[derive(Clone, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    tasks: TaskTracker,
}

impl ShutdownCoordinator {
    /// Create a coordinator with no tasks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Token cancelled when shutdown starts. Every runtime-owned loop
    /// selects on it.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Signal shutdown without waiting.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether shutdown was signalled.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Spawn a runtime-owned task on the current tokio runtime.
    pub fn spawn<F>(&self, task: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tasks.spawn(task)
    }

    /// Runtime-owned tasks still running.
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Signal shutdown, then wait up to `timeout` for every runtime-owned
    /// task and for `extra` (such as the HTTP server task).
    ///
    /// Returns `false` if the timeout elapsed first.
    pub async fn graceful_shutdown(&self, extra: Vec<JoinHandle<()>>, timeout: Duration) -> bool {
        self.shutdown();
        let _ = self.tasks.close();
        info!(
            owned = self.tasks.len(),
            extra = extra.len(),
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            "waiting for tasks to stop"
        );
        let drain = async {
            let _ = futures::future::join_all(extra).await;
            self.tasks.wait().await;
        };
        let finished = tokio::time::timeout(timeout, drain).await.is_ok();
        if !finished {
            warn!(
                remaining = self.tasks.len(),
                "shutdown timed out after {timeout:?}"
            );
        }
        finished
    }
}

impl std::fmt::Debug for ShutdownCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownCoordinator")
            .field("shutting_down", &self.is_shutting_down())
            .field("tasks", &self.tasks.len())
            .finish()
    }
}
