//! The runtime handle threaded through every component.

use std::sync::Arc;
use std::time::Instant;

use livefn_cache::CacheService;
use livefn_settings::{LiveSettings, SettingsError};
use tokio_util::sync::CancellationToken;

use crate::context::HandleFn;
use crate::handler::{Handler, HandlerPool};
use crate::health::{self, HealthResponse};
use crate::listeners::ListenerRegistry;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::registry::ConnectionRegistry;

struct RuntimeInner {
    settings: LiveSettings,
    connections: Arc<ConnectionRegistry>,
    handlers: HandlerPool,
    listeners: Arc<ListenerRegistry>,
    cache: Arc<CacheService>,
    shutdown: ShutdownCoordinator,
    started_at: Instant,
}

/// Shared services of one live UI runtime: connection registry, handler
/// pool, listener registry, cache and shutdown coordination.
///
/// Cheap to clone. Build one per process and pass it along; nothing here is
/// a global.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    /// Build the services described by `settings`.
    ///
    /// Settings are validated first; zero capacities or intervals are
    /// rejected rather than reaching the channels and timers built here.
    pub fn new(settings: LiveSettings) -> Result<Self, SettingsError> {
        settings.validate()?;
        let ttl = settings.cache.default_ttl();
        let cache = CacheService::new(ttl);
        let listeners = Arc::new(ListenerRegistry::new());
        let shutdown = ShutdownCoordinator::new();
        let connections = ConnectionRegistry::new(
            Arc::clone(&listeners),
            Arc::clone(&cache),
            ttl,
            settings.server.send_queue_capacity,
            shutdown.clone(),
        );
        Ok(Self {
            inner: Arc::new(RuntimeInner {
                settings,
                connections,
                handlers: HandlerPool::new(),
                listeners,
                cache,
                shutdown,
                started_at: Instant::now(),
            }),
        })
    }

    /// Effective settings.
    pub fn settings(&self) -> &LiveSettings {
        &self.inner.settings
    }

    /// Connection registry.
    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.inner.connections
    }

    /// Handler pool.
    pub fn handlers(&self) -> &HandlerPool {
        &self.inner.handlers
    }

    /// Event listener registry.
    pub fn listeners(&self) -> &Arc<ListenerRegistry> {
        &self.inner.listeners
    }

    /// Cache service.
    pub fn cache(&self) -> &Arc<CacheService> {
        &self.inner.cache
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &ShutdownCoordinator {
        &self.inner.shutdown
    }

    /// Token cancelled when the runtime shuts down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.token()
    }

    /// Start a handler for a route. Must run inside a tokio runtime.
    pub fn create_handler(&self, path: impl Into<String>, route: HandleFn) -> Arc<Handler> {
        self.inner.handlers.create(self, path, route)
    }

    /// Current health snapshot.
    pub fn health(&self) -> HealthResponse {
        health::health_check(
            &self.inner.settings.name,
            self.inner.started_at,
            self.inner.connections.len(),
            self.inner.handlers.len(),
        )
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("connections", &self.inner.connections)
            .field("handlers", &self.inner.handlers)
            .field("shutting_down", &self.inner.shutdown.is_shutting_down())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::FnComponent;
    use crate::context::handle_fn;
    use assert_matches::assert_matches;
    use std::time::Duration;

    #[test]
    fn cache_ttl_comes_from_settings() {
        let mut settings = LiveSettings::default();
        settings.cache.default_ttl_ms = 1_500;
        let rt = Runtime::new(settings).unwrap();
        assert_eq!(rt.cache().default_ttl(), Duration::from_millis(1_500));
    }

    #[test]
    fn clones_share_services() {
        let rt = Runtime::new(LiveSettings::default()).unwrap();
        let other = rt.clone();
        assert!(Arc::ptr_eq(rt.cache(), other.cache()));
        assert!(Arc::ptr_eq(rt.connections(), other.connections()));
        rt.shutdown().shutdown();
        assert!(other.shutdown_token().is_cancelled());
    }

    #[tokio::test]
    async fn health_counts_handlers() {
        let rt = Runtime::new(LiveSettings::default()).unwrap();
        let _ = rt.create_handler("/", handle_fn(|ctx| async move { FnComponent::new(ctx) }));
        let health = rt.health();
        assert_eq!(health.status, "ok");
        assert_eq!(health.name, "livefn");
        assert_eq!(health.handlers, 1);
        assert_eq!(health.connections, 0);
    }

    #[test]
    fn zero_capacities_are_rejected() {
        let mut settings = LiveSettings::default();
        settings.server.channel_capacity = 0;
        assert_matches!(
            Runtime::new(settings),
            Err(SettingsError::Invalid {
                field: "server.channelCapacity",
                ..
            })
        );

        let mut settings = LiveSettings::default();
        settings.server.max_concurrent_dispatch = 0;
        assert_matches!(
            Runtime::new(settings),
            Err(SettingsError::Invalid {
                field: "server.maxConcurrentDispatch",
                ..
            })
        );
    }
}
