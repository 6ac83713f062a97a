pub mod config;
pub mod error;
pub mod gateway;
pub mod ids;
pub mod models;
pub mod routes;
pub mod store;

use std::sync::Arc;

use config::Config;
use gateway::broadcaster::Broadcaster;
use gateway::dispatcher::MessageDispatcher;
use gateway::notify::RealtimeNotifier;
use gateway::registry::ConnectionRegistry;
use store::MessageStore;

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<ConnectionRegistry>,
    pub broadcaster: Arc<Broadcaster>,
    pub dispatcher: Arc<MessageDispatcher>,
    pub notifier: Arc<RealtimeNotifier>,
    pub store: Arc<dyn MessageStore>,
}

impl AppState {
    /// Wire the gateway components together. The registry is the single
    /// required dependency everywhere — nothing falls back to ad-hoc maps.
    pub fn new(config: Config, store: Arc<dyn MessageStore>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Arc::new(Broadcaster::new(
            registry.clone(),
            config.fallback_company_scan,
        ));
        let dispatcher = Arc::new(MessageDispatcher::new(
            store.clone(),
            broadcaster.clone(),
            config.max_content_length,
        ));
        let notifier = Arc::new(RealtimeNotifier::new(registry.clone(), broadcaster.clone()));

        Self {
            config: Arc::new(config),
            registry,
            broadcaster,
            dispatcher,
            notifier,
            store,
        }
    }
}
