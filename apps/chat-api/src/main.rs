use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chat_api::config::Config;
use chat_api::gateway::server::announce_departure;
use chat_api::store::{MemoryMessageStore, MessageStore};
use chat_api::AppState;

#[tokio::main]
async fn main() {
    // Load .env file (silently skip if missing — env vars may be set externally)
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let port = config.port;

    // In-memory store for single-process deployments. The business backend's
    // message collection plugs in behind the same trait.
    let store: Arc<dyn MessageStore> = Arc::new(MemoryMessageStore::new());

    let state = AppState::new(config, store);

    tracing::info!(
        sweep_interval_secs = state.config.idle_sweep_interval_secs,
        idle_timeout_secs = state.config.idle_timeout_secs,
        fallback_company_scan = state.config.fallback_company_scan,
        "chat-api configured"
    );

    // Idle sweep: reclaim sessions from crashed or partitioned clients.
    let sweep_state = state.clone();
    tokio::spawn(async move {
        let interval = Duration::from_secs(sweep_state.config.idle_sweep_interval_secs);
        let max_idle = Duration::from_secs(sweep_state.config.idle_timeout_secs);
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // First tick fires immediately; skip it.
        loop {
            ticker.tick().await;
            let evicted = sweep_state.registry.sweep_idle(max_idle);
            if !evicted.is_empty() {
                tracing::info!(count = evicted.len(), "idle sweep evicted sessions");
            }
            for removed in &evicted {
                announce_departure(&sweep_state, removed);
            }
        }
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .merge(chat_api::routes::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "chat-api listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");
    axum::serve(listener, app).await.expect("server error");
}
