use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use notify_api::config::Config;
use notify_api::gateway::fanout::{ChannelLayer, MemoryChannelLayer};
use notify_api::gateway::redis_layer::RedisChannelLayer;
use notify_api::AppState;

#[tokio::main]
async fn main() {
    // Load .env file (silently skip if missing; env vars may be set externally)
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

    let channels: Arc<dyn ChannelLayer> = match &config.redis_url {
        Some(url) => Arc::new(
            RedisChannelLayer::connect(url, &config.redis_channel_prefix)
                .await
                .expect("failed to connect to redis"),
        ),
        None => {
            tracing::info!("REDIS_URL not set, using in-process channel layer");
            Arc::new(MemoryChannelLayer::new())
        }
    };

    tracing::info!(
        failure_limit = config.delivery_failure_limit,
        inbox_capacity = config.inbox_capacity,
        "notify-api configured"
    );

    let state = AppState::new(channels, config);
    let shutdown = state.shutdown.clone();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .merge(notify_api::routes::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "notify-api listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested, closing websocket connections");
            shutdown.send_replace(true);
        })
        .await
        .expect("server error");
}
