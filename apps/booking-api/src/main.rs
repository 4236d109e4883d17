use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use booking_api::config::Config;
use booking_api::db::gateway::{FileGateway, PersistenceGateway};
use booking_api::AppState;

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

    let gateway: Arc<dyn PersistenceGateway> = Arc::new(
        FileGateway::open(&config.data_dir)
            .await
            .expect("failed to open data directory"),
    );

    tracing::info!(data_dir = %config.data_dir.display(), "booking-api configured");

    let state = AppState::init(config, gateway)
        .await
        .expect("failed to load booking store");
    let background = state.spawn_background_tasks();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .merge(booking_api::routes::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "booking-api listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state.clone()))
        .await
        .expect("server error");

    for task in background {
        let _ = task.await;
    }
    tracing::info!("booking-api stopped");
}

/// Resolve on ctrl-c, after closing sessions and flushing the journal so that
/// open WebSocket connections do not hold the server open.
async fn shutdown_signal(state: AppState) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(%err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    if let Err(err) = state.shutdown().await {
        tracing::error!(?err, "failed to flush pending transactions");
    }
}
