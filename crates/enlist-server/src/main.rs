use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use enlist_core::pool::WorkerPool;
use enlist_server::config::ServerConfig;
use enlist_server::routes;
use enlist_server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("enlist=info".parse()?))
        .with_target(false)
        .init();

    let config = ServerConfig::from_env().context("Failed to load server configuration")?;
    let addr = format!("0.0.0.0:{}", config.port);

    let state = Arc::new(AppState {
        pool: WorkerPool::new(&config.engine),
        api_key: config.api_key,
        default_gateway: config.default_gateway,
        gateway: config.gateway,
    });

    let app = routes::router(state.clone())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    tracing::info!("Starting server on {addr}");
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.pool.shutdown().await;
    tracing::info!("Workers disconnected");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
