mod config;
mod error;
mod gemini;
mod intake;
mod lifecycle;
mod models;
mod presentation;
mod routes;
mod session;
mod style;

use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

use crate::{config::Config, gemini::GeminiClient, routes::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Init tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let config = Config::from_env();
    if config.is_demo() {
        tracing::warn!("GEMINI_API_KEY not set - running in demo mode with placeholder images");
    } else {
        tracing::info!("Using API key: {}...", config.key_preview());
    }
    match config.generation_timeout {
        Some(limit) => tracing::info!("Generation timeout: {}s", limit.as_secs()),
        None => tracing::info!("Generation timeout: none"),
    }

    let port = config.port;
    let session_idle = config.session_idle;
    let gemini = Arc::new(GeminiClient::new(&config));
    let state = AppState::new(config, gemini);
    if let Some(idle) = session_idle {
        tracing::info!("Idle sessions expire after {}s", idle.as_secs());
        state.spawn_idle_sweeper(idle);
    }
    let app = routes::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "Starting server");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
