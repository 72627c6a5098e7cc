//! Nika Server
//!
//! Accepts image uploads, extracts their text with OCR in background workers
//! and serves the results over a small JSON API.

use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nika_server::config::Config;
use nika_server::db;
use nika_server::ocr::OcrService;
use nika_server::routes;
use nika_server::state::AppState;
use nika_server::storage::sweep_orphans;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "nika_server=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();

    let config = Config::from_env().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config from env: {}, using defaults", e);
        Config::default()
    });

    tracing::info!("Starting Nika Server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Storage root: {}", config.storage.root.display());
    tracing::info!("OCR providers: {:?}, language: {}", config.ocr.providers, config.ocr.language);

    let db_pool = db::create_pool(&config.database)
        .await
        .context("Failed to initialize database")?;
    tracing::info!("Database initialized at {}", config.database.url);

    let ocr = Arc::new(OcrService::new(&config.ocr));
    let available = ocr.available_providers().await;
    if available.is_empty() {
        tracing::warn!("No OCR provider is reachable; extraction jobs will retry until one is");
    }

    let app_state = AppState::new(config.clone(), db_pool.clone(), ocr)
        .await
        .context("Failed to initialize application state")?;

    if config.storage.sweep_on_start {
        let grace = chrono::Duration::seconds(config.storage.orphan_grace_secs as i64);
        match sweep_orphans(&db_pool, app_state.blobs(), grace).await {
            Ok(0) => {}
            Ok(removed) => tracing::info!("Removed {} orphaned blobs", removed),
            Err(e) => tracing::warn!("Orphan sweep failed: {}", e),
        }
    }

    let app = routes::app(app_state.clone());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Nika Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    app_state.shutdown().await?;
    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}
