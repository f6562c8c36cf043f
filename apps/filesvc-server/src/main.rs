//! File Service Server
//!
//! Accepts single-shot and resumable uploads, deduplicates by SHA-256, and
//! serves stored files with HTTP range support.

use std::net::SocketAddr;

use anyhow::Context;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use filesvc_server::config::Config;
use filesvc_server::db;
use filesvc_server::routes;
use filesvc_server::state::AppState;
use filesvc_server::upload::spawn_sweeper;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "filesvc_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();

    let config = Config::from_env().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config from env: {}, using defaults", e);
        Config::default()
    });

    tracing::info!("Starting File Service v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Storage directory: {}", config.storage.storage_dir.display());
    tracing::info!("Temp directory: {}", config.storage.tmp_dir.display());
    tracing::info!("Name collision policy: {:?}", config.storage.on_collision);

    // Initialize database
    let db_pool = db::create_pool(&config.database.url)
        .await
        .context("Failed to initialize database")?;
    match db::ping(&db_pool).await {
        Ok(()) => tracing::info!("Database connected at {}", config.database.url),
        Err(e) => tracing::warn!("Database ping failed: {}", e),
    }

    // Create application state
    let app_state = AppState::new(config.clone(), db_pool);
    app_state
        .layout()
        .ensure_dirs()
        .await
        .context("Failed to create storage directories")?;

    let _sweeper = spawn_sweeper(app_state.uploads().clone(), config.upload.session_ttl_hours);

    if let Err(e) = app_state.remux().ensure_available().await {
        tracing::warn!("Remux endpoint unavailable: {}", e);
    }

    let app = routes::router(app_state);

    // Start server with graceful shutdown
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid listen address")?;
    tracing::info!("File Service listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
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
