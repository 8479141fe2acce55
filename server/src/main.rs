//! Feedgate Server - Main entry point.
//!
//! This binary starts the Feedgate dashboard server with:
//! - Structured JSON logging for production
//! - Graceful shutdown handling (SIGTERM/SIGINT)
//! - Background session sweep
//!
//! # Configuration
//!
//! See [`feedgate_server::config`] for environment variable configuration.
//!
//! # Example
//!
//! ```bash
//! DASHBOARD_USERNAME=operator \
//! DASHBOARD_PASSWORD="correct horse" \
//! DASHBOARD_API_KEY="script-key" \
//! PORT=3000 \
//! cargo run --release --bin feedgate-server
//! ```

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use feedgate_server::config::Config;
use feedgate_server::routes::{create_router, AppState};
use feedgate_server::session::SessionStore;
use feedgate_server::store::SqliteMessageStore;

/// Interval between sweeps of expired sessions (5 minutes).
const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "Failed to load configuration");
            eprintln!("Error: {err}");
            eprintln!();
            eprintln!("Optional environment variables:");
            eprintln!("  DASHBOARD_USERNAME - Login username (default: admin)");
            eprintln!("  DASHBOARD_PASSWORD - Login password (default: admin)");
            eprintln!("  DASHBOARD_API_KEY  - Enables X-API-Key auth on API endpoints");
            eprintln!("  PORT               - HTTP server port (default: 3000)");
            eprintln!("  DB_PATH            - SQLite database (default: $DATA_DIR/messages.db)");
            eprintln!("  DATA_DIR           - Data directory (default: data)");
            eprintln!("  PUBLIC_DIR         - Static assets and pages (default: public)");
            eprintln!("  RUST_LOG           - Log level filter (default: info)");
            return ExitCode::from(1);
        }
    };

    match run(config).await {
        Ok(()) => {
            info!("Server shutdown complete");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(error = ?err, "Server failed");
            ExitCode::from(1)
        }
    }
}

/// Opens the store, starts background tasks, and serves until shutdown.
async fn run(config: Config) -> anyhow::Result<()> {
    info!(
        port = config.port,
        username = %config.credentials.username(),
        api_key_enabled = config.credentials.api_key_enabled(),
        db_path = %config.db_path.display(),
        public_dir = %config.public_dir.display(),
        "Feedgate server starting"
    );

    let store = SqliteMessageStore::open(&config.db_path)
        .await
        .with_context(|| format!("failed to open message store at {}", config.db_path.display()))?;
    let store = Arc::new(store);

    let port = config.port;
    let state = AppState::new(config, store.clone());

    let sweep_handle =
        SessionStore::spawn_sweep_task(Arc::clone(state.sessions()), SESSION_SWEEP_INTERVAL);
    info!(
        interval_secs = SESSION_SWEEP_INTERVAL.as_secs(),
        "Session sweep task started"
    );

    let app = create_router(state);

    let bind_addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind to {bind_addr}"))?;
    info!(port, address = %bind_addr, "Server listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error");

    info!("Server shutting down gracefully");

    sweep_handle.abort();
    store.close().await;
    info!("Message store closed");

    served
}

/// Initialize structured logging with tracing.
///
/// JSON output, filtered by `RUST_LOG` (default `info`).
fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug,axum::rejection=trace"));

    let json_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_level(true)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .init();
}

/// Resolves when SIGINT or SIGTERM is received.
///
/// If a handler cannot be installed the error is logged and that signal is
/// never observed.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
