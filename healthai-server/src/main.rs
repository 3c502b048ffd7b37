//! `HealthAI` server: room chat relay, model store and health endpoints.
//!
//! An axum server that relays chat events between clients in the same room
//! over WebSocket (`/ws`) and stores uploaded model files on local disk.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:5000
//! cargo run --bin healthai-server
//!
//! # Run on custom address
//! cargo run --bin healthai-server -- --bind 127.0.0.1:8080
//!
//! # Or via the platform-provided port
//! PORT=8080 cargo run --bin healthai-server
//! ```

use clap::Parser;
use healthai_server::config::{ServerCliArgs, ServerConfig};
use healthai_server::server::{self, AppState};

#[tokio::main]
async fn main() {
    let cli = ServerCliArgs::parse();

    // Load config from CLI args + config file + env vars + defaults.
    let config = match ServerConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    // Initialize tracing with the resolved log level.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(
        addr = %config.bind_addr,
        model_dir = %config.model_dir.display(),
        origins = ?config.allowed_origins,
        "starting healthai server"
    );

    let state = match AppState::from_config(&config).await {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to open model store");
            std::process::exit(1);
        }
    };
    let relay = std::sync::Arc::clone(&state.relay);

    match server::start_server_with_state(&config, state).await {
        Ok((bound_addr, mut handle)) => {
            tracing::info!(addr = %bound_addr, "server listening");
            tokio::select! {
                result = &mut handle => {
                    if let Err(e) = result {
                        tracing::error!(error = %e, "server task failed");
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("shutdown requested, closing connections");
                    relay.close_all_connections().await;
                    handle.abort();
                }
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start server");
            std::process::exit(1);
        }
    }
}
