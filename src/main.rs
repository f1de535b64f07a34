//! # Audio Relay Backend - Main Application Entry Point
//!
//! This is the main entry point for the audio-relay party game server.
//! Players gather in a room, the host starts a timed sequence of rounds, and in
//! each round every player answers the reversed recording another player made in
//! the round before. When all rounds are over everyone gets the full playback
//! summary.
//!
//! ## Key Rust Concepts Used:
//! - **async/await**: Every connection is an async task on the Tokio runtime
//! - **modules**: Code is organized into separate modules (mod statements)
//! - **Result<T, E>**: Error handling using Rust's Result type
//! - **Arc & RwLock**: Thread-safe shared state management
//!
//! ## Application Architecture:
//! - **config**: Handles application configuration (TOML files + environment variables)
//! - **state**: Shared application state, metrics and game services
//! - **store / events**: Shared record store and per-key change subscriptions
//! - **game**: Rooms, games, the round scheduler and the seat rotation
//! - **audio**: Recording reversal and storage
//! - **protocol / session / websocket**: The `/game/` WebSocket protocol
//! - **health / handlers**: HTTP endpoints
//! - **error**: Custom error types and HTTP error responses

// Module declarations - These tell Rust about our other source files
mod audio; // Recording codec, blob storage and the round vault (audio/ directory)
mod config; // Configuration management (config.rs)
mod error; // Error handling types (error.rs)
mod events; // Change subscriptions over the store (events.rs)
mod game; // Rooms, games and round timing (game/ directory)
mod handlers; // HTTP request handlers (handlers/ directory)
mod health; // Health check endpoints (health.rs)
mod protocol; // WebSocket message types (protocol.rs)
mod session; // Per-connection protocol state machine (session.rs)
mod state; // Application state management (state.rs)
mod store; // Shared versioned key-value store (store.rs)
mod websocket; // WebSocket transport actor (websocket.rs)

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use crate::config::AppConfig;
use state::AppState;
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// The main application entry point.
///
/// ## What this function does:
/// 1. **Loads configuration** from files and environment variables
/// 2. **Sets up logging** for debugging and monitoring
/// 3. **Creates shared application state** with the game services
/// 4. **Configures the HTTP server** with middleware and routes
/// 5. **Handles graceful shutdown** when receiving system signals
///
/// ## Error Handling:
/// If any step fails (config loading, server binding, etc.), the function returns an error
/// and the program exits with an error message.
#[actix_web::main]
async fn main() -> Result<()> {
    // .ok() means "ignore errors" - it's fine if there's no .env file
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);
    info!(
        round_duration_secs = config.game.round_duration_secs,
        files_dir = %config.storage.files_dir,
        max_sessions = config.performance.max_concurrent_sessions,
        "Game settings"
    );

    let app_state = AppState::new(config.clone());
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        // The web client is served from a different origin
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            // Middleware executes in reverse order for responses
            .wrap(cors)
            .wrap(TracingLogger::default())
            .route("/game/", web::get().to(websocket::game_websocket))
            .route("/reverse/", web::post().to(handlers::reverse_audio))
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/config", web::put().to(handlers::update_config)),
            )
            // Also provide health check at root level for convenience
            .route("/health", web::get().to(health::health_check))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    // Whichever finishes first wins: the server (usually an error) or a signal
    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize the tracing (logging) system for the application.
///
/// ## Environment Variables:
/// - `RUST_LOG`: Controls what gets logged (e.g., "debug", "audio_relay_backend=trace")
/// - If not set, defaults to "audio_relay_backend=debug,actix_web=info"
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "audio_relay_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Resolve once SIGTERM or SIGINT (Ctrl+C) arrives.
///
/// ## Why this matters:
/// Graceful shutdown lets open connections finish their teardown (leaving rooms,
/// ending games they own) instead of being cut off mid-message.
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                    _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
                }
                return;
            }
            Err(e) => warn!("Failed to install SIGTERM handler: {}", e),
        }
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received SIGINT"),
        Err(e) => {
            // Without any signal handler the server runs until it fails on its own.
            error!("Failed to install SIGINT handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
