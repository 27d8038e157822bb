//! # Media Stream Bridge - Main Application Entry Point
//!
//! Relays live telephony audio from Twilio Media Streams WebSocket
//! connections to the Deepgram real-time transcription service.
//!
//! ## Application Architecture:
//! - **config**: configuration loading (TOML file + environment + .env)
//! - **state**: shared application state and bridge metrics
//! - **websocket**: the per-connection stream bridge (the core)
//! - **audio**: media frame decoding and silence suppression
//! - **transcription**: the outbound Deepgram link
//! - **health / handlers / middleware**: thin HTTP management surface
//! - **error**: the bridge error taxonomy

mod audio;         // Frame decoding and filtering (audio/ directory)
mod config;        // Configuration management (config.rs)
mod error;         // Error taxonomy (error.rs)
mod handlers;      // HTTP request handlers (handlers/ directory)
mod health;        // Health and info endpoints (health.rs)
mod middleware;    // Request metrics middleware (middleware/ directory)
mod state;         // Application state management (state.rs)
mod transcription; // Deepgram link (transcription/ directory)
mod websocket;     // Stream bridge actor (websocket.rs)

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use config::AppConfig;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Global shutdown flag, set by the signal handler task.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    // Load environment variables from a .env file, if one exists. This is
    // where DEEPGRAM_API_KEY usually comes from in development.
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting media-stream-bridge v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Listening on http://{}:{} (stream endpoint: ws://{}:{}{})",
        config.server.host,
        config.server.port,
        config.server.host,
        config.server.port,
        config.server.stream_path
    );

    if !config.deepgram.has_credentials() {
        // Startup proceeds regardless; each bridge session will refuse to
        // open its transcription link until a credential is supplied.
        error!(
            "DEEPGRAM_API_KEY is not set — streams will be accepted but not transcribed. \
             Create a .env file with: DEEPGRAM_API_KEY=your_actual_api_key"
        );
    }

    let app_state = AppState::new(config.clone());
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let stream_path = config.server.stream_path.clone();

    setup_signal_handlers();

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(TracingLogger::default())
            .wrap(middleware::MetricsMiddleware)
            // The media stream endpoint (WebSocket upgrade)
            .route(&stream_path, web::get().to(websocket::media_stream))
            // Informational root, matching the original service surface
            .route("/", web::get().to(health::service_info))
            .route("/health", web::get().to(health::health_check))
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/config", web::put().to(handlers::update_config)),
            )
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    // Race the server against the shutdown signal.
    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
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

/// Initialize structured logging.
///
/// `RUST_LOG` controls verbosity; the default keeps this crate at debug and
/// the web framework at info.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "media_stream_bridge=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Listen for SIGTERM/SIGINT and flip the global shutdown flag.
fn setup_signal_handlers() {
    tokio::spawn(async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler");
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .expect("Failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

/// Poll the shutdown flag; returns once shutdown has been requested.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
