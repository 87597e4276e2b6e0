//! # Voice Session Client - Main Application Entry Point
//!
//! Runs one real-time voice conversation with a remote agent: the microphone is
//! streamed out, synthesized speech streamed back is played, and the connection state
//! is exposed on a small local HTTP control surface.
//!
//! ## Key Rust Concepts Used:
//! - **async/await**: Transport, session and HTTP server all run on the tokio runtime
//! - **Channels**: The session controller is reached through message passing, not locks
//! - **Arc & RwLock**: Configuration shared between handlers and the controller
//! - **Traits**: Audio devices and the transport sit behind traits so tests can swap them
//!
//! ## Application Architecture:
//! - **config**: Layered configuration (defaults, config.toml, environment)
//! - **audio**: Capture, playback and payload decoding
//! - **transport**: Reconnectable WebSocket channel and the HTTP health probe
//! - **session**: The session state machine and its handle
//! - **status**: Display projection of the session status
//! - **state / middleware / handlers / health**: The local control surface
//! - **error**: Session and HTTP error types

mod audio;
mod config;
mod device;
mod error;
mod handlers;
mod health;
mod middleware;
mod session;
mod state;
mod status;
mod transport;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use config::AppConfig;
use session::controller::SessionController;
use session::{SessionHandle, SessionMetrics};
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transport::websocket::WebSocketConnector;

/// Set once SIGINT/SIGTERM arrives. Polled by `wait_for_shutdown`.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

/// The main application entry point.
///
/// ## What this function does:
/// 1. **Loads configuration** from files and environment variables
/// 2. **Sets up logging**
/// 3. **Spawns the session controller** with the WebSocket connector and audio backend
/// 4. **Probes the remote** once, for the logs only
/// 5. **Serves the control surface** until a shutdown signal arrives
/// 6. **Stops the session** (implicit stop) before the process exits
#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting voice-session-client v{}", env!("CARGO_PKG_VERSION"));
    info!(
        control = %format!("{}:{}", config.server.host, config.server.port),
        remote = %config.remote.socket_url(),
        "Configuration loaded"
    );

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let probe_target = (config.remote.health_url(), config.remote.probe_timeout());
    let shared_config = Arc::new(RwLock::new(config));

    let backend = audio::default_backend();
    let backend_name = backend.name();
    let session_metrics = Arc::new(SessionMetrics::default());
    let (session, controller) = SessionController::new(
        shared_config.clone(),
        Arc::new(WebSocketConnector::new()),
        backend,
        session_metrics.clone(),
    );
    let controller_task = tokio::spawn(controller.run());

    // Diagnostics only: never gates a session start
    tokio::spawn(async move {
        let (url, timeout) = probe_target;
        let report = transport::probe::probe(&url, timeout).await;
        if report.healthy {
            info!(url = %report.url, latency_ms = report.latency_ms, "Remote voice agent is healthy");
        } else {
            warn!(
                url = %report.url,
                reachable = report.reachable,
                status_code = ?report.status_code,
                error = ?report.error,
                "Remote voice agent health check did not pass"
            );
        }
    });

    let app_state = AppState::new(shared_config, session.clone(), session_metrics, backend_name);

    setup_signal_handlers();

    info!("Starting control surface on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            // Middleware runs in reverse order of registration for responses
            .wrap(cors)
            .wrap(TracingLogger::default())
            .wrap(
                middleware::RequestLogging::new()
                    .quiet("/session/status")
                    .quiet("/session/events"),
            )
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/config", web::put().to(handlers::update_config))
                    .route("/session/start", web::post().to(handlers::start_session))
                    .route("/session/stop", web::post().to(handlers::stop_session))
                    .route("/session/status", web::get().to(handlers::session_status))
                    .route("/session/events", web::get().to(handlers::session_events))
                    .route("/remote/health", web::get().to(handlers::remote_health))
                    .route("/devices", web::get().to(handlers::list_devices)),
            )
            .route("/health", web::get().to(health::health_check))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping session and server...");
            server_handle.stop(true).await;
        }
    }

    shutdown_session(&session).await;
    if let Err(e) = controller_task.await {
        warn!("Session controller task ended abnormally: {}", e);
    }

    info!("Stopped gracefully");
    Ok(())
}

/// Initialize tracing.
///
/// ## Environment Variables:
/// - `RUST_LOG`: Controls what gets logged (e.g., "debug", "voice_session_client=trace")
/// - If not set, defaults to "voice_session_client=debug,actix_web=info"
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voice_session_client=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Process teardown counts as an implicit user stop.
async fn shutdown_session(session: &SessionHandle) {
    match session.shutdown().await {
        Ok(snapshot) => info!(status = snapshot.status.as_str(), "Voice session shut down"),
        Err(e) => warn!("Voice session shutdown skipped: {}", e),
    }
}

/// Listen for SIGTERM and SIGINT and raise the shutdown flag on the first one.
///
/// If a handler cannot be installed we log it and keep running: the process can
/// still be stopped, just not gracefully.
fn setup_signal_handlers() {
    tokio::spawn(async {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let (mut sigterm, mut sigint) = match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                (Err(e), _) | (_, Err(e)) => {
                    error!("Failed to install signal handlers: {}", e);
                    return;
                }
            };

            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM"),
                _ = sigint.recv() => info!("Received SIGINT"),
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
                return;
            }
            info!("Received Ctrl+C");
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

/// Poll the shutdown flag every 100ms.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
