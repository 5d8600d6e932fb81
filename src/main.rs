use agricart_api::{
    app,
    config::{init_tracing, load_config},
    db::establish_connection,
    events::{process_events, EventSender},
    notifications::NotificationHub,
    AppState,
};
use anyhow::Context;
use axum::http::{HeaderValue, Method};
use std::sync::Arc;
use tokio::{net::TcpListener, signal, sync::mpsc};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

const EVENT_QUEUE_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config().context("failed to load configuration")?;
    init_tracing(config.log_level(), config.log_json);

    let db = Arc::new(
        establish_connection(&config)
            .await
            .context("failed to connect to the database")?,
    );

    let hub = Arc::new(NotificationHub::new());
    let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    tokio::spawn(process_events(event_rx, hub.clone()));

    let cors = cors_layer(config.cors_allowed_origins.as_deref());
    let addr = format!("{}:{}", config.host, config.port);

    let state = AppState::new(db, Arc::new(config), EventSender::new(event_tx), hub);
    let router = app(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(%addr, "AgriCart API listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Shutdown complete");
    Ok(())
}

fn cors_layer(allowed_origins: Option<&str>) -> CorsLayer {
    let methods = [
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::DELETE,
        Method::OPTIONS,
    ];
    match allowed_origins {
        Some(origins) if !origins.trim().is_empty() => {
            let parsed: Vec<HeaderValue> = origins
                .split(',')
                .filter_map(|o| {
                    let trimmed = o.trim();
                    match trimmed.parse() {
                        Ok(value) => Some(value),
                        Err(_) => {
                            warn!(origin = trimmed, "Ignoring unparseable CORS origin");
                            None
                        }
                    }
                })
                .collect();
            CorsLayer::new()
                .allow_origin(parsed)
                .allow_methods(methods)
                .allow_headers(Any)
        }
        _ => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(methods)
            .allow_headers(Any),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to listen for ctrl-c");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received ctrl-c, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
