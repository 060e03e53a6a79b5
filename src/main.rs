mod alarm;
mod commands;
mod config;
mod db;
mod device;
mod error;
mod hub;
mod ingest;
mod logs;
mod media;
mod normalize;
mod projector;
mod records;
mod relay;
mod store;
mod telemetry;
mod webhook;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use axum::{routing::get, Json, Router};
use serde_json::{json, Value};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::{DefaultOnResponse, TraceLayer};
use tracing::{info, Level};

use config::Config;
use hub::{CommandRelay, IotHubClient};
use store::{PgStore, TelemetryStore};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn TelemetryStore>,
    pub relay: Arc<dyn CommandRelay>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (development); in production the
    // environment is provided by the service manager.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "jimi_gateway=info,tower_http=info".into()),
        )
        .init();

    let config = Config::from_env()?;
    let pool = db::init_pool(&config).await?;
    let relay = IotHubClient::new(&config.hub)?;

    info!(
        hub = %config.hub.base_url,
        domain = %config.server.domain,
        dedup = config.webhook_dedup,
        "Configuration loaded"
    );

    let addr = config.bind_addr.clone();
    let state = AppState {
        config: Arc::new(config),
        store: Arc::new(PgStore::new(pool)),
        relay: Arc::new(relay),
    };

    let app = router(state);

    info!("JIMI gateway listening on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shut down cleanly");
    Ok(())
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/health", get(health))
        .merge(webhook::router())
        .merge(telemetry::router())
        .merge(device::router())
        .merge(media::router())
        .merge(logs::router());

    Router::new()
        .nest("/api", api)
        .layer(RequestBodyLimitLayer::new(state.config.max_body_bytes))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &axum::http::Request<_>| {
                    let client_ip = request
                        .headers()
                        .get("x-forwarded-for")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|s| s.split(',').next())
                        .map(|s| s.trim().to_string())
                        .unwrap_or_else(|| "-".into());
                    tracing::info_span!(
                        "request",
                        method = %request.method(),
                        uri = %request.uri(),
                        client_ip = %client_ip,
                    )
                })
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
