//! # Bulwark API Server
//!
//! Actix-web server with the request-defense pipeline in front of a small
//! auth and API-key surface.

use actix_web::HttpServer;

mod app;
mod background;
mod config;
mod error;
mod handlers;
mod middleware;
mod observability;
mod state;
mod telemetry;

use background::Maintenance;
use config::AppConfig;
use state::AppState;
use telemetry::TelemetryConfig;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    telemetry::init_telemetry(&TelemetryConfig::from_env());

    let config = AppConfig::from_env()?;

    tracing::info!(
        environment = ?config.environment(),
        "Starting Bulwark API Server on {}:{}",
        config.host,
        config.port
    );

    let state = AppState::new(&config).await?;
    let maintenance =
        Maintenance::start(state.clone(), config.security.rate_limit.cleanup_interval).await;

    let result = HttpServer::new(move || app::build_app(state.clone()))
        .bind((config.host.as_str(), config.port))?
        .run()
        .await;

    maintenance.shutdown().await;
    tracing::info!("Server stopped");

    result.map_err(Into::into)
}
