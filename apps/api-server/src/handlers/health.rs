//! Health check endpoint.

use actix_web::{HttpResponse, web};
use serde::Serialize;

use bulwark_infra::resilience::{CircuitSnapshot, CircuitState};

use crate::state::{AppState, Backends};

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub timestamp: String,
    pub backends: Backends,
    pub circuits: Vec<CircuitSnapshot>,
}

/// Health check endpoint - returns server status.
///
/// `degraded` while any circuit is open; still 200 so the instance is not
/// pulled from rotation while it serves from the in-process fallback.
///
/// GET /api/health
pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let circuits = state.errors.circuit_snapshots();
    let degraded = circuits.iter().any(|c| c.state == CircuitState::Open);

    let response = HealthResponse {
        status: if degraded { "degraded" } else { "ok" },
        version: env!("CARGO_PKG_VERSION"),
        timestamp: chrono::Utc::now().to_rfc3339(),
        backends: state.backends.clone(),
        circuits,
    };

    HttpResponse::Ok().json(response)
}
