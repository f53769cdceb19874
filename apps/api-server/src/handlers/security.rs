//! Operator view over the defense components.

use actix_web::{HttpResponse, web};
use serde::Serialize;

use bulwark_core::AppError;
use bulwark_infra::api_key::ApiKeyStats;
use bulwark_infra::auth::AuthStats;
use bulwark_infra::rate_limit::RateLimitStats;
use bulwark_infra::resilience::CircuitSnapshot;

use crate::error::HttpResult;
use crate::middleware::Authenticated;
use crate::state::{AppState, Backends};

const ADMIN_ROLE: &str = "admin";

#[derive(Serialize)]
pub struct SecurityStats {
    pub rate_limit: RateLimitStats,
    pub auth: AuthStats,
    pub api_keys: ApiKeyStats,
    pub circuits: Vec<CircuitSnapshot>,
    pub backends: Backends,
}

/// GET /api/security/stats - admin only.
pub async fn stats(state: web::Data<AppState>, caller: Authenticated) -> HttpResult<HttpResponse> {
    if !caller.identity.has_role(ADMIN_ROLE) {
        return Err(AppError::authorization("Admin role required")
            .with_code("INSUFFICIENT_ROLE")
            .with_user_id(caller.identity.user_id.to_string())
            .into());
    }

    Ok(HttpResponse::Ok().json(SecurityStats {
        rate_limit: state.limiter.stats().await,
        auth: state.auth.stats().await,
        api_keys: state.api_keys.stats(),
        circuits: state.errors.circuit_snapshots(),
        backends: state.backends.clone(),
    }))
}
