//! HTTP handlers and route configuration.

mod auth;
mod external;
mod health;
mod keys;
mod security;

use actix_web::{HttpResponse, web};

use bulwark_core::{AppError, ErrorKind};

use crate::error::HttpResult;
use crate::middleware::ApiKeyAuth;
use crate::state::AppState;

/// Configure all application routes.
pub fn configure_routes(cfg: &mut web::ServiceConfig, state: &AppState) {
    cfg.service(
        web::scope("/api")
            // Public routes
            .route("/health", web::get().to(health::health_check))
            // Session routes
            .service(
                web::scope("/auth")
                    .route("/login", web::post().to(auth::login))
                    .route("/logout", web::post().to(auth::logout))
                    .route("/sessions", web::get().to(auth::list_sessions))
                    .route("/sessions", web::delete().to(auth::revoke_sessions))
                    .route("/mfa/setup", web::post().to(auth::setup_mfa)),
            )
            .service(
                web::scope("/keys")
                    .route("", web::post().to(keys::issue))
                    .route("", web::get().to(keys::list))
                    .route("/{id}", web::patch().to(keys::update))
                    .route("/{id}", web::delete().to(keys::revoke)),
            )
            .route("/security/stats", web::get().to(security::stats))
            // API-key routes
            .service(
                web::scope("/external")
                    .wrap(ApiKeyAuth::new(state.api_keys.clone()))
                    .route("/ping", web::get().to(external::ping)),
            ),
    );
}

/// Fallback for unmatched routes.
pub async fn not_found() -> HttpResult<HttpResponse> {
    Err(AppError::new(ErrorKind::NotFound, "Resource not found").into())
}
