//! API key management for the signed-in owner.

use actix_web::{HttpResponse, web};
use uuid::Uuid;

use bulwark_core::domain::{ApiKey, ApiKeyUpdate, IssueApiKey};
use bulwark_shared::ApiResponse;
use bulwark_shared::dto::ApiKeyResponse;

use crate::error::HttpResult;
use crate::middleware::Authenticated;
use crate::state::AppState;

fn response(key: ApiKey) -> ApiKeyResponse {
    ApiKeyResponse {
        id: key.id,
        name: key.name,
        prefix: key.prefix,
        permissions: key.permissions,
        rate_limit: key.rate_limit,
        allowed_ips: key.allowed_ips,
        allowed_referers: key.allowed_referers,
        created_at: key.created_at,
        expires_at: key.expires_at,
        last_used_at: key.last_used_at,
        usage_count: key.usage_count,
        is_active: key.is_active,
    }
}

/// POST /api/keys - the plaintext key appears in this response only.
pub async fn issue(
    state: web::Data<AppState>,
    caller: Authenticated,
    body: web::Json<IssueApiKey>,
) -> HttpResult<HttpResponse> {
    let issued = state
        .api_keys
        .issue(caller.identity.user_id, body.into_inner())
        .await?;
    Ok(HttpResponse::Created().json(issued))
}

/// GET /api/keys
pub async fn list(state: web::Data<AppState>, caller: Authenticated) -> HttpResult<HttpResponse> {
    let keys = state.api_keys.list(caller.identity.user_id).await?;
    let keys: Vec<ApiKeyResponse> = keys.into_iter().map(response).collect();
    Ok(HttpResponse::Ok().json(ApiResponse::ok(keys)))
}

/// PATCH /api/keys/{id}
pub async fn update(
    state: web::Data<AppState>,
    caller: Authenticated,
    path: web::Path<Uuid>,
    body: web::Json<ApiKeyUpdate>,
) -> HttpResult<HttpResponse> {
    let key = state
        .api_keys
        .update(path.into_inner(), caller.identity.user_id, body.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(response(key))))
}

/// DELETE /api/keys/{id}
pub async fn revoke(
    state: web::Data<AppState>,
    caller: Authenticated,
    path: web::Path<Uuid>,
) -> HttpResult<HttpResponse> {
    state
        .api_keys
        .revoke(path.into_inner(), caller.identity.user_id)
        .await?;
    Ok(HttpResponse::NoContent().finish())
}
