//! Routes for API-key callers.

use actix_web::{HttpResponse, web};
use serde::Serialize;

use bulwark_core::domain::ApiKey;

#[derive(Serialize)]
struct Pong {
    pong: bool,
    key: String,
    prefix: String,
    permissions: Vec<String>,
}

/// GET /api/external/ping
pub async fn ping(key: web::ReqData<ApiKey>) -> HttpResponse {
    let key = key.into_inner();
    HttpResponse::Ok().json(Pong {
        pong: true,
        key: key.name,
        prefix: key.prefix,
        permissions: key.permissions,
    })
}
