//! Authentication handlers.

use actix_web::{HttpRequest, HttpResponse, web};

use bulwark_core::domain::Session;
use bulwark_shared::ApiResponse;
use bulwark_shared::dto::{LoginRequest, MfaSetupResponse, SessionResponse, SessionSummary};

use crate::error::HttpResult;
use crate::middleware::{Authenticated, describe};
use crate::state::AppState;

fn summary(session: Session) -> SessionSummary {
    SessionSummary {
        id: session.id,
        ip_address: session.ip_address,
        user_agent: session.user_agent,
        created_at: session.created_at,
        last_activity: session.last_activity,
        mfa_verified: session.mfa_verified,
    }
}

/// POST /api/auth/login
pub async fn login(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<LoginRequest>,
) -> HttpResult<HttpResponse> {
    let credentials = body.into_inner();
    let descriptor = describe(&req);

    let session = state
        .auth
        .login(
            state.users.as_ref(),
            &credentials.username,
            &credentials.password,
            &descriptor.client_ip(),
            descriptor.user_agent(),
        )
        .await?;

    let config = state.auth.config();
    Ok(HttpResponse::Ok().json(SessionResponse {
        session_id: session.id,
        token_type: "Bearer".to_string(),
        expires_in: config.session_timeout.as_secs(),
        mfa_required: config.mfa_enabled && !session.mfa_verified,
    }))
}

/// POST /api/auth/logout
pub async fn logout(state: web::Data<AppState>, caller: Authenticated) -> HttpResult<HttpResponse> {
    state.auth.invalidate_session(&caller.session.id).await?;
    Ok(HttpResponse::NoContent().finish())
}

/// GET /api/auth/sessions
pub async fn list_sessions(
    state: web::Data<AppState>,
    caller: Authenticated,
) -> HttpResult<HttpResponse> {
    let sessions = state.auth.active_sessions(caller.identity.user_id).await?;
    let summaries: Vec<SessionSummary> = sessions.into_iter().map(summary).collect();
    Ok(HttpResponse::Ok().json(ApiResponse::ok(summaries)))
}

/// DELETE /api/auth/sessions - sign out everywhere.
pub async fn revoke_sessions(
    state: web::Data<AppState>,
    caller: Authenticated,
) -> HttpResult<HttpResponse> {
    let revoked = state
        .auth
        .invalidate_all_sessions(caller.identity.user_id)
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(serde_json::json!({ "revoked": revoked }))))
}

/// POST /api/auth/mfa/setup
pub async fn setup_mfa(
    state: web::Data<AppState>,
    caller: Authenticated,
) -> HttpResult<HttpResponse> {
    let setup = state.auth.setup_mfa(&caller.identity)?;
    Ok(HttpResponse::Ok().json(MfaSetupResponse {
        secret: setup.secret,
        enrollment_uri: setup.enrollment_uri,
        backup_codes: setup.backup_codes,
    }))
}
