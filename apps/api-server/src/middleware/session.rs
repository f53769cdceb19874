//! Session resolution and the `Authenticated` extractor.
//!
//! The resolver never rejects a request. It attaches the caller's
//! [`Identity`] when a valid session token is presented, so the rate limiter
//! can apply the per-user tier and handlers can require authentication.

use std::future::{Future, Ready, ready};
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;

use actix_web::{
    Error, FromRequest, HttpMessage, HttpRequest,
    dev::{Payload, Service, ServiceRequest, ServiceResponse, Transform, forward_ready},
    http::header,
};

use bulwark_core::AppError;
use bulwark_core::domain::{Identity, Session};
use bulwark_infra::auth::AuthHardener;

use crate::error::HttpError;

/// Why a presented token did not resolve to a session.
#[derive(Debug, Clone)]
struct SessionFailure {
    code: String,
    message: String,
}

/// Bearer token from `Authorization`, or `X-Session-ID`.
pub fn session_token(req: &HttpRequest) -> Option<String> {
    let headers = req.headers();
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .or_else(|| headers.get("X-Session-ID").and_then(|v| v.to_str().ok()))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
}

pub struct SessionResolver {
    auth: Arc<AuthHardener>,
}

impl SessionResolver {
    pub fn new(auth: Arc<AuthHardener>) -> Self {
        Self { auth }
    }
}

impl<S, B> Transform<S, ServiceRequest> for SessionResolver
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = SessionResolverService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(SessionResolverService {
            service: Rc::new(service),
            auth: self.auth.clone(),
        }))
    }
}

pub struct SessionResolverService<S> {
    service: Rc<S>,
    auth: Arc<AuthHardener>,
}

impl<S, B> Service<ServiceRequest> for SessionResolverService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let auth = self.auth.clone();

        Box::pin(async move {
            if let Some(token) = session_token(req.request()) {
                match auth.get_session(&token).await {
                    Ok(session) => {
                        req.extensions_mut().insert(session.identity());
                        req.extensions_mut().insert(session);
                    }
                    Err(err) => {
                        tracing::debug!(code = %err.code, "Presented session did not resolve");
                        req.extensions_mut().insert(SessionFailure {
                            code: err.code,
                            message: err.message,
                        });
                    }
                }
            }
            service.call(req).await
        })
    }
}

/// A caller with a live session. Rejects with `AUTH_REQUIRED`, or with the
/// session error when a stale token was presented.
#[derive(Debug, Clone)]
pub struct Authenticated {
    pub identity: Identity,
    pub session: Session,
}

impl FromRequest for Authenticated {
    type Error = HttpError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let extensions = req.extensions();
        let result = match (extensions.get::<Identity>(), extensions.get::<Session>()) {
            (Some(identity), Some(session)) => Ok(Authenticated {
                identity: identity.clone(),
                session: session.clone(),
            }),
            _ => Err(match extensions.get::<SessionFailure>() {
                Some(failure) => AppError::authentication(failure.message.clone())
                    .with_code(failure.code.clone()),
                None => {
                    AppError::authentication("Authentication required").with_code("AUTH_REQUIRED")
                }
            }
            .into()),
        };
        ready(result)
    }
}
