//! Application assembly - the defense pipeline in front of the routes.

use actix_web::{
    App, Error,
    body::MessageBody,
    dev::{ServiceFactory, ServiceRequest, ServiceResponse},
    web,
};
use tracing_actix_web::TracingLogger;

use crate::handlers;
use crate::middleware::{
    ErrorPipeline, RateLimitMiddleware, RequestTimeout, SecurityHeaders, SessionResolver,
    ValidationMiddleware,
};
use crate::observability::RequestIdMiddleware;
use crate::state::AppState;

/// Build the app with the service routes.
pub fn build_app(
    state: AppState,
) -> App<
    impl ServiceFactory<
        ServiceRequest,
        Config = (),
        Response = ServiceResponse<impl MessageBody>,
        Error = Error,
        InitError = (),
    >,
> {
    let routes = state.clone();
    compose(state, move |cfg| handlers::configure_routes(cfg, &routes))
}

/// Put `routes` behind the defense pipeline. `wrap` order is innermost
/// first, so the request passes request id, security headers, error
/// pipeline, request timeout, tracing, session, rate limit and validation
/// before reaching a route.
pub fn compose<F>(
    state: AppState,
    routes: F,
) -> App<
    impl ServiceFactory<
        ServiceRequest,
        Config = (),
        Response = ServiceResponse<impl MessageBody>,
        Error = Error,
        InitError = (),
    >,
>
where
    F: FnOnce(&mut web::ServiceConfig),
{
    let environment = state.errors.environment();

    App::new()
        .app_data(web::Data::new(state.clone()))
        .configure(routes)
        .default_service(web::to(handlers::not_found))
        .wrap(ValidationMiddleware::new(state.validator.clone()))
        .wrap(RateLimitMiddleware::new(state.limiter.clone()))
        .wrap(SessionResolver::new(state.auth.clone()))
        .wrap(TracingLogger::default())
        .wrap(RequestTimeout::new(state.request_timeout))
        .wrap(ErrorPipeline::new(state.errors.clone()))
        .wrap(SecurityHeaders::new(environment))
        .wrap(RequestIdMiddleware)
}
