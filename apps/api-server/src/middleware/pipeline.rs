//! Error pipeline - the single point where failures become responses.
//!
//! Catches middleware errors, handler errors and panics from everything
//! wrapped inside it, then renders them through the `ErrorHandler`.

use std::future::{Future, Ready, ready};
use std::pin::Pin;
use std::sync::Arc;

use actix_web::{
    Error, HttpMessage, HttpRequest, HttpResponse,
    body::{EitherBody, MessageBody},
    dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready},
    http::{StatusCode, header},
};
use serde_json::Value;

use bulwark_core::{AppError, ErrorKind};
use bulwark_infra::resilience::{ErrorHandler, recover};

use super::rate_limit::RateBudget;
use crate::error::classify_actix;
use crate::observability::RequestId;

pub struct ErrorPipeline {
    errors: Arc<ErrorHandler>,
}

impl ErrorPipeline {
    pub fn new(errors: Arc<ErrorHandler>) -> Self {
        Self { errors }
    }
}

impl<S, B> Transform<S, ServiceRequest> for ErrorPipeline
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = ErrorPipelineService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(ErrorPipelineService {
            service,
            errors: self.errors.clone(),
        }))
    }
}

pub struct ErrorPipelineService<S> {
    service: S,
    errors: Arc<ErrorHandler>,
}

impl<S, B> Service<ServiceRequest> for ErrorPipelineService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let errors = self.errors.clone();
        let http_req = req.request().clone();
        let fut = self.service.call(req);

        Box::pin(async move {
            let err = match recover(fut).await {
                Ok(Ok(res)) => match res.response().error().map(classify_actix) {
                    Some(err) => err,
                    None => return Ok(res.map_into_left_body()),
                },
                Ok(Err(e)) => classify_actix(&e),
                Err(panicked) => panicked,
            };

            let response = render(&errors, err, &http_req);
            Ok(ServiceResponse::new(http_req, response).map_into_right_body())
        })
    }
}

/// Render `err` with the retry headers its details call for. A request the
/// limiter already admitted keeps its budget headers.
pub fn render(errors: &ErrorHandler, err: AppError, req: &HttpRequest) -> HttpResponse {
    let request_id = req.extensions().get::<RequestId>().cloned();
    let budget = req.extensions().get::<RateBudget>().copied();
    let retry_after = err.retry_after();
    let rate_limit = (err.kind == ErrorKind::RateLimit)
        .then(|| err.details.get("limit").and_then(Value::as_u64));

    let (status, body) = errors.handle(err, request_id.as_ref().map(RequestId::as_str));

    let mut builder = HttpResponse::build(
        StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
    );
    if let Some(secs) = retry_after {
        builder.insert_header((header::RETRY_AFTER, secs.to_string()));
    }
    if let Some(limit) = rate_limit {
        if let Some(limit) = limit {
            builder.insert_header(("X-RateLimit-Limit", limit.to_string()));
        }
        builder.insert_header(("X-RateLimit-Remaining", "0"));
        if let Some(secs) = retry_after {
            let reset = chrono::Utc::now().timestamp() + secs as i64;
            builder.insert_header(("X-RateLimit-Reset", reset.to_string()));
        }
    }
    let mut response = builder.json(body);
    if let (None, Some(budget)) = (rate_limit, budget) {
        budget.apply(response.headers_mut());
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use actix_web::{App, test, web};
    use bulwark_infra::resilience::ErrorHandlerConfig;

    use crate::error::HttpError;

    fn pipeline() -> ErrorPipeline {
        ErrorPipeline::new(Arc::new(ErrorHandler::new(ErrorHandlerConfig::default())))
    }

    async fn rejected() -> Result<HttpResponse, HttpError> {
        Err(AppError::validation("Name is required")
            .with_code("NAME_REQUIRED")
            .into())
    }

    async fn throttled() -> Result<HttpResponse, HttpError> {
        Err(AppError::rate_limited("IP rate limit exceeded", Duration::from_secs(3))
            .with_detail("limit", 50)
            .into())
    }

    async fn exploding() -> HttpResponse {
        panic!("handler exploded")
    }

    #[actix_web::test]
    async fn test_handler_error_rendered_as_error_response() {
        let app = test::init_service(
            App::new()
                .wrap(pipeline())
                .route("/", web::get().to(rejected)),
        )
        .await;

        let req = test::TestRequest::get().uri("/").to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let body: Value = test::read_body_json(res).await;
        assert_eq!(body["error"], "validation");
        assert_eq!(body["code"], "NAME_REQUIRED");
        assert_eq!(body["message"], "Name is required");
    }

    #[actix_web::test]
    async fn test_rate_limit_headers() {
        let app = test::init_service(
            App::new()
                .wrap(pipeline())
                .route("/", web::get().to(throttled)),
        )
        .await;

        let req = test::TestRequest::get().uri("/").to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(res.headers().get("retry-after").unwrap(), "3");
        assert_eq!(res.headers().get("x-ratelimit-limit").unwrap(), "50");
        assert_eq!(res.headers().get("x-ratelimit-remaining").unwrap(), "0");
        assert!(res.headers().contains_key("x-ratelimit-reset"));
    }

    #[actix_web::test]
    async fn test_panic_becomes_internal_error() {
        let app = test::init_service(
            App::new()
                .wrap(pipeline())
                .route("/", web::get().to(exploding)),
        )
        .await;

        let req = test::TestRequest::get().uri("/").to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body: Value = test::read_body_json(res).await;
        assert_eq!(body["code"], "PANIC_RECOVERED");
    }

    #[actix_web::test]
    async fn test_unmatched_route_rendered() {
        let app = test::init_service(App::new().wrap(pipeline())).await;

        let req = test::TestRequest::get().uri("/nope").to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }
}
