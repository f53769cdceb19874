//! Rate limiting middleware.

use std::future::{Future, Ready, ready};
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;

use actix_web::{
    Error, HttpMessage,
    dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready},
    http::header::{HeaderMap, HeaderName, HeaderValue},
};

use bulwark_core::AppError;
use bulwark_infra::rate_limit::{RateLimitDecision, RateLimiter};

use super::request::describe;
use crate::error::HttpError;

/// Budget left after an allowed request. Kept in request extensions so
/// error responses rendered further out carry the same headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateBudget {
    pub limit: u32,
    pub remaining: u32,
}

impl RateBudget {
    pub fn apply(&self, headers: &mut HeaderMap) {
        headers.insert(
            HeaderName::from_static("x-ratelimit-limit"),
            HeaderValue::from(self.limit),
        );
        headers.insert(
            HeaderName::from_static("x-ratelimit-remaining"),
            HeaderValue::from(self.remaining),
        );
    }
}

/// Rate limiting middleware factory.
pub struct RateLimitMiddleware {
    limiter: Arc<RateLimiter>,
}

impl RateLimitMiddleware {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RateLimitMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = RateLimitMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RateLimitMiddlewareService {
            service: Rc::new(service),
            limiter: self.limiter.clone(),
        }))
    }
}

pub struct RateLimitMiddlewareService<S> {
    service: Rc<S>,
    limiter: Arc<RateLimiter>,
}

impl<S, B> Service<ServiceRequest> for RateLimitMiddlewareService<S>
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
        let limiter = self.limiter.clone();

        Box::pin(async move {
            let descriptor = describe(req.request());

            let budget = match limiter.check(&descriptor).await {
                RateLimitDecision::Allow { limit, remaining } => RateBudget { limit, remaining },
                denied => {
                    // Rendered with its headers by the error pipeline.
                    let err = denied.into_error().unwrap_or_else(|| {
                        AppError::internal("Denied decision without an error")
                    });
                    return Err(HttpError::from(err).into());
                }
            };

            req.extensions_mut().insert(budget);
            let mut res = service.call(req).await?;
            budget.apply(res.headers_mut());
            Ok(res)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{App, HttpResponse, http::StatusCode, test, web};

    use bulwark_infra::rate_limit::{RateLimiterConfig, TierLimit};
    use bulwark_infra::store::InMemorySlidingWindow;

    fn limiter(burst: u32) -> Arc<RateLimiter> {
        let config = RateLimiterConfig {
            per_ip: TierLimit::new(1, burst),
            ..RateLimiterConfig::default()
        };
        Arc::new(RateLimiter::new(config, Arc::new(InMemorySlidingWindow::new())))
    }

    #[actix_web::test]
    async fn test_allowed_requests_carry_budget_headers() {
        let app = test::init_service(
            App::new()
                .wrap(RateLimitMiddleware::new(limiter(5)))
                .route("/", web::get().to(HttpResponse::Ok)),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/")
            .insert_header(("X-Forwarded-For", "198.51.100.1"))
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert!(res.headers().contains_key("x-ratelimit-limit"));
        assert!(res.headers().contains_key("x-ratelimit-remaining"));
    }

    #[actix_web::test]
    async fn test_exhausted_budget_is_rejected() {
        let app = test::init_service(
            App::new()
                .wrap(RateLimitMiddleware::new(limiter(2)))
                .route("/", web::get().to(HttpResponse::Ok)),
        )
        .await;

        let request = || {
            test::TestRequest::get()
                .uri("/")
                .insert_header(("X-Forwarded-For", "198.51.100.2"))
                .to_request()
        };
        for _ in 0..2 {
            let res = test::call_service(&app, request()).await;
            assert_eq!(res.status(), StatusCode::OK);
        }

        let err = test::try_call_service(&app, request()).await.unwrap_err();
        let app_err = crate::error::classify_actix(&err);
        assert_eq!(app_err.code, "RATE_LIMIT_EXCEEDED");
        assert_eq!(app_err.details["scope"], "ip");
    }
}
