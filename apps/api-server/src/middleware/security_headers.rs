//! Response hardening headers, with development and production profiles.

use std::future::{Future, Ready, ready};
use std::pin::Pin;
use std::rc::Rc;

use actix_web::{
    Error,
    dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready},
    http::header::{self, HeaderMap, HeaderName, HeaderValue},
};

use bulwark_infra::resilience::Environment;

const HSTS_MAX_AGE_SECS: u64 = 31_536_000;

const DEV_CSP: &str = "default-src 'self' 'unsafe-inline' 'unsafe-eval'; \
    script-src 'self' 'unsafe-inline' 'unsafe-eval'; \
    style-src 'self' 'unsafe-inline'; \
    img-src 'self' data: https:; \
    connect-src 'self' ws: wss:; \
    font-src 'self'; \
    object-src 'none'; \
    base-uri 'self'";

const PROD_CSP: &str = "default-src 'self'; \
    script-src 'self'; \
    style-src 'self' 'unsafe-inline'; \
    img-src 'self' data: https:; \
    connect-src 'self' wss:; \
    font-src 'self'; \
    object-src 'none'; \
    base-uri 'self'; \
    frame-ancestors 'none'; \
    upgrade-insecure-requests";

const DEV_PERMISSIONS: &str = "geolocation=(), microphone=(), camera=()";

const PROD_PERMISSIONS: &str = "geolocation=(), microphone=(), camera=(), \
    payment=(), usb=(), magnetometer=(), gyroscope=(), \
    speaker=(), notifications=(), push=(), sync-xhr=()";

/// Header values for one deployment posture.
#[derive(Debug, Clone)]
pub struct HeaderProfile {
    pub content_security_policy: &'static str,
    pub permissions_policy: &'static str,
    pub hsts_preload: bool,
}

impl HeaderProfile {
    pub fn for_environment(environment: Environment) -> Self {
        if environment.is_production() {
            Self {
                content_security_policy: PROD_CSP,
                permissions_policy: PROD_PERMISSIONS,
                hsts_preload: true,
            }
        } else {
            Self {
                content_security_policy: DEV_CSP,
                permissions_policy: DEV_PERMISSIONS,
                hsts_preload: false,
            }
        }
    }

    fn hsts(&self) -> String {
        let mut value = format!("max-age={}; includeSubDomains", HSTS_MAX_AGE_SECS);
        if self.hsts_preload {
            value.push_str("; preload");
        }
        value
    }

    fn apply(&self, headers: &mut HeaderMap, https: bool, api: bool) {
        let fixed: [(HeaderName, &'static str); 9] = [
            (header::CONTENT_SECURITY_POLICY, self.content_security_policy),
            (header::X_FRAME_OPTIONS, "DENY"),
            (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
            (header::X_XSS_PROTECTION, "1; mode=block"),
            (header::REFERRER_POLICY, "strict-origin-when-cross-origin"),
            (HeaderName::from_static("permissions-policy"), self.permissions_policy),
            (HeaderName::from_static("cross-origin-embedder-policy"), "require-corp"),
            (HeaderName::from_static("cross-origin-opener-policy"), "same-origin"),
            (HeaderName::from_static("cross-origin-resource-policy"), "same-origin"),
        ];
        for (name, value) in fixed {
            headers.insert(name, HeaderValue::from_static(value));
        }

        if https {
            if let Ok(value) = HeaderValue::from_str(&self.hsts()) {
                headers.insert(header::STRICT_TRANSPORT_SECURITY, value);
            }
        }

        if api {
            headers.insert(
                header::CACHE_CONTROL,
                HeaderValue::from_static("no-cache, no-store, must-revalidate"),
            );
            headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
            headers.insert(header::EXPIRES, HeaderValue::from_static("0"));
        }
    }
}

pub struct SecurityHeaders {
    profile: Rc<HeaderProfile>,
}

impl SecurityHeaders {
    pub fn new(environment: Environment) -> Self {
        Self {
            profile: Rc::new(HeaderProfile::for_environment(environment)),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for SecurityHeaders
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = SecurityHeadersService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(SecurityHeadersService {
            service,
            profile: self.profile.clone(),
        }))
    }
}

pub struct SecurityHeadersService<S> {
    service: S,
    profile: Rc<HeaderProfile>,
}

impl<S, B> Service<ServiceRequest> for SecurityHeadersService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let https = req.connection_info().scheme() == "https";
        let api = req.path().starts_with("/api/");
        let profile = self.profile.clone();
        let fut = self.service.call(req);

        Box::pin(async move {
            let mut res = fut.await?;
            profile.apply(res.headers_mut(), https, api);
            Ok(res)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{App, HttpResponse, test, web};

    #[actix_web::test]
    async fn test_headers_on_api_route() {
        let app = test::init_service(
            App::new()
                .wrap(SecurityHeaders::new(Environment::Development))
                .route("/api/health", web::get().to(HttpResponse::Ok)),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/health").to_request();
        let res = test::call_service(&app, req).await;
        let headers = res.headers();
        assert_eq!(headers.get("x-frame-options").unwrap(), "DENY");
        assert_eq!(headers.get("x-content-type-options").unwrap(), "nosniff");
        assert_eq!(headers.get("permissions-policy").unwrap(), DEV_PERMISSIONS);
        assert_eq!(
            headers.get("cache-control").unwrap(),
            "no-cache, no-store, must-revalidate"
        );
        assert!(headers.get("strict-transport-security").is_none());
    }

    #[actix_web::test]
    async fn test_hsts_behind_tls_proxy_in_production() {
        let app = test::init_service(
            App::new()
                .wrap(SecurityHeaders::new(Environment::Production))
                .route("/", web::get().to(HttpResponse::Ok)),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/")
            .insert_header(("X-Forwarded-Proto", "https"))
            .to_request();
        let res = test::call_service(&app, req).await;
        let headers = res.headers();
        assert_eq!(
            headers.get("strict-transport-security").unwrap(),
            "max-age=31536000; includeSubDomains; preload"
        );
        assert_eq!(headers.get("content-security-policy").unwrap(), PROD_CSP);
        assert!(headers.get("cache-control").is_none());
    }
}
