//! API key authentication for machine-to-machine routes.
//!
//! On success the verified [`ApiKey`] (hash blanked) is placed in request
//! extensions; handlers read it with `web::ReqData<ApiKey>`.

use std::future::{Future, Ready, ready};
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;

use actix_web::{
    Error, HttpMessage,
    dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready},
};

use bulwark_infra::api_key::ApiKeyManager;

use super::request::describe;
use crate::error::HttpError;

pub struct ApiKeyAuth {
    manager: Arc<ApiKeyManager>,
}

impl ApiKeyAuth {
    pub fn new(manager: Arc<ApiKeyManager>) -> Self {
        Self { manager }
    }
}

impl<S, B> Transform<S, ServiceRequest> for ApiKeyAuth
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = ApiKeyAuthService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(ApiKeyAuthService {
            service: Rc::new(service),
            manager: self.manager.clone(),
        }))
    }
}

pub struct ApiKeyAuthService<S> {
    service: Rc<S>,
    manager: Arc<ApiKeyManager>,
}

impl<S, B> Service<ServiceRequest> for ApiKeyAuthService<S>
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
        let manager = self.manager.clone();

        Box::pin(async move {
            let descriptor = describe(req.request());
            let key = manager
                .authenticate(&descriptor)
                .await
                .map_err(HttpError::from)?;

            req.extensions_mut().insert(key.redacted());
            service.call(req).await
        })
    }
}
