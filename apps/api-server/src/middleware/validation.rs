//! Input validation middleware.
//!
//! Buffers the request body, runs it through the `InputValidator`, and hands
//! the (possibly sanitized) body on to the handler.

use std::future::{Future, Ready, ready};
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;

use actix_web::{
    Error, HttpMessage,
    dev::{Payload, Service, ServiceRequest, ServiceResponse, Transform, forward_ready},
    web::{Bytes, BytesMut},
};
use futures::StreamExt;

use bulwark_core::AppError;
use bulwark_infra::validation::InputValidator;

use super::request::describe;
use crate::error::HttpError;

pub struct ValidationMiddleware {
    validator: Arc<InputValidator>,
}

impl ValidationMiddleware {
    pub fn new(validator: Arc<InputValidator>) -> Self {
        Self { validator }
    }
}

impl<S, B> Transform<S, ServiceRequest> for ValidationMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = ValidationMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(ValidationMiddlewareService {
            service: Rc::new(service),
            validator: self.validator.clone(),
        }))
    }
}

pub struct ValidationMiddlewareService<S> {
    service: Rc<S>,
    validator: Arc<InputValidator>,
}

impl<S, B> Service<ServiceRequest> for ValidationMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, mut req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let validator = self.validator.clone();

        Box::pin(async move {
            let descriptor = describe(req.request());
            let carries_body = !validator.should_skip(&descriptor.path)
                && !matches!(descriptor.method.as_str(), "GET" | "DELETE" | "HEAD" | "OPTIONS");

            if !carries_body {
                validator
                    .validate_request(&descriptor, &[])
                    .map_err(HttpError::from)?;
                return service.call(req).await;
            }

            let body = read_body(req.take_payload(), validator.config().max_file_size).await?;
            let rewritten = validator
                .validate_request(&descriptor, &body)
                .map_err(HttpError::from)?;

            let body = rewritten.map(Bytes::from).unwrap_or(body);
            req.set_payload(Payload::from(body));
            service.call(req).await
        })
    }
}

async fn read_body(mut payload: Payload, limit: usize) -> Result<Bytes, HttpError> {
    let mut body = BytesMut::new();
    while let Some(chunk) = payload.next().await {
        let chunk = chunk.map_err(|e| {
            AppError::validation("Malformed request body").with_detail("reason", e.to_string())
        })?;
        if body.len() + chunk.len() > limit {
            return Err(AppError::validation("Request body too large")
                .with_code("BODY_TOO_LARGE")
                .with_detail("max_length", limit)
                .into());
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body.freeze())
}
