//! Error handler: classification, logging, rendering, and the named circuit
//! breakers shared by everything that calls an external dependency.

use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::time::Instant;

use bulwark_core::{AppError, ErrorKind, Severity};
use bulwark_shared::ErrorResponse;

use super::circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitSnapshot, CircuitState,
};
use super::retry::{RetryPolicy, retry_with_backoff};

/// Deployment posture; decides how much of an error reaches the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn from_env() -> Self {
        std::env::var("ENVIRONMENT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(Environment::Development)
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "development" | "dev" | "local" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(format!("unknown environment '{}'", other)),
        }
    }
}

/// Error handler configuration.
#[derive(Debug, Clone)]
pub struct ErrorHandlerConfig {
    pub environment: Environment,
    pub circuit_breaker: CircuitBreakerConfig,
    pub retry: RetryPolicy,
}

impl Default for ErrorHandlerConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            circuit_breaker: CircuitBreakerConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl ErrorHandlerConfig {
    pub fn from_env() -> Self {
        Self {
            environment: Environment::from_env(),
            circuit_breaker: CircuitBreakerConfig::from_env(),
            retry: RetryPolicy::from_env(),
        }
    }
}

/// Custom renderer consulted before the default one. Returning `None` falls
/// through to the default rendering.
pub type FallbackRenderer = Arc<dyn Fn(&AppError) -> Option<ErrorResponse> + Send + Sync>;

const GENERIC_INTERNAL_MESSAGE: &str = "An internal error occurred";

pub struct ErrorHandler {
    config: ErrorHandlerConfig,
    breakers: CircuitBreakerRegistry,
    fallback: Option<FallbackRenderer>,
}

impl ErrorHandler {
    pub fn new(config: ErrorHandlerConfig) -> Self {
        let breakers = CircuitBreakerRegistry::new(config.circuit_breaker.clone())
            .with_observer(Arc::new(log_state_change));

        Self {
            config,
            breakers,
            fallback: None,
        }
    }

    pub fn from_env() -> Self {
        Self::new(ErrorHandlerConfig::from_env())
    }

    pub fn with_fallback(mut self, renderer: FallbackRenderer) -> Self {
        self.fallback = Some(renderer);
        self
    }

    pub fn environment(&self) -> Environment {
        self.config.environment
    }

    /// Map any error into the taxonomy. An `AppError` passes through as is.
    pub fn classify(&self, err: Box<dyn std::error::Error + Send + Sync>) -> AppError {
        match err.downcast::<AppError>() {
            Ok(app) => *app,
            Err(other) => classify_message(other),
        }
    }

    /// Log `err` at its severity and render the client body. This is the one
    /// place an error is consumed.
    pub fn handle(&self, mut err: AppError, request_id: Option<&str>) -> (u16, ErrorResponse) {
        if let Some(id) = request_id {
            err.request_id.get_or_insert_with(|| id.to_string());
        }
        if !self.config.environment.is_production()
            && err.backtrace.is_none()
            && err.severity >= Severity::High
        {
            err = err.with_backtrace();
        }

        self.log(&err);
        (err.status_code(), self.render(&err))
    }

    pub fn log(&self, err: &AppError) {
        let request_id = err.request_id.as_deref().unwrap_or("-");
        let user_id = err.user_id.as_deref().unwrap_or("-");
        let source = err.source.as_ref().map(|s| s.to_string()).unwrap_or_default();
        let details = Value::Object(err.details.clone());

        match err.severity {
            Severity::Critical | Severity::High => tracing::error!(
                kind = %err.kind,
                code = %err.code,
                severity = %err.severity,
                request_id,
                user_id,
                source = %source,
                details = %details,
                "{}",
                err.message
            ),
            Severity::Medium => tracing::warn!(
                kind = %err.kind,
                code = %err.code,
                request_id,
                user_id,
                "{}",
                err.message
            ),
            Severity::Low => tracing::info!(
                kind = %err.kind,
                code = %err.code,
                request_id,
                "{}",
                err.message
            ),
        }
    }

    /// Client-safe body for `err`.
    pub fn render(&self, err: &AppError) -> ErrorResponse {
        if let Some(body) = self.fallback.as_ref().and_then(|f| f(err)) {
            return body;
        }

        let production = self.config.environment.is_production();

        let message = if production && err.kind == ErrorKind::Internal {
            GENERIC_INTERNAL_MESSAGE.to_string()
        } else {
            err.message.clone()
        };

        let details = if !production {
            let mut details = err.details.clone();
            if let Some(trace) = &err.backtrace {
                details.insert("stack".to_string(), Value::String(trace.clone()));
            }
            details
        } else if matches!(err.kind, ErrorKind::Validation | ErrorKind::RateLimit) {
            err.details.clone()
        } else {
            Map::new()
        };

        let mut body = ErrorResponse::new(err.kind.as_str(), message)
            .with_code(err.code.clone())
            .with_details(details);
        body.timestamp = err.timestamp;
        if let Some(id) = &err.request_id {
            body = body.with_request_id(id.clone());
        }
        body
    }

    pub fn breaker(&self, name: &str) -> Arc<CircuitBreaker> {
        self.breakers.get(name)
    }

    pub fn circuit_snapshots(&self) -> Vec<CircuitSnapshot> {
        self.breakers.snapshots()
    }

    /// Run `f` behind the breaker named `name`.
    pub async fn with_circuit_breaker<F, Fut, T, E>(&self, name: &str, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<AppError>,
    {
        self.breakers.get(name).call(f).await.map_err(AppError::from)
    }

    /// Retry `op` with the configured policy. See [`retry_with_backoff`].
    pub async fn retry_with_backoff<T, F, Fut>(
        &self,
        operation: &str,
        deadline: Option<Instant>,
        op: F,
    ) -> Result<T, AppError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        retry_with_backoff(operation, &self.config.retry, deadline, op).await
    }
}

fn log_state_change(name: &str, from: CircuitState, to: CircuitState) {
    match to {
        CircuitState::Open => tracing::error!(
            event = "circuit_state_change",
            breaker = name,
            from = ?from,
            to = ?to,
            "Circuit breaker opened"
        ),
        _ => tracing::warn!(
            event = "circuit_state_change",
            breaker = name,
            from = ?from,
            to = ?to,
            "Circuit breaker state changed"
        ),
    }
}

fn classify_message(err: Box<dyn std::error::Error + Send + Sync>) -> AppError {
    let text = err.to_string().to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| text.contains(n));

    let kind = if has(&["validation", "invalid"]) {
        ErrorKind::Validation
    } else if has(&["unauthorized", "authentication", "unauthenticated"]) {
        ErrorKind::Authentication
    } else if has(&["forbidden", "permission", "not allowed"]) {
        ErrorKind::Authorization
    } else if has(&["not found", "no rows"]) {
        ErrorKind::NotFound
    } else if has(&["timeout", "timed out", "deadline"]) {
        ErrorKind::Timeout
    } else if has(&["rate limit", "too many requests"]) {
        ErrorKind::RateLimit
    } else {
        ErrorKind::Internal
    };

    let message = match kind {
        ErrorKind::Internal => GENERIC_INTERNAL_MESSAGE.to_string(),
        _ => err.to_string(),
    };

    let mut app = AppError::new(kind, message);
    app.source = Some(err);
    app
}
