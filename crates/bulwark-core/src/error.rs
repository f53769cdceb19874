//! Error taxonomy shared by every component.
//!
//! An [`AppError`] is created at the point of failure and travels upward
//! unchanged until the error handler logs and renders it.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::ports::CacheError;

/// Fixed error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Authentication,
    Authorization,
    NotFound,
    Conflict,
    RateLimit,
    Timeout,
    Database,
    External,
    CircuitBreaker,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Authentication => "authentication",
            ErrorKind::Authorization => "authorization",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Database => "database",
            ErrorKind::External => "external",
            ErrorKind::CircuitBreaker => "circuit_breaker",
            ErrorKind::Internal => "internal",
        }
    }

    /// HTTP status used when this kind reaches a client.
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::Validation => 400,
            ErrorKind::Authentication => 401,
            ErrorKind::Authorization => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::Timeout => 408,
            ErrorKind::Conflict => 409,
            ErrorKind::RateLimit => 429,
            ErrorKind::Database | ErrorKind::Internal => 500,
            ErrorKind::External => 502,
            ErrorKind::CircuitBreaker => 503,
        }
    }

    pub fn default_severity(&self) -> Severity {
        match self {
            ErrorKind::NotFound | ErrorKind::Conflict | ErrorKind::RateLimit => Severity::Low,
            ErrorKind::Validation | ErrorKind::Authentication | ErrorKind::Authorization => {
                Severity::Medium
            }
            ErrorKind::Timeout
            | ErrorKind::Database
            | ErrorKind::External
            | ErrorKind::CircuitBreaker
            | ErrorKind::Internal => Severity::High,
        }
    }

    pub fn default_code(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "VALIDATION_ERROR",
            ErrorKind::Authentication => "AUTHENTICATION_ERROR",
            ErrorKind::Authorization => "AUTHORIZATION_ERROR",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::RateLimit => "RATE_LIMIT_EXCEEDED",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::Database => "DATABASE_ERROR",
            ErrorKind::External => "EXTERNAL_SERVICE_ERROR",
            ErrorKind::CircuitBreaker => "CIRCUIT_BREAKER_OPEN",
            ErrorKind::Internal => "INTERNAL_ERROR",
        }
    }

    /// Whether callers can act on the error (as opposed to a server fault).
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ErrorKind::Internal)
    }

    /// Only transient infrastructure failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Timeout | ErrorKind::External | ErrorKind::Database
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Application error carrying everything the error handler needs to log and
/// render a failure.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct AppError {
    pub kind: ErrorKind,
    pub code: String,
    pub message: String,
    pub details: Map<String, Value>,
    pub severity: Severity,
    pub recoverable: bool,
    pub timestamp: DateTime<Utc>,
    pub request_id: Option<String>,
    pub user_id: Option<String>,
    pub backtrace: Option<String>,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl AppError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: kind.default_code().to_string(),
            message: message.into(),
            details: Map::new(),
            severity: kind.default_severity(),
            recoverable: kind.is_recoverable(),
            timestamp: Utc::now(),
            request_id: None,
            user_id: None,
            backtrace: None,
            source: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authentication, message)
    }

    pub fn authorization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authorization, message)
    }

    pub fn not_found(resource: impl fmt::Display) -> Self {
        Self::new(ErrorKind::NotFound, format!("{} not found", resource))
            .with_detail("resource", resource.to_string())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn rate_limited(message: impl Into<String>, retry_after: Duration) -> Self {
        Self::new(ErrorKind::RateLimit, message)
            .with_detail("retry_after", retry_after_secs(retry_after))
    }

    pub fn timeout(operation: impl fmt::Display) -> Self {
        Self::new(ErrorKind::Timeout, format!("Operation {} timed out", operation))
            .with_detail("operation", operation.to_string())
    }

    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Database, message)
    }

    pub fn external(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::External, message)
    }

    pub fn circuit_open(service: impl fmt::Display) -> Self {
        Self::new(
            ErrorKind::CircuitBreaker,
            format!("Service {} is temporarily unavailable", service),
        )
        .with_detail("service", service.to_string())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Fault caught at a request boundary.
    pub fn panic_recovered(panic_message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, "An unexpected error occurred")
            .with_code("PANIC_RECOVERED")
            .with_severity(Severity::Critical)
            .with_detail("panic", panic_message.into())
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Capture the current stack. Only rendered in development posture.
    pub fn with_backtrace(mut self) -> Self {
        self.backtrace = Some(std::backtrace::Backtrace::force_capture().to_string());
        self
    }

    pub fn status_code(&self) -> u16 {
        self.kind.status_code()
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Retry hint in seconds, present on rate-limit and lockout errors.
    pub fn retry_after(&self) -> Option<u64> {
        self.details.get("retry_after").and_then(Value::as_u64)
    }
}

fn retry_after_secs(d: Duration) -> u64 {
    // Round up so a sub-second wait is never reported as zero.
    let secs = d.as_secs();
    if d.subsec_nanos() > 0 { secs + 1 } else { secs.max(1) }
}

/// Repository-level errors.
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("Database connection failed: {0}")]
    Connection(String),

    #[error("Query execution failed: {0}")]
    Query(String),

    #[error("Entity not found")]
    NotFound,

    #[error("Constraint violation: {0}")]
    Constraint(String),
}

impl From<RepoError> for AppError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::NotFound => AppError::new(ErrorKind::NotFound, "Resource not found"),
            RepoError::Constraint(msg) => AppError::conflict(msg),
            other => AppError::database("Database operation failed").with_source(other),
        }
    }
}

impl From<CacheError> for AppError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Timeout(_) => AppError::timeout("shared cache").with_source(err),
            other => AppError::external("Shared cache unavailable").with_source(other),
        }
    }
}
