//! Bridge between `AppError` and actix-web.
//!
//! Handlers and middleware return [`HttpError`]; the error pipeline takes the
//! `AppError` back out and renders it through the `ErrorHandler`.

use std::fmt;
use std::sync::Mutex;

use actix_web::{HttpResponse, ResponseError, http::StatusCode};

use bulwark_core::{AppError, ErrorKind};
use bulwark_shared::ErrorResponse;

pub struct HttpError {
    kind: ErrorKind,
    status: StatusCode,
    inner: Mutex<Option<AppError>>,
}

impl HttpError {
    /// Move the wrapped error out. `None` once taken.
    pub fn take(&self) -> Option<AppError> {
        self.inner.lock().ok().and_then(|mut slot| slot.take())
    }
}

impl From<AppError> for HttpError {
    fn from(err: AppError) -> Self {
        Self {
            kind: err.kind,
            status: StatusCode::from_u16(err.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            inner: Mutex::new(Some(err)),
        }
    }
}

impl fmt::Debug for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpError")
            .field("kind", &self.kind)
            .field("status", &self.status)
            .finish()
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.kind, self.status)
    }
}

impl ResponseError for HttpError {
    fn status_code(&self) -> StatusCode {
        self.status
    }

    /// Bare body used only when no error pipeline is installed.
    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status).json(ErrorResponse::new(
            self.kind.as_str(),
            self.status.canonical_reason().unwrap_or("Error"),
        ))
    }
}

/// Result type alias for handlers.
pub type HttpResult<T> = Result<T, HttpError>;

/// Map an actix error that did not originate here onto the taxonomy.
pub fn classify_actix(err: &actix_web::Error) -> AppError {
    if let Some(http) = err.as_error::<HttpError>() {
        return http
            .take()
            .unwrap_or_else(|| AppError::internal("Error was already rendered"));
    }

    let status = err.as_response_error().status_code();
    let message = err.to_string();
    match status {
        StatusCode::NOT_FOUND => AppError::new(ErrorKind::NotFound, "Resource not found"),
        StatusCode::UNAUTHORIZED => AppError::authentication(message),
        StatusCode::FORBIDDEN => AppError::authorization(message),
        StatusCode::REQUEST_TIMEOUT => AppError::timeout("request"),
        s if s.is_client_error() => AppError::validation(message),
        _ => AppError::internal(message),
    }
}
