//! Panic containment at request boundaries.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;

use bulwark_core::AppError;

/// Drive `fut`, turning a panic into a critical internal error.
pub async fn recover<F, T>(fut: F) -> Result<T, AppError>
where
    F: Future<Output = T>,
{
    AssertUnwindSafe(fut)
        .catch_unwind()
        .await
        .map_err(|payload| AppError::panic_recovered(panic_message(payload.as_ref())))
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulwark_core::{ErrorKind, Severity};

    #[tokio::test]
    async fn test_passes_values_through() {
        assert_eq!(recover(async { 7 }).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_panic_becomes_critical_internal_error() {
        let result: Result<(), AppError> = recover(async { panic!("handler exploded") }).await;
        let err = result.unwrap_err();

        assert_eq!(err.kind, ErrorKind::Internal);
        assert_eq!(err.severity, Severity::Critical);
        assert_eq!(err.code, "PANIC_RECOVERED");
        assert_eq!(err.details["panic"], "handler exploded");
    }
}
