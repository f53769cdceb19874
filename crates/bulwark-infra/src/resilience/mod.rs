//! Error taxonomy handling, circuit breakers, retry, and panic recovery.

mod circuit_breaker;
mod handler;
mod recovery;
mod retry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitError, CircuitSnapshot,
    CircuitState, StateObserver,
};
pub use handler::{Environment, ErrorHandler, ErrorHandlerConfig, FallbackRenderer};
pub use recovery::{panic_message, recover};
pub use retry::{RetryPolicy, retry_with_backoff};
