//! Ports - trait definitions for external dependencies.
//! These are the "interfaces" that infrastructure must implement.

mod api_key;
mod auth;
mod cache;
mod rate_limit;
mod repository;
mod session;

pub use api_key::ApiKeyRepository;
pub use auth::{MfaVerifier, PasswordService};
pub use cache::{Cache, CacheError};
pub use rate_limit::{SlidingWindow, WindowOutcome};
pub use repository::UserDirectory;
pub use session::{LockoutPolicy, LoginAttemptStore, SessionStore, attempt_key};
