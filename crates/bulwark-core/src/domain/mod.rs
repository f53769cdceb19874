//! Domain records - the state the security components own.

mod api_key;
mod request;
mod session;
mod user;

pub use api_key::{ApiKey, ApiKeyUpdate, ApiKeyUsage, IssueApiKey, IssuedApiKey};
pub use request::{Identity, RequestDescriptor};
pub use session::{LoginAttemptCounter, Session};
pub use user::User;
