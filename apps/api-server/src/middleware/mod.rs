//! Middleware modules.

mod api_key;
mod pipeline;
mod rate_limit;
mod request;
mod security_headers;
mod session;
mod timeout;
mod validation;

pub use api_key::ApiKeyAuth;
pub use pipeline::ErrorPipeline;
pub use rate_limit::RateLimitMiddleware;
pub use request::describe;
pub use security_headers::SecurityHeaders;
pub use session::{Authenticated, SessionResolver, session_token};
pub use timeout::RequestTimeout;
pub use validation::ValidationMiddleware;
