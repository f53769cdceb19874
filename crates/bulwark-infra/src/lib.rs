//! # Bulwark Infrastructure
//!
//! The request-defense components and the storage backends behind the ports
//! defined in `bulwark-core`.
//!
//! ## Feature Flags
//!
//! - `full` (default) - All features enabled
//! - `minimal` - No external services, in-process state only
//! - `postgres` - PostgreSQL API key store via SeaORM
//! - `auth` - Auth hardener with Argon2 password hashing
//! - `rate-limit` - Rate limiter with governor token buckets
//! - `redis` - Redis-backed cache, sessions, lockout counters and rate windows

pub mod api_key;
pub mod cache;
pub mod resilience;
pub mod store;
pub mod validation;

mod env;

#[cfg(feature = "postgres")]
pub mod database;

#[cfg(feature = "auth")]
pub mod auth;

#[cfg(feature = "rate-limit")]
pub mod rate_limit;

// Re-exports - In-Memory
pub use api_key::{ApiKeyConfig, ApiKeyManager, InMemoryApiKeyRepository};
pub use cache::InMemoryCache;
pub use resilience::{ErrorHandler, ErrorHandlerConfig};
pub use store::{InMemoryLoginAttemptStore, InMemorySessionStore, InMemorySlidingWindow};
pub use validation::{InputValidator, ValidatorConfig};

#[cfg(feature = "auth")]
pub use auth::{Argon2PasswordService, AuthConfig, AuthHardener, InMemoryUserDirectory};

#[cfg(feature = "rate-limit")]
pub use rate_limit::{RateLimitDecision, RateLimiter, RateLimiterConfig};

#[cfg(feature = "postgres")]
pub use database::{DatabaseConfig, PostgresApiKeyRepository};

// Re-exports - Redis
#[cfg(feature = "redis")]
pub use cache::{RedisCache, RedisClient, RedisConfig};
#[cfg(feature = "redis")]
pub use store::{RedisLoginAttemptStore, RedisSessionStore, RedisSlidingWindow};
