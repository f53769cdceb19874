//! Shared cache client - Redis with an in-process fallback.

mod memory;

pub use memory::InMemoryCache;

#[cfg(feature = "redis")]
mod redis;
#[cfg(feature = "redis")]
pub use self::redis::{RedisCache, RedisClient, RedisConfig};
#[cfg(all(test, feature = "redis"))]
pub(crate) use self::redis::test_client;
