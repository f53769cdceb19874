//! Dual-backend state for sessions, login attempts, rate windows and cache entries.

mod failover;
mod memory;

pub use failover::{
    FailoverCache, FailoverLoginAttemptStore, FailoverSessionStore, FailoverSlidingWindow,
    SHARED_CACHE_BREAKER,
};
pub use memory::{InMemoryLoginAttemptStore, InMemorySessionStore, InMemorySlidingWindow};

#[cfg(feature = "redis")]
mod redis;
#[cfg(feature = "redis")]
pub use self::redis::{RedisLoginAttemptStore, RedisSessionStore, RedisSlidingWindow};
