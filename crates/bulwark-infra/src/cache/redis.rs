//! Redis client shared by every Redis-backed component, plus the `Cache`
//! implementation on top of it.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisResult};

use bulwark_core::ports::{Cache, CacheError};

use crate::env;

/// Redis connection configuration.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis URL (e.g., redis://localhost:6379)
    pub url: String,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Upper bound on any single command
    pub op_timeout: Duration,
    /// Whether to fallback to in-process state if Redis is unavailable
    pub fallback_to_memory: bool,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            connect_timeout: Duration::from_secs(5),
            op_timeout: Duration::from_millis(250),
            fallback_to_memory: true,
        }
    }
}

impl RedisConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            url: std::env::var("REDIS_URL").unwrap_or(defaults.url),
            connect_timeout: env::secs_or("REDIS_CONNECT_TIMEOUT_SECS", defaults.connect_timeout),
            op_timeout: env::millis_or("REDIS_OP_TIMEOUT_MS", defaults.op_timeout),
            fallback_to_memory: env::flag_or(
                "REDIS_FALLBACK_TO_MEMORY",
                defaults.fallback_to_memory,
            ),
        }
    }
}

/// Connection manager plus the per-command timeout.
///
/// Cheap to clone; every Redis-backed store holds one.
#[derive(Clone)]
pub struct RedisClient {
    conn: ConnectionManager,
    op_timeout: Duration,
}

impl RedisClient {
    pub async fn connect(config: &RedisConfig) -> Result<Self, CacheError> {
        let client =
            Client::open(config.url.as_str()).map_err(|e| CacheError::Connection(e.to_string()))?;

        // Use timeout to prevent hanging if Redis is unreachable
        let conn_manager_fut = ConnectionManager::new(client);
        let conn = tokio::time::timeout(config.connect_timeout, conn_manager_fut)
            .await
            .map_err(|_| CacheError::Connection("Connection timed out".to_string()))?
            .map_err(|e| CacheError::Connection(e.to_string()))?;

        let client = Self {
            conn,
            op_timeout: config.op_timeout,
        };
        client.ping().await?;

        tracing::info!(url = %config.url, "Connected to Redis");
        Ok(client)
    }

    pub fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }

    /// Await a Redis command under the configured timeout.
    pub async fn run<T, F>(&self, fut: F) -> Result<T, CacheError>
    where
        F: Future<Output = RedisResult<T>>,
    {
        tokio::time::timeout(self.op_timeout, fut)
            .await
            .map_err(|_| CacheError::Timeout(self.op_timeout))?
            .map_err(|e| CacheError::Operation(e.to_string()))
    }

    pub async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.connection();
        let _pong: String = self.run(redis::cmd("PING").query_async(&mut conn)).await?;
        Ok(())
    }
}

/// Redis-backed cache implementation.
pub struct RedisCache {
    client: RedisClient,
}

impl RedisCache {
    pub fn new(client: RedisClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.client.connection();
        self.client.run(conn.get::<_, Option<String>>(key)).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        let mut conn = self.client.connection();

        match ttl {
            Some(duration) => {
                let millis = duration.as_millis().max(1) as u64;
                self.client
                    .run(conn.pset_ex::<_, _, ()>(key, value, millis))
                    .await
            }
            None => self.client.run(conn.set::<_, _, ()>(key, value)).await,
        }
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.client.connection();
        self.client.run(conn.del::<_, ()>(key)).await
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.client.connection();
        self.client.run(conn.exists::<_, bool>(key)).await
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}

/// Test helper shared by the Redis-backed modules.
#[cfg(test)]
pub(crate) async fn test_client() -> Option<RedisClient> {
    let config = RedisConfig {
        url: std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6389".to_string()),
        connect_timeout: Duration::from_secs(1),
        op_timeout: Duration::from_secs(1),
        fallback_to_memory: false,
    };

    RedisClient::connect(&config).await.ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn get_test_cache() -> Option<RedisCache> {
        test_client().await.map(RedisCache::new)
    }

    #[tokio::test]
    async fn test_redis_cache_set_get() {
        let cache = match get_test_cache().await {
            Some(c) => c,
            None => {
                tracing::warn!("Redis not available, skipping test");
                return;
            }
        };

        let key = "bulwark_test_key";
        let value = "test_value";

        cache.set(key, value, None).await.unwrap();
        assert_eq!(cache.get(key).await.unwrap(), Some(value.to_string()));

        cache.delete(key).await.unwrap();
        assert_eq!(cache.get(key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_redis_cache_ttl() {
        let cache = match get_test_cache().await {
            Some(c) => c,
            None => return,
        };

        let key = "bulwark_test_ttl_key";

        cache
            .set(key, "v", Some(Duration::from_millis(300)))
            .await
            .unwrap();
        assert!(cache.exists(key).await.unwrap());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(cache.get(key).await.unwrap(), None);
    }
}
