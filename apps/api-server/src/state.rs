//! Application state - shared across all handlers and middleware.

use std::sync::Arc;
use std::time::Duration;

use bulwark_core::ports::{
    ApiKeyRepository, Cache, LoginAttemptStore, SessionStore, SlidingWindow, UserDirectory,
};
use bulwark_infra::api_key::{ApiKeyManager, InMemoryApiKeyRepository};
use bulwark_infra::auth::{Argon2PasswordService, AuthHardener, InMemoryUserDirectory};
use bulwark_infra::cache::InMemoryCache;
use bulwark_infra::rate_limit::RateLimiter;
use bulwark_infra::resilience::ErrorHandler;
use bulwark_infra::store::{InMemoryLoginAttemptStore, InMemorySessionStore, InMemorySlidingWindow};
use bulwark_infra::validation::InputValidator;

use crate::config::{AppConfig, SecurityConfig};

/// Which backend each kind of state ended up on.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Backends {
    pub shared_cache: &'static str,
    pub api_keys: &'static str,
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub errors: Arc<ErrorHandler>,
    pub limiter: Arc<RateLimiter>,
    pub validator: Arc<InputValidator>,
    pub auth: Arc<AuthHardener>,
    pub api_keys: Arc<ApiKeyManager>,
    pub users: Arc<dyn UserDirectory>,
    pub cache: Arc<dyn Cache>,
    /// Process-local cache, purged by maintenance even when a shared cache
    /// is in use.
    pub local_cache: Arc<InMemoryCache>,
    pub backends: Backends,
    pub request_timeout: Duration,
}

/// State backends before the components are assembled.
struct Stores {
    cache: Arc<dyn Cache>,
    sessions: Arc<dyn SessionStore>,
    attempts: Arc<dyn LoginAttemptStore>,
    windows: Arc<dyn SlidingWindow>,
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("invalid validator signature: {0}")]
    Signature(#[from] regex::Error),

    #[error("invalid seed user: {0}")]
    SeedUser(#[from] bulwark_core::error::RepoError),

    #[error("shared cache unavailable: {0}")]
    SharedCache(#[from] bulwark_core::ports::CacheError),
}

impl AppState {
    /// Build the application state with appropriate implementations.
    pub async fn new(config: &AppConfig) -> Result<Self, StateError> {
        let errors = Arc::new(ErrorHandler::new(config.security.errors.clone()));
        let local_cache = Arc::new(InMemoryCache::new());

        let stores = Self::stores(config, &errors, local_cache.clone()).await?;
        let api_key_repo = Self::api_key_repository(config).await;

        let passwords = Arc::new(Argon2PasswordService::new());
        let users = Arc::new(InMemoryUserDirectory::seeded(
            &config.seed_users,
            passwords.as_ref(),
        )?);
        if users.is_empty() {
            tracing::warn!("SEED_USERS not set. Login will reject every credential.");
        } else {
            tracing::info!(count = users.len(), "User directory seeded");
        }

        let state = Self::assemble(
            &config.security,
            errors,
            stores,
            api_key_repo,
            users,
            local_cache,
        )?;

        tracing::info!(backends = ?state.backends, "Application state initialized");
        Ok(state)
    }

    /// Everything in process. Used when no shared cache is configured, and
    /// by tests.
    pub fn in_memory(
        security: &SecurityConfig,
        users: Arc<dyn UserDirectory>,
    ) -> Result<Self, StateError> {
        let errors = Arc::new(ErrorHandler::new(security.errors.clone()));
        let local_cache = Arc::new(InMemoryCache::new());
        let stores = Stores {
            cache: local_cache.clone(),
            sessions: Arc::new(InMemorySessionStore::new()),
            attempts: Arc::new(InMemoryLoginAttemptStore::new()),
            windows: Arc::new(InMemorySlidingWindow::new()),
        };
        let repo: (Arc<dyn ApiKeyRepository>, &'static str) =
            (Arc::new(InMemoryApiKeyRepository::new()), "memory");

        Self::assemble(security, errors, stores, repo, users, local_cache)
    }

    fn assemble(
        security: &SecurityConfig,
        errors: Arc<ErrorHandler>,
        stores: Stores,
        (api_key_repo, api_key_backend): (Arc<dyn ApiKeyRepository>, &'static str),
        users: Arc<dyn UserDirectory>,
        local_cache: Arc<InMemoryCache>,
    ) -> Result<Self, StateError> {
        let limiter = Arc::new(RateLimiter::new(security.rate_limit.clone(), stores.windows));
        let validator = Arc::new(InputValidator::new(security.validation.clone())?);
        let auth = Arc::new(AuthHardener::new(
            security.auth.clone(),
            stores.sessions,
            stores.attempts,
            Arc::new(Argon2PasswordService::new()),
        ));
        let api_keys = Arc::new(ApiKeyManager::new(
            security.api_keys.clone(),
            api_key_repo,
            stores.cache.clone(),
        ));

        Ok(Self {
            errors,
            limiter,
            validator,
            auth,
            api_keys,
            users,
            backends: Backends {
                shared_cache: stores.cache.backend(),
                api_keys: api_key_backend,
            },
            cache: stores.cache,
            local_cache,
            request_timeout: security.request_timeout,
        })
    }

    #[cfg(feature = "redis")]
    async fn stores(
        config: &AppConfig,
        errors: &ErrorHandler,
        local_cache: Arc<InMemoryCache>,
    ) -> Result<Stores, StateError> {
        use bulwark_infra::cache::{RedisCache, RedisClient};
        use bulwark_infra::store::{
            FailoverCache, FailoverLoginAttemptStore, FailoverSessionStore, FailoverSlidingWindow,
            RedisLoginAttemptStore, RedisSessionStore, RedisSlidingWindow, SHARED_CACHE_BREAKER,
        };

        let Some(redis_config) = &config.redis else {
            tracing::warn!("REDIS_URL not set. Running with in-process state only.");
            return Ok(Self::memory_stores(local_cache));
        };

        let client = match RedisClient::connect(redis_config).await {
            Ok(client) => client,
            Err(e) if redis_config.fallback_to_memory => {
                tracing::error!("Failed to connect to Redis: {}. Using in-process fallback.", e);
                return Ok(Self::memory_stores(local_cache));
            }
            Err(e) => return Err(e.into()),
        };

        let breaker = errors.breaker(SHARED_CACHE_BREAKER);
        Ok(Stores {
            cache: Arc::new(FailoverCache::new(
                Arc::new(RedisCache::new(client.clone())),
                local_cache,
                breaker.clone(),
            )),
            sessions: Arc::new(FailoverSessionStore::new(
                Arc::new(RedisSessionStore::new(client.clone())),
                Arc::new(InMemorySessionStore::new()),
                breaker.clone(),
            )),
            attempts: Arc::new(FailoverLoginAttemptStore::new(
                Arc::new(RedisLoginAttemptStore::new(client.clone())),
                Arc::new(InMemoryLoginAttemptStore::new()),
                breaker.clone(),
            )),
            windows: Arc::new(FailoverSlidingWindow::new(
                Arc::new(RedisSlidingWindow::new(client)),
                Arc::new(InMemorySlidingWindow::new()),
                breaker,
            )),
        })
    }

    #[cfg(not(feature = "redis"))]
    async fn stores(
        _config: &AppConfig,
        _errors: &ErrorHandler,
        local_cache: Arc<InMemoryCache>,
    ) -> Result<Stores, StateError> {
        tracing::info!("Running without redis feature - using in-process state");
        Ok(Self::memory_stores(local_cache))
    }

    fn memory_stores(local_cache: Arc<InMemoryCache>) -> Stores {
        Stores {
            cache: local_cache,
            sessions: Arc::new(InMemorySessionStore::new()),
            attempts: Arc::new(InMemoryLoginAttemptStore::new()),
            windows: Arc::new(InMemorySlidingWindow::new()),
        }
    }

    #[cfg(feature = "postgres")]
    async fn api_key_repository(config: &AppConfig) -> (Arc<dyn ApiKeyRepository>, &'static str) {
        use bulwark_infra::database::{PostgresApiKeyRepository, connect};

        if let Some(db_config) = &config.database {
            match connect(db_config).await {
                Ok(conn) => return (Arc::new(PostgresApiKeyRepository::new(conn)), "postgres"),
                Err(e) => tracing::error!(
                    "Failed to connect to database: {}. Using in-memory API key store.",
                    e
                ),
            }
        } else {
            tracing::warn!("DATABASE_URL not set. API keys live in process memory.");
        }
        (Arc::new(InMemoryApiKeyRepository::new()), "memory")
    }

    #[cfg(not(feature = "postgres"))]
    async fn api_key_repository(_config: &AppConfig) -> (Arc<dyn ApiKeyRepository>, &'static str) {
        tracing::info!("Running without postgres feature - using in-memory API key store");
        (Arc::new(InMemoryApiKeyRepository::new()), "memory")
    }
}
