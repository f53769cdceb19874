//! Application configuration loaded from environment variables.

use std::env;
use std::time::Duration;

use thiserror::Error;

use bulwark_infra::api_key::ApiKeyConfig;
use bulwark_infra::auth::AuthConfig;
use bulwark_infra::rate_limit::RateLimiterConfig;
use bulwark_infra::resilience::{Environment, ErrorHandlerConfig};
use bulwark_infra::validation::ValidatorConfig;

#[cfg(feature = "postgres")]
use bulwark_infra::database::DatabaseConfig;
#[cfg(feature = "redis")]
use bulwark_infra::cache::RedisConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings for every defense component.
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub rate_limit: RateLimiterConfig,
    pub validation: ValidatorConfig,
    pub auth: AuthConfig,
    pub api_keys: ApiKeyConfig,
    pub errors: ErrorHandlerConfig,
    /// Deadline for a whole request, middleware included.
    pub request_timeout: Duration,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            rate_limit: RateLimiterConfig::default(),
            validation: ValidatorConfig::default(),
            auth: AuthConfig::default(),
            api_keys: ApiKeyConfig::default(),
            errors: ErrorHandlerConfig::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl SecurityConfig {
    pub fn from_env() -> Self {
        Self {
            rate_limit: RateLimiterConfig::from_env(),
            validation: ValidatorConfig::from_env(),
            auth: AuthConfig::from_env(),
            api_keys: ApiKeyConfig::from_env(),
            errors: ErrorHandlerConfig::from_env(),
            request_timeout: env::var("REQUEST_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.trim().parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT),
        }
    }

    /// Reject settings that would disable a defense by accident.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let rl = &self.rate_limit;
        for (field, tier) in [
            ("rate limit global tier", rl.global),
            ("rate limit per-IP tier", rl.per_ip),
            ("rate limit per-user tier", rl.per_user),
        ] {
            if tier.rps == 0 || tier.burst == 0 {
                return Err(invalid(field, "rps and burst must be positive"));
            }
        }
        if let Some((path, _)) = rl.endpoints.iter().find(|(_, t)| t.burst == 0) {
            return Err(invalid("rate limit endpoint override", format!("{} has zero burst", path)));
        }
        if rl.window.is_zero() {
            return Err(invalid("rate limit window", "must be positive"));
        }
        if rl.cleanup_interval.is_zero() {
            return Err(invalid("cleanup interval", "must be positive"));
        }
        if rl.suspicion_threshold == 0 {
            return Err(invalid("suspicion threshold", "must be positive"));
        }

        if self.request_timeout.is_zero() {
            return Err(invalid("request timeout", "must be positive"));
        }

        if self.validation.max_file_size == 0 {
            return Err(invalid("max file size", "must be positive"));
        }

        let auth = &self.auth;
        if auth.max_login_attempts == 0 {
            return Err(invalid("max login attempts", "must be positive"));
        }
        if auth.session_timeout.is_zero() {
            return Err(invalid("session timeout", "must be positive"));
        }
        if auth.max_active_sessions == 0 {
            return Err(invalid("max active sessions", "must be positive"));
        }
        if auth.password.min_length < 4 {
            return Err(invalid("password min length", "must be at least 4"));
        }

        let keys = &self.api_keys;
        if keys.key_length < 16 {
            return Err(invalid("API key length", "must be at least 16 bytes"));
        }
        if keys.prefix_length == 0 || keys.prefix_length >= keys.key_length * 2 {
            return Err(invalid("API key prefix length", "must be shorter than the key"));
        }
        if keys.default_ttl > keys.max_ttl {
            return Err(invalid("API key default TTL", "exceeds the maximum TTL"));
        }
        if keys.default_rate_limit > keys.max_rate_limit {
            return Err(invalid("API key default rate limit", "exceeds the maximum"));
        }

        Ok(())
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub security: SecurityConfig,
    /// `username:password[:role]` entries for the login directory.
    pub seed_users: Vec<String>,
    #[cfg(feature = "postgres")]
    pub database: Option<DatabaseConfig>,
    /// Present when `REDIS_URL` is set.
    #[cfg(feature = "redis")]
    pub redis: Option<RedisConfig>,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let security = SecurityConfig::from_env();
        security.validate()?;

        let seed_users = env::var("SEED_USERS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            security,
            seed_users,
            #[cfg(feature = "postgres")]
            database: DatabaseConfig::from_env(),
            #[cfg(feature = "redis")]
            redis: env::var("REDIS_URL").is_ok().then(RedisConfig::from_env),
        })
    }

    pub fn environment(&self) -> Environment {
        self.security.errors.environment
    }
}
