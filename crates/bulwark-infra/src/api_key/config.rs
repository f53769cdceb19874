use std::time::Duration;

use crate::env;

const DAY: u64 = 24 * 60 * 60;

/// API key manager configuration.
#[derive(Debug, Clone)]
pub struct ApiKeyConfig {
    /// Random bytes per key; the plaintext is their hex encoding.
    pub key_length: usize,
    pub prefix_length: usize,
    /// Lifetime given to keys issued without an explicit expiry.
    pub default_ttl: Duration,
    pub max_ttl: Duration,
    pub default_rate_limit: u32,
    pub max_rate_limit: u32,
    pub require_user_agent: bool,
    pub require_referer: bool,
    pub cache_ttl: Duration,
    pub usage_queue_capacity: usize,
}

impl Default for ApiKeyConfig {
    fn default() -> Self {
        Self {
            key_length: 32,
            prefix_length: 8,
            default_ttl: Duration::from_secs(365 * DAY),
            max_ttl: Duration::from_secs(5 * 365 * DAY),
            default_rate_limit: 1000,
            max_rate_limit: 10_000,
            require_user_agent: false,
            require_referer: false,
            cache_ttl: Duration::from_secs(60 * 60),
            usage_queue_capacity: 1024,
        }
    }
}

impl ApiKeyConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            key_length: env::parse_or("API_KEY_LENGTH", defaults.key_length),
            prefix_length: env::parse_or("API_KEY_PREFIX_LENGTH", defaults.prefix_length),
            default_ttl: env::secs_or("API_KEY_DEFAULT_TTL_SECS", defaults.default_ttl),
            max_ttl: env::secs_or("API_KEY_MAX_TTL_SECS", defaults.max_ttl),
            default_rate_limit: env::parse_or(
                "API_KEY_DEFAULT_RATE_LIMIT",
                defaults.default_rate_limit,
            ),
            max_rate_limit: env::parse_or("API_KEY_MAX_RATE_LIMIT", defaults.max_rate_limit),
            require_user_agent: env::flag_or(
                "API_KEY_REQUIRE_USER_AGENT",
                defaults.require_user_agent,
            ),
            require_referer: env::flag_or("API_KEY_REQUIRE_REFERER", defaults.require_referer),
            cache_ttl: env::secs_or("API_KEY_CACHE_TTL_SECS", defaults.cache_ttl),
            usage_queue_capacity: env::parse_or(
                "API_KEY_USAGE_QUEUE_CAPACITY",
                defaults.usage_queue_capacity,
            ),
        }
    }
}
