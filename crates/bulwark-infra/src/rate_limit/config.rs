use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde::Serialize;

use crate::env;

/// Steady rate plus burst capacity for one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TierLimit {
    pub rps: u32,
    pub burst: u32,
}

impl TierLimit {
    pub const fn new(rps: u32, burst: u32) -> Self {
        Self { rps, burst }
    }
}

/// Rate limiter configuration.
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    pub global: TierLimit,
    pub per_ip: TierLimit,
    pub per_user: TierLimit,
    /// Trailing window for the per-user and per-endpoint tiers; also the
    /// quiet period after which the suspicion counter decays.
    pub window: Duration,
    pub cleanup_interval: Duration,
    pub block_duration: Duration,
    /// Per-IP violations that escalate to a block.
    pub suspicion_threshold: u32,
    pub whitelisted_ips: HashSet<String>,
    /// Usernames or user ids exempt from every tier.
    pub whitelisted_users: HashSet<String>,
    /// Exact request paths with their own per-(path, IP) budget.
    pub endpoints: HashMap<String, TierLimit>,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        let endpoints = [
            ("/api/auth/login", TierLimit::new(10, 20)),
            ("/api/auth/register", TierLimit::new(5, 10)),
            ("/api/auth/refresh", TierLimit::new(20, 40)),
        ]
        .into_iter()
        .map(|(path, limit)| (path.to_string(), limit))
        .collect();

        Self {
            global: TierLimit::new(1000, 2000),
            per_ip: TierLimit::new(100, 200),
            per_user: TierLimit::new(500, 1000),
            window: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(300),
            block_duration: Duration::from_secs(900),
            suspicion_threshold: 5,
            whitelisted_ips: HashSet::new(),
            whitelisted_users: HashSet::new(),
            endpoints,
        }
    }
}

impl RateLimiterConfig {
    /// Load configuration from environment variables.
    ///
    /// `RATE_LIMIT_ENDPOINTS` takes `path=rps/burst` pairs separated by commas
    /// and is merged over the default endpoint table.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let tier = |prefix: &str, fallback: TierLimit| TierLimit {
            rps: env::parse_or(&format!("RATE_LIMIT_{}_RPS", prefix), fallback.rps),
            burst: env::parse_or(&format!("RATE_LIMIT_{}_BURST", prefix), fallback.burst),
        };

        let mut endpoints = defaults.endpoints.clone();
        for entry in env::list("RATE_LIMIT_ENDPOINTS").unwrap_or_default() {
            match parse_endpoint(&entry) {
                Some((path, limit)) => {
                    endpoints.insert(path, limit);
                }
                None => {
                    tracing::warn!(entry = %entry, "Ignoring malformed RATE_LIMIT_ENDPOINTS entry")
                }
            }
        }

        Self {
            global: tier("GLOBAL", defaults.global),
            per_ip: tier("IP", defaults.per_ip),
            per_user: tier("USER", defaults.per_user),
            window: env::secs_or("RATE_LIMIT_WINDOW_SECS", defaults.window),
            cleanup_interval: env::secs_or(
                "RATE_LIMIT_CLEANUP_INTERVAL_SECS",
                defaults.cleanup_interval,
            ),
            block_duration: env::secs_or("RATE_LIMIT_BLOCK_DURATION_SECS", defaults.block_duration),
            suspicion_threshold: env::parse_or(
                "RATE_LIMIT_SUSPICION_THRESHOLD",
                defaults.suspicion_threshold,
            ),
            whitelisted_ips: env::list("RATE_LIMIT_WHITELIST_IPS")
                .map(|v| v.into_iter().collect())
                .unwrap_or_default(),
            whitelisted_users: env::list("RATE_LIMIT_WHITELIST_USERS")
                .map(|v| v.into_iter().collect())
                .unwrap_or_default(),
            endpoints,
        }
    }
}

fn parse_endpoint(entry: &str) -> Option<(String, TierLimit)> {
    let (path, limits) = entry.split_once('=')?;
    let (rps, burst) = limits.split_once('/')?;
    Some((
        path.trim().to_string(),
        TierLimit::new(rps.trim().parse().ok()?, burst.trim().parse().ok()?),
    ))
}
