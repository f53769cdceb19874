//! Multi-tier rate limiter.
//!
//! Tiers are checked in order: blocked IP, whitelist, global bucket, per-IP
//! bucket, per-user window, per-endpoint window. The first denial wins.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use governor::clock::{Clock, DefaultClock};
use governor::middleware::StateInformationMiddleware;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as Governor};
use serde::Serialize;

use bulwark_core::AppError;
use bulwark_core::domain::RequestDescriptor;
use bulwark_core::ports::SlidingWindow;

use super::config::{RateLimiterConfig, TierLimit};

type GlobalBucket = Governor<NotKeyed, InMemoryState, DefaultClock, StateInformationMiddleware>;
type IpBuckets =
    Governor<String, DefaultKeyedStateStore<String>, DefaultClock, StateInformationMiddleware>;

/// Which tier produced a denial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitScope {
    Blocked,
    Global,
    Ip,
    User,
    Endpoint,
}

impl LimitScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitScope::Blocked => "blocked",
            LimitScope::Global => "global",
            LimitScope::Ip => "ip",
            LimitScope::User => "user",
            LimitScope::Endpoint => "endpoint",
        }
    }

    fn message(&self) -> &'static str {
        match self {
            LimitScope::Blocked => "IP address temporarily blocked",
            LimitScope::Global => "Global rate limit exceeded",
            LimitScope::Ip => "IP rate limit exceeded",
            LimitScope::User => "User rate limit exceeded",
            LimitScope::Endpoint => "Endpoint rate limit exceeded",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allow {
        limit: u32,
        remaining: u32,
    },
    Deny {
        scope: LimitScope,
        limit: u32,
        retry_after: Duration,
    },
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitDecision::Allow { .. })
    }

    /// The rate-limit error for a denial; `None` when allowed.
    pub fn into_error(self) -> Option<AppError> {
        match self {
            RateLimitDecision::Allow { .. } => None,
            RateLimitDecision::Deny {
                scope,
                limit,
                retry_after,
            } => Some(
                AppError::rate_limited(scope.message(), retry_after)
                    .with_detail("limit", limit)
                    .with_detail("scope", scope.as_str()),
            ),
        }
    }
}

/// Counters reported by [`RateLimiter::stats`].
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitStats {
    pub tracked_ips: usize,
    pub blocked_ips: usize,
    pub suspicious_ips: usize,
    pub window_keys: usize,
    pub backend: &'static str,
}

#[derive(Debug, Clone, Copy)]
struct Suspicion {
    violations: u32,
    last_violation: Instant,
}

fn nonzero(n: u32) -> NonZeroU32 {
    NonZeroU32::new(n).unwrap_or(NonZeroU32::MIN)
}

fn quota(limit: TierLimit) -> Quota {
    Quota::per_second(nonzero(limit.rps)).allow_burst(nonzero(limit.burst))
}

pub struct RateLimiter {
    config: RateLimiterConfig,
    global: GlobalBucket,
    per_ip: IpBuckets,
    windows: Arc<dyn SlidingWindow>,
    blocked: DashMap<String, Instant>,
    suspicion: DashMap<String, Suspicion>,
    clock: DefaultClock,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig, windows: Arc<dyn SlidingWindow>) -> Self {
        let global = Governor::direct(quota(config.global))
            .with_middleware::<StateInformationMiddleware>();
        let per_ip = Governor::keyed(quota(config.per_ip))
            .with_middleware::<StateInformationMiddleware>();

        Self {
            config,
            global,
            per_ip,
            windows,
            blocked: DashMap::new(),
            suspicion: DashMap::new(),
            clock: DefaultClock::default(),
        }
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    pub async fn check(&self, request: &RequestDescriptor) -> RateLimitDecision {
        let ip = request.client_ip();

        if let Some(remaining) = self.block_remaining(&ip) {
            return RateLimitDecision::Deny {
                scope: LimitScope::Blocked,
                limit: 0,
                retry_after: remaining,
            };
        }

        if self.is_whitelisted(&ip, request) {
            return RateLimitDecision::Allow {
                limit: self.config.per_ip.burst,
                remaining: self.config.per_ip.burst,
            };
        }

        let mut tightest = match self.global.check() {
            Ok(snapshot) => (self.config.global.burst, snapshot.remaining_burst_capacity()),
            Err(not_until) => {
                tracing::warn!(ip = %ip, "Global rate limit exceeded");
                return RateLimitDecision::Deny {
                    scope: LimitScope::Global,
                    limit: self.config.global.burst,
                    retry_after: not_until.wait_time_from(self.clock.now()),
                };
            }
        };

        match self.per_ip.check_key(&ip) {
            Ok(snapshot) => {
                let remaining = snapshot.remaining_burst_capacity();
                tightest = tighter(tightest, (self.config.per_ip.burst, remaining));
            }
            Err(not_until) => {
                self.record_violation(&ip);
                return RateLimitDecision::Deny {
                    scope: LimitScope::Ip,
                    limit: self.config.per_ip.burst,
                    retry_after: not_until.wait_time_from(self.clock.now()),
                };
            }
        }

        if let Some(identity) = &request.identity {
            let key = format!("user:{}", identity.user_id);
            match self.window_hit(&key, self.config.per_user).await {
                Some(Ok(remaining)) => {
                    tightest = tighter(tightest, (self.config.per_user.burst, remaining));
                }
                Some(Err(retry_after)) => {
                    tracing::warn!(
                        user_id = %identity.user_id,
                        ip = %ip,
                        "User rate limit exceeded"
                    );
                    return RateLimitDecision::Deny {
                        scope: LimitScope::User,
                        limit: self.config.per_user.burst,
                        retry_after,
                    };
                }
                None => {}
            }
        }

        if let Some(limit) = self.config.endpoints.get(&request.path).copied() {
            let key = format!("endpoint:{}:{}", request.path, ip);
            match self.window_hit(&key, limit).await {
                Some(Ok(remaining)) => tightest = tighter(tightest, (limit.burst, remaining)),
                Some(Err(retry_after)) => {
                    tracing::warn!(path = %request.path, ip = %ip, "Endpoint rate limit exceeded");
                    return RateLimitDecision::Deny {
                        scope: LimitScope::Endpoint,
                        limit: limit.burst,
                        retry_after,
                    };
                }
                None => {}
            }
        }

        RateLimitDecision::Allow {
            limit: tightest.0,
            remaining: tightest.1,
        }
    }

    /// `Some(Ok(remaining))`, `Some(Err(retry_after))`, or `None` when the
    /// window backend failed and the tier is skipped.
    async fn window_hit(&self, key: &str, limit: TierLimit) -> Option<Result<u32, Duration>> {
        match self.windows.hit(key, limit.burst, self.config.window).await {
            Ok(outcome) if outcome.allowed => Some(Ok(outcome.remaining(limit.burst))),
            Ok(outcome) => Some(Err(outcome.retry_after)),
            Err(e) => {
                tracing::warn!(
                    event = "rate_limit_degraded",
                    key = %key,
                    backend = self.windows.backend(),
                    error = %e,
                    "Sliding window unavailable, failing open"
                );
                None
            }
        }
    }

    fn is_whitelisted(&self, ip: &str, request: &RequestDescriptor) -> bool {
        if self.config.whitelisted_ips.contains(ip) {
            return true;
        }
        request.identity.as_ref().is_some_and(|identity| {
            self.config.whitelisted_users.contains(&identity.username)
                || self
                    .config
                    .whitelisted_users
                    .contains(&identity.user_id.to_string())
        })
    }

    fn record_violation(&self, ip: &str) {
        let now = Instant::now();
        let violations = {
            let mut entry = self.suspicion.entry(ip.to_string()).or_insert(Suspicion {
                violations: 0,
                last_violation: now,
            });
            if now.duration_since(entry.last_violation) > self.config.window {
                entry.violations = 0;
            }
            entry.violations += 1;
            entry.last_violation = now;
            entry.violations
        };

        tracing::warn!(ip = %ip, violations, "IP rate limit exceeded");

        if violations >= self.config.suspicion_threshold {
            self.suspicion.remove(ip);
            self.block_ip(ip, self.config.block_duration);
        }
    }

    pub fn block_ip(&self, ip: &str, duration: Duration) {
        self.blocked.insert(ip.to_string(), Instant::now() + duration);
        tracing::warn!(
            event = "ip_blocked",
            ip = %ip,
            duration_secs = duration.as_secs(),
            "IP blocked"
        );
    }

    pub fn unblock_ip(&self, ip: &str) -> bool {
        let removed = self.blocked.remove(ip).is_some();
        if removed {
            tracing::info!(event = "ip_unblocked", ip = %ip, "IP unblocked");
        }
        removed
    }

    pub fn is_blocked(&self, ip: &str) -> bool {
        self.block_remaining(ip).is_some()
    }

    fn block_remaining(&self, ip: &str) -> Option<Duration> {
        let now = Instant::now();
        if self.blocked.remove_if(ip, |_, until| *until <= now).is_some() {
            return None;
        }
        self.blocked.get(ip).map(|until| until.saturating_duration_since(now))
    }

    /// Drop expired blocks, decayed suspicion, idle buckets, and empty windows.
    pub async fn cleanup(&self) -> usize {
        let now = Instant::now();

        let blocks_before = self.blocked.len();
        self.blocked.retain(|_, until| *until > now);
        let blocks = blocks_before.saturating_sub(self.blocked.len());

        let suspicion_before = self.suspicion.len();
        self.suspicion
            .retain(|_, s| now.duration_since(s.last_violation) <= self.config.window);
        let suspicions = suspicion_before.saturating_sub(self.suspicion.len());

        let buckets_before = self.per_ip.len();
        self.per_ip.retain_recent();
        self.per_ip.shrink_to_fit();
        let buckets = buckets_before.saturating_sub(self.per_ip.len());

        let windows = self.windows.cleanup(self.config.window).await;

        let removed = blocks + suspicions + buckets + windows;
        tracing::debug!(blocks, suspicions, buckets, windows, "Rate limiter cleanup");
        removed
    }

    pub async fn stats(&self) -> RateLimitStats {
        RateLimitStats {
            tracked_ips: self.per_ip.len(),
            blocked_ips: self.blocked.len(),
            suspicious_ips: self.suspicion.len(),
            window_keys: self.windows.tracked_keys().await,
            backend: self.windows.backend(),
        }
    }
}

fn tighter(a: (u32, u32), b: (u32, u32)) -> (u32, u32) {
    if b.1 < a.1 { b } else { a }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemorySlidingWindow;
    use bulwark_core::domain::Identity;
    use uuid::Uuid;

    fn limiter(config: RateLimiterConfig) -> RateLimiter {
        RateLimiter::new(config, Arc::new(InMemorySlidingWindow::new()))
    }

    fn from_ip(ip: &str) -> RequestDescriptor {
        RequestDescriptor::new("GET", "/api/projects").with_peer_addr(format!("{}:5000", ip))
    }

    #[tokio::test]
    async fn test_ip_burst_then_deny_with_retry_after() {
        let limiter = limiter(RateLimiterConfig {
            per_ip: TierLimit::new(5, 10),
            ..RateLimiterConfig::default()
        });

        for _ in 0..10 {
            assert!(limiter.check(&from_ip("1.2.3.4")).await.is_allowed());
        }

        match limiter.check(&from_ip("1.2.3.4")).await {
            RateLimitDecision::Deny {
                scope,
                limit,
                retry_after,
            } => {
                assert_eq!(scope, LimitScope::Ip);
                assert_eq!(limit, 10);
                assert!(retry_after > Duration::ZERO);
            }
            other => panic!("expected deny, got {:?}", other),
        }

        // Another client is unaffected.
        assert!(limiter.check(&from_ip("5.6.7.8")).await.is_allowed());
    }

    #[tokio::test]
    async fn test_allow_reports_remaining() {
        let limiter = limiter(RateLimiterConfig {
            per_ip: TierLimit::new(1, 3),
            ..RateLimiterConfig::default()
        });

        match limiter.check(&from_ip("9.9.9.9")).await {
            RateLimitDecision::Allow { limit, remaining } => {
                assert_eq!(limit, 3);
                assert_eq!(remaining, 2);
            }
            other => panic!("expected allow, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_repeated_violations_block_the_ip() {
        let limiter = limiter(RateLimiterConfig {
            per_ip: TierLimit::new(1, 1),
            suspicion_threshold: 3,
            ..RateLimiterConfig::default()
        });
        let request = from_ip("6.6.6.6");

        assert!(limiter.check(&request).await.is_allowed());
        for _ in 0..3 {
            assert!(!limiter.check(&request).await.is_allowed());
        }
        assert!(limiter.is_blocked("6.6.6.6"));

        match limiter.check(&request).await {
            RateLimitDecision::Deny {
                scope, retry_after, ..
            } => {
                assert_eq!(scope, LimitScope::Blocked);
                assert!(retry_after > Duration::from_secs(800));
            }
            other => panic!("expected blocked, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_block_supersedes_remaining_budget() {
        let limiter = limiter(RateLimiterConfig::default());
        limiter.block_ip("7.7.7.7", Duration::from_secs(60));

        let decision = limiter.check(&from_ip("7.7.7.7")).await;
        let err = decision.into_error().unwrap();
        assert_eq!(err.status_code(), 429);
        assert_eq!(err.details["scope"], "blocked");
        assert!(err.retry_after().unwrap() >= 59);

        assert!(limiter.unblock_ip("7.7.7.7"));
        assert!(limiter.check(&from_ip("7.7.7.7")).await.is_allowed());
    }

    #[tokio::test]
    async fn test_block_expires() {
        let limiter = limiter(RateLimiterConfig::default());
        limiter.block_ip("8.8.8.8", Duration::from_millis(20));
        assert!(limiter.is_blocked("8.8.8.8"));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!limiter.is_blocked("8.8.8.8"));
    }

    #[tokio::test]
    async fn test_whitelist_short_circuits() {
        let mut config = RateLimiterConfig {
            per_ip: TierLimit::new(1, 1),
            ..RateLimiterConfig::default()
        };
        config.whitelisted_ips.insert("10.0.0.1".to_string());
        let limiter = limiter(config);

        for _ in 0..5 {
            assert!(limiter.check(&from_ip("10.0.0.1")).await.is_allowed());
        }
    }

    #[tokio::test]
    async fn test_block_applies_to_whitelisted_ip() {
        let mut config = RateLimiterConfig::default();
        config.whitelisted_ips.insert("10.0.0.2".to_string());
        let limiter = limiter(config);
        limiter.block_ip("10.0.0.2", Duration::from_secs(60));

        let err = limiter.check(&from_ip("10.0.0.2")).await.into_error().unwrap();
        assert_eq!(err.details["scope"], "blocked");
    }

    #[tokio::test]
    async fn test_user_window() {
        let limiter = limiter(RateLimiterConfig {
            per_user: TierLimit::new(1, 2),
            ..RateLimiterConfig::default()
        });
        let alice = Identity::new(Uuid::new_v4(), "alice", "user");

        // Same user from different IPs shares one budget.
        for ip in ["1.1.1.1", "2.2.2.2"] {
            let request = from_ip(ip).with_identity(alice.clone());
            assert!(limiter.check(&request).await.is_allowed());
        }

        let request = from_ip("3.3.3.3").with_identity(alice);
        let err = limiter.check(&request).await.into_error().unwrap();
        assert_eq!(err.message, "User rate limit exceeded");
        assert_eq!(err.details["limit"], 2);
    }

    #[tokio::test]
    async fn test_endpoint_override() {
        let limiter = limiter(RateLimiterConfig::default());
        let login = || {
            RequestDescriptor::new("POST", "/api/auth/login")
                .with_header("X-Forwarded-For", "4.4.4.4")
        };

        for _ in 0..20 {
            assert!(limiter.check(&login()).await.is_allowed());
        }
        let err = limiter.check(&login()).await.into_error().unwrap();
        assert_eq!(err.details["scope"], "endpoint");

        // Other paths from the same IP still pass.
        assert!(limiter.check(&from_ip("4.4.4.4")).await.is_allowed());
    }

    #[tokio::test]
    async fn test_cleanup_and_stats() {
        let limiter = limiter(RateLimiterConfig::default());
        limiter.check(&from_ip("1.2.3.4")).await;
        limiter.block_ip("5.5.5.5", Duration::from_millis(1));
        tokio::time::sleep(Duration::from_millis(5)).await;

        let stats = limiter.stats().await;
        assert_eq!(stats.tracked_ips, 1);
        assert_eq!(stats.blocked_ips, 1);
        assert_eq!(stats.backend, "memory");

        assert!(limiter.cleanup().await >= 1);
        assert_eq!(limiter.stats().await.blocked_ips, 0);
    }
}
