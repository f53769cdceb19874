//! Session and login-attempt storage ports.

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use super::CacheError;
use crate::domain::{LoginAttemptCounter, Session};

/// Session persistence. The store is the system of record for sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert or overwrite a session; `ttl` bounds how long the backend keeps it.
    async fn save(&self, session: &Session, ttl: Duration) -> Result<(), CacheError>;

    async fn get(&self, id: &str) -> Result<Option<Session>, CacheError>;

    async fn remove(&self, id: &str) -> Result<Option<Session>, CacheError>;

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Session>, CacheError>;

    /// Evict sessions idle for longer than `timeout`. Backends with native
    /// expiry return 0.
    async fn purge_idle(&self, _timeout: Duration) -> usize {
        0
    }

    async fn count(&self) -> usize {
        0
    }

    fn backend(&self) -> &'static str;
}

/// Lockout thresholds applied by [`LoginAttemptStore::record_failure`].
#[derive(Debug, Clone, Copy)]
pub struct LockoutPolicy {
    pub max_attempts: u32,
    /// Failures older than this no longer count.
    pub window: Duration,
    pub lockout: Duration,
}

impl LockoutPolicy {
    pub fn window_delta(&self) -> chrono::Duration {
        to_delta(self.window)
    }

    pub fn lockout_delta(&self) -> chrono::Duration {
        to_delta(self.lockout)
    }
}

fn to_delta(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}

/// Failed-login counters keyed by (username, IP).
#[async_trait]
pub trait LoginAttemptStore: Send + Sync {
    async fn get(&self, username: &str, ip: &str)
    -> Result<Option<LoginAttemptCounter>, CacheError>;

    /// Atomically count one failure and lock when the policy says so.
    async fn record_failure(
        &self,
        username: &str,
        ip: &str,
        policy: &LockoutPolicy,
    ) -> Result<LoginAttemptCounter, CacheError>;

    async fn clear(&self, username: &str, ip: &str) -> Result<(), CacheError>;

    /// Drop counters that are neither locked nor inside the window.
    async fn purge_stale(&self, _policy: &LockoutPolicy) -> usize {
        0
    }

    async fn locked_count(&self) -> usize {
        0
    }

    fn backend(&self) -> &'static str;
}

/// Storage key for a (username, IP) pair.
pub fn attempt_key(username: &str, ip: &str) -> String {
    format!("login_attempts:{}:{}", username.to_lowercase(), ip)
}
