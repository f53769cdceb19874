//! Failover adapters: shared-cache implementation first, in-process
//! substitute when the `shared-cache` circuit breaker is open or a call fails.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use bulwark_core::domain::{LoginAttemptCounter, Session};
use bulwark_core::ports::{
    Cache, CacheError, LockoutPolicy, LoginAttemptStore, SessionStore, SlidingWindow,
    WindowOutcome,
};

use crate::resilience::{CircuitBreaker, CircuitError};

/// Name of the breaker guarding every shared-cache call.
pub const SHARED_CACHE_BREAKER: &str = "shared-cache";

fn log_degraded(store: &'static str, op: &'static str, err: &CircuitError<CacheError>) {
    match err {
        CircuitError::Inner(e) => tracing::warn!(
            store,
            op,
            error = %e,
            "Shared cache call failed, serving from in-process fallback"
        ),
        _ => tracing::debug!(
            store,
            op,
            "Shared cache circuit open, serving from in-process fallback"
        ),
    }
}

/// Plain key-value entries. Reads and writes fall back to the in-process
/// cache; a delete always clears the fallback and reports a shared-cache
/// failure to the caller, since a surviving shared entry may be stale.
pub struct FailoverCache {
    primary: Arc<dyn Cache>,
    fallback: Arc<dyn Cache>,
    breaker: Arc<CircuitBreaker>,
}

impl FailoverCache {
    pub fn new(
        primary: Arc<dyn Cache>,
        fallback: Arc<dyn Cache>,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            primary,
            fallback,
            breaker,
        }
    }
}

fn unwrap_circuit(err: CircuitError<CacheError>) -> CacheError {
    match err {
        CircuitError::Inner(e) => e,
        open => CacheError::Connection(open.to_string()),
    }
}

#[async_trait]
impl Cache for FailoverCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        match self.breaker.call(|| self.primary.get(key)).await {
            Ok(Some(value)) => Ok(Some(value)),
            Ok(None) => self.fallback.get(key).await,
            Err(e) => {
                log_degraded("cache", "get", &e);
                self.fallback.get(key).await
            }
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        match self.breaker.call(|| self.primary.set(key, value, ttl)).await {
            Ok(()) => {
                // An outage-era copy must not shadow a later primary delete.
                if let Err(e) = self.fallback.delete(key).await {
                    tracing::debug!(error = %e, "Failed to clear in-process cache entry");
                }
                Ok(())
            }
            Err(e) => {
                log_degraded("cache", "set", &e);
                self.fallback.set(key, value, ttl).await
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let local = self.fallback.delete(key).await;
        self.breaker
            .call(|| self.primary.delete(key))
            .await
            .map_err(unwrap_circuit)?;
        local
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        match self.breaker.call(|| self.primary.exists(key)).await {
            Ok(true) => Ok(true),
            Ok(false) => self.fallback.exists(key).await,
            Err(e) => {
                log_degraded("cache", "exists", &e);
                self.fallback.exists(key).await
            }
        }
    }

    fn backend(&self) -> &'static str {
        "failover"
    }
}

pub struct FailoverSessionStore {
    primary: Arc<dyn SessionStore>,
    fallback: Arc<dyn SessionStore>,
    breaker: Arc<CircuitBreaker>,
}

impl FailoverSessionStore {
    pub fn new(
        primary: Arc<dyn SessionStore>,
        fallback: Arc<dyn SessionStore>,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            primary,
            fallback,
            breaker,
        }
    }
}

#[async_trait]
impl SessionStore for FailoverSessionStore {
    async fn save(&self, session: &Session, ttl: Duration) -> Result<(), CacheError> {
        match self.breaker.call(|| self.primary.save(session, ttl)).await {
            Ok(()) => Ok(()),
            Err(e) => {
                log_degraded("sessions", "save", &e);
                self.fallback.save(session, ttl).await
            }
        }
    }

    async fn get(&self, id: &str) -> Result<Option<Session>, CacheError> {
        match self.breaker.call(|| self.primary.get(id)).await {
            Ok(Some(session)) => Ok(Some(session)),
            // Sessions created during an outage live in the fallback.
            Ok(None) => self.fallback.get(id).await,
            Err(e) => {
                log_degraded("sessions", "get", &e);
                self.fallback.get(id).await
            }
        }
    }

    async fn remove(&self, id: &str) -> Result<Option<Session>, CacheError> {
        let primary = match self.breaker.call(|| self.primary.remove(id)).await {
            Ok(removed) => removed,
            Err(e) => {
                log_degraded("sessions", "remove", &e);
                None
            }
        };
        let fallback = self.fallback.remove(id).await?;
        Ok(primary.or(fallback))
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Session>, CacheError> {
        let mut sessions = match self.breaker.call(|| self.primary.list_for_user(user_id)).await {
            Ok(sessions) => sessions,
            Err(e) => {
                log_degraded("sessions", "list_for_user", &e);
                Vec::new()
            }
        };

        let mut seen: HashSet<String> = sessions.iter().map(|s| s.id.clone()).collect();
        for session in self.fallback.list_for_user(user_id).await? {
            if seen.insert(session.id.clone()) {
                sessions.push(session);
            }
        }

        sessions.sort_by_key(|s| s.created_at);
        Ok(sessions)
    }

    async fn purge_idle(&self, timeout: Duration) -> usize {
        self.fallback.purge_idle(timeout).await
    }

    async fn count(&self) -> usize {
        self.primary.count().await + self.fallback.count().await
    }

    fn backend(&self) -> &'static str {
        "failover"
    }
}

pub struct FailoverLoginAttemptStore {
    primary: Arc<dyn LoginAttemptStore>,
    fallback: Arc<dyn LoginAttemptStore>,
    breaker: Arc<CircuitBreaker>,
}

impl FailoverLoginAttemptStore {
    pub fn new(
        primary: Arc<dyn LoginAttemptStore>,
        fallback: Arc<dyn LoginAttemptStore>,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            primary,
            fallback,
            breaker,
        }
    }
}

#[async_trait]
impl LoginAttemptStore for FailoverLoginAttemptStore {
    async fn get(
        &self,
        username: &str,
        ip: &str,
    ) -> Result<Option<LoginAttemptCounter>, CacheError> {
        match self.breaker.call(|| self.primary.get(username, ip)).await {
            Ok(Some(counter)) => Ok(Some(counter)),
            Ok(None) => self.fallback.get(username, ip).await,
            Err(e) => {
                log_degraded("login_attempts", "get", &e);
                self.fallback.get(username, ip).await
            }
        }
    }

    async fn record_failure(
        &self,
        username: &str,
        ip: &str,
        policy: &LockoutPolicy,
    ) -> Result<LoginAttemptCounter, CacheError> {
        match self
            .breaker
            .call(|| self.primary.record_failure(username, ip, policy))
            .await
        {
            Ok(counter) => Ok(counter),
            Err(e) => {
                log_degraded("login_attempts", "record_failure", &e);
                self.fallback.record_failure(username, ip, policy).await
            }
        }
    }

    async fn clear(&self, username: &str, ip: &str) -> Result<(), CacheError> {
        if let Err(e) = self.breaker.call(|| self.primary.clear(username, ip)).await {
            log_degraded("login_attempts", "clear", &e);
        }
        self.fallback.clear(username, ip).await
    }

    async fn purge_stale(&self, policy: &LockoutPolicy) -> usize {
        self.fallback.purge_stale(policy).await
    }

    async fn locked_count(&self) -> usize {
        self.primary.locked_count().await + self.fallback.locked_count().await
    }

    fn backend(&self) -> &'static str {
        "failover"
    }
}

/// A failed call while the breaker is closed is returned to the caller (the
/// rate limiter fails open on it); once the breaker opens, windows are
/// counted in process until the shared cache recovers.
pub struct FailoverSlidingWindow {
    primary: Arc<dyn SlidingWindow>,
    fallback: Arc<dyn SlidingWindow>,
    breaker: Arc<CircuitBreaker>,
}

impl FailoverSlidingWindow {
    pub fn new(
        primary: Arc<dyn SlidingWindow>,
        fallback: Arc<dyn SlidingWindow>,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            primary,
            fallback,
            breaker,
        }
    }
}

#[async_trait]
impl SlidingWindow for FailoverSlidingWindow {
    async fn hit(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> Result<WindowOutcome, CacheError> {
        match self
            .breaker
            .call(|| self.primary.hit(key, limit, window))
            .await
        {
            Ok(outcome) => Ok(outcome),
            Err(CircuitError::Inner(e)) => Err(e),
            Err(open) => {
                log_degraded("rate_windows", "hit", &open);
                self.fallback.hit(key, limit, window).await
            }
        }
    }

    async fn cleanup(&self, window: Duration) -> usize {
        self.fallback.cleanup(window).await
    }

    async fn tracked_keys(&self) -> usize {
        self.fallback.tracked_keys().await
    }

    fn backend(&self) -> &'static str {
        "failover"
    }
}
