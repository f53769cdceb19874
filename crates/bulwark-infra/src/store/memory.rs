//! In-process state stores.
//!
//! Used when the shared cache is unreachable at startup, and as the fallback
//! behind the failover adapters. State is per process and lost on restart.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use bulwark_core::domain::{LoginAttemptCounter, Session};
use bulwark_core::ports::{
    CacheError, LockoutPolicy, LoginAttemptStore, SessionStore, SlidingWindow, WindowOutcome,
    attempt_key,
};

struct StoredSession {
    session: Session,
    expires_at: Instant,
}

/// Sessions in a sharded map. Expired records are dropped on read and by
/// [`SessionStore::purge_idle`].
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<String, StoredSession>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn save(&self, session: &Session, ttl: Duration) -> Result<(), CacheError> {
        self.sessions.insert(
            session.id.clone(),
            StoredSession {
                session: session.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Session>, CacheError> {
        let now = Instant::now();
        if self
            .sessions
            .remove_if(id, |_, stored| stored.expires_at <= now)
            .is_some()
        {
            return Ok(None);
        }
        Ok(self.sessions.get(id).map(|stored| stored.session.clone()))
    }

    async fn remove(&self, id: &str) -> Result<Option<Session>, CacheError> {
        Ok(self.sessions.remove(id).map(|(_, stored)| stored.session))
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Session>, CacheError> {
        let now = Instant::now();
        let mut sessions: Vec<Session> = self
            .sessions
            .iter()
            .filter(|entry| entry.session.user_id == user_id && entry.expires_at > now)
            .map(|entry| entry.session.clone())
            .collect();
        sessions.sort_by_key(|s| s.created_at);
        Ok(sessions)
    }

    async fn purge_idle(&self, timeout: Duration) -> usize {
        let now = Instant::now();
        let cutoff = Utc::now();
        let idle = chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::MAX);

        let before = self.sessions.len();
        self.sessions.retain(|_, stored| {
            stored.expires_at > now
                && stored.session.is_active
                && !stored.session.is_idle(idle, cutoff)
        });
        before.saturating_sub(self.sessions.len())
    }

    async fn count(&self) -> usize {
        self.sessions.len()
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

/// Failed-login counters keyed by `login_attempts:{user}:{ip}`.
#[derive(Default)]
pub struct InMemoryLoginAttemptStore {
    counters: DashMap<String, LoginAttemptCounter>,
}

impl InMemoryLoginAttemptStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LoginAttemptStore for InMemoryLoginAttemptStore {
    async fn get(
        &self,
        username: &str,
        ip: &str,
    ) -> Result<Option<LoginAttemptCounter>, CacheError> {
        Ok(self
            .counters
            .get(&attempt_key(username, ip))
            .map(|c| c.clone()))
    }

    async fn record_failure(
        &self,
        username: &str,
        ip: &str,
        policy: &LockoutPolicy,
    ) -> Result<LoginAttemptCounter, CacheError> {
        let mut counter = self
            .counters
            .entry(attempt_key(username, ip))
            .or_insert_with(|| LoginAttemptCounter::new(username, ip));

        counter.register_failure(
            Utc::now(),
            policy.window_delta(),
            policy.max_attempts,
            policy.lockout_delta(),
        );
        Ok(counter.clone())
    }

    async fn clear(&self, username: &str, ip: &str) -> Result<(), CacheError> {
        self.counters.remove(&attempt_key(username, ip));
        Ok(())
    }

    async fn purge_stale(&self, policy: &LockoutPolicy) -> usize {
        let now = Utc::now();
        let window = policy.window_delta();
        let before = self.counters.len();
        self.counters
            .retain(|_, counter| counter.is_locked(now) || !counter.is_stale(now, window));
        before.saturating_sub(self.counters.len())
    }

    async fn locked_count(&self) -> usize {
        let now = Utc::now();
        self.counters.iter().filter(|c| c.is_locked(now)).count()
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

/// Trailing-window hit log per key.
#[derive(Default)]
pub struct InMemorySlidingWindow {
    windows: DashMap<String, VecDeque<Instant>>,
}

impl InMemorySlidingWindow {
    pub fn new() -> Self {
        Self::default()
    }
}

fn prune(hits: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while hits
        .front()
        .is_some_and(|&oldest| now.duration_since(oldest) >= window)
    {
        hits.pop_front();
    }
}

#[async_trait]
impl SlidingWindow for InMemorySlidingWindow {
    async fn hit(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> Result<WindowOutcome, CacheError> {
        let now = Instant::now();
        let mut hits = self.windows.entry(key.to_string()).or_default();
        prune(&mut hits, now, window);

        if (hits.len() as u32) < limit {
            hits.push_back(now);
            return Ok(WindowOutcome {
                allowed: true,
                count: hits.len() as u32,
                retry_after: Duration::ZERO,
            });
        }

        let retry_after = hits
            .front()
            .map(|&oldest| window.saturating_sub(now.duration_since(oldest)))
            .unwrap_or(window);

        Ok(WindowOutcome {
            allowed: false,
            count: hits.len() as u32,
            retry_after,
        })
    }

    async fn cleanup(&self, window: Duration) -> usize {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows.retain(|_, hits| {
            prune(hits, now, window);
            !hits.is_empty()
        });
        before.saturating_sub(self.windows.len())
    }

    async fn tracked_keys(&self) -> usize {
        self.windows.len()
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulwark_core::domain::Identity;

    fn session_for(user: &Identity, id: &str) -> Session {
        Session::new(id.to_string(), user, "10.0.0.1", "test-agent")
    }

    fn policy() -> LockoutPolicy {
        LockoutPolicy {
            max_attempts: 3,
            window: Duration::from_secs(900),
            lockout: Duration::from_secs(900),
        }
    }

    #[tokio::test]
    async fn test_session_save_get_remove() {
        let store = InMemorySessionStore::new();
        let user = Identity::new(Uuid::new_v4(), "alice", "user");

        store
            .save(&session_for(&user, "s1"), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.get("s1").await.unwrap().unwrap().username, "alice");
        assert_eq!(store.count().await, 1);

        assert!(store.remove("s1").await.unwrap().is_some());
        assert!(store.get("s1").await.unwrap().is_none());
        assert!(store.remove("s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_session_ttl_expiry() {
        let store = InMemorySessionStore::new();
        let user = Identity::new(Uuid::new_v4(), "bob", "user");

        store
            .save(&session_for(&user, "short"), Duration::from_millis(20))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(store.get("short").await.unwrap().is_none());
        assert!(store.list_for_user(user.user_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_for_user_is_scoped_and_ordered() {
        let store = InMemorySessionStore::new();
        let alice = Identity::new(Uuid::new_v4(), "alice", "user");
        let bob = Identity::new(Uuid::new_v4(), "bob", "user");

        for id in ["a1", "a2"] {
            store
                .save(&session_for(&alice, id), Duration::from_secs(60))
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        store
            .save(&session_for(&bob, "b1"), Duration::from_secs(60))
            .await
            .unwrap();

        let ids: Vec<String> = store
            .list_for_user(alice.user_id)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec!["a1", "a2"]);
    }

    #[tokio::test]
    async fn test_purge_idle_sessions() {
        let store = InMemorySessionStore::new();
        let user = Identity::new(Uuid::new_v4(), "carol", "user");

        let mut stale = session_for(&user, "stale");
        stale.last_activity = Utc::now() - chrono::Duration::hours(2);
        store.save(&stale, Duration::from_secs(3600)).await.unwrap();
        store
            .save(&session_for(&user, "fresh"), Duration::from_secs(3600))
            .await
            .unwrap();

        assert_eq!(store.purge_idle(Duration::from_secs(3600)).await, 1);
        assert!(store.get("fresh").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_attempts_lock_at_max() {
        let store = InMemoryLoginAttemptStore::new();

        for expected in 1..=2 {
            let counter = store.record_failure("Alice", "1.2.3.4", &policy()).await.unwrap();
            assert_eq!(counter.attempts, expected);
            assert!(!counter.is_locked(Utc::now()));
        }
        let counter = store.record_failure("alice", "1.2.3.4", &policy()).await.unwrap();
        assert!(counter.is_locked(Utc::now()));
        assert_eq!(store.locked_count().await, 1);

        // Different IP has its own counter.
        assert!(store.get("alice", "5.6.7.8").await.unwrap().is_none());

        store.clear("ALICE", "1.2.3.4").await.unwrap();
        assert!(store.get("alice", "1.2.3.4").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_purge_stale_attempts_keeps_locked() {
        let store = InMemoryLoginAttemptStore::new();
        let short = LockoutPolicy {
            max_attempts: 1,
            window: Duration::from_millis(10),
            lockout: Duration::from_secs(60),
        };

        store.record_failure("locked", "ip", &short).await.unwrap();
        store.record_failure("idle", "ip", &policy()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(store.purge_stale(&short).await, 1);
        assert!(store.get("locked", "ip").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_sliding_window_admits_up_to_limit() {
        let window = InMemorySlidingWindow::new();
        let span = Duration::from_secs(60);

        for i in 1..=3 {
            let outcome = window.hit("user:1", 3, span).await.unwrap();
            assert!(outcome.allowed);
            assert_eq!(outcome.count, i);
            assert_eq!(outcome.remaining(3), 3 - i);
        }

        let denied = window.hit("user:1", 3, span).await.unwrap();
        assert!(!denied.allowed);
        assert!(denied.retry_after > Duration::ZERO);
        assert!(denied.retry_after <= span);

        // Rejected hits are not recorded.
        assert_eq!(window.hit("user:1", 3, span).await.unwrap().count, 3);
        assert!(window.hit("user:2", 3, span).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_sliding_window_slides() {
        let window = InMemorySlidingWindow::new();
        let span = Duration::from_millis(50);

        assert!(window.hit("k", 1, span).await.unwrap().allowed);
        assert!(!window.hit("k", 1, span).await.unwrap().allowed);

        tokio::time::sleep(Duration::from_millis(70)).await;
        assert!(window.hit("k", 1, span).await.unwrap().allowed);

        tokio::time::sleep(Duration::from_millis(70)).await;
        assert_eq!(window.cleanup(span).await, 1);
        assert_eq!(window.tracked_keys().await, 0);
    }
}
