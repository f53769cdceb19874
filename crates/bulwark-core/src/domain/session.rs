use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Identity;

/// Authenticated session record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_id: Uuid,
    pub username: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub ip_address: String,
    pub user_agent: String,
    pub is_active: bool,
    pub mfa_verified: bool,
    pub device_id: Option<String>,
}

impl Session {
    pub fn new(
        id: String,
        identity: &Identity,
        ip_address: impl Into<String>,
        user_agent: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            user_id: identity.user_id,
            username: identity.username.clone(),
            role: identity.role.clone(),
            created_at: now,
            last_activity: now,
            ip_address: ip_address.into(),
            user_agent: user_agent.into(),
            is_active: true,
            mfa_verified: false,
            device_id: None,
        }
    }

    /// Idle for longer than `timeout` as of `now`.
    pub fn is_idle(&self, timeout: Duration, now: DateTime<Utc>) -> bool {
        now - self.last_activity > timeout
    }

    pub fn identity(&self) -> Identity {
        Identity::new(self.user_id, self.username.clone(), self.role.clone())
    }
}

/// Failed-login bookkeeping for one (username, IP) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginAttemptCounter {
    pub username: String,
    pub ip_address: String,
    pub attempts: u32,
    pub last_attempt: DateTime<Utc>,
    pub locked_until: Option<DateTime<Utc>>,
}

impl LoginAttemptCounter {
    pub fn new(username: impl Into<String>, ip_address: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            ip_address: ip_address.into(),
            attempts: 0,
            last_attempt: Utc::now(),
            locked_until: None,
        }
    }

    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| until > now)
    }

    /// Apply one failed attempt. Counts older than `window`, and counts left
    /// behind by a lapsed lockout, start over.
    pub fn register_failure(
        &mut self,
        now: DateTime<Utc>,
        window: Duration,
        max_attempts: u32,
        lockout: Duration,
    ) {
        let lock_lapsed = self.locked_until.is_some_and(|until| until <= now);
        if lock_lapsed || now - self.last_attempt > window {
            self.attempts = 0;
            self.locked_until = None;
        }

        self.attempts += 1;
        self.last_attempt = now;

        if self.attempts >= max_attempts && self.locked_until.is_none() {
            self.locked_until = Some(now + lockout);
        }
    }

    /// The record carries nothing worth keeping as of `now`.
    pub fn is_stale(&self, now: DateTime<Utc>, window: Duration) -> bool {
        !self.is_locked(now) && now - self.last_attempt > window
    }
}
