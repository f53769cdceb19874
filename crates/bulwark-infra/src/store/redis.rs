//! Redis-backed state stores.
//!
//! Expiry is native (`PX`/`PEXPIRE`), so the purge hooks are no-ops here.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::{AsyncCommands, Script};
use uuid::Uuid;

use bulwark_core::domain::{LoginAttemptCounter, Session};
use bulwark_core::ports::{
    CacheError, LockoutPolicy, LoginAttemptStore, SessionStore, SlidingWindow, WindowOutcome,
    attempt_key,
};

use crate::cache::RedisClient;

fn millis(d: Duration) -> u64 {
    d.as_millis().clamp(1, u64::MAX as u128) as u64
}

/// Sessions as JSON under `session:{id}`, with a `user_sessions:{user}` set
/// indexing each user's session ids.
pub struct RedisSessionStore {
    client: RedisClient,
}

impl RedisSessionStore {
    pub fn new(client: RedisClient) -> Self {
        Self { client }
    }

    fn session_key(id: &str) -> String {
        format!("session:{}", id)
    }

    fn index_key(user_id: Uuid) -> String {
        format!("user_sessions:{}", user_id)
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn save(&self, session: &Session, ttl: Duration) -> Result<(), CacheError> {
        let payload = serde_json::to_string(session)?;
        let ttl_ms = millis(ttl);
        let index = Self::index_key(session.user_id);

        let mut pipe = redis::pipe();
        pipe.atomic()
            .pset_ex(Self::session_key(&session.id), payload, ttl_ms)
            .ignore()
            .sadd(&index, &session.id)
            .ignore()
            .pexpire(&index, ttl_ms as i64)
            .ignore();

        let mut conn = self.client.connection();
        let _: () = self.client.run(pipe.query_async(&mut conn)).await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Session>, CacheError> {
        let mut conn = self.client.connection();
        let raw: Option<String> = self.client.run(conn.get(Self::session_key(id))).await?;

        raw.map(|json| serde_json::from_str(&json).map_err(CacheError::from))
            .transpose()
    }

    async fn remove(&self, id: &str) -> Result<Option<Session>, CacheError> {
        let Some(session) = self.get(id).await? else {
            return Ok(None);
        };

        let mut pipe = redis::pipe();
        pipe.atomic()
            .del(Self::session_key(id))
            .ignore()
            .srem(Self::index_key(session.user_id), id)
            .ignore();

        let mut conn = self.client.connection();
        let _: () = self.client.run(pipe.query_async(&mut conn)).await?;
        Ok(Some(session))
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Session>, CacheError> {
        let index = Self::index_key(user_id);
        let mut conn = self.client.connection();

        let ids: Vec<String> = self.client.run(conn.smembers(&index)).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = ids.iter().map(|id| Self::session_key(id)).collect();
        let raw: Vec<Option<String>> = self.client.run(conn.mget(&keys)).await?;

        let mut sessions = Vec::with_capacity(ids.len());
        let mut expired = Vec::new();
        for (id, value) in ids.into_iter().zip(raw) {
            match value {
                Some(json) => sessions.push(serde_json::from_str::<Session>(&json)?),
                None => expired.push(id),
            }
        }

        if !expired.is_empty() {
            let _: () = self.client.run(conn.srem(&index, &expired)).await?;
        }

        sessions.sort_by_key(|s| s.created_at);
        Ok(sessions)
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}

// Mirrors LoginAttemptCounter::register_failure so both backends lock alike.
const RECORD_FAILURE_SCRIPT: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local max_attempts = tonumber(ARGV[3])
local lockout = tonumber(ARGV[4])

local attempts = tonumber(redis.call('HGET', key, 'attempts') or '0')
local last = tonumber(redis.call('HGET', key, 'last_attempt') or '0')
local locked = tonumber(redis.call('HGET', key, 'locked_until') or '0')

if (locked > 0 and locked <= now) or (now - last > window) then
    attempts = 0
    locked = 0
end

attempts = attempts + 1
if attempts >= max_attempts and locked == 0 then
    locked = now + lockout
end

redis.call('HSET', key, 'attempts', attempts, 'last_attempt', now, 'locked_until', locked)

local ttl = window
if locked > 0 and locked - now > ttl then
    ttl = locked - now
end
redis.call('PEXPIRE', key, ttl)

return {attempts, locked}
"#;

/// Failed-login counters as hashes, updated by a Lua script.
pub struct RedisLoginAttemptStore {
    client: RedisClient,
    record_script: Script,
}

impl RedisLoginAttemptStore {
    pub fn new(client: RedisClient) -> Self {
        Self {
            client,
            record_script: Script::new(RECORD_FAILURE_SCRIPT),
        }
    }
}

fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    (ms > 0).then(|| DateTime::from_timestamp_millis(ms)).flatten()
}

#[async_trait]
impl LoginAttemptStore for RedisLoginAttemptStore {
    async fn get(
        &self,
        username: &str,
        ip: &str,
    ) -> Result<Option<LoginAttemptCounter>, CacheError> {
        let mut conn = self.client.connection();
        let fields: HashMap<String, i64> = self
            .client
            .run(conn.hgetall(attempt_key(username, ip)))
            .await?;

        if fields.is_empty() {
            return Ok(None);
        }

        let field = |name: &str| fields.get(name).copied().unwrap_or_default();
        let mut counter = LoginAttemptCounter::new(username, ip);
        counter.attempts = field("attempts").max(0) as u32;
        counter.last_attempt = from_millis(field("last_attempt")).unwrap_or(counter.last_attempt);
        counter.locked_until = from_millis(field("locked_until"));
        Ok(Some(counter))
    }

    async fn record_failure(
        &self,
        username: &str,
        ip: &str,
        policy: &LockoutPolicy,
    ) -> Result<LoginAttemptCounter, CacheError> {
        let now = Utc::now();
        let mut invocation = self.record_script.key(attempt_key(username, ip));
        invocation
            .arg(now.timestamp_millis())
            .arg(millis(policy.window))
            .arg(policy.max_attempts)
            .arg(millis(policy.lockout));

        let mut conn = self.client.connection();
        let (attempts, locked_until): (u32, i64) =
            self.client.run(invocation.invoke_async(&mut conn)).await?;

        let mut counter = LoginAttemptCounter::new(username, ip);
        counter.attempts = attempts;
        counter.last_attempt = now;
        counter.locked_until = from_millis(locked_until);
        Ok(counter)
    }

    async fn clear(&self, username: &str, ip: &str) -> Result<(), CacheError> {
        let mut conn = self.client.connection();
        self.client
            .run(conn.del::<_, ()>(attempt_key(username, ip)))
            .await
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}

// Returns {allowed, count, retry_after_ms}. Rejected hits are not recorded.
const SLIDING_WINDOW_SCRIPT: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])
local member = ARGV[4]

redis.call('ZREMRANGEBYSCORE', key, '-inf', now - window)
local count = redis.call('ZCARD', key)

if count < limit then
    redis.call('ZADD', key, now, member)
    redis.call('PEXPIRE', key, window)
    return {1, count + 1, 0}
end

local retry = window
local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
if oldest[2] then
    retry = tonumber(oldest[2]) + window - now
end
return {0, count, retry}
"#;

/// Sliding windows as sorted sets of hit timestamps under `ratelimit:{key}`.
pub struct RedisSlidingWindow {
    client: RedisClient,
    script: Script,
}

impl RedisSlidingWindow {
    pub fn new(client: RedisClient) -> Self {
        Self {
            client,
            script: Script::new(SLIDING_WINDOW_SCRIPT),
        }
    }
}

#[async_trait]
impl SlidingWindow for RedisSlidingWindow {
    async fn hit(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> Result<WindowOutcome, CacheError> {
        let now_ms = Utc::now().timestamp_millis();
        let member = format!("{}-{}", now_ms, Uuid::new_v4().simple());

        let mut invocation = self.script.key(format!("ratelimit:{}", key));
        invocation
            .arg(now_ms)
            .arg(millis(window))
            .arg(limit)
            .arg(member);

        let mut conn = self.client.connection();
        let (allowed, count, retry_ms): (i64, u32, i64) =
            self.client.run(invocation.invoke_async(&mut conn)).await?;

        Ok(WindowOutcome {
            allowed: allowed == 1,
            count,
            retry_after: Duration::from_millis(retry_ms.max(0) as u64),
        })
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
