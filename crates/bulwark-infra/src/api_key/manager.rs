//! API key issuance, verification and request authorization.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::Serialize;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use bulwark_core::AppError;
use bulwark_core::domain::{
    ApiKey, ApiKeyUpdate, ApiKeyUsage, IssueApiKey, IssuedApiKey, RequestDescriptor,
};
use bulwark_core::error::RepoError;
use bulwark_core::ports::{ApiKeyRepository, Cache};

use super::config::ApiKeyConfig;
use crate::resilience::{RetryPolicy, retry_with_backoff};
use super::usage::{UsageRecorder, UsageStats};

const ISSUED_MESSAGE: &str =
    "API key created successfully. Store this key securely as it won't be shown again.";
const PREFIX_ATTEMPTS: usize = 3;

fn eviction_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_delay: Duration::from_millis(20),
        max_delay: Duration::from_millis(200),
        multiplier: 2.0,
        jitter: true,
    }
}

fn unauthenticated(message: &str, code: &str) -> AppError {
    AppError::authentication(message).with_code(code)
}

fn forbidden(message: &str, code: &str) -> AppError {
    AppError::authorization(message).with_code(code)
}

fn cache_key(prefix: &str) -> String {
    format!("api_key:{}", prefix)
}

fn hash_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

/// Counters reported by [`ApiKeyManager::stats`].
#[derive(Debug, Clone, Serialize)]
pub struct ApiKeyStats {
    pub issued: u64,
    pub verified: u64,
    pub rejected: u64,
    pub revoked: u64,
    pub usage: UsageStats,
    pub usage_pending: usize,
    pub cache_backend: &'static str,
}

#[derive(Default)]
struct Counters {
    issued: AtomicU64,
    verified: AtomicU64,
    rejected: AtomicU64,
    revoked: AtomicU64,
}

pub struct ApiKeyManager {
    config: ApiKeyConfig,
    repo: Arc<dyn ApiKeyRepository>,
    cache: Arc<dyn Cache>,
    usage: UsageRecorder,
    counters: Counters,
    /// Prefixes whose cached copy may be stale, with the instant the stale
    /// copy is guaranteed to have expired. Lookups skip the cache for these.
    unevicted: DashMap<String, Instant>,
}

impl ApiKeyManager {
    /// Starts the usage worker, so this must run inside a tokio runtime.
    pub fn new(
        config: ApiKeyConfig,
        repo: Arc<dyn ApiKeyRepository>,
        cache: Arc<dyn Cache>,
    ) -> Self {
        let usage = UsageRecorder::spawn(repo.clone(), config.usage_queue_capacity);
        Self {
            config,
            repo,
            cache,
            usage,
            counters: Counters::default(),
            unevicted: DashMap::new(),
        }
    }

    pub fn config(&self) -> &ApiKeyConfig {
        &self.config
    }

    /// Generate, hash and store a new key. The plaintext is returned here
    /// and nowhere else.
    pub async fn issue(
        &self,
        owner_id: Uuid,
        request: IssueApiKey,
    ) -> Result<IssuedApiKey, AppError> {
        let now = Utc::now();
        self.validate_issue(&request, now)?;

        let rate_limit = match request.rate_limit {
            0 => self.config.default_rate_limit,
            n => n,
        };
        let expires_at = request.expires_at.or_else(|| {
            chrono::Duration::from_std(self.config.default_ttl)
                .ok()
                .map(|ttl| now + ttl)
        });

        let mut attempt = 0;
        let (plaintext, key) = loop {
            attempt += 1;
            let plaintext = self.generate_key();
            let key = ApiKey {
                id: Uuid::new_v4(),
                owner_id,
                name: request.name.trim().to_string(),
                key_hash: hash_key(&plaintext),
                prefix: self.prefix_of(&plaintext).unwrap_or_default().to_string(),
                permissions: request.permissions.clone(),
                rate_limit,
                allowed_ips: request.allowed_ips.clone(),
                allowed_referers: request.allowed_referers.clone(),
                created_at: now,
                updated_at: now,
                expires_at,
                last_used_at: None,
                usage_count: 0,
                is_active: true,
            };

            match self.repo.insert(&key).await {
                Ok(()) => break (plaintext, key),
                Err(RepoError::Constraint(_)) if attempt < PREFIX_ATTEMPTS => {
                    tracing::debug!(attempt, "API key prefix collision, regenerating");
                }
                Err(e) => return Err(e.into()),
            }
        };

        self.counters.issued.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            api_key_id = %key.id,
            owner_id = %owner_id,
            prefix = %key.prefix,
            "API key issued"
        );

        Ok(IssuedApiKey {
            id: key.id,
            name: key.name,
            key: plaintext,
            prefix: key.prefix,
            message: ISSUED_MESSAGE.to_string(),
        })
    }

    /// Resolve a presented key by prefix and check it in constant time.
    pub async fn verify(&self, presented: &str) -> Result<ApiKey, AppError> {
        let presented = presented.trim();
        if presented.is_empty() {
            return Err(unauthenticated("API key is required", "API_KEY_REQUIRED"));
        }
        let prefix = self
            .prefix_of(presented)
            .ok_or_else(|| unauthenticated("Invalid API key format", "API_KEY_INVALID_FORMAT"))?;

        let key = self
            .lookup(prefix)
            .await?
            .ok_or_else(|| unauthenticated("API key not found", "API_KEY_NOT_FOUND"))?;

        let computed = hash_key(presented);
        if !bool::from(computed.as_bytes().ct_eq(key.key_hash.as_bytes())) {
            return Err(unauthenticated("Invalid API key", "API_KEY_INVALID"));
        }
        if !key.is_active {
            return Err(unauthenticated("API key is inactive", "API_KEY_INACTIVE"));
        }
        if key.is_expired(Utc::now()) {
            return Err(unauthenticated("API key has expired", "API_KEY_EXPIRED"));
        }

        Ok(key)
    }

    /// Allow-list and header requirements. Empty allow-lists are unrestricted.
    pub fn authorize(&self, request: &RequestDescriptor, key: &ApiKey) -> Result<(), AppError> {
        if !key.allowed_ips.is_empty() {
            let ip = request.client_ip();
            if !key.allowed_ips.iter().any(|allowed| *allowed == ip) {
                return Err(forbidden(
                    "API key not allowed from this IP address",
                    "API_KEY_IP_NOT_ALLOWED",
                ));
            }
        }

        if !key.allowed_referers.is_empty() {
            match request.referer() {
                None if self.config.require_referer => {
                    return Err(forbidden("Referer header is required", "REFERER_REQUIRED"));
                }
                Some(referer)
                    if !key
                        .allowed_referers
                        .iter()
                        .any(|allowed| referer.contains(allowed.as_str())) =>
                {
                    return Err(forbidden(
                        "API key not allowed from this referer",
                        "API_KEY_REFERER_NOT_ALLOWED",
                    ));
                }
                _ => {}
            }
        }

        if self.config.require_user_agent && request.user_agent().is_empty() {
            return Err(forbidden("User-Agent header is required", "USER_AGENT_REQUIRED"));
        }

        Ok(())
    }

    /// `X-API-Key`, else a Bearer token.
    pub fn extract_key(request: &RequestDescriptor) -> Option<&str> {
        request.header("x-api-key").or_else(|| {
            request
                .header("authorization")
                .and_then(|auth| auth.strip_prefix("Bearer "))
                .map(str::trim)
        })
    }

    /// Extract, verify and authorize in one step, scheduling a usage record
    /// on success.
    pub async fn authenticate(&self, request: &RequestDescriptor) -> Result<ApiKey, AppError> {
        let result = match Self::extract_key(request) {
            Some(presented) => match self.verify(presented).await {
                Ok(key) => self.authorize(request, &key).map(|()| key),
                Err(e) => Err(e),
            },
            None => Err(unauthenticated("API key is required", "API_KEY_REQUIRED")),
        };

        match &result {
            Ok(key) => {
                self.counters.verified.fetch_add(1, Ordering::Relaxed);
                self.record_usage(request, key);
            }
            Err(err) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    event = "api_key_rejected",
                    code = %err.code,
                    ip = %request.client_ip(),
                    path = %request.path,
                    "API key rejected"
                );
            }
        }
        result
    }

    /// Enqueue a usage record for the worker. Does not wait.
    pub fn record_usage(&self, request: &RequestDescriptor, key: &ApiKey) {
        self.usage.record(ApiKeyUsage {
            id: Uuid::new_v4(),
            api_key_id: key.id,
            ip_address: request.client_ip(),
            user_agent: request.user_agent().to_string(),
            endpoint: request.path.clone(),
            method: request.method.clone(),
            timestamp: Utc::now(),
            success: true,
        });
    }

    /// The owner's keys with hashes blanked.
    pub async fn list(&self, owner_id: Uuid) -> Result<Vec<ApiKey>, AppError> {
        Ok(self
            .repo
            .list_for_owner(owner_id)
            .await?
            .iter()
            .map(ApiKey::redacted)
            .collect())
    }

    /// Deactivate a key. Fails if the cached copy cannot be evicted; the
    /// stored key is already inactive then, so the call can be repeated.
    pub async fn revoke(&self, id: Uuid, owner_id: Uuid) -> Result<(), AppError> {
        let mut key = self.owned(id, owner_id).await?;
        key.is_active = false;
        key.updated_at = Utc::now();
        self.repo.update(&key).await?;

        self.counters.revoked.fetch_add(1, Ordering::Relaxed);
        tracing::info!(api_key_id = %id, owner_id = %owner_id, "API key revoked");
        self.evict(&key.prefix).await
    }

    pub async fn update(
        &self,
        id: Uuid,
        owner_id: Uuid,
        update: ApiKeyUpdate,
    ) -> Result<ApiKey, AppError> {
        if let Some(rate_limit) = update.rate_limit {
            self.check_rate_limit(rate_limit)?;
        }
        if update.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(AppError::validation("Name is required").with_code("API_KEY_NAME_REQUIRED"));
        }

        let mut key = self.owned(id, owner_id).await?;
        update.apply(&mut key);
        self.repo.update(&key).await?;

        tracing::info!(api_key_id = %id, "API key updated");
        self.evict(&key.prefix).await?;
        Ok(key.redacted())
    }

    pub fn stats(&self) -> ApiKeyStats {
        ApiKeyStats {
            issued: self.counters.issued.load(Ordering::Relaxed),
            verified: self.counters.verified.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            revoked: self.counters.revoked.load(Ordering::Relaxed),
            usage: self.usage.stats(),
            usage_pending: self.usage.pending(),
            cache_backend: self.cache.backend(),
        }
    }

    fn validate_issue(
        &self,
        request: &IssueApiKey,
        now: chrono::DateTime<Utc>,
    ) -> Result<(), AppError> {
        if request.name.trim().is_empty() {
            return Err(AppError::validation("Name is required").with_code("API_KEY_NAME_REQUIRED"));
        }
        self.check_rate_limit(request.rate_limit)?;

        if let Some(expires_at) = request.expires_at {
            if expires_at <= now {
                return Err(AppError::validation("Expiration date must be in the future")
                    .with_code("API_KEY_EXPIRY_IN_PAST"));
            }
            let max_ttl = chrono::Duration::from_std(self.config.max_ttl)
                .unwrap_or_else(|_| chrono::Duration::days(5 * 365));
            if expires_at > now + max_ttl {
                return Err(AppError::validation("Expiration date exceeds maximum TTL")
                    .with_code("API_KEY_EXPIRY_TOO_FAR")
                    .with_detail("max_ttl_secs", self.config.max_ttl.as_secs()));
            }
        }
        Ok(())
    }

    fn check_rate_limit(&self, rate_limit: u32) -> Result<(), AppError> {
        if rate_limit > self.config.max_rate_limit {
            return Err(AppError::validation("Rate limit exceeds maximum")
                .with_code("API_KEY_RATE_LIMIT_TOO_HIGH")
                .with_detail("max_rate_limit", self.config.max_rate_limit));
        }
        Ok(())
    }

    fn generate_key(&self) -> String {
        let mut bytes = vec![0u8; self.config.key_length.max(16)];
        OsRng.fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    fn prefix_of<'a>(&self, key: &'a str) -> Option<&'a str> {
        key.get(..self.config.prefix_length)
    }

    /// Cache first, then the repository. Cache failures fall through, and
    /// prefixes with a possibly stale cached copy go straight to the repository.
    async fn lookup(&self, prefix: &str) -> Result<Option<ApiKey>, AppError> {
        if self.cache_bypassed(prefix) {
            return Ok(self.repo.find_by_prefix(prefix).await?);
        }

        let cache_key = cache_key(prefix);
        match self.cache.get(&cache_key).await {
            Ok(Some(raw)) => match serde_json::from_str::<ApiKey>(&raw) {
                Ok(key) => return Ok(Some(key)),
                Err(e) => tracing::warn!(error = %e, "Discarding unreadable cached API key"),
            },
            Ok(None) => {}
            Err(e) => tracing::debug!(error = %e, "API key cache unavailable, using repository"),
        }

        let Some(key) = self.repo.find_by_prefix(prefix).await? else {
            return Ok(None);
        };

        match serde_json::to_string(&key) {
            Ok(raw) => {
                let ttl = Some(self.config.cache_ttl);
                if let Err(e) = self.cache.set(&cache_key, &raw, ttl).await {
                    tracing::debug!(error = %e, "Failed to cache API key");
                }
            }
            Err(e) => tracing::warn!(error = %e, "Failed to serialize API key for cache"),
        }
        Ok(Some(key))
    }

    async fn owned(&self, id: Uuid, owner_id: Uuid) -> Result<ApiKey, AppError> {
        match self.repo.find_by_id(id).await? {
            Some(key) if key.owner_id == owner_id => Ok(key),
            _ => Err(AppError::not_found("API key")),
        }
    }

    /// Drop the cached copy after a change. Until the delete succeeds the
    /// prefix bypasses the cache here for one cache TTL.
    async fn evict(&self, prefix: &str) -> Result<(), AppError> {
        let cache_key = cache_key(prefix);
        let evicted = retry_with_backoff("api key cache eviction", &eviction_policy(), None, || {
            let cache = self.cache.clone();
            let cache_key = cache_key.clone();
            async move { cache.delete(&cache_key).await.map_err(AppError::from) }
        })
        .await;

        match evicted {
            Ok(()) => {
                self.unevicted.remove(prefix);
                Ok(())
            }
            Err(e) => {
                self.unevicted
                    .insert(prefix.to_string(), Instant::now() + self.config.cache_ttl);
                tracing::error!(prefix = %prefix, error = %e, "Failed to evict cached API key");
                Err(AppError::external("API key change saved but the cached copy was not evicted")
                    .with_code("API_KEY_CACHE_EVICTION_FAILED"))
            }
        }
    }

    fn cache_bypassed(&self, prefix: &str) -> bool {
        let now = Instant::now();
        self.unevicted.remove_if(prefix, |_, until| *until <= now);
        self.unevicted.contains_key(prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use bulwark_core::ports::CacheError;

    use crate::api_key::InMemoryApiKeyRepository;
    use crate::cache::InMemoryCache;

    type Fixture = (ApiKeyManager, Arc<InMemoryApiKeyRepository>, Arc<InMemoryCache>);

    fn manager_with(config: ApiKeyConfig) -> Fixture {
        let repo = Arc::new(InMemoryApiKeyRepository::new());
        let cache = Arc::new(InMemoryCache::new());
        let manager = ApiKeyManager::new(config, repo.clone(), cache.clone());
        (manager, repo, cache)
    }

    fn manager() -> Fixture {
        manager_with(ApiKeyConfig::default())
    }

    fn named(name: &str) -> IssueApiKey {
        IssueApiKey {
            name: name.to_string(),
            ..IssueApiKey::default()
        }
    }

    fn request_from(ip: &str, key: &str) -> RequestDescriptor {
        RequestDescriptor::new("GET", "/api/external/ping")
            .with_peer_addr(format!("{}:5000", ip))
            .with_header("X-API-Key", key)
            .with_header("User-Agent", "integration-test")
    }

    #[tokio::test]
    async fn test_issue_then_verify() {
        let (manager, repo, _) = manager();
        let owner = Uuid::new_v4();

        let issued = manager.issue(owner, named("ci")).await.unwrap();
        assert_eq!(issued.key.len(), 64);
        assert_eq!(issued.prefix, issued.key[..8]);
        assert!(issued.message.contains("won't be shown again"));

        let stored = repo.find_by_id(issued.id).await.unwrap().unwrap();
        assert_ne!(stored.key_hash, issued.key);
        assert_eq!(stored.key_hash.len(), 64);
        assert_eq!(stored.rate_limit, 1000);
        assert!(stored.expires_at.is_some());

        let key = manager.verify(&issued.key).await.unwrap();
        assert_eq!(key.id, issued.id);
        assert_eq!(key.owner_id, owner);
    }

    #[tokio::test]
    async fn test_tampered_key_fails() {
        let (manager, _, _) = manager();
        let issued = manager.issue(Uuid::new_v4(), named("ci")).await.unwrap();

        let mut tampered: Vec<char> = issued.key.chars().collect();
        let last = tampered.len() - 1;
        tampered[last] = if tampered[last] == '0' { '1' } else { '0' };
        let tampered: String = tampered.into_iter().collect();

        let err = manager.verify(&tampered).await.unwrap_err();
        assert_eq!(err.code, "API_KEY_INVALID");
        assert_eq!(err.status_code(), 401);
    }

    #[tokio::test]
    async fn test_distinct_lookup_errors() {
        let (manager, _, _) = manager();

        assert_eq!(manager.verify("").await.unwrap_err().code, "API_KEY_REQUIRED");
        assert_eq!(manager.verify("abc").await.unwrap_err().code, "API_KEY_INVALID_FORMAT");
        assert_eq!(
            manager.verify("deadbeefcafebabe").await.unwrap_err().code,
            "API_KEY_NOT_FOUND"
        );
    }

    #[tokio::test]
    async fn test_revoke_evicts_cache_and_fails_verify() {
        let (manager, _, cache) = manager();
        let owner = Uuid::new_v4();
        let issued = manager.issue(owner, named("ci")).await.unwrap();

        manager.verify(&issued.key).await.unwrap();
        assert!(cache.exists(&cache_key(&issued.prefix)).await.unwrap());

        // Someone else's id is indistinguishable from a missing key.
        let err = manager.revoke(issued.id, Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.status_code(), 404);

        manager.revoke(issued.id, owner).await.unwrap();
        assert!(!cache.exists(&cache_key(&issued.prefix)).await.unwrap());

        let err = manager.verify(&issued.key).await.unwrap_err();
        assert_eq!(err.code, "API_KEY_INACTIVE");
        assert_eq!(manager.stats().revoked, 1);
    }

    #[tokio::test]
    async fn test_expired_key() {
        let (manager, repo, _) = manager();
        let issued = manager.issue(Uuid::new_v4(), named("ci")).await.unwrap();

        let mut key = repo.find_by_id(issued.id).await.unwrap().unwrap();
        key.expires_at = Some(Utc::now() - chrono::Duration::seconds(1));
        repo.update(&key).await.unwrap();

        assert_eq!(manager.verify(&issued.key).await.unwrap_err().code, "API_KEY_EXPIRED");
    }

    #[tokio::test]
    async fn test_ip_allow_list_is_authorization_error() {
        let (manager, _, _) = manager();
        let issued = manager
            .issue(
                Uuid::new_v4(),
                IssueApiKey {
                    allowed_ips: vec!["10.0.0.1".to_string()],
                    ..named("office")
                },
            )
            .await
            .unwrap();

        let err = manager
            .authenticate(&request_from("10.0.0.2", &issued.key))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 403);
        assert_eq!(err.message, "API key not allowed from this IP address");

        assert!(manager.authenticate(&request_from("10.0.0.1", &issued.key)).await.is_ok());
    }

    #[tokio::test]
    async fn test_referer_and_user_agent_requirements() {
        let (manager, _, _) = manager_with(ApiKeyConfig {
            require_referer: true,
            require_user_agent: true,
            ..ApiKeyConfig::default()
        });
        let issued = manager
            .issue(
                Uuid::new_v4(),
                IssueApiKey {
                    allowed_referers: vec!["example.com".to_string()],
                    ..named("web")
                },
            )
            .await
            .unwrap();
        let key = manager.verify(&issued.key).await.unwrap();

        let base = RequestDescriptor::new("GET", "/x").with_peer_addr("1.1.1.1");
        assert_eq!(
            manager.authorize(&base, &key).unwrap_err().code,
            "REFERER_REQUIRED"
        );

        let wrong = base.clone().with_header("Referer", "https://evil.test/");
        assert_eq!(
            manager.authorize(&wrong, &key).unwrap_err().code,
            "API_KEY_REFERER_NOT_ALLOWED"
        );

        let right = base.clone().with_header("Referer", "https://app.example.com/page");
        assert_eq!(
            manager.authorize(&right, &key).unwrap_err().code,
            "USER_AGENT_REQUIRED"
        );

        let complete = right.with_header("User-Agent", "browser");
        assert!(manager.authorize(&complete, &key).is_ok());
    }

    #[tokio::test]
    async fn test_bearer_key_extraction() {
        let bearer =
            RequestDescriptor::new("GET", "/").with_header("Authorization", "Bearer abc123");
        assert_eq!(ApiKeyManager::extract_key(&bearer), Some("abc123"));

        let both = bearer.with_header("X-API-Key", "fromheader");
        assert_eq!(ApiKeyManager::extract_key(&both), Some("fromheader"));

        let basic = RequestDescriptor::new("GET", "/").with_header("Authorization", "Basic xyz");
        assert_eq!(ApiKeyManager::extract_key(&basic), None);
    }

    #[tokio::test]
    async fn test_usage_recorded_asynchronously() {
        let (manager, repo, _) = manager();
        let issued = manager.issue(Uuid::new_v4(), named("ci")).await.unwrap();

        manager
            .authenticate(&request_from("10.0.0.9", &issued.key))
            .await
            .unwrap();

        for _ in 0..50 {
            if manager.stats().usage.recorded == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let usage = repo.usage_for(issued.id);
        assert_eq!(usage.len(), 1);
        assert_eq!(usage[0].ip_address, "10.0.0.9");
        assert_eq!(usage[0].endpoint, "/api/external/ping");

        let key = repo.find_by_id(issued.id).await.unwrap().unwrap();
        assert_eq!(key.usage_count, 1);
        assert!(key.last_used_at.is_some());
    }

    #[tokio::test]
    async fn test_issue_validation() {
        let (manager, _, _) = manager();
        let owner = Uuid::new_v4();

        assert_eq!(
            manager.issue(owner, named("  ")).await.unwrap_err().code,
            "API_KEY_NAME_REQUIRED"
        );

        let too_fast = IssueApiKey {
            rate_limit: 10_001,
            ..named("x")
        };
        assert_eq!(
            manager.issue(owner, too_fast).await.unwrap_err().code,
            "API_KEY_RATE_LIMIT_TOO_HIGH"
        );

        let past = IssueApiKey {
            expires_at: Some(Utc::now() - chrono::Duration::hours(1)),
            ..named("x")
        };
        assert_eq!(manager.issue(owner, past).await.unwrap_err().code, "API_KEY_EXPIRY_IN_PAST");

        let far = IssueApiKey {
            expires_at: Some(Utc::now() + chrono::Duration::days(6 * 365)),
            ..named("x")
        };
        assert_eq!(manager.issue(owner, far).await.unwrap_err().code, "API_KEY_EXPIRY_TOO_FAR");
    }

    #[tokio::test]
    async fn test_list_and_update() {
        let (manager, _, cache) = manager();
        let owner = Uuid::new_v4();
        let issued = manager.issue(owner, named("first")).await.unwrap();
        manager.issue(Uuid::new_v4(), named("other")).await.unwrap();

        let listed = manager.list(owner).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].key_hash.is_empty());

        manager.verify(&issued.key).await.unwrap();
        let updated = manager
            .update(
                issued.id,
                owner,
                ApiKeyUpdate {
                    name: Some("renamed".to_string()),
                    rate_limit: Some(50),
                    ..ApiKeyUpdate::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.name, "renamed");
        assert_eq!(updated.rate_limit, 50);
        assert!(!cache.exists(&cache_key(&issued.prefix)).await.unwrap());

        // Fresh read reflects the update.
        assert_eq!(manager.verify(&issued.key).await.unwrap().name, "renamed");
    }

    /// In-process cache whose deletes fail a set number of times
    /// (`usize::MAX` for always).
    struct StickyCache {
        inner: InMemoryCache,
        failing_deletes: std::sync::atomic::AtomicUsize,
    }

    impl StickyCache {
        fn new(failing_deletes: usize) -> Self {
            Self {
                inner: InMemoryCache::new(),
                failing_deletes: std::sync::atomic::AtomicUsize::new(failing_deletes),
            }
        }
    }

    #[async_trait::async_trait]
    impl Cache for StickyCache {
        async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
            self.inner.get(key).await
        }
        async fn set(
            &self,
            key: &str,
            value: &str,
            ttl: Option<Duration>,
        ) -> Result<(), CacheError> {
            self.inner.set(key, value, ttl).await
        }
        async fn delete(&self, key: &str) -> Result<(), CacheError> {
            let left = self.failing_deletes.load(Ordering::SeqCst);
            if left > 0 {
                if left != usize::MAX {
                    self.failing_deletes.store(left - 1, Ordering::SeqCst);
                }
                return Err(CacheError::Connection("connection refused".to_string()));
            }
            self.inner.delete(key).await
        }
        async fn exists(&self, key: &str) -> Result<bool, CacheError> {
            self.inner.exists(key).await
        }
        fn backend(&self) -> &'static str {
            "sticky"
        }
    }

    fn manager_over(cache: Arc<StickyCache>) -> ApiKeyManager {
        ApiKeyManager::new(
            ApiKeyConfig::default(),
            Arc::new(InMemoryApiKeyRepository::new()),
            cache,
        )
    }

    #[tokio::test]
    async fn test_revoke_with_failing_eviction_still_rejects_key() {
        let cache = Arc::new(StickyCache::new(usize::MAX));
        let manager = manager_over(cache.clone());
        let owner = Uuid::new_v4();
        let issued = manager.issue(owner, named("ci")).await.unwrap();

        manager.verify(&issued.key).await.unwrap();
        assert!(cache.exists(&cache_key(&issued.prefix)).await.unwrap());

        let err = manager.revoke(issued.id, owner).await.unwrap_err();
        assert_eq!(err.code, "API_KEY_CACHE_EVICTION_FAILED");

        // The stale cached copy is still active, but it is no longer trusted.
        assert!(cache.exists(&cache_key(&issued.prefix)).await.unwrap());
        let err = manager.verify(&issued.key).await.unwrap_err();
        assert_eq!(err.code, "API_KEY_INACTIVE");
    }

    #[tokio::test]
    async fn test_update_with_failing_eviction_serves_fresh_key() {
        let cache = Arc::new(StickyCache::new(usize::MAX));
        let manager = manager_over(cache);
        let owner = Uuid::new_v4();
        let issued = manager.issue(owner, named("ci")).await.unwrap();
        manager.verify(&issued.key).await.unwrap();

        let deactivate = ApiKeyUpdate {
            is_active: Some(false),
            ..ApiKeyUpdate::default()
        };
        let err = manager.update(issued.id, owner, deactivate).await.unwrap_err();
        assert_eq!(err.code, "API_KEY_CACHE_EVICTION_FAILED");

        let err = manager.verify(&issued.key).await.unwrap_err();
        assert_eq!(err.code, "API_KEY_INACTIVE");
    }

    #[tokio::test]
    async fn test_transient_eviction_failure_is_retried() {
        let cache = Arc::new(StickyCache::new(1));
        let manager = manager_over(cache.clone());
        let owner = Uuid::new_v4();
        let issued = manager.issue(owner, named("ci")).await.unwrap();
        manager.verify(&issued.key).await.unwrap();

        manager.revoke(issued.id, owner).await.unwrap();
        assert!(!cache.exists(&cache_key(&issued.prefix)).await.unwrap());
        assert_eq!(manager.verify(&issued.key).await.unwrap_err().code, "API_KEY_INACTIVE");
    }
}
