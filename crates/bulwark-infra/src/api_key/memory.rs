//! In-process API key repository.
//!
//! Note: Keys and usage records are lost on restart.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use bulwark_core::domain::{ApiKey, ApiKeyUsage};
use bulwark_core::error::RepoError;
use bulwark_core::ports::ApiKeyRepository;

#[derive(Default)]
pub struct InMemoryApiKeyRepository {
    keys: DashMap<Uuid, ApiKey>,
    prefixes: DashMap<String, Uuid>,
    usage: DashMap<Uuid, Vec<ApiKeyUsage>>,
}

impl InMemoryApiKeyRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Usage log for one key, oldest first.
    pub fn usage_for(&self, api_key_id: Uuid) -> Vec<ApiKeyUsage> {
        self.usage
            .get(&api_key_id)
            .map(|log| log.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ApiKeyRepository for InMemoryApiKeyRepository {
    async fn insert(&self, key: &ApiKey) -> Result<(), RepoError> {
        if self.prefixes.contains_key(&key.prefix) {
            return Err(RepoError::Constraint(format!("prefix {} already exists", key.prefix)));
        }
        self.prefixes.insert(key.prefix.clone(), key.id);
        self.keys.insert(key.id, key.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<ApiKey>, RepoError> {
        Ok(self.keys.get(&id).map(|k| k.clone()))
    }

    async fn find_by_prefix(&self, prefix: &str) -> Result<Option<ApiKey>, RepoError> {
        let Some(id) = self.prefixes.get(prefix).map(|id| *id) else {
            return Ok(None);
        };
        self.find_by_id(id).await
    }

    async fn list_for_owner(&self, owner_id: Uuid) -> Result<Vec<ApiKey>, RepoError> {
        let mut keys: Vec<ApiKey> = self
            .keys
            .iter()
            .filter(|k| k.owner_id == owner_id)
            .map(|k| k.clone())
            .collect();
        keys.sort_by_key(|k| k.created_at);
        Ok(keys)
    }

    async fn update(&self, key: &ApiKey) -> Result<(), RepoError> {
        let mut stored = self.keys.get_mut(&key.id).ok_or(RepoError::NotFound)?;
        *stored = key.clone();
        Ok(())
    }

    async fn append_usage(&self, usage: &ApiKeyUsage) -> Result<(), RepoError> {
        self.usage
            .entry(usage.api_key_id)
            .or_default()
            .push(usage.clone());
        Ok(())
    }

    async fn touch(&self, id: Uuid, used_at: DateTime<Utc>) -> Result<(), RepoError> {
        let mut key = self.keys.get_mut(&id).ok_or(RepoError::NotFound)?;
        key.usage_count += 1;
        key.last_used_at = Some(used_at);
        Ok(())
    }
}
