//! Durable API key storage port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{ApiKey, ApiKeyUsage};
use crate::error::RepoError;

#[async_trait]
pub trait ApiKeyRepository: Send + Sync {
    async fn insert(&self, key: &ApiKey) -> Result<(), RepoError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<ApiKey>, RepoError>;

    async fn find_by_prefix(&self, prefix: &str) -> Result<Option<ApiKey>, RepoError>;

    async fn list_for_owner(&self, owner_id: Uuid) -> Result<Vec<ApiKey>, RepoError>;

    /// Replace the stored record. `RepoError::NotFound` when it does not exist.
    async fn update(&self, key: &ApiKey) -> Result<(), RepoError>;

    async fn append_usage(&self, usage: &ApiKeyUsage) -> Result<(), RepoError>;

    /// Bump the usage counter and last-used timestamp.
    async fn touch(&self, id: Uuid, used_at: DateTime<Utc>) -> Result<(), RepoError>;
}
