//! PostgreSQL API key repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, DbConn, DbErr, EntityTrait, QueryFilter, QueryOrder};
use uuid::Uuid;

use bulwark_core::domain::{ApiKey, ApiKeyUsage};
use bulwark_core::error::RepoError;
use bulwark_core::ports::ApiKeyRepository;

use super::entity::api_key::{self, Entity as ApiKeyEntity};
use super::entity::api_key_usage::{self, Entity as UsageEntity};

fn query_error(e: DbErr) -> RepoError {
    let err_str = e.to_string();
    if err_str.contains("duplicate") || err_str.contains("unique") {
        RepoError::Constraint(err_str)
    } else {
        RepoError::Query(err_str)
    }
}

pub struct PostgresApiKeyRepository {
    db: DbConn,
}

impl PostgresApiKeyRepository {
    pub fn new(db: DbConn) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ApiKeyRepository for PostgresApiKeyRepository {
    async fn insert(&self, key: &ApiKey) -> Result<(), RepoError> {
        ApiKeyEntity::insert(api_key::ActiveModel::from(key.clone()))
            .exec_without_returning(&self.db)
            .await
            .map_err(query_error)?;
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<ApiKey>, RepoError> {
        let result = ApiKeyEntity::find_by_id(id)
            .one(&self.db)
            .await
            .map_err(query_error)?;

        Ok(result.map(Into::into))
    }

    async fn find_by_prefix(&self, prefix: &str) -> Result<Option<ApiKey>, RepoError> {
        tracing::debug!(prefix = %prefix, "Finding API key by prefix");

        let result = ApiKeyEntity::find()
            .filter(api_key::Column::Prefix.eq(prefix))
            .one(&self.db)
            .await
            .map_err(query_error)?;

        Ok(result.map(Into::into))
    }

    async fn list_for_owner(&self, owner_id: Uuid) -> Result<Vec<ApiKey>, RepoError> {
        let result = ApiKeyEntity::find()
            .filter(api_key::Column::OwnerId.eq(owner_id))
            .order_by_asc(api_key::Column::CreatedAt)
            .all(&self.db)
            .await
            .map_err(query_error)?;

        Ok(result.into_iter().map(Into::into).collect())
    }

    async fn update(&self, key: &ApiKey) -> Result<(), RepoError> {
        match ApiKeyEntity::update(api_key::ActiveModel::from(key.clone()))
            .exec(&self.db)
            .await
        {
            Ok(_) => Ok(()),
            Err(DbErr::RecordNotUpdated) => Err(RepoError::NotFound),
            Err(e) => Err(query_error(e)),
        }
    }

    async fn append_usage(&self, usage: &ApiKeyUsage) -> Result<(), RepoError> {
        UsageEntity::insert(api_key_usage::ActiveModel::from(usage.clone()))
            .exec_without_returning(&self.db)
            .await
            .map_err(query_error)?;
        Ok(())
    }

    async fn touch(&self, id: Uuid, used_at: DateTime<Utc>) -> Result<(), RepoError> {
        let used_at: sea_orm::prelude::DateTimeWithTimeZone = used_at.into();
        let result = ApiKeyEntity::update_many()
            .col_expr(api_key::Column::UsageCount, Expr::cust("usage_count + 1"))
            .col_expr(api_key::Column::LastUsedAt, Expr::value(used_at))
            .filter(api_key::Column::Id.eq(id))
            .exec(&self.db)
            .await
            .map_err(query_error)?;

        if result.rows_affected == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }
}
