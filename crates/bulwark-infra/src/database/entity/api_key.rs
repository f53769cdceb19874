//! API key entity for SeaORM.

use sea_orm::Set;
use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "api_keys")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(indexed)]
    pub owner_id: Uuid,
    pub name: String,
    pub key_hash: String,
    #[sea_orm(unique)]
    pub prefix: String,
    pub permissions: Json,
    pub rate_limit: i32,
    pub allowed_ips: Json,
    pub allowed_referers: Json,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
    pub expires_at: Option<DateTimeWithTimeZone>,
    pub last_used_at: Option<DateTimeWithTimeZone>,
    pub usage_count: i64,
    pub is_active: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::api_key_usage::Entity")]
    Usage,
}

impl Related<super::api_key_usage::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Usage.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

fn strings(value: Json) -> Vec<String> {
    serde_json::from_value(value).unwrap_or_default()
}

fn json(values: Vec<String>) -> Json {
    Json::from(values)
}

impl From<Model> for bulwark_core::domain::ApiKey {
    fn from(model: Model) -> Self {
        Self {
            id: model.id,
            owner_id: model.owner_id,
            name: model.name,
            key_hash: model.key_hash,
            prefix: model.prefix,
            permissions: strings(model.permissions),
            rate_limit: u32::try_from(model.rate_limit).unwrap_or(0),
            allowed_ips: strings(model.allowed_ips),
            allowed_referers: strings(model.allowed_referers),
            created_at: model.created_at.into(),
            updated_at: model.updated_at.into(),
            expires_at: model.expires_at.map(Into::into),
            last_used_at: model.last_used_at.map(Into::into),
            usage_count: u64::try_from(model.usage_count).unwrap_or(0),
            is_active: model.is_active,
        }
    }
}

impl From<bulwark_core::domain::ApiKey> for ActiveModel {
    fn from(key: bulwark_core::domain::ApiKey) -> Self {
        Self {
            id: Set(key.id),
            owner_id: Set(key.owner_id),
            name: Set(key.name),
            key_hash: Set(key.key_hash),
            prefix: Set(key.prefix),
            permissions: Set(json(key.permissions)),
            rate_limit: Set(i32::try_from(key.rate_limit).unwrap_or(i32::MAX)),
            allowed_ips: Set(json(key.allowed_ips)),
            allowed_referers: Set(json(key.allowed_referers)),
            created_at: Set(key.created_at.into()),
            updated_at: Set(key.updated_at.into()),
            expires_at: Set(key.expires_at.map(Into::into)),
            last_used_at: Set(key.last_used_at.map(Into::into)),
            usage_count: Set(i64::try_from(key.usage_count).unwrap_or(i64::MAX)),
            is_active: Set(key.is_active),
        }
    }
}
