//! Append-only API key usage log.

use sea_orm::Set;
use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "api_key_usage")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(indexed)]
    pub api_key_id: Uuid,
    pub ip_address: String,
    pub user_agent: String,
    pub endpoint: String,
    pub method: String,
    pub timestamp: DateTimeWithTimeZone,
    pub success: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::api_key::Entity",
        from = "Column::ApiKeyId",
        to = "super::api_key::Column::Id",
        on_update = "Cascade",
        on_delete = "Cascade"
    )]
    ApiKey,
}

impl Related<super::api_key::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ApiKey.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl From<Model> for bulwark_core::domain::ApiKeyUsage {
    fn from(model: Model) -> Self {
        Self {
            id: model.id,
            api_key_id: model.api_key_id,
            ip_address: model.ip_address,
            user_agent: model.user_agent,
            endpoint: model.endpoint,
            method: model.method,
            timestamp: model.timestamp.into(),
            success: model.success,
        }
    }
}

impl From<bulwark_core::domain::ApiKeyUsage> for ActiveModel {
    fn from(usage: bulwark_core::domain::ApiKeyUsage) -> Self {
        Self {
            id: Set(usage.id),
            api_key_id: Set(usage.api_key_id),
            ip_address: Set(usage.ip_address),
            user_agent: Set(usage.user_agent),
            endpoint: Set(usage.endpoint),
            method: Set(usage.method),
            timestamp: Set(usage.timestamp.into()),
            success: Set(usage.success),
        }
    }
}
