use std::time::Duration;

use sea_orm::{ConnectOptions, ConnectionTrait, Database, DbConn, DbErr, EntityTrait, Schema};

use super::entity::{api_key, api_key_usage};
use crate::env;

/// Connection settings for the API key store.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

impl DatabaseConfig {
    /// `None` when `DATABASE_URL` is unset, selecting the in-process store.
    pub fn from_env() -> Option<Self> {
        let url = std::env::var("DATABASE_URL").ok().filter(|u| !u.is_empty())?;
        Some(Self {
            url,
            max_connections: env::parse_or("DB_MAX_CONNECTIONS", 20),
            min_connections: env::parse_or("DB_MIN_CONNECTIONS", 2),
        })
    }
}

pub async fn connect(config: &DatabaseConfig) -> Result<DbConn, DbErr> {
    let opts = ConnectOptions::new(&config.url)
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(300))
        .sqlx_logging(false)
        .to_owned();

    let conn = Database::connect(opts).await?;
    tracing::info!(pool = config.max_connections, "Database connected");
    ensure_schema(&conn).await?;
    Ok(conn)
}

/// Create the key and usage tables (and their indexes) when missing.
pub async fn ensure_schema(db: &DbConn) -> Result<(), DbErr> {
    create_if_missing(db, api_key::Entity).await?;
    create_if_missing(db, api_key_usage::Entity).await?;
    Ok(())
}

async fn create_if_missing<E: EntityTrait>(db: &DbConn, entity: E) -> Result<(), DbErr> {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    let mut table = schema.create_table_from_entity(entity);
    table.if_not_exists();
    db.execute(backend.build(&table)).await?;

    for mut index in schema.create_index_from_entity(entity) {
        index.if_not_exists();
        db.execute(backend.build(&index)).await?;
    }
    Ok(())
}
