//! Durable API key storage on PostgreSQL.

mod connections;
pub mod entity;
mod postgres_repo;

pub use connections::{DatabaseConfig, connect, ensure_schema};
pub use postgres_repo::PostgresApiKeyRepository;

#[cfg(test)]
mod tests;
