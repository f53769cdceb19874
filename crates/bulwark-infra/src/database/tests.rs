use chrono::Utc;
use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};
use uuid::Uuid;

use bulwark_core::error::RepoError;
use bulwark_core::ports::ApiKeyRepository;

use crate::database::PostgresApiKeyRepository;
use crate::database::entity::api_key;

fn model(owner_id: Uuid, prefix: &str) -> api_key::Model {
    let now = Utc::now();
    api_key::Model {
        id: Uuid::new_v4(),
        owner_id,
        name: "ci".to_owned(),
        key_hash: "ab".repeat(32),
        prefix: prefix.to_owned(),
        permissions: serde_json::json!(["read"]),
        rate_limit: 1000,
        allowed_ips: serde_json::json!(["10.0.0.1"]),
        allowed_referers: serde_json::json!([]),
        created_at: now.into(),
        updated_at: now.into(),
        expires_at: None,
        last_used_at: None,
        usage_count: 7,
        is_active: true,
    }
}

#[tokio::test]
async fn test_find_by_prefix_maps_model() {
    let owner = Uuid::new_v4();
    let row = model(owner, "deadbeef");
    let id = row.id;

    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results(vec![vec![row]])
        .into_connection();
    let repo = PostgresApiKeyRepository::new(db);

    let key = repo.find_by_prefix("deadbeef").await.unwrap().unwrap();
    assert_eq!(key.id, id);
    assert_eq!(key.owner_id, owner);
    assert_eq!(key.permissions, vec!["read".to_string()]);
    assert_eq!(key.allowed_ips, vec!["10.0.0.1".to_string()]);
    assert!(key.allowed_referers.is_empty());
    assert_eq!(key.usage_count, 7);
}

#[tokio::test]
async fn test_list_for_owner() {
    let owner = Uuid::new_v4();
    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results(vec![vec![model(owner, "aaaaaaaa"), model(owner, "bbbbbbbb")]])
        .into_connection();
    let repo = PostgresApiKeyRepository::new(db);

    let keys = repo.list_for_owner(owner).await.unwrap();
    assert_eq!(keys.len(), 2);
    assert_eq!(keys[1].prefix, "bbbbbbbb");
}

#[tokio::test]
async fn test_touch_missing_key_is_not_found() {
    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_exec_results(vec![
            MockExecResult {
                last_insert_id: 0,
                rows_affected: 1,
            },
            MockExecResult {
                last_insert_id: 0,
                rows_affected: 0,
            },
        ])
        .into_connection();
    let repo = PostgresApiKeyRepository::new(db);

    assert!(repo.touch(Uuid::new_v4(), Utc::now()).await.is_ok());
    assert!(matches!(
        repo.touch(Uuid::new_v4(), Utc::now()).await,
        Err(RepoError::NotFound)
    ));
}

#[tokio::test]
async fn test_ensure_schema_creates_tables_if_missing() {
    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_exec_results(
            (0..6).map(|_| MockExecResult { last_insert_id: 0, rows_affected: 0 }),
        )
        .into_connection();

    crate::database::ensure_schema(&db).await.unwrap();

    let log = db.into_transaction_log();
    let sql: Vec<String> = log.iter().map(|t| format!("{t:?}")).collect();
    assert!(sql.len() >= 3);
    assert!(sql[0].contains("IF NOT EXISTS") && sql[0].contains("api_keys"));
    assert!(sql.iter().any(|s| s.contains("api_key_usage")));
}
