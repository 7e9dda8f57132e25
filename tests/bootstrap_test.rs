//! Integration tests for the composition root.

use sqlroute::{DataAccess, DbError, PoolRole, PoolSettings, Settings};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn sqlite_settings(dir: &TempDir) -> Settings {
    let mapper_dir = dir.path().join("mappers");
    fs::create_dir_all(&mapper_dir).unwrap();
    fs::write(
        mapper_dir.join("posts.sql"),
        "-- name: all_posts\nSELECT id, title FROM posts ORDER BY id\n\n\
         -- name: insert_post\nINSERT INTO posts (title) VALUES (?)\n",
    )
    .unwrap();

    let db = dir.path().join("blog.db");
    let url = format!("sqlite:{}", db.display());
    Settings {
        primary: PoolSettings::from_url(&url),
        secondary: PoolSettings::from_url(&url),
        mapper_dir,
        statement_namespace: None,
        default_role: PoolRole::Secondary,
    }
}

#[tokio::test]
async fn test_bootstrap_wires_everything() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let settings = sqlite_settings(&dir);

    let data = DataAccess::bootstrap(&settings).await.unwrap();

    assert_eq!(data.router().default_role(), PoolRole::Secondary);
    assert_eq!(data.session(None).role(), PoolRole::Secondary);
    assert_eq!(
        data.session(Some(PoolRole::Primary)).role(),
        PoolRole::Primary
    );
    assert_eq!(data.transactions().count().await, 0);

    data.close().await;
}

#[tokio::test]
async fn test_bootstrap_end_to_end() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let settings = sqlite_settings(&dir);
    let data = DataAccess::bootstrap(&settings).await.unwrap();

    let primary = data.session(Some(PoolRole::Primary));
    primary
        .execute_sql(
            "CREATE TABLE posts (id INTEGER PRIMARY KEY, title TEXT)",
            &[],
        )
        .await
        .unwrap();
    primary
        .execute("insert_post", &["first".into()])
        .await
        .unwrap();

    let rows = data.session(None).query("all_posts", &[]).await.unwrap();
    assert_eq!(rows.rows.len(), 1);
    assert_eq!(rows.rows[0]["title"], "first");

    data.close().await;
}

#[tokio::test]
async fn test_bootstrap_rejects_missing_mapper_dir() {
    let dir = TempDir::new().unwrap();
    let mut settings = sqlite_settings(&dir);
    settings.mapper_dir = PathBuf::from(dir.path().join("no_such_dir"));

    let result = DataAccess::bootstrap(&settings).await;
    assert!(matches!(result, Err(DbError::Config { .. })));
}

#[tokio::test]
async fn test_bootstrap_rejects_empty_mapper_dir() {
    let dir = TempDir::new().unwrap();
    let mut settings = sqlite_settings(&dir);
    let empty = dir.path().join("empty");
    fs::create_dir_all(&empty).unwrap();
    settings.mapper_dir = empty;

    let result = DataAccess::bootstrap(&settings).await;
    assert!(matches!(result, Err(DbError::Config { .. })));
}

#[tokio::test]
async fn test_bootstrap_rejects_invalid_url() {
    let dir = TempDir::new().unwrap();
    let mut settings = sqlite_settings(&dir);
    settings.primary = PoolSettings::from_url("not a url");

    let result = DataAccess::bootstrap(&settings).await;
    assert!(matches!(result, Err(DbError::Config { .. })));
}

#[tokio::test]
async fn test_bootstrap_with_primary_default_role() {
    let dir = TempDir::new().unwrap();
    let mut settings = sqlite_settings(&dir);
    settings.default_role = PoolRole::Primary;

    let data = DataAccess::bootstrap(&settings).await.unwrap();
    assert_eq!(data.session(None).role(), PoolRole::Primary);
    data.close().await;
}
