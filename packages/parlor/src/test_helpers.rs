use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::sync::Arc;

use crate::AppState;
use crate::config::{FileConfig, ServerConfig};
use crate::db::{Database, run_migrations};
use crate::metrics::ServerMetrics;
use crate::store::MessageStore;

pub async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    run_migrations(&pool).await.unwrap();
    pool
}

pub async fn test_store() -> MessageStore {
    MessageStore::new(test_pool().await)
}

pub async fn test_app_state() -> AppState {
    test_app_state_with(ServerConfig::from_file(&FileConfig::default())).await
}

pub async fn test_app_state_with(config: ServerConfig) -> AppState {
    let db = Database {
        pool: test_pool().await,
    };
    AppState::new(config, db, Arc::new(ServerMetrics::new()))
}
