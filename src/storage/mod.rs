pub mod cached;
pub mod postgres;
pub mod sqlite;
pub mod trait_def;

pub use cached::CachedStorage;
pub use postgres::PostgresStorage;
pub use sqlite::SqliteStorage;
pub use trait_def::{LookupMetadata, LookupResult, Storage, StorageError, StorageResult};

/// Current time as unix seconds
pub(crate) fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Open the configured database backend. Tables are not created here; call
/// [`Storage::init`] on the result.
pub async fn connect(
    config: &crate::config::DatabaseConfig,
) -> StorageResult<std::sync::Arc<dyn Storage>> {
    use crate::config::DatabaseBackend;

    let storage: std::sync::Arc<dyn Storage> = match config.backend {
        DatabaseBackend::Sqlite => {
            tracing::info!("Using SQLite storage: {}", config.url);
            std::sync::Arc::new(SqliteStorage::new(&config.url, config.max_connections).await?)
        }
        DatabaseBackend::Postgres => {
            tracing::info!("Using PostgreSQL storage");
            std::sync::Arc::new(PostgresStorage::new(&config.url, config.max_connections).await?)
        }
    };
    Ok(storage)
}
