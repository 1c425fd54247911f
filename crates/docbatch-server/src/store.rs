//! Builds the document store named by `storage.backend`.

use async_trait::async_trait;
use docbatch_storage::{
    BatchQuery, BatchRow, DocumentReader, DocumentStore, MemoryDocumentStore, MemorySnapshot,
    PostgresConnection, PostgresDocumentStore, StorageError, StorageResult,
};
use thiserror::Error;
use tracing::info;

use crate::config::{ConfigLoadError, ServerConfig};

/// Errors from building the configured store.
#[derive(Debug, Error)]
pub enum StoreBuildError {
    #[error(transparent)]
    Config(#[from] ConfigLoadError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// The store selected by configuration.
pub enum ConfiguredStore {
    Memory(MemoryDocumentStore),
    Postgres(PostgresDocumentStore),
}

impl ConfiguredStore {
    /// Validates `config` and builds its backend.
    ///
    /// The PostgreSQL backend connects its pool and creates the `items`
    /// table before returning.
    pub async fn from_config(config: &ServerConfig) -> Result<Self, StoreBuildError> {
        config.validate()?;

        match config.postgres_config() {
            None => {
                info!("Using in-memory storage backend");
                Ok(Self::Memory(MemoryDocumentStore::with_policy(
                    config.access_policy(),
                )))
            }
            Some(pg_config) => {
                info!("Connecting to PostgreSQL database");
                let store = PostgresDocumentStore::from_config(&pg_config)
                    .await?
                    .with_policy(config.access_policy());
                store.run_migrations().await?;
                info!("PostgreSQL connection established");
                Ok(Self::Postgres(store))
            }
        }
    }

    /// Backend name, as spelled in configuration.
    pub fn backend(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            Self::Postgres(_) => "postgres",
        }
    }
}

/// A snapshot connection from a [`ConfiguredStore`].
pub enum ConfiguredConnection {
    Memory(MemorySnapshot),
    Postgres(PostgresConnection),
}

#[async_trait]
impl DocumentReader for ConfiguredConnection {
    async fn fetch_batch(&self, query: &BatchQuery) -> StorageResult<Vec<BatchRow>> {
        match self {
            Self::Memory(conn) => conn.fetch_batch(query).await,
            Self::Postgres(conn) => conn.fetch_batch(query).await,
        }
    }
}

#[async_trait]
impl DocumentStore for ConfiguredStore {
    type Connection = ConfiguredConnection;

    async fn acquire(&self) -> StorageResult<ConfiguredConnection> {
        Ok(match self {
            Self::Memory(store) => ConfiguredConnection::Memory(store.acquire().await?),
            Self::Postgres(store) => ConfiguredConnection::Postgres(store.acquire().await?),
        })
    }

    async fn release(&self, connection: &ConfiguredConnection, erred: bool) -> StorageResult<()> {
        match (self, connection) {
            (Self::Memory(store), ConfiguredConnection::Memory(conn)) => {
                store.release(conn, erred).await
            }
            (Self::Postgres(store), ConfiguredConnection::Postgres(conn)) => {
                store.release(conn, erred).await
            }
            _ => Err(StorageError::TransactionError {
                message: "connection was acquired from a different backend".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docbatch_storage::StoredItem;
    use serde_json::json;

    use crate::unit_of_work::with_loader;

    #[tokio::test]
    async fn test_default_config_builds_memory_store() {
        let config = ServerConfig::default();
        let store = ConfiguredStore::from_config(&config).await.unwrap();
        assert_eq!(store.backend(), "memory");

        let ConfiguredStore::Memory(memory) = &store else {
            panic!("expected the memory backend");
        };
        memory.insert(StoredItem::new("a", json!({"uuid": "a"})));

        let doc = with_loader(&store, config.loader_config(), |loader| async move {
            loader.get_by_uuid("a").await
        })
        .await
        .unwrap();
        assert_eq!(doc.and_then(|d| d.uuid().map(String::from)), Some("a".into()));
    }

    #[tokio::test]
    async fn test_memory_store_applies_configured_principal() {
        let config = ServerConfig::default();
        let store = ConfiguredStore::from_config(&config).await.unwrap();
        let ConfiguredStore::Memory(memory) = &store else {
            panic!("expected the memory backend");
        };
        memory.insert(
            StoredItem::new("e", json!({"uuid": "e"}))
                .with_allowed(json!({"view": ["group.submitters"]})),
        );

        let doc = with_loader(&store, config.loader_config(), |loader| async move {
            loader.get_by_uuid("e").await
        })
        .await
        .unwrap();
        assert!(doc.is_none());
    }

    #[tokio::test]
    async fn test_postgres_without_url_is_rejected_before_connecting() {
        let mut config = ServerConfig::default();
        config.storage.backend = "postgres".to_string();

        let err = ConfiguredStore::from_config(&config).await.err().unwrap();
        assert!(matches!(
            err,
            StoreBuildError::Config(ConfigLoadError::Invalid { .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_backend_is_rejected() {
        let mut config = ServerConfig::default();
        config.storage.backend = "sqlite".to_string();

        let err = ConfiguredStore::from_config(&config).await.err().unwrap();
        assert!(err.to_string().contains("storage.backend"), "{err}");
    }
}
