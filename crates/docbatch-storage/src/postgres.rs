//! PostgreSQL storage implementation.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::error::{StorageError, StorageResult};
use crate::traits::{
    AccessPolicy, BatchQuery, BatchRow, Document, DocumentReader, DocumentStore,
};

/// Default query timeout in seconds.
const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 30;

/// Every lookup kind of one batch in a single statement.
///
/// `$1` is the JSON payload `{"id": [...], "uk": [...], "jp": [{path, orderBy}]}`,
/// `$2` the access predicate evaluated against `allowed`. Path-query rows are
/// produced for every descriptor, matching or not.
const BATCH_SQL: &str = r#"
WITH filtered AS NOT MATERIALIZED (
    SELECT items.id, items.object, items.uniquekeys
    FROM items
    WHERE items.allowed @@ $2::jsonpath
      AND COALESCE(items.object->>'status', '') NOT IN ('deleted', 'replaced')
),
options AS MATERIALIZED (
    SELECT $1::jsonb AS payload
)
SELECT 'id' AS kind, NULL::bigint AS index, filtered.id::text AS id, filtered.object AS object
FROM options, filtered, jsonb_array_elements_text(options.payload->'id') AS ids(id)
WHERE filtered.id = ids.id::uuid
UNION ALL
SELECT 'uk' AS kind, queries.index - 1 AS index, filtered.id::text AS id, filtered.object AS object
FROM options, filtered,
     jsonb_array_elements_text(options.payload->'uk') WITH ORDINALITY AS queries(query, index)
WHERE filtered.uniquekeys @@ queries.query::jsonpath
UNION ALL
SELECT 'jp' AS kind, queries.index - 1 AS index, NULL AS id, COALESCE((
    SELECT jsonb_agg(
        filtered.id
        ORDER BY filtered.object #> string_to_array(queries.query->>'orderBy', '.'), filtered.id
    )
    FROM filtered
    WHERE filtered.object @@ (queries.query->>'path')::jsonpath
), '[]'::jsonb) AS object
FROM options,
     jsonb_array_elements(options.payload->'jp') WITH ORDINALITY AS queries(query, index)
"#;

/// PostgreSQL configuration options.
#[derive(Clone)]
pub struct PostgresConfig {
    /// Database connection URL.
    pub database_url: String,
    /// Maximum number of connections in the pool.
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    pub min_connections: u32,
    /// Connection acquire timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Maximum time a batch may take before it fails with
    /// `StorageError::QueryTimeout`.
    pub query_timeout_secs: u64,
}

// Custom Debug implementation to hide credentials in database_url
impl std::fmt::Debug for PostgresConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("database_url", &"[REDACTED]")
            .field("max_connections", &self.max_connections)
            .field("min_connections", &self.min_connections)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("query_timeout_secs", &self.query_timeout_secs)
            .finish()
    }
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/docbatch".to_string(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout_secs: 30,
            query_timeout_secs: DEFAULT_QUERY_TIMEOUT_SECS,
        }
    }
}

/// PostgreSQL implementation of DocumentStore.
pub struct PostgresDocumentStore {
    pool: PgPool,
    query_timeout: Duration,
    policy: AccessPolicy,
}

impl PostgresDocumentStore {
    /// Creates a store from a connection pool, with the default query timeout.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            query_timeout: Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS),
            policy: AccessPolicy::default(),
        }
    }

    /// Creates a store from a connection pool with a custom query timeout.
    pub fn with_timeout(pool: PgPool, query_timeout: Duration) -> Self {
        Self {
            query_timeout,
            ..Self::new(pool)
        }
    }

    /// Replaces the access policy applied to every lookup.
    pub fn with_policy(mut self, policy: AccessPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Creates a store with the given configuration.
    #[instrument(skip(config))]
    pub async fn from_config(config: &PostgresConfig) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.database_url)
            .await
            .map_err(|e| StorageError::ConnectionError {
                message: e.to_string(),
            })?;

        Ok(Self::with_timeout(
            pool,
            Duration::from_secs(config.query_timeout_secs),
        ))
    }

    /// Returns the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the `items` table and its indexes if missing.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> StorageResult<()> {
        debug!("Running database migrations");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS items (
                id UUID PRIMARY KEY,
                object JSONB NOT NULL,
                uniquekeys JSONB NOT NULL DEFAULT '{}'::jsonb,
                allowed JSONB NOT NULL DEFAULT '{}'::jsonb
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError {
            message: format!("Failed to create items table: {e}"),
        })?;

        for column in ["object", "uniquekeys", "allowed"] {
            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS items_{column}_idx ON items USING gin ({column} jsonb_path_ops)"
            ))
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::QueryError {
                message: format!("Failed to create index on items.{column}: {e}"),
            })?;
        }

        debug!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for PostgresDocumentStore {
    type Connection = PostgresConnection;

    #[instrument(skip(self))]
    async fn acquire(&self) -> StorageResult<PostgresConnection> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| StorageError::ConnectionError {
                message: e.to_string(),
            })?;

        sqlx::query("BEGIN ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut *conn)
            .await
            .map_err(|e| StorageError::TransactionError {
                message: format!("Failed to begin snapshot transaction: {e}"),
            })?;

        // REPEATABLE READ takes its snapshot at the first statement, not at BEGIN.
        if let Err(e) = sqlx::query("SELECT 1").execute(&mut *conn).await {
            drop(conn.detach());
            return Err(StorageError::TransactionError {
                message: format!("Failed to pin snapshot: {e}"),
            });
        }

        Ok(PostgresConnection {
            conn: Mutex::new(Some(conn)),
            query_timeout: self.query_timeout,
            view_predicate: self.policy.view_predicate(),
        })
    }

    #[instrument(skip(self, connection))]
    async fn release(&self, connection: &PostgresConnection, erred: bool) -> StorageResult<()> {
        let Some(mut conn) = connection.conn.lock().await.take() else {
            return Ok(());
        };

        let rollback = sqlx::query("ROLLBACK").execute(&mut *conn).await;

        if erred || rollback.is_err() {
            if let Err(e) = conn.close().await {
                warn!(error = %e, "Failed to close discarded connection");
            }
        }

        rollback
            .map(|_| ())
            .map_err(|e| StorageError::TransactionError {
                message: format!("Failed to roll back snapshot transaction: {e}"),
            })
    }
}

/// A pooled connection inside a read-only snapshot transaction.
pub struct PostgresConnection {
    conn: Mutex<Option<PoolConnection<Postgres>>>,
    query_timeout: Duration,
    view_predicate: String,
}

impl std::fmt::Debug for PostgresConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresConnection")
            .field("query_timeout", &self.query_timeout)
            .field("view_predicate", &self.view_predicate)
            .finish_non_exhaustive()
    }
}

// A connection dropped without `release` still has its transaction open and
// must not go back to the pool.
impl Drop for PostgresConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.get_mut().take() {
            warn!("Snapshot connection dropped without release, discarding");
            drop(conn.detach());
        }
    }
}

impl PostgresConnection {
    /// Wraps an async operation with a timeout and records metrics.
    ///
    /// # Metrics
    /// - `docbatch_storage_query_duration_seconds` - Histogram of query durations
    /// - `docbatch_storage_query_timeout_total` - Counter of timeout events
    async fn execute_with_timeout_and_metrics<T, F>(
        &self,
        operation: &str,
        future: F,
    ) -> StorageResult<T>
    where
        F: std::future::Future<Output = StorageResult<T>>,
    {
        let start = Instant::now();
        let result = tokio::time::timeout(self.query_timeout, future).await;
        let duration = start.elapsed().as_secs_f64();

        let (status, final_result) = match result {
            Ok(Ok(value)) => ("success", Ok(value)),
            Ok(Err(e)) => ("error", Err(e)),
            Err(_elapsed) => (
                "timeout",
                Err(StorageError::QueryTimeout {
                    operation: operation.to_string(),
                    timeout: self.query_timeout,
                }),
            ),
        };

        metrics::histogram!(
            "docbatch_storage_query_duration_seconds",
            "operation" => operation.to_string(),
            "backend" => "postgres",
            "status" => status.to_string()
        )
        .record(duration);

        if status == "timeout" {
            metrics::counter!(
                "docbatch_storage_query_timeout_total",
                "operation" => operation.to_string(),
                "backend" => "postgres"
            )
            .increment(1);
        }

        final_result
    }
}

#[async_trait]
impl DocumentReader for PostgresConnection {
    #[instrument(skip(self, query), fields(keys = query.len()))]
    async fn fetch_batch(&self, query: &BatchQuery) -> StorageResult<Vec<BatchRow>> {
        let payload = batch_payload(query)?;

        let rows = self
            .execute_with_timeout_and_metrics("fetch_batch", async {
                let mut guard = self.conn.lock().await;
                let conn = guard.as_mut().ok_or_else(|| StorageError::TransactionError {
                    message: "connection already released".to_string(),
                })?;

                sqlx::query(BATCH_SQL)
                    .bind(&payload)
                    .bind(&self.view_predicate)
                    .fetch_all(&mut **conn)
                    .await
                    .map_err(|e| StorageError::QueryError {
                        message: format!("Batch query failed: {e}"),
                    })
            })
            .await?;

        debug!(rows = rows.len(), "postgres batch executed");
        rows.into_iter().map(row_to_batch_row).collect()
    }
}

/// Serializes a batch, dropping identifiers that cannot match the `uuid`
/// id column.
///
/// Identifiers must be in canonical lowercase hyphenated form: rows come back
/// as `id::text`, which is canonical, and results are keyed by that text.
fn batch_payload(query: &BatchQuery) -> StorageResult<Value> {
    let ids: Vec<&String> = query
        .ids
        .iter()
        .filter(|id| {
            let canonical = Uuid::parse_str(id)
                .map(|uuid| uuid.hyphenated().to_string() == **id)
                .unwrap_or(false);
            if !canonical {
                debug!(id = %id, "identifier is not a canonical uuid; treating as not found");
            }
            canonical
        })
        .collect();

    let mut payload =
        serde_json::to_value(query).map_err(|e| StorageError::SerializationError {
            message: format!("Failed to serialize batch payload: {e}"),
        })?;
    payload["id"] = serde_json::json!(ids);
    Ok(payload)
}

/// Parse a database row into a BatchRow.
fn row_to_batch_row(row: PgRow) -> StorageResult<BatchRow> {
    let kind: String = get_column(&row, "kind")?;
    let index: Option<i64> = get_column(&row, "index")?;
    let id: Option<String> = get_column(&row, "id")?;
    let object: Value = get_column(&row, "object")?;

    let row_index = || -> StorageResult<usize> {
        index
            .and_then(|i| usize::try_from(i).ok())
            .ok_or_else(|| StorageError::QueryError {
                message: format!("{kind} row without a valid index"),
            })
    };
    let row_id = || -> StorageResult<String> {
        id.clone().ok_or_else(|| StorageError::QueryError {
            message: format!("{kind} row without an id"),
        })
    };

    match kind.as_str() {
        "id" => Ok(BatchRow::Document {
            id: row_id()?,
            document: Document::new(object),
        }),
        "uk" => Ok(BatchRow::UniqueKey {
            index: row_index()?,
            id: row_id()?,
            document: Document::new(object),
        }),
        "jp" => {
            let ids = serde_json::from_value::<Vec<String>>(object).map_err(|e| {
                StorageError::SerializationError {
                    message: format!("Failed to deserialize path query ids: {e}"),
                }
            })?;
            Ok(BatchRow::PathQuery {
                index: row_index()?,
                ids,
            })
        }
        other => Err(StorageError::QueryError {
            message: format!("unexpected row kind '{other}'"),
        }),
    }
}

fn get_column<'r, T>(row: &'r PgRow, column: &str) -> StorageResult<T>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column).map_err(|e| StorageError::QueryError {
        message: format!("Failed to decode column '{column}': {e}"),
    })
}
