//! `PostgreSQL` entity store for the Matchbook reservation engine.
//!
//! [`PostgresEntityStore`] implements the `EntityStore` contract from
//! `matchbook-core` over a single `documents` table. Transactions run at
//! SERIALIZABLE isolation, so Postgres' own conflict detection covers both the
//! documents a transaction read and the prefix ranges it scanned. A
//! serialization failure surfaces as `StoreError::Conflict`, which the engine
//! retries.
//!
//! # Example
//!
//! ```ignore
//! use matchbook_postgres::PostgresEntityStore;
//! use matchbook_runtime::EngineConfig;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EngineConfig::from_env();
//!     let store = PostgresEntityStore::from_config(&config.postgres).await?;
//!     store.migrate().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use matchbook_core::store::{
    Document, DocumentKey, EntityStore, StoreError, StoreFuture, StoreTransaction, Version,
};
use matchbook_runtime::config::PostgresConfig;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgConnection, PgPool, Postgres, Row, Transaction};
use std::time::Duration;

/// Conflicts reported by Postgres: serialization failure and deadlock.
const RETRYABLE_SQLSTATES: [&str; 2] = ["40001", "40P01"];

fn map_sqlx(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err
            .code()
            .is_some_and(|code| RETRYABLE_SQLSTATES.contains(&&*code))
        {
            metrics::counter!("matchbook_store_serialization_failures_total").increment(1);
            return StoreError::Conflict(db_err.message().to_string());
        }
    }
    StoreError::Unavailable(err.to_string())
}

fn map_insert(key: &DocumentKey, err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return StoreError::AlreadyExists(key.clone());
        }
    }
    map_sqlx(err)
}

fn to_db_version(version: Version) -> Result<i64, StoreError> {
    i64::try_from(version.value())
        .map_err(|_| StoreError::Serialization(format!("version {version} out of range")))
}

fn from_db_version(version: i64) -> Result<Version, StoreError> {
    u64::try_from(version)
        .map(Version::new)
        .map_err(|_| StoreError::Serialization(format!("negative version {version}")))
}

/// Escape `LIKE` wildcards so an id prefix matches literally.
fn like_prefix(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

fn document_from_row(collection: &str, row: &PgRow) -> Result<Document, StoreError> {
    let id: String = row.try_get("id").map_err(map_sqlx)?;
    let version: i64 = row.try_get("version").map_err(map_sqlx)?;
    let body: serde_json::Value = row.try_get("body").map_err(map_sqlx)?;
    Ok(Document {
        key: DocumentKey::new(collection, id),
        version: from_db_version(version)?,
        body,
    })
}

async fn fetch_document(
    conn: &mut PgConnection,
    key: &DocumentKey,
) -> Result<Option<Document>, StoreError> {
    let row = sqlx::query(
        r"
        SELECT id, version, body
        FROM documents
        WHERE collection = $1 AND id = $2
        ",
    )
    .bind(key.collection())
    .bind(key.id())
    .fetch_optional(conn)
    .await
    .map_err(map_sqlx)?;

    row.map(|row| document_from_row(key.collection(), &row))
        .transpose()
}

async fn fetch_range(
    conn: &mut PgConnection,
    collection: &str,
    id_prefix: &str,
) -> Result<Vec<Document>, StoreError> {
    let rows = sqlx::query(
        r"
        SELECT id, version, body
        FROM documents
        WHERE collection = $1 AND id LIKE $2 ESCAPE '\'
        ORDER BY id
        ",
    )
    .bind(collection)
    .bind(like_prefix(id_prefix))
    .fetch_all(conn)
    .await
    .map_err(map_sqlx)?;

    rows.iter()
        .map(|row| document_from_row(collection, row))
        .collect()
}

async fn insert_document(
    conn: &mut PgConnection,
    key: &DocumentKey,
    body: &serde_json::Value,
) -> Result<Version, StoreError> {
    let version = Version::INITIAL.next();
    sqlx::query(
        r"
        INSERT INTO documents (collection, id, version, body)
        VALUES ($1, $2, $3, $4)
        ",
    )
    .bind(key.collection())
    .bind(key.id())
    .bind(to_db_version(version)?)
    .bind(body)
    .execute(conn)
    .await
    .map_err(|e| map_insert(key, e))?;
    Ok(version)
}

/// Conditional replace. On a miss, tells a stale version from a missing row.
async fn swap_document(
    conn: &mut PgConnection,
    key: &DocumentKey,
    expected: Version,
    body: &serde_json::Value,
) -> Result<Version, StoreError> {
    let updated: Option<i64> = sqlx::query_scalar(
        r"
        UPDATE documents
        SET version = version + 1, body = $4, updated_at = now()
        WHERE collection = $1 AND id = $2 AND version = $3
        RETURNING version
        ",
    )
    .bind(key.collection())
    .bind(key.id())
    .bind(to_db_version(expected)?)
    .bind(body)
    .fetch_optional(&mut *conn)
    .await
    .map_err(map_sqlx)?;

    match updated {
        Some(version) => from_db_version(version),
        None => Err(miss(conn, key, expected).await),
    }
}

async fn delete_document(
    conn: &mut PgConnection,
    key: &DocumentKey,
    expected: Version,
) -> Result<(), StoreError> {
    let result = sqlx::query(
        r"
        DELETE FROM documents
        WHERE collection = $1 AND id = $2 AND version = $3
        ",
    )
    .bind(key.collection())
    .bind(key.id())
    .bind(to_db_version(expected)?)
    .execute(&mut *conn)
    .await
    .map_err(map_sqlx)?;

    if result.rows_affected() == 1 {
        Ok(())
    } else {
        Err(miss(conn, key, expected).await)
    }
}

async fn miss(conn: &mut PgConnection, key: &DocumentKey, expected: Version) -> StoreError {
    match fetch_document(conn, key).await {
        Ok(Some(doc)) => StoreError::VersionConflict {
            key: key.clone(),
            expected,
            actual: doc.version,
        },
        Ok(None) => StoreError::NotFound(key.clone()),
        Err(e) => e,
    }
}

/// `PostgreSQL`-backed [`EntityStore`].
#[derive(Clone, Debug)]
pub struct PostgresEntityStore {
    pool: PgPool,
}

impl PostgresEntityStore {
    /// Create a store over an existing connection pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect with default pool settings.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` if the database cannot be reached.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url).await.map_err(map_sqlx)?;
        Ok(Self::from_pool(pool))
    }

    /// Connect with explicit pool settings.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` if the database cannot be reached.
    pub async fn connect_with(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
        connect_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(connect_timeout)
            .connect(database_url)
            .await
            .map_err(map_sqlx)?;
        tracing::info!(max_connections, min_connections, "Connected to PostgreSQL");
        Ok(Self::from_pool(pool))
    }

    /// Connect with the pool settings of an engine configuration.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` if the database cannot be reached.
    pub async fn from_config(config: &PostgresConfig) -> Result<Self, StoreError> {
        Self::connect_with(
            &config.url,
            config.max_connections,
            config.min_connections,
            config.acquire_timeout(),
        )
        .await
    }

    /// Create the `documents` table if it does not exist.
    ///
    /// Ids use the "C" collation so `ORDER BY id` and prefix matching follow
    /// byte order.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` if a statement fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                collection TEXT NOT NULL,
                id TEXT COLLATE "C" NOT NULL,
                version BIGINT NOT NULL CHECK (version > 0),
                body JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                PRIMARY KEY (collection, id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Unavailable(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl EntityStore for PostgresEntityStore {
    fn get<'a>(&'a self, key: &'a DocumentKey) -> StoreFuture<'a, Option<Document>> {
        Box::pin(async move {
            let mut conn = self.pool.acquire().await.map_err(map_sqlx)?;
            fetch_document(&mut conn, key).await
        })
    }

    fn scan<'a>(&'a self, collection: &'a str, id_prefix: &'a str) -> StoreFuture<'a, Vec<Document>> {
        Box::pin(async move {
            let mut conn = self.pool.acquire().await.map_err(map_sqlx)?;
            fetch_range(&mut conn, collection, id_prefix).await
        })
    }

    fn insert<'a>(&'a self, key: &'a DocumentKey, body: serde_json::Value) -> StoreFuture<'a, Version> {
        Box::pin(async move {
            let mut conn = self.pool.acquire().await.map_err(map_sqlx)?;
            insert_document(&mut conn, key, &body).await
        })
    }

    fn put<'a>(&'a self, key: &'a DocumentKey, body: serde_json::Value) -> StoreFuture<'a, Version> {
        Box::pin(async move {
            let version: i64 = sqlx::query_scalar(
                r"
                INSERT INTO documents (collection, id, version, body)
                VALUES ($1, $2, 1, $3)
                ON CONFLICT (collection, id) DO UPDATE
                SET version = documents.version + 1, body = EXCLUDED.body, updated_at = now()
                RETURNING version
                ",
            )
            .bind(key.collection())
            .bind(key.id())
            .bind(&body)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx)?;
            from_db_version(version)
        })
    }

    fn compare_and_swap<'a>(
        &'a self,
        key: &'a DocumentKey,
        expected: Version,
        body: serde_json::Value,
    ) -> StoreFuture<'a, Version> {
        Box::pin(async move {
            let mut conn = self.pool.acquire().await.map_err(map_sqlx)?;
            swap_document(&mut conn, key, expected, &body).await
        })
    }

    fn begin(&self) -> StoreFuture<'_, Box<dyn StoreTransaction>> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
            sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx)?;
            let tx: Box<dyn StoreTransaction> = Box::new(PostgresTransaction { tx });
            Ok(tx)
        })
    }
}

/// A SERIALIZABLE database transaction. Rolled back on drop unless committed.
struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
}

impl StoreTransaction for PostgresTransaction {
    fn get<'a>(&'a mut self, key: &'a DocumentKey) -> StoreFuture<'a, Option<Document>> {
        Box::pin(async move { fetch_document(&mut self.tx, key).await })
    }

    fn scan<'a>(
        &'a mut self,
        collection: &'a str,
        id_prefix: &'a str,
    ) -> StoreFuture<'a, Vec<Document>> {
        Box::pin(async move { fetch_range(&mut self.tx, collection, id_prefix).await })
    }

    fn insert<'a>(&'a mut self, key: &'a DocumentKey, body: serde_json::Value) -> StoreFuture<'a, Version> {
        Box::pin(async move { insert_document(&mut self.tx, key, &body).await })
    }

    fn update<'a>(
        &'a mut self,
        key: &'a DocumentKey,
        expected: Version,
        body: serde_json::Value,
    ) -> StoreFuture<'a, Version> {
        Box::pin(async move { swap_document(&mut self.tx, key, expected, &body).await })
    }

    fn delete<'a>(&'a mut self, key: &'a DocumentKey, expected: Version) -> StoreFuture<'a, ()> {
        Box::pin(async move { delete_document(&mut self.tx, key, expected).await })
    }

    fn commit(self: Box<Self>) -> StoreFuture<'static, ()> {
        Box::pin(async move {
            self.tx.commit().await.map_err(|e| {
                let err = map_sqlx(e);
                if err.is_retryable() {
                    tracing::debug!(error = %err, "Serializable commit rejected");
                }
                err
            })
        })
    }
}
