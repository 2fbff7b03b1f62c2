//! PostgreSQL-backed document store
//!
//! Every collection shares one `documents` table. Documents are kept as JSONB
//! and equality filters are answered with JSONB containment (`@>`), ordered by
//! the serial id so results come back oldest first.

use crate::infrastructure::store::{
    Document, DocumentStore, StoreConnector, StoreError, StoreResult,
};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection pool wrapper; cheap to clone
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens a pool against `url` and applies pending migrations
    #[instrument(skip(url))]
    pub async fn open(url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect(url)
            .await?;
        info!("Database connection established");

        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Health check for the database connection
    pub async fn health_check(&self) -> StoreResult<()> {
        let row = sqlx::query("SELECT 1 as health_check")
            .fetch_one(&self.pool)
            .await?;

        let health_check: i32 = row.try_get("health_check")?;

        if health_check == 1 {
            Ok(())
        } else {
            Err(StoreError::Unavailable(
                "Database health check failed".to_string(),
            ))
        }
    }
}

#[async_trait]
impl DocumentStore for PostgresStore {
    async fn insert(&self, collection: &str, document: Document) -> StoreResult<()> {
        sqlx::query("INSERT INTO documents (collection, body) VALUES ($1, $2)")
            .bind(collection)
            .bind(Json(Value::Object(document)))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find(&self, collection: &str, filter: &Document) -> StoreResult<Vec<Document>> {
        let rows: Vec<(Json<Value>,)> = sqlx::query_as(
            "SELECT body FROM documents WHERE collection = $1 AND body @> $2 ORDER BY id ASC",
        )
        .bind(collection)
        .bind(Json(Value::Object(filter.clone())))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(Json(body),)| into_document(body))
            .collect()
    }

    async fn find_latest(
        &self,
        collection: &str,
        filter: &Document,
    ) -> StoreResult<Option<Document>> {
        let row: Option<(Json<Value>,)> = sqlx::query_as(
            "SELECT body FROM documents WHERE collection = $1 AND body @> $2 ORDER BY id DESC LIMIT 1",
        )
        .bind(collection)
        .bind(Json(Value::Object(filter.clone())))
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(Json(body),)| into_document(body)).transpose()
    }
}

fn into_document(body: Value) -> StoreResult<Document> {
    match body {
        Value::Object(document) => Ok(document),
        other => Err(StoreError::NotAnObject(other.to_string())),
    }
}

#[async_trait]
impl StoreConnector for PostgresStore {
    async fn connect(&self) -> StoreResult<Arc<dyn DocumentStore>> {
        if self.pool.is_closed() {
            return Err(StoreError::Unavailable(
                "connection pool is closed".to_string(),
            ));
        }
        Ok(Arc::new(self.clone()))
    }
}
