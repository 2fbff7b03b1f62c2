//! Document store interface
//!
//! The proxy only needs a few operations from its persistence backend: append a
//! document to a named collection, find every document in a collection whose
//! fields equal a filter, and fetch just the newest such document. Backends
//! return matches in insertion order so "newest" is deterministic.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;

/// A stored document: a JSON object
pub type Document = Map<String, Value>;

/// Logical collections used by the proxy
pub mod collections {
    /// Captured `200 OK` responses keyed by `url`
    pub const CACHE: &str = "cache";

    /// Audit copies of non-GET requests
    pub const REQUESTS: &str = "requests";
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Malformed document: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Malformed body encoding: {0}")]
    BodyEncoding(#[from] base64::DecodeError),

    #[error("Document is not an object: {0}")]
    NotAnObject(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Query/insert access to a document-oriented backend
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn insert(&self, collection: &str, document: Document) -> StoreResult<()>;

    /// Every document whose fields equal those in `filter`, oldest first
    async fn find(&self, collection: &str, filter: &Document) -> StoreResult<Vec<Document>>;

    /// The most recently inserted document matching `filter`
    ///
    /// Backends that can limit the query server-side should override this.
    async fn find_latest(
        &self,
        collection: &str,
        filter: &Document,
    ) -> StoreResult<Option<Document>> {
        Ok(self.find(collection, filter).await?.pop())
    }
}

/// Hands out a store handle for the lifetime of one inbound request
#[async_trait]
pub trait StoreConnector: Send + Sync {
    async fn connect(&self) -> StoreResult<Arc<dyn DocumentStore>>;
}

/// Single-field equality filter
pub fn filter_eq(field: &str, value: impl Into<Value>) -> Document {
    let mut filter = Document::new();
    filter.insert(field.to_string(), value.into());
    filter
}

/// True when every field of `filter` is present in `document` with an equal value
pub fn matches_filter(document: &Document, filter: &Document) -> bool {
    filter
        .iter()
        .all(|(field, expected)| document.get(field) == Some(expected))
}

pub fn to_document<T: Serialize>(record: &T) -> StoreResult<Document> {
    match serde_json::to_value(record)? {
        Value::Object(document) => Ok(document),
        other => Err(StoreError::NotAnObject(other.to_string())),
    }
}

pub fn from_document<T: DeserializeOwned>(document: Document) -> StoreResult<T> {
    Ok(serde_json::from_value(Value::Object(document))?)
}
