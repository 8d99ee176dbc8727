use async_trait::async_trait;
use serde_json::Value;

/// A durable key/value table. Values are JSON documents.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;

    async fn save(&self, key: &str, value: Value) -> Result<(), StorageError>;

    /// Flush and release the table. Later calls fail with `StorageError::Closed`.
    async fn close(&self) -> Result<(), StorageError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Table '{0}' is closed")]
    Closed(String),
}

impl From<duckdb::Error> for StorageError {
    fn from(e: duckdb::Error) -> Self {
        StorageError::Database(e.to_string())
    }
}
