use super::traits::{KeyValueStore, StorageError};
use crate::pipeline::batch::EventBatch;
use crate::source::event::TimestampStatus;
use serde::{Deserialize, Serialize};

/// What was last attempted for one source file: enough to replay the
/// unconfirmed batch after a restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushState {
    pub source_id: String,
    pub start_position: u64,
    pub end_position: u64,
    pub batch_timestamp: Option<i64>,
    pub first_timestamp: Option<i64>,
    #[serde(default)]
    pub first_timestamp_status: TimestampStatus,
    pub sequence_token: Option<String>,
}

impl PushState {
    /// Build the record for a batch about to be published. `None` for batches
    /// without a source file (standard input) or without positions.
    pub fn from_batch(batch: &EventBatch, sequence_token: Option<&str>) -> Option<Self> {
        let source_id = batch.source_id.clone()?;
        let first = batch.first_event()?;
        let last = batch.last_event()?;
        Some(Self {
            source_id,
            start_position: first.start_position?,
            end_position: last.end_position?,
            batch_timestamp: batch.batch_timestamp,
            first_timestamp: first.timestamp,
            first_timestamp_status: first.timestamp_status,
            sequence_token: sequence_token.map(str::to_string),
        })
    }

    pub async fn load(
        store: &dyn KeyValueStore,
        source_id: &str,
    ) -> Result<Option<Self>, StorageError> {
        match store.get(source_id).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub async fn save(&self, store: &dyn KeyValueStore) -> Result<(), StorageError> {
        store.save(&self.source_id, serde_json::to_value(self)?).await
    }
}

/// Which file a configured stream started on, and where.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamState {
    pub source_id: String,
    pub initial_position: u64,
}

impl StreamState {
    pub async fn load(
        store: &dyn KeyValueStore,
        stream_key: &str,
    ) -> Result<Option<Self>, StorageError> {
        match store.get(stream_key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub async fn save(
        &self,
        store: &dyn KeyValueStore,
        stream_key: &str,
    ) -> Result<(), StorageError> {
        store.save(stream_key, serde_json::to_value(self)?).await
    }
}
