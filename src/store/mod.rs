//! Storage abstraction for source objects and receipt records.
//!
//! Two traits mark the pipeline's I/O boundaries:
//!
//! * [`ObjectStore`]: where receipt images arrive and where companion JSON
//!   documents are written in companion mode.
//! * [`RecordStore`]: the structured store. [`RecordStore::put`] is an
//!   atomic overwrite at `(owner_id, date)`, so retries and duplicate
//!   deliveries converge on the same stored bytes.
//!
//! Implementations must be `Send + Sync`; a batch writes from several tasks.

pub mod fs;
pub mod memory;

use crate::error::IngestError;
use crate::pipeline::reconcile::ReceiptRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use fs::{FsObjectStore, FsRecordStore};
pub use memory::{MemoryObjectStore, MemoryRecordStore};

/// Body and metadata of one stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    /// When the object was last written, if the store tracks it.
    pub last_modified: Option<DateTime<Utc>>,
}

/// Container/key addressed blob storage.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get_object(&self, container: &str, key: &str) -> Result<StoredObject, IngestError>;

    /// Create or replace an object.
    async fn put_object(
        &self,
        container: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<(), IngestError>;
}

/// Keyed store of [`ReceiptRecord`]s.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Write `record` at its `(owner_id, date)` key, replacing any prior value.
    async fn put(&self, record: &ReceiptRecord) -> Result<(), IngestError>;

    async fn get(&self, owner_id: &str, date: &str) -> Result<Option<ReceiptRecord>, IngestError>;
}

/// Encode a record, mapping serialisation failure to a write failure.
pub(crate) fn encode_record(record: &ReceiptRecord) -> Result<Vec<u8>, IngestError> {
    record
        .to_json_bytes()
        .map_err(|e| IngestError::StoreWriteFailure {
            target: format!("{}/{}", record.owner_id, record.date),
            detail: format!("serialise: {e}"),
        })
}
