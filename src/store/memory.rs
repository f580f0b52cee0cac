//! In-memory stores for tests and dry runs.
//!
//! Records are kept as their encoded bytes, exactly as a remote store would
//! hold them, so byte-level idempotence can be checked directly.

use super::{encode_record, ObjectStore, RecordStore, StoredObject};
use crate::error::IngestError;
use crate::pipeline::reconcile::ReceiptRecord;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::RwLock;

/// In-memory [`RecordStore`].
#[derive(Default)]
pub struct MemoryRecordStore {
    records: RwLock<HashMap<(String, String), Vec<u8>>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored bytes for `(owner_id, date)`.
    pub fn raw(&self, owner_id: &str, date: &str) -> Option<Vec<u8>> {
        self.records
            .read()
            .ok()?
            .get(&(owner_id.to_string(), date.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn put(&self, record: &ReceiptRecord) -> Result<(), IngestError> {
        let bytes = encode_record(record)?;
        let mut records = self
            .records
            .write()
            .map_err(|_| IngestError::Internal("record store lock poisoned".into()))?;
        records.insert((record.owner_id.clone(), record.date.clone()), bytes);
        Ok(())
    }

    async fn get(&self, owner_id: &str, date: &str) -> Result<Option<ReceiptRecord>, IngestError> {
        match self.raw(owner_id, date) {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| IngestError::Internal(format!("corrupt record: {e}"))),
            None => Ok(None),
        }
    }
}

/// In-memory [`ObjectStore`].
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<(String, String), StoredObject>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object without going through the async trait.
    ///
    /// The insert time becomes the object's `last_modified`.
    pub fn insert(&self, container: &str, key: &str, bytes: Vec<u8>, content_type: Option<&str>) {
        if let Ok(mut objects) = self.objects.write() {
            objects.insert(
                (container.to_string(), key.to_string()),
                StoredObject {
                    bytes,
                    content_type: content_type.map(str::to_string),
                    last_modified: Some(Utc::now()),
                },
            );
        }
    }

    pub fn contains(&self, container: &str, key: &str) -> bool {
        self.objects
            .read()
            .map(|o| o.contains_key(&(container.to_string(), key.to_string())))
            .unwrap_or(false)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get_object(&self, container: &str, key: &str) -> Result<StoredObject, IngestError> {
        let objects = self
            .objects
            .read()
            .map_err(|_| IngestError::Internal("object store lock poisoned".into()))?;
        objects
            .get(&(container.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| IngestError::ObjectReadFailed {
                container: container.to_string(),
                key: key.to_string(),
                reason: "no such object".into(),
            })
    }

    async fn put_object(
        &self,
        container: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<(), IngestError> {
        self.insert(container, key, body, Some(content_type));
        Ok(())
    }
}
