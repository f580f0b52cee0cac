//! Filesystem-backed stores.
//!
//! [`FsObjectStore`] maps each container to a directory under a root and each
//! key to a relative path inside it. [`FsRecordStore`] keeps one JSON file
//! per record at `<root>/<owner>/<date>.json`, both parts percent-encoded.
//!
//! Every write goes to a uniquely named temp file in the destination
//! directory and is then renamed into place, so readers see either the old
//! file or the new one and never a partial write.

use super::{encode_record, ObjectStore, RecordStore, StoredObject};
use crate::error::IngestError;
use crate::pipeline::reconcile::ReceiptRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Objects stored as plain files: `<root>/<container>/<key>`.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve `container/key` to a path, rejecting anything that would
    /// escape the root.
    pub fn object_path(&self, container: &str, key: &str) -> Option<PathBuf> {
        let mut path = self.root.clone();
        for part in std::iter::once(container).chain(key.split('/')) {
            let candidate = Path::new(part);
            let mut components = candidate.components();
            match (components.next(), components.next()) {
                (Some(Component::Normal(c)), None) => path.push(c),
                _ => return None,
            }
        }
        Some(path)
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn get_object(&self, container: &str, key: &str) -> Result<StoredObject, IngestError> {
        let failed = |reason: String| IngestError::ObjectReadFailed {
            container: container.to_string(),
            key: key.to_string(),
            reason,
        };
        let path = self
            .object_path(container, key)
            .ok_or_else(|| failed("key is not a safe relative path".into()))?;

        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| failed(format!("{}: {e}", path.display())))?;
        let last_modified = tokio::fs::metadata(&path)
            .await
            .ok()
            .and_then(|m| m.modified().ok())
            .map(DateTime::<Utc>::from);
        debug!("Read {} bytes from {}", bytes.len(), path.display());

        Ok(StoredObject {
            bytes,
            content_type: None,
            last_modified,
        })
    }

    async fn put_object(
        &self,
        container: &str,
        key: &str,
        body: Vec<u8>,
        _content_type: &str,
    ) -> Result<(), IngestError> {
        let target = format!("{container}/{key}");
        let path = self
            .object_path(container, key)
            .ok_or_else(|| IngestError::StoreWriteFailure {
                target: target.clone(),
                detail: "key is not a safe relative path".into(),
            })?;
        write_atomic(path, body, target).await
    }
}

/// Records stored as `<root>/<owner>/<date>.json`.
#[derive(Debug, Clone)]
pub struct FsRecordStore {
    root: PathBuf,
}

impl FsRecordStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// File that holds the record for `(owner_id, date)`.
    pub fn record_path(&self, owner_id: &str, date: &str) -> PathBuf {
        self.root
            .join(path_component(owner_id))
            .join(format!("{}.json", path_component(date)))
    }
}

#[async_trait]
impl RecordStore for FsRecordStore {
    async fn put(&self, record: &ReceiptRecord) -> Result<(), IngestError> {
        let bytes = encode_record(record)?;
        let path = self.record_path(&record.owner_id, &record.date);
        write_atomic(path, bytes, format!("{}/{}", record.owner_id, record.date)).await
    }

    async fn get(&self, owner_id: &str, date: &str) -> Result<Option<ReceiptRecord>, IngestError> {
        let path = self.record_path(owner_id, date);
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(IngestError::Internal(format!("{}: {e}", path.display()))),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| IngestError::Internal(format!("corrupt record {}: {e}", path.display())))
    }
}

/// Percent-encode `raw` into a single path component.
///
/// The mapping is reversible, so distinct ids never share a file. `.` is
/// escaped as well, which keeps `.` and `..` from ever reaching the
/// filesystem. The empty id maps to a lone `%`, which no encoded id can
/// produce.
pub fn path_component(raw: &str) -> String {
    if raw.is_empty() {
        return "%".to_string();
    }
    urlencoding::encode(raw).replace('.', "%2E")
}

/// Write `bytes` to `path` through a temp file + rename.
async fn write_atomic(path: PathBuf, bytes: Vec<u8>, target: String) -> Result<(), IngestError> {
    let fail_target = target.clone();
    tokio::task::spawn_blocking(move || {
        let failed = |detail: String| IngestError::StoreWriteFailure {
            target: target.clone(),
            detail,
        };
        let dir = path
            .parent()
            .ok_or_else(|| failed("destination has no parent directory".into()))?;
        std::fs::create_dir_all(dir).map_err(|e| failed(format!("create {}: {e}", dir.display())))?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| failed(format!("temp file in {}: {e}", dir.display())))?;
        tmp.write_all(&bytes)
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| failed(format!("write: {e}")))?;
        tmp.persist(&path)
            .map_err(|e| failed(format!("rename to {}: {}", path.display(), e.error)))?;
        debug!("Wrote {} bytes to {}", bytes.len(), path.display());
        Ok(())
    })
    .await
    .map_err(|e| IngestError::StoreWriteFailure {
        target: fail_target,
        detail: format!("writer task failed: {e}"),
    })?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::parse::ExtractionOutcome;
    use crate::pipeline::reconcile::reconcile;

    #[test]
    fn path_component_blocks_traversal() {
        assert_eq!(path_component("alice"), "alice");
        assert_eq!(path_component(".."), "%2E%2E");
        assert_eq!(path_component("."), "%2E");
        assert_eq!(path_component(""), "%");
        assert_eq!(path_component("a/b"), "a%2Fb");
        assert_eq!(path_component("2025-09-14"), "2025-09-14");
    }

    #[test]
    fn distinct_ids_get_distinct_paths() {
        let store = FsRecordStore::new("/srv/records");
        let ids = ["a/b", "a_b", "a%2Fb", "a b", "a+b", "", "%", ".", "_"];
        let mut paths: Vec<PathBuf> = ids
            .iter()
            .map(|id| store.record_path(id, "2025-01-01"))
            .collect();
        paths.sort();
        paths.dedup();
        assert_eq!(paths.len(), ids.len());
        for path in &paths {
            assert!(path.starts_with("/srv/records"));
            assert_eq!(path.components().count(), 5);
        }
    }

    #[tokio::test]
    async fn similar_owner_ids_do_not_share_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsRecordStore::new(dir.path());
        let mut record = reconcile(&ExtractionOutcome::NotAReceipt, "r/img/x/a.jpg", 0);
        record.owner_id = "a_b".into();
        store.put(&record).await.unwrap();

        assert!(store.get("a/b", "1970-01-01").await.unwrap().is_none());
        assert_eq!(store.get("a_b", "1970-01-01").await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn object_reads_carry_modification_time() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        store
            .put_object("bucket", "r.jpg", vec![1, 2, 3], "image/jpeg")
            .await
            .unwrap();
        let first = store.get_object("bucket", "r.jpg").await.unwrap();
        let second = store.get_object("bucket", "r.jpg").await.unwrap();
        assert!(first.last_modified.is_some());
        assert_eq!(first.last_modified, second.last_modified);
    }

    #[test]
    fn object_path_rejects_escapes() {
        let store = FsObjectStore::new("/srv/objects");
        assert_eq!(
            store.object_path("bucket", "receipts/img/alice/a.jpg"),
            Some(PathBuf::from("/srv/objects/bucket/receipts/img/alice/a.jpg"))
        );
        assert_eq!(store.object_path("bucket", "../etc/passwd"), None);
        assert_eq!(store.object_path("bucket", "a//b.jpg"), None);
        assert_eq!(store.object_path("..", "a.jpg"), None);
    }

    #[tokio::test]
    async fn object_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        store
            .put_object("bucket", "a/b/c.json", b"{}".to_vec(), "application/json")
            .await
            .unwrap();
        let obj = store.get_object("bucket", "a/b/c.json").await.unwrap();
        assert_eq!(obj.bytes, b"{}");
        assert_eq!(obj.content_type, None);
    }

    #[tokio::test]
    async fn missing_object_is_read_failure() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        let err = store.get_object("bucket", "nope.jpg").await.unwrap_err();
        assert_eq!(err.tag(), "object_read_failed");
    }

    #[tokio::test]
    async fn record_put_overwrites_and_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsRecordStore::new(dir.path());

        let first = reconcile(&ExtractionOutcome::NotAReceipt, "r/img/zoe/a.jpg", 0);
        store.put(&first).await.unwrap();
        let second = reconcile(
            &ExtractionOutcome::RawUnparsed { text: "??".into() },
            "r/img/zoe/a.jpg",
            0,
        );
        store.put(&second).await.unwrap();

        let stored = store.get("zoe", "1970-01-01").await.unwrap().unwrap();
        assert_eq!(stored, second);
        let bytes = std::fs::read(store.record_path("zoe", "1970-01-01")).unwrap();
        assert_eq!(bytes, second.to_json_bytes().unwrap());

        // no temp files left behind
        let entries = std::fs::read_dir(dir.path().join("zoe")).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[tokio::test]
    async fn missing_record_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsRecordStore::new(dir.path());
        assert!(store.get("nobody", "2025-01-01").await.unwrap().is_none());
    }
}
