//! Error types for the receipt-ingest library.
//!
//! [`IngestError`] covers every way a single ingestion event can fail. A batch
//! never fails as a whole: the ingestor catches each event's error, records
//! its [`IngestError::tag`] in the [`crate::output::EventOutcome`], and moves
//! on to the next event.
//!
//! Two families behave differently under retry:
//!
//! * **Transient**: [`IngestError::OracleUnavailable`] and
//!   [`IngestError::StoreWriteFailure`]. Retrying is safe because the record
//!   write is an idempotent overwrite at a deterministic key.
//!
//! * **Permanent**: bad image input or an unreadable source object.
//!   Retrying would produce the same failure.
//!
//! A model reply that is not valid JSON is deliberately *not* an error: it is
//! stored as a `parsed_raw` record so no image is silently dropped.

use thiserror::Error;

/// All errors returned by the receipt-ingest library.
#[derive(Debug, Error)]
pub enum IngestError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The image reference was empty or its base64 payload was malformed.
    #[error("Invalid image input for '{key}': {reason}")]
    InvalidImageInput { key: String, reason: String },

    /// The source object could not be read from the object store.
    #[error("Failed to read '{container}/{key}': {reason}")]
    ObjectReadFailed {
        container: String,
        key: String,
        reason: String,
    },

    /// An ingestion event document could not be decoded.
    #[error("Invalid ingestion event: {0}")]
    InvalidEvent(String),

    // ── Oracle errors ─────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The extraction call failed (timeout, rate limit, network, 5xx).
    #[error("Extraction oracle unavailable: {detail}")]
    OracleUnavailable { detail: String },

    // ── Store errors ──────────────────────────────────────────────────────
    /// Writing a record or companion document failed.
    #[error("Failed to write '{target}': {detail}")]
    StoreWriteFailure { target: String, detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IngestError {
    /// Stable snake_case tag reported as the per-event status.
    pub fn tag(&self) -> &'static str {
        match self {
            IngestError::InvalidImageInput { .. } => "invalid_image_input",
            IngestError::ObjectReadFailed { .. } => "object_read_failed",
            IngestError::InvalidEvent(_) => "invalid_event",
            IngestError::ProviderNotConfigured { .. } => "provider_not_configured",
            IngestError::OracleUnavailable { .. } => "oracle_unavailable",
            IngestError::StoreWriteFailure { .. } => "store_write_failure",
            IngestError::InvalidConfig(_) => "invalid_config",
            IngestError::Internal(_) => "internal_error",
        }
    }

    /// Whether the caller may retry the failed step with backoff.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            IngestError::OracleUnavailable { .. } | IngestError::StoreWriteFailure { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_image_display() {
        let e = IngestError::InvalidImageInput {
            key: "receipts/img/bob/a.jpg".into(),
            reason: "empty payload".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("receipts/img/bob/a.jpg"), "got: {msg}");
        assert!(msg.contains("empty payload"), "got: {msg}");
    }

    #[test]
    fn tags_are_stable() {
        assert_eq!(
            IngestError::OracleUnavailable {
                detail: "429".into()
            }
            .tag(),
            "oracle_unavailable"
        );
        assert_eq!(
            IngestError::StoreWriteFailure {
                target: "t".into(),
                detail: "d".into()
            }
            .tag(),
            "store_write_failure"
        );
        assert_eq!(IngestError::Internal("x".into()).tag(), "internal_error");
    }

    #[test]
    fn only_transient_errors_are_retriable() {
        assert!(IngestError::OracleUnavailable {
            detail: "timeout".into()
        }
        .is_retriable());
        assert!(IngestError::StoreWriteFailure {
            target: "t".into(),
            detail: "disk full".into()
        }
        .is_retriable());
        assert!(!IngestError::InvalidImageInput {
            key: "k".into(),
            reason: "r".into()
        }
        .is_retriable());
        assert!(!IngestError::InvalidConfig("bad".into()).is_retriable());
    }
}
