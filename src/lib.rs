//! # receipt-ingest
//!
//! Turn photographed receipts into structured expense records using a
//! Vision Language Model (VLM).
//!
//! Each uploaded image produces exactly one stored record keyed by
//! `(owner_id, date)`. Three outcomes are distinguished: the image is not a
//! receipt, the model replied with text that could not be decoded, or
//! structured fields were extracted. Money amounts are exact decimals and
//! absent values are omitted, never zero-filled.
//!
//! ## Pipeline Overview
//!
//! ```text
//! object-created event
//!  │
//!  ├─ 1. Fetch      read the object from the ObjectStore
//!  ├─ 2. Normalize  bytes / base64 / data URI → {media_type, base64}
//!  ├─ 3. Extract    one VLM call with the receipt instructions (retried)
//!  ├─ 4. Parse      None | raw text | structured JSON
//!  ├─ 5. Reconcile  owner from key, date, exact money, sparse fields
//!  └─ 6. Write      overwrite at (owner_id, date), or a companion JSON doc
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use receipt_ingest::{IngestConfig, IngestEvent, Ingestor};
//! use receipt_ingest::store::{FsObjectStore, FsRecordStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from ANTHROPIC_API_KEY / OPENAI_API_KEY / …
//!     let config = IngestConfig::builder()
//!         .categories(["Food", "Travel", "Office"])
//!         .build()?;
//!     let ingestor = Ingestor::from_config(
//!         Arc::new(FsObjectStore::new("objects")),
//!         Arc::new(FsRecordStore::new("records")),
//!         config,
//!     )?;
//!     let event = IngestEvent::new("inbox", "receipts/img/alice/2025-09-14.jpg");
//!     let outcome = ingestor.process_event(&event).await?;
//!     println!("{}", serde_json::to_string(&outcome)?);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `receipt-ingest` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! receipt-ingest = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod ingest;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod store;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{BodyEncoding, IngestConfig, IngestConfigBuilder, SinkKind};
pub use error::IngestError;
pub use ingest::{parse_event_batch, IngestEvent, Ingestor};
pub use output::{BatchReport, CompanionDocument, EventOutcome};
pub use pipeline::codec::{normalize, EncodedImage, ImageRef};
pub use pipeline::oracle::{
    ExtractionOracle, LlmOracle, OracleClient, OracleRequest, StreamingLlmOracle,
};
pub use pipeline::parse::{parse_response, ExtractionOutcome, ReceiptItem, StructuredReceipt};
pub use pipeline::reconcile::{reconcile, ReceiptRecord, RecordStatus};
pub use progress::{IngestProgressCallback, NoopProgressCallback, ProgressCallback};
pub use store::{ObjectStore, RecordStore, StoredObject};
pub use stream::OutcomeStream;
