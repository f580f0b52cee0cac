//! Progress-callback trait for per-event ingestion events.
//!
//! Inject an [`Arc<dyn IngestProgressCallback>`] via
//! [`crate::config::IngestConfigBuilder::progress_callback`] to receive
//! events as the ingestor works through a batch.
//!
//! Callers can forward events to a channel, a metrics sink, or a terminal
//! progress bar without the library knowing how the host application
//! communicates. The trait is `Send + Sync` because events within a batch are
//! processed concurrently.
//!
//! # Example
//!
//! ```rust
//! use receipt_ingest::{IngestConfig, IngestProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     stored: Arc<AtomicUsize>,
//! }
//!
//! impl IngestProgressCallback for CountingCallback {
//!     fn on_event_complete(&self, _index: usize, key: &str, status: &str) {
//!         self.stored.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{key}: {status}");
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback {
//!     stored: Arc::new(AtomicUsize::new(0)),
//! });
//!
//! let config = IngestConfig::builder()
//!     .progress_callback(counter as Arc<dyn IngestProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the ingestor as it processes each event of a batch.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. `on_event_*` may be called concurrently from
/// different tasks; protect shared state with `Mutex` or atomics.
pub trait IngestProgressCallback: Send + Sync {
    /// Called once before any event is processed.
    fn on_batch_start(&self, total_events: usize) {
        let _ = total_events;
    }

    /// Called when work on an event begins.
    ///
    /// # Arguments
    /// * `index`: 0-indexed position of the event in the batch
    /// * `key`  : source object key
    fn on_event_start(&self, index: usize, key: &str) {
        let _ = (index, key);
    }

    /// Called when an event's result has been written.
    ///
    /// `status` is the stored record status (`parsed`, `parsed_raw`,
    /// `unrecognized`).
    fn on_event_complete(&self, index: usize, key: &str, status: &str) {
        let _ = (index, key, status);
    }

    /// Called when an event fails after all retries are exhausted.
    fn on_event_error(&self, index: usize, key: &str, error: &str) {
        let _ = (index, key, error);
    }

    /// Called once after every event has been attempted.
    fn on_batch_complete(&self, total_events: usize, ok_count: usize) {
        let _ = (total_events, ok_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl IngestProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::IngestConfig`].
pub type ProgressCallback = Arc<dyn IngestProgressCallback>;
