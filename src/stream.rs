//! Streaming batch API: emit event outcomes as they complete.
//!
//! [`Ingestor::process_batch`] waits for the whole batch and returns outcomes
//! in input order. [`Ingestor::process_stream`] yields each [`EventOutcome`]
//! as soon as its event finishes, so a caller can report progress or act on
//! early results while slower oracle calls are still in flight. Outcomes
//! arrive in completion order; `key` identifies the event.

use crate::ingest::{IngestEvent, Ingestor};
use crate::output::EventOutcome;
use futures::stream::{self, StreamExt};
use std::pin::Pin;
use tokio_stream::Stream;

/// A boxed stream of event outcomes.
pub type OutcomeStream = Pin<Box<dyn Stream<Item = EventOutcome> + Send>>;

impl Ingestor {
    /// Process `events` with bounded concurrency, yielding outcomes as they
    /// complete.
    ///
    /// Per-event progress callbacks fire as in [`Ingestor::process_batch`];
    /// the batch-level ones do not, since the stream has no natural end the
    /// ingestor observes.
    ///
    /// # Example
    /// ```rust,no_run
    /// use futures::StreamExt;
    /// use receipt_ingest::{parse_event_batch, IngestConfig, Ingestor};
    /// use receipt_ingest::store::{FsObjectStore, FsRecordStore};
    /// use std::sync::Arc;
    ///
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let ingestor = Ingestor::from_config(
    ///     Arc::new(FsObjectStore::new("objects")),
    ///     Arc::new(FsRecordStore::new("records")),
    ///     IngestConfig::default(),
    /// )?;
    /// let events = parse_event_batch(&std::fs::read_to_string("event.json")?)?;
    /// let mut outcomes = ingestor.process_stream(events);
    /// while let Some(outcome) = outcomes.next().await {
    ///     println!("{}: {}", outcome.key, outcome.status);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub fn process_stream(&self, events: Vec<IngestEvent>) -> OutcomeStream {
        let concurrency = self.config().concurrency;
        let this = self.clone();
        let s = stream::iter(events.into_iter().enumerate().map(move |(index, event)| {
            let ingestor = this.clone();
            async move { ingestor.process_reported(index, &event).await }
        }))
        .buffer_unordered(concurrency);

        Box::pin(s)
    }
}
