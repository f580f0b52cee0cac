//! Event-driven ingestion: one notification event in, one stored result out.
//!
//! [`Ingestor::process_event`] runs the whole pipeline for a single event:
//!
//! ```text
//! ObjectStore ─► normalize ─► OracleClient ─► parse_response ─► reconcile ─► sink
//! ```
//!
//! [`Ingestor::process_batch`] fans a batch out over `concurrency` tasks and
//! reports every event independently; one bad object never fails its
//! neighbours. Oracle calls and store writes that fail with a retriable
//! error are retried with exponential backoff
//! (`retry_backoff_ms * 2^(attempt-1)`). Both are safe to repeat: the oracle
//! call has no side effects and every write is an overwrite at a fixed key.

use crate::config::{BodyEncoding, IngestConfig, SinkKind};
use crate::error::IngestError;
use crate::output::{
    companion_key, extracted_value, BatchReport, CompanionDocument, EventOutcome, STATUS_OK,
};
use crate::pipeline::codec::{normalize, EncodedImage, ImageRef};
use crate::pipeline::oracle::{ExtractionOracle, LlmOracle, OracleClient, StreamingLlmOracle};
use crate::pipeline::parse::{parse_response, ExtractionOutcome};
use crate::pipeline::reconcile::{reconcile, ReceiptRecord};
use crate::store::{ObjectStore, RecordStore, StoredObject};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

/// Content type of companion documents.
const JSON_CONTENT_TYPE: &str = "application/json";

/// One "object created" notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestEvent {
    pub container: String,
    pub key: String,
    /// When the object was created. Used as the processing time so that
    /// redeliveries of the same event produce identical records.
    pub event_time: Option<DateTime<Utc>>,
}

impl IngestEvent {
    pub fn new(container: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            key: key.into(),
            event_time: None,
        }
    }

    pub fn with_event_time(mut self, at: DateTime<Utc>) -> Self {
        self.event_time = Some(at);
        self
    }
}

#[derive(Deserialize)]
struct Notification {
    #[serde(rename = "Records", default)]
    records: Vec<NotificationRecord>,
}

#[derive(Deserialize)]
struct NotificationRecord {
    #[serde(rename = "eventTime", default)]
    event_time: Option<String>,
    s3: NotificationEntity,
}

#[derive(Deserialize)]
struct NotificationEntity {
    bucket: NamedEntity,
    object: KeyedEntity,
}

#[derive(Deserialize)]
struct NamedEntity {
    name: String,
}

#[derive(Deserialize)]
struct KeyedEntity {
    key: String,
}

/// Parse an S3-style notification document into ingestion events.
///
/// Object keys arrive URL-encoded with `+` for spaces and are decoded here.
/// An unparseable `eventTime` is dropped with a warning; the event is still
/// processed, with the wall clock standing in.
///
/// # Errors
/// [`IngestError::InvalidEvent`] when the document is not a notification or
/// a key does not decode to UTF-8.
pub fn parse_event_batch(json: &str) -> Result<Vec<IngestEvent>, IngestError> {
    let notification: Notification = serde_json::from_str(json)
        .map_err(|e| IngestError::InvalidEvent(format!("not a notification document: {e}")))?;

    notification
        .records
        .into_iter()
        .map(|record| {
            let key = decode_key(&record.s3.object.key)?;
            let event_time = record.event_time.as_deref().and_then(|raw| {
                match DateTime::parse_from_rfc3339(raw) {
                    Ok(t) => Some(t.with_timezone(&Utc)),
                    Err(e) => {
                        warn!("Ignoring eventTime {:?} for {}: {}", raw, key, e);
                        None
                    }
                }
            });
            Ok(IngestEvent {
                container: record.s3.bucket.name,
                key,
                event_time,
            })
        })
        .collect()
}

/// Decode a notification key: `+` is a space, then percent-decoding.
pub fn decode_key(raw: &str) -> Result<String, IngestError> {
    urlencoding::decode(&raw.replace('+', " "))
        .map(|k| k.into_owned())
        .map_err(|e| IngestError::InvalidEvent(format!("key {raw:?} is not UTF-8: {e}")))
}

/// Runs the ingestion pipeline against a pair of stores.
///
/// Cheap to clone; every field is shared.
#[derive(Clone)]
pub struct Ingestor {
    objects: Arc<dyn ObjectStore>,
    records: Arc<dyn RecordStore>,
    client: OracleClient,
    config: IngestConfig,
}

impl Ingestor {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        records: Arc<dyn RecordStore>,
        oracle: Arc<dyn ExtractionOracle>,
        config: IngestConfig,
    ) -> Self {
        let client = OracleClient::new(oracle, &config);
        Self {
            objects,
            records,
            client,
            config,
        }
    }

    /// Build an ingestor whose oracle is the LLM provider resolved from `config`.
    ///
    /// With `streaming_oracle` set, replies are read as a token stream.
    pub fn from_config(
        objects: Arc<dyn ObjectStore>,
        records: Arc<dyn RecordStore>,
        config: IngestConfig,
    ) -> Result<Self, IngestError> {
        let oracle: Arc<dyn ExtractionOracle> = if config.streaming_oracle {
            Arc::new(StreamingLlmOracle::from_config(&config)?)
        } else {
            Arc::new(LlmOracle::from_config(&config)?)
        };
        Ok(Self::new(objects, records, oracle, config))
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Process one event end to end.
    ///
    /// On success the result has been written to the configured sink. On
    /// error nothing has been written for this event.
    pub async fn process_event(&self, event: &IngestEvent) -> Result<EventOutcome, IngestError> {
        let start = Instant::now();

        // ── Fetch & normalize ────────────────────────────────────────────
        let stored = self
            .objects
            .get_object(&event.container, &event.key)
            .await?;
        debug!("{}: fetched {} bytes", event.key, stored.bytes.len());
        let now = processing_time(event, &stored);
        let today = now.format("%Y-%m-%d").to_string();
        let image = normalize(
            image_ref(stored, self.config.body_encoding, &event.key)?,
            &event.key,
        )?;

        // ── Extract ──────────────────────────────────────────────────────
        let raw = self
            .with_retry("oracle call", &event.key, || {
                self.client.extract(&image, &self.config.categories, &today)
            })
            .await?;
        let outcome = parse_response(&raw);
        let record = reconcile(&outcome, &event.key, now.timestamp());

        // ── Write ────────────────────────────────────────────────────────
        let (output_bucket, output_key) = match self.config.sink {
            SinkKind::Records => self.write_record(&event.key, &record).await?,
            SinkKind::Companion => self.write_companion(event, &image, &outcome).await?,
        };

        info!(
            "{}: {} → {}/{} in {:?}",
            event.key,
            record.status,
            output_bucket,
            output_key,
            start.elapsed()
        );

        Ok(EventOutcome {
            bucket: event.container.clone(),
            key: event.key.clone(),
            output_bucket: Some(output_bucket),
            output_key: Some(output_key),
            status: STATUS_OK.to_string(),
            record_status: Some(record.status),
            error: None,
        })
    }

    /// Process a batch with bounded concurrency.
    ///
    /// Never fails as a whole: every event gets an [`EventOutcome`], in the
    /// same order as `events`.
    pub async fn process_batch(&self, events: &[IngestEvent]) -> BatchReport {
        let total = events.len();
        info!("Processing batch of {} events", total);
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_batch_start(total);
        }

        let mut indexed: Vec<(usize, EventOutcome)> =
            stream::iter(events.iter().cloned().enumerate().map(|(index, event)| {
                let this = self.clone();
                async move { (index, this.process_reported(index, &event).await) }
            }))
            .buffer_unordered(self.config.concurrency)
            .collect()
            .await;
        indexed.sort_by_key(|(index, _)| *index);

        let report = BatchReport {
            results: indexed.into_iter().map(|(_, outcome)| outcome).collect(),
        };
        let ok = report.ok_count();
        info!("Batch complete: {}/{} events ok", ok, total);
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_batch_complete(total, ok);
        }
        report
    }

    /// [`Self::process_event`] with progress callbacks, folding any error
    /// into a failed outcome.
    pub(crate) async fn process_reported(&self, index: usize, event: &IngestEvent) -> EventOutcome {
        let cb = self.config.progress_callback.as_ref();
        if let Some(cb) = cb {
            cb.on_event_start(index, &event.key);
        }

        match self.process_event(event).await {
            Ok(outcome) => {
                if let (Some(cb), Some(status)) = (cb, outcome.record_status) {
                    cb.on_event_complete(index, &event.key, status.as_str());
                }
                outcome
            }
            Err(e) => {
                warn!("{}: {} ({})", event.key, e, e.tag());
                if let Some(cb) = cb {
                    cb.on_event_error(index, &event.key, &e.to_string());
                }
                EventOutcome {
                    bucket: event.container.clone(),
                    key: event.key.clone(),
                    output_bucket: None,
                    output_key: None,
                    status: e.tag().to_string(),
                    record_status: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn write_record(
        &self,
        key: &str,
        record: &ReceiptRecord,
    ) -> Result<(String, String), IngestError> {
        self.with_retry("record write", key, || self.records.put(record))
            .await?;
        Ok((
            self.config.table_name.clone(),
            format!("{}/{}", record.owner_id, record.date),
        ))
    }

    async fn write_companion(
        &self,
        event: &IngestEvent,
        image: &EncodedImage,
        outcome: &ExtractionOutcome,
    ) -> Result<(String, String), IngestError> {
        let doc = CompanionDocument {
            source_bucket: event.container.clone(),
            source_key: event.key.clone(),
            mime: image.media_type.clone(),
            extracted: extracted_value(outcome)
                .map_err(|e| IngestError::Internal(format!("companion document: {e}")))?,
        };
        let body = serde_json::to_vec(&doc)
            .map_err(|e| IngestError::Internal(format!("companion document: {e}")))?;
        let out_key = companion_key(&self.config.results_prefix, &event.key);

        self.with_retry("companion write", &event.key, || {
            self.objects
                .put_object(&event.container, &out_key, body.clone(), JSON_CONTENT_TYPE)
        })
        .await?;
        Ok((event.container.clone(), out_key))
    }

    /// Run `op`, retrying retriable failures up to `max_retries` times.
    async fn with_retry<T, F, Fut>(&self, what: &str, key: &str, mut op: F) -> Result<T, IngestError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, IngestError>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retriable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    let backoff = self
                        .config
                        .retry_backoff_ms
                        .saturating_mul(2u64.saturating_pow(attempt - 1));
                    warn!(
                        "{}: {} failed ({}), retry {}/{} after {}ms",
                        key, what, e, attempt, self.config.max_retries, backoff
                    );
                    sleep(Duration::from_millis(backoff)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Timestamp that stands for "now" while processing `event`.
///
/// The notification's `eventTime` wins, then the object's modification time.
/// Both are stable across redeliveries; the wall clock is the last resort.
fn processing_time(event: &IngestEvent, stored: &StoredObject) -> DateTime<Utc> {
    event
        .event_time
        .or(stored.last_modified)
        .unwrap_or_else(Utc::now)
}

/// Interpret a stored body according to the configured encoding.
fn image_ref(
    stored: StoredObject,
    encoding: BodyEncoding,
    key: &str,
) -> Result<ImageRef, IngestError> {
    match encoding {
        BodyEncoding::Raw => Ok(ImageRef::Bytes {
            bytes: stored.bytes,
            media_type: stored.content_type,
        }),
        BodyEncoding::Base64Text => String::from_utf8(stored.bytes)
            .map(ImageRef::Base64)
            .map_err(|_| IngestError::InvalidImageInput {
                key: key.to_string(),
                reason: "base64 body is not UTF-8 text".into(),
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_notification_records() {
        let json = r#"{"Records":[
            {"eventTime":"2025-09-14T12:00:00.000Z",
             "s3":{"bucket":{"name":"inbox"},"object":{"key":"receipts/img/alice/My+Lunch%281%29.jpg"}}},
            {"s3":{"bucket":{"name":"inbox"},"object":{"key":"x.png"}}}
        ]}"#;
        let events = parse_event_batch(json).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].container, "inbox");
        assert_eq!(events[0].key, "receipts/img/alice/My Lunch(1).jpg");
        assert_eq!(
            events[0].event_time,
            Some(Utc.with_ymd_and_hms(2025, 9, 14, 12, 0, 0).unwrap())
        );
        assert_eq!(events[1].event_time, None);
    }

    #[test]
    fn bad_event_time_is_dropped() {
        let json = r#"{"Records":[{"eventTime":"yesterday",
            "s3":{"bucket":{"name":"b"},"object":{"key":"k.jpg"}}}]}"#;
        let events = parse_event_batch(json).unwrap();
        assert_eq!(events[0].event_time, None);
    }

    #[test]
    fn non_notification_is_invalid_event() {
        let err = parse_event_batch("[1,2]").unwrap_err();
        assert_eq!(err.tag(), "invalid_event");
        assert!(parse_event_batch("{}").unwrap().is_empty());
    }

    #[test]
    fn decode_key_rejects_non_utf8() {
        assert_eq!(decode_key("a%2Fb+c").unwrap(), "a/b c");
        assert!(decode_key("%FF%FE").is_err());
    }

    #[test]
    fn processing_time_prefers_event_then_object_time() {
        let event_time = Utc.with_ymd_and_hms(2025, 9, 14, 12, 0, 0).unwrap();
        let modified = Utc.with_ymd_and_hms(2025, 9, 13, 8, 30, 0).unwrap();
        let stored = StoredObject {
            bytes: vec![1],
            content_type: None,
            last_modified: Some(modified),
        };

        let mut event = IngestEvent::new("b", "k.jpg");
        assert_eq!(processing_time(&event, &stored), modified);
        event.event_time = Some(event_time);
        assert_eq!(processing_time(&event, &stored), event_time);
    }

    #[test]
    fn image_ref_respects_encoding() {
        let stored = StoredObject {
            bytes: b"aGk=".to_vec(),
            content_type: Some("image/png".into()),
            last_modified: None,
        };
        match image_ref(stored.clone(), BodyEncoding::Base64Text, "k").unwrap() {
            ImageRef::Base64(text) => assert_eq!(text, "aGk="),
            other => panic!("unexpected {other:?}"),
        }
        match image_ref(stored, BodyEncoding::Raw, "k").unwrap() {
            ImageRef::Bytes { bytes, media_type } => {
                assert_eq!(bytes, b"aGk=");
                assert_eq!(media_type.as_deref(), Some("image/png"));
            }
            other => panic!("unexpected {other:?}"),
        }

        let binary = StoredObject {
            bytes: vec![0xff, 0xd8, 0xff],
            content_type: None,
            last_modified: None,
        };
        let err = image_ref(binary, BodyEncoding::Base64Text, "k").unwrap_err();
        assert_eq!(err.tag(), "invalid_image_input");
    }
}
