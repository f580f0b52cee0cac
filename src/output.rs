//! Result types returned to callers and written by the companion sink.

use crate::pipeline::parse::ExtractionOutcome;
use crate::pipeline::reconcile::{canonical_receipt, RecordStatus};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Status string of a successfully processed event.
pub const STATUS_OK: &str = "ok";

/// Outcome of one ingestion event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventOutcome {
    /// Container the source object was read from.
    pub bucket: String,
    /// Source object key.
    pub key: String,
    /// Where the result was written: the companion container or the record table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_bucket: Option<String>,
    /// Companion key, or `<owner>/<date>` for record writes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_key: Option<String>,
    /// `ok`, or the [`crate::IngestError::tag`] of the failure.
    pub status: String,
    /// Status of the stored record when the event succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_status: Option<RecordStatus>,
    /// Human-readable failure description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EventOutcome {
    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }
}

/// Per-event results of one batch, in input order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub results: Vec<EventOutcome>,
}

impl BatchReport {
    pub fn ok_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_ok()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.results.len() - self.ok_count()
    }
}

/// Document written next to the source object in companion mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanionDocument {
    pub source_bucket: String,
    pub source_key: String,
    pub mime: String,
    pub extracted: Value,
}

/// Companion-document key for a source key: `<prefix><source_key>.json`.
pub fn companion_key(results_prefix: &str, source_key: &str) -> String {
    format!("{results_prefix}{source_key}.json")
}

/// Reshape an outcome for the companion document.
///
/// Every shape carries an explicit `recognized` flag; a non-receipt also
/// carries `reason: "not_a_receipt"`. Amounts are written in the same
/// canonical form as stored records.
pub fn extracted_value(outcome: &ExtractionOutcome) -> Result<Value, serde_json::Error> {
    let value = match outcome {
        ExtractionOutcome::NotAReceipt => json!({
            "recognized": false,
            "reason": "not_a_receipt",
        }),
        ExtractionOutcome::RawUnparsed { text } => json!({
            "recognized": true,
            "raw_text": text,
        }),
        ExtractionOutcome::Structured(receipt) => {
            let mut value = serde_json::to_value(canonical_receipt(receipt))?;
            if let Value::Object(ref mut map) = value {
                map.entry("recognized").or_insert(Value::Bool(true));
            }
            value
        }
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::parse::parse_response;

    #[test]
    fn companion_key_appends_json() {
        assert_eq!(
            companion_key("receipts-json/", "receipts/img/al/a.jpg"),
            "receipts-json/receipts/img/al/a.jpg.json"
        );
    }

    #[test]
    fn not_a_receipt_shape() {
        let v = extracted_value(&ExtractionOutcome::NotAReceipt).unwrap();
        assert_eq!(v, json!({"recognized": false, "reason": "not_a_receipt"}));
    }

    #[test]
    fn raw_shape() {
        let v = extracted_value(&parse_response("garbled")).unwrap();
        assert_eq!(v, json!({"recognized": true, "raw_text": "garbled"}));
    }

    #[test]
    fn structured_shape_is_sparse() {
        let v = extracted_value(&parse_response(r#"{"vendor":"Mart","total":null}"#)).unwrap();
        assert_eq!(v, json!({"recognized": true, "vendor": "Mart"}));
    }

    #[test]
    fn structured_amounts_match_stored_form() {
        let v = extracted_value(&parse_response(
            r#"{"items":[{"name":"Tea","cost":3.50}],"subtotal":3.50,"fees":0.00,"total":1.2e2}"#,
        ))
        .unwrap();
        assert_eq!(
            v,
            json!({
                "recognized": true,
                "items": [{"name": "Tea", "cost": "3.5"}],
                "subtotal": "3.5",
                "fees": "0",
                "total": "120",
            })
        );
    }

    #[test]
    fn report_counts() {
        let ok = EventOutcome {
            bucket: "b".into(),
            key: "k".into(),
            output_bucket: None,
            output_key: None,
            status: STATUS_OK.into(),
            record_status: Some(RecordStatus::Parsed),
            error: None,
        };
        let failed = EventOutcome {
            status: "oracle_unavailable".into(),
            record_status: None,
            ..ok.clone()
        };
        let report = BatchReport {
            results: vec![ok, failed],
        };
        assert_eq!(report.ok_count(), 1);
        assert_eq!(report.failed_count(), 1);
    }
}
