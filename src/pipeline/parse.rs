//! Response classification: raw oracle text → [`ExtractionOutcome`].
//!
//! The model is asked for either the literal `None` or a bare JSON object,
//! but nothing guarantees it complies. [`parse_response`] is a pure, total
//! decision sequence over the text:
//!
//! ```text
//! trim ──▶ "none"/empty? ──yes──▶ NotAReceipt
//!              │no
//!              ▼
//!        JSON object? ──no──▶ RawUnparsed { text }
//!              │yes
//!              ▼
//!         Structured(..)
//! ```
//!
//! Fields the model left out stay `None` here. Defaulting (owner, date) is
//! the reconciler's job, not the parser's.

use bigdecimal::BigDecimal;
use serde::Serialize;
use serde_json::{Map, Value};
use std::str::FromStr;
use tracing::debug;

/// Classification of one oracle reply.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionOutcome {
    /// The model said the image is not a receipt.
    NotAReceipt,
    /// The model replied with something that is not a JSON object.
    RawUnparsed { text: String },
    /// The model replied with a JSON object.
    Structured(StructuredReceipt),
}

/// Receipt fields decoded from the model's JSON object.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StructuredReceipt {
    #[serde(rename = "userId", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<ReceiptItem>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtotal: Option<BigDecimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub taxes: Option<BigDecimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fees: Option<BigDecimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<BigDecimal>,
}

/// One purchased line item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, serde::Deserialize)]
pub struct ReceiptItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<BigDecimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl StructuredReceipt {
    /// Distinct item categories in first-appearance order.
    pub fn categories_used(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for category in self
            .items
            .iter()
            .flatten()
            .filter_map(|i| i.category.as_deref())
        {
            if !seen.contains(&category) {
                seen.push(category);
            }
        }
        seen
    }
}

/// Whether `text` is the model's "not a receipt" answer.
///
/// An empty reply is treated the same way: there is nothing to keep.
pub fn is_not_a_receipt(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed.is_empty() || trimmed.eq_ignore_ascii_case(crate::prompts::NOT_A_RECEIPT_SENTINEL)
}

/// Classify the raw oracle reply.
pub fn parse_response(raw: &str) -> ExtractionOutcome {
    if is_not_a_receipt(raw) {
        return ExtractionOutcome::NotAReceipt;
    }

    match serde_json::from_str::<Value>(raw.trim()) {
        Ok(Value::Object(obj)) => ExtractionOutcome::Structured(structured_from_object(&obj)),
        Ok(other) => {
            debug!("Oracle reply is JSON but not an object ({})", json_kind(&other));
            ExtractionOutcome::RawUnparsed {
                text: raw.to_string(),
            }
        }
        Err(e) => {
            debug!("Oracle reply is not JSON: {}", e);
            ExtractionOutcome::RawUnparsed {
                text: raw.to_string(),
            }
        }
    }
}

fn structured_from_object(obj: &Map<String, Value>) -> StructuredReceipt {
    StructuredReceipt {
        user_id: obj.get("userId").and_then(scalar_string),
        vendor: obj.get("vendor").and_then(scalar_string),
        date: obj.get("date").and_then(scalar_string),
        items: obj.get("items").and_then(items_from_value),
        subtotal: obj.get("subtotal").and_then(money),
        taxes: obj.get("taxes").and_then(money),
        fees: obj.get("fees").and_then(money),
        total: obj.get("total").and_then(money),
    }
}

fn items_from_value(value: &Value) -> Option<Vec<ReceiptItem>> {
    let arr = value.as_array()?;
    Some(
        arr.iter()
            .filter_map(Value::as_object)
            .map(|item| ReceiptItem {
                name: item.get("name").and_then(scalar_string),
                cost: item.get("cost").and_then(money),
                category: item.get("category").and_then(scalar_string),
            })
            .collect(),
    )
}

/// Strings pass through; numbers and booleans are stringified; null is absent.
fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Decode a monetary value into an exact decimal.
///
/// JSON numbers are read from their textual form, never through `f64`
/// arithmetic. Strings such as `"$1,204.50"` are accepted too. Anything
/// else, including null, is absent.
pub fn money(value: &Value) -> Option<BigDecimal> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().trim_start_matches('$').replace(',', ""),
        _ => return None,
    };
    match BigDecimal::from_str(text.trim()) {
        Ok(d) => Some(d),
        Err(_) => {
            debug!("Ignoring non-numeric money value {:?}", value);
            None
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    #[test]
    fn none_sentinel_any_case() {
        for text in ["None", "none", "  NONE\n", "\tnOnE "] {
            assert_eq!(parse_response(text), ExtractionOutcome::NotAReceipt, "{text:?}");
        }
    }

    #[test]
    fn empty_reply_is_not_a_receipt() {
        assert_eq!(parse_response(""), ExtractionOutcome::NotAReceipt);
        assert_eq!(parse_response(" \n "), ExtractionOutcome::NotAReceipt);
    }

    #[test]
    fn none_inside_prose_is_raw() {
        let text = "None of these look like receipts";
        assert_eq!(
            parse_response(text),
            ExtractionOutcome::RawUnparsed { text: text.into() }
        );
    }

    #[test]
    fn invalid_json_keeps_original_text() {
        let text = "```json\n{\"total\": 3}\n```";
        assert_eq!(
            parse_response(text),
            ExtractionOutcome::RawUnparsed { text: text.into() }
        );
    }

    #[test]
    fn non_object_json_is_raw() {
        let text = "[1, 2, 3]";
        assert!(matches!(
            parse_response(text),
            ExtractionOutcome::RawUnparsed { .. }
        ));
    }

    #[test]
    fn structured_fields_are_decoded() {
        let text = r#"{"vendor":"Corner Cafe","date":"2025-09-14",
            "items":[{"name":"Coffee","cost":3.50,"category":"Food"}],
            "subtotal":3.50,"taxes":0.25,"fees":0.00,"total":3.75}"#;
        let ExtractionOutcome::Structured(r) = parse_response(text) else {
            panic!("expected structured");
        };
        assert_eq!(r.vendor.as_deref(), Some("Corner Cafe"));
        assert_eq!(r.date.as_deref(), Some("2025-09-14"));
        assert_eq!(r.subtotal, Some(dec("3.5")));
        assert_eq!(r.fees, Some(dec("0")));
        assert_eq!(r.total, Some(dec("3.75")));
        let items = r.items.as_ref().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name.as_deref(), Some("Coffee"));
        assert_eq!(items[0].cost, Some(dec("3.5")));
        assert_eq!(r.categories_used(), vec!["Food"]);
    }

    #[test]
    fn absent_and_null_fields_stay_absent() {
        let ExtractionOutcome::Structured(r) = parse_response(r#"{"total": null, "date": "2025-01-02"}"#)
        else {
            panic!("expected structured");
        };
        assert_eq!(r.total, None);
        assert_eq!(r.items, None);
        assert_eq!(r.vendor, None);
        assert_eq!(r.user_id, None);
    }

    #[test]
    fn money_accepts_strings_and_rejects_junk() {
        assert_eq!(money(&Value::String("$1,204.50".into())), Some(dec("1204.50")));
        assert_eq!(money(&Value::String("N/A".into())), None);
        assert_eq!(money(&Value::Bool(true)), None);
        assert_eq!(money(&serde_json::json!(0.1)), Some(dec("0.1")));
    }

    #[test]
    fn money_keeps_every_digit() {
        let text = r#"{"total": 12345678901234567.89, "subtotal": 0.30000000000000004441,
            "items": [{"cost": 9007199254740993.01}]}"#;
        let ExtractionOutcome::Structured(r) = parse_response(text) else {
            panic!("expected structured");
        };
        assert_eq!(r.total, Some(dec("12345678901234567.89")));
        assert_eq!(r.subtotal, Some(dec("0.30000000000000004441")));
        assert_eq!(
            r.items.unwrap()[0].cost,
            Some(dec("9007199254740993.01"))
        );
    }

    #[test]
    fn numeric_user_id_is_stringified() {
        let ExtractionOutcome::Structured(r) = parse_response(r#"{"userId": 42}"#) else {
            panic!("expected structured");
        };
        assert_eq!(r.user_id.as_deref(), Some("42"));
    }

    #[test]
    fn categories_used_dedups_in_order() {
        let r = StructuredReceipt {
            items: Some(vec![
                ReceiptItem {
                    category: Some("Food".into()),
                    ..Default::default()
                },
                ReceiptItem {
                    category: Some("Other".into()),
                    ..Default::default()
                },
                ReceiptItem {
                    category: Some("Food".into()),
                    ..Default::default()
                },
                ReceiptItem::default(),
            ]),
            ..Default::default()
        };
        assert_eq!(r.categories_used(), vec!["Food", "Other"]);
    }
}
