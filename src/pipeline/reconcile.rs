//! Record assembly: [`ExtractionOutcome`] + source key → [`ReceiptRecord`].
//!
//! [`reconcile`] is pure and total. It fills in the identity fields the model
//! may have omitted (owner, date), canonicalises money, and drops every absent
//! value so the stored record never contains a null.

use crate::pipeline::parse::{ExtractionOutcome, ReceiptItem, StructuredReceipt};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Owner used when neither the model nor the key names one.
pub const UNKNOWN_OWNER: &str = "unknown";

/// Index of the owner segment in `<prefix>/<kind>/<owner>/<file>` keys.
pub const OWNER_SEGMENT: usize = 2;

/// Processing status of a stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// The image is not a receipt.
    Unrecognized,
    /// The model reply could not be decoded; kept verbatim for review.
    ParsedRaw,
    /// Structured fields were extracted.
    Parsed,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Unrecognized => "unrecognized",
            RecordStatus::ParsedRaw => "parsed_raw",
            RecordStatus::Parsed => "parsed",
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The persisted entity, keyed by `(owner_id, date)`.
///
/// Field order is fixed, so serialising the same record always yields the
/// same bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptRecord {
    pub owner_id: String,
    pub date: String,
    pub status: RecordStatus,
    pub source_key: String,
    /// Epoch seconds.
    pub processed_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<ReceiptItem>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtotal: Option<BigDecimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub taxes: Option<BigDecimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fees: Option<BigDecimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<BigDecimal>,
}

impl ReceiptRecord {
    /// The store key.
    pub fn key(&self) -> (&str, &str) {
        (&self.owner_id, &self.date)
    }

    /// Compact JSON encoding used by every store.
    pub fn to_json_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    fn identity(owner_id: String, date: String, status: RecordStatus, source_key: &str, now: i64) -> Self {
        Self {
            owner_id,
            date,
            status,
            source_key: source_key.to_string(),
            processed_at: now,
            raw_text: None,
            vendor: None,
            items: None,
            subtotal: None,
            taxes: None,
            fees: None,
            total: None,
        }
    }
}

/// Derive the owner id from a storage key.
///
/// `receipts/img/alice/2025-09-14.jpg` → `alice`; keys with fewer than three
/// segments (or an empty owner segment) → [`UNKNOWN_OWNER`].
pub fn owner_from_key(key: &str) -> String {
    key.split('/')
        .nth(OWNER_SEGMENT)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(UNKNOWN_OWNER)
        .to_string()
}

/// UTC calendar date of an epoch timestamp as `YYYY-MM-DD`.
pub fn utc_date(epoch_secs: i64) -> String {
    DateTime::<Utc>::from_timestamp(epoch_secs, 0)
        .unwrap_or_default()
        .format("%Y-%m-%d")
        .to_string()
}

/// Canonical form of a money value: trailing fractional zeros removed, never
/// an exponent. `3.50` and `3.5` store identically.
pub fn canonical_money(value: &BigDecimal) -> BigDecimal {
    let reduced = value.normalized();
    let (_, scale) = reduced.as_bigint_and_exponent();
    if scale < 0 {
        reduced.with_scale(0)
    } else {
        reduced
    }
}

/// Copy of `receipt` with every amount in [`canonical_money`] form.
pub fn canonical_receipt(receipt: &StructuredReceipt) -> StructuredReceipt {
    StructuredReceipt {
        items: receipt.items.as_ref().map(|items| {
            items
                .iter()
                .map(|item| ReceiptItem {
                    cost: item.cost.as_ref().map(canonical_money),
                    ..item.clone()
                })
                .collect()
        }),
        subtotal: receipt.subtotal.as_ref().map(canonical_money),
        taxes: receipt.taxes.as_ref().map(canonical_money),
        fees: receipt.fees.as_ref().map(canonical_money),
        total: receipt.total.as_ref().map(canonical_money),
        ..receipt.clone()
    }
}

/// Build the record to store for one outcome.
///
/// `now_epoch` supplies both `processedAt` and the default date, so calling
/// this twice with the same arguments gives identical records.
pub fn reconcile(outcome: &ExtractionOutcome, source_key: &str, now_epoch: i64) -> ReceiptRecord {
    let derived_owner = owner_from_key(source_key);
    let today = utc_date(now_epoch);

    match outcome {
        ExtractionOutcome::NotAReceipt => ReceiptRecord::identity(
            derived_owner,
            today,
            RecordStatus::Unrecognized,
            source_key,
            now_epoch,
        ),
        ExtractionOutcome::RawUnparsed { text } => {
            let mut record = ReceiptRecord::identity(
                derived_owner,
                today,
                RecordStatus::ParsedRaw,
                source_key,
                now_epoch,
            );
            record.raw_text = Some(text.clone());
            record
        }
        ExtractionOutcome::Structured(receipt) => {
            reconcile_structured(receipt, derived_owner, today, source_key, now_epoch)
        }
    }
}

fn reconcile_structured(
    receipt: &StructuredReceipt,
    derived_owner: String,
    today: String,
    source_key: &str,
    now_epoch: i64,
) -> ReceiptRecord {
    let owner_id = non_empty(receipt.user_id.as_deref()).unwrap_or(derived_owner);
    let date = non_empty(receipt.date.as_deref()).unwrap_or(today);

    let receipt = canonical_receipt(receipt);
    let mut record =
        ReceiptRecord::identity(owner_id, date, RecordStatus::Parsed, source_key, now_epoch);
    record.vendor = receipt.vendor;
    record.items = receipt.items;
    record.subtotal = receipt.subtotal;
    record.taxes = receipt.taxes;
    record.fees = receipt.fees;
    record.total = receipt.total;
    record
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
