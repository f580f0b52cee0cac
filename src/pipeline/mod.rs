//! Pipeline stages for receipt ingestion.
//!
//! Each submodule implements exactly one transformation step, so each can be
//! tested on its own and the oracle can be swapped for canned replies.
//!
//! ## Data Flow
//!
//! ```text
//! codec ──▶ oracle ──▶ parse ──▶ reconcile
//! (base64)  (VLM)      (tiers)   (record)
//! ```
//!
//! 1. [`codec`]: canonicalise bytes, base64 text, data URIs or files into
//!    one `{media_type, base64}` payload
//! 2. [`oracle`]: the single vision-model call, behind a capability trait;
//!    the only stage with network I/O
//! 3. [`parse`]: classify the reply as not-a-receipt, raw text, or
//!    structured fields
//! 4. [`reconcile`]: merge the outcome with key-derived identity into the
//!    stored record

pub mod codec;
pub mod oracle;
pub mod parse;
pub mod reconcile;
