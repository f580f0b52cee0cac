//! Configuration types for receipt ingestion.
//!
//! All pipeline behaviour is controlled through [`IngestConfig`], built via its
//! [`IngestConfigBuilder`]. Keeping every knob in one struct makes it trivial
//! to share a config across concurrently processed events and to log exactly
//! which settings produced a given record.

use crate::error::IngestError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Default model when the Anthropic key is the one found in the environment.
pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-sonnet-4-20250514";

/// Default model for any other named provider.
pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// Configuration for the ingestion pipeline.
///
/// Built via [`IngestConfig::builder()`] or using [`IngestConfig::default()`].
///
/// # Example
/// ```rust
/// use receipt_ingest::IngestConfig;
///
/// let config = IngestConfig::builder()
///     .categories(["Food", "Travel"])
///     .max_tokens(1000)
///     .build()
///     .unwrap();
/// assert_eq!(config.categories.len(), 2);
/// ```
#[derive(Clone)]
pub struct IngestConfig {
    /// LLM model identifier, e.g. "claude-sonnet-4-20250514".
    /// If None, uses the provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "anthropic", "openai", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.0.
    ///
    /// Extraction should be as repeatable as the model allows.
    pub temperature: f32,

    /// Maximum tokens the model may generate per receipt. Default: 1000.
    pub max_tokens: usize,

    /// Retry attempts for transient oracle or store failures. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-oracle-call timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Events processed at once within a batch. Default: 4.
    pub concurrency: usize,

    /// Read the model reply as a token stream and reassemble it before
    /// parsing. Default: false.
    pub streaming_oracle: bool,

    /// Categories the model may assign to items. `Other` is always allowed.
    pub categories: Vec<String>,

    /// How source object bodies are encoded. Default: [`BodyEncoding::Raw`].
    pub body_encoding: BodyEncoding,

    /// Where extracted results go. Default: [`SinkKind::Records`].
    pub sink: SinkKind,

    /// Key prefix for companion JSON documents. Default: `receipts-json/`.
    pub results_prefix: String,

    /// Name reported as `output_bucket` for record-store writes. Default: `receipts`.
    pub table_name: String,

    /// Optional per-event progress callback.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.0,
            max_tokens: 1000,
            max_retries: 3,
            retry_backoff_ms: 500,
            api_timeout_secs: 60,
            concurrency: 4,
            streaming_oracle: false,
            categories: Vec::new(),
            body_encoding: BodyEncoding::default(),
            sink: SinkKind::default(),
            results_prefix: "receipts-json/".to_string(),
            table_name: "receipts".to_string(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for IngestConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestConfig")
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("concurrency", &self.concurrency)
            .field("streaming_oracle", &self.streaming_oracle)
            .field("categories", &self.categories)
            .field("body_encoding", &self.body_encoding)
            .field("sink", &self.sink)
            .field("results_prefix", &self.results_prefix)
            .field("table_name", &self.table_name)
            .finish()
    }
}

impl IngestConfig {
    /// Create a new builder for `IngestConfig`.
    pub fn builder() -> IngestConfigBuilder {
        IngestConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`IngestConfig`].
#[derive(Debug)]
pub struct IngestConfigBuilder {
    config: IngestConfig,
}

impl IngestConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n;
        self
    }

    pub fn streaming_oracle(mut self, enabled: bool) -> Self {
        self.config.streaming_oracle = enabled;
        self
    }

    /// Replace the allowed category list. Blank entries are dropped.
    pub fn categories<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.categories = categories
            .into_iter()
            .map(Into::into)
            .map(|c: String| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();
        self
    }

    pub fn body_encoding(mut self, encoding: BodyEncoding) -> Self {
        self.config.body_encoding = encoding;
        self
    }

    pub fn sink(mut self, sink: SinkKind) -> Self {
        self.config.sink = sink;
        self
    }

    pub fn results_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.results_prefix = prefix.into();
        self
    }

    pub fn table_name(mut self, name: impl Into<String>) -> Self {
        self.config.table_name = name.into();
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<IngestConfig, IngestError> {
        let c = &self.config;
        if c.max_tokens == 0 {
            return Err(IngestError::InvalidConfig(
                "max_tokens must be ≥ 1".into(),
            ));
        }
        if c.concurrency == 0 {
            return Err(IngestError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        if c.api_timeout_secs == 0 {
            return Err(IngestError::InvalidConfig(
                "api_timeout_secs must be ≥ 1".into(),
            ));
        }
        if c.table_name.trim().is_empty() {
            return Err(IngestError::InvalidConfig("table_name is empty".into()));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How the bytes of a source object should be read.
///
/// Mobile uploads sometimes store the image as base64 text (optionally in a
/// `data:` URI) rather than as raw image bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyEncoding {
    /// The object body is the image file itself. (default)
    #[default]
    Raw,
    /// The object body is UTF-8 base64 text, bare or `data:` URI wrapped.
    Base64Text,
}

/// Destination for extraction results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    /// Upsert a [`crate::ReceiptRecord`] keyed by (owner, date). (default)
    #[default]
    Records,
    /// Write a companion JSON document next to the source object.
    Companion,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = IngestConfig::default();
        assert_eq!(c.max_tokens, 1000);
        assert_eq!(c.results_prefix, "receipts-json/");
        assert_eq!(c.sink, SinkKind::Records);
        assert_eq!(c.body_encoding, BodyEncoding::Raw);
        assert!(c.categories.is_empty());
    }

    #[test]
    fn builder_trims_categories() {
        let c = IngestConfig::builder()
            .categories([" Food ", "", "Travel"])
            .build()
            .unwrap();
        assert_eq!(c.categories, vec!["Food".to_string(), "Travel".to_string()]);
    }

    #[test]
    fn builder_rejects_zero_tokens() {
        let err = IngestConfig::builder().max_tokens(0).build().unwrap_err();
        assert!(matches!(err, IngestError::InvalidConfig(_)));
    }

    #[test]
    fn builder_rejects_zero_concurrency() {
        let err = IngestConfig::builder().concurrency(0).build().unwrap_err();
        assert!(matches!(err, IngestError::InvalidConfig(_)));
        assert_eq!(IngestConfig::builder().concurrency(1).build().unwrap().concurrency, 1);
    }

    #[test]
    fn streaming_oracle_is_opt_in() {
        assert!(!IngestConfig::default().streaming_oracle);
        let c = IngestConfig::builder().streaming_oracle(true).build().unwrap();
        assert!(c.streaming_oracle);
    }
}
