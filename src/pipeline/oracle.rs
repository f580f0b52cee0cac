//! Extraction oracle: one vision-model call per receipt image.
//!
//! The model is reached through the [`ExtractionOracle`] capability trait so
//! the parsing and reconciliation stages can be exercised against canned
//! replies. [`LlmOracle`] is the production adapter over an
//! `edgequake_llm` provider and [`StreamingLlmOracle`] the same adapter
//! reading the reply as a token stream; [`OracleClient`] adds the
//! instruction prompt and the per-call timeout on top of any oracle.
//!
//! There is no retry here. A failed or timed-out call surfaces as
//! [`IngestError::OracleUnavailable`] and the ingestor decides whether to try
//! again.

use crate::config::{IngestConfig, DEFAULT_ANTHROPIC_MODEL, DEFAULT_MODEL};
use crate::error::IngestError;
use crate::pipeline::codec::EncodedImage;
use crate::prompts::receipt_instructions;
use async_trait::async_trait;
use edgequake_llm::traits::StreamChunk;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, LlmError, ProviderFactory};
use futures::{Stream, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

/// A fully assembled extraction request.
#[derive(Debug, Clone)]
pub struct OracleRequest {
    pub image: EncodedImage,
    pub instructions: String,
    pub max_tokens: usize,
    pub temperature: f32,
}

/// Anything that can turn an image plus instructions into raw text.
#[async_trait]
pub trait ExtractionOracle: Send + Sync {
    async fn call(&self, request: &OracleRequest) -> Result<String, IngestError>;
}

/// [`ExtractionOracle`] backed by an `edgequake_llm` provider.
pub struct LlmOracle {
    provider: Arc<dyn LLMProvider>,
}

impl LlmOracle {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self { provider }
    }

    /// Build the adapter from the provider settings in `config`.
    pub fn from_config(config: &IngestConfig) -> Result<Self, IngestError> {
        Ok(Self::new(resolve_provider(config)?))
    }
}

#[async_trait]
impl ExtractionOracle for LlmOracle {
    /// Send a single user turn holding the image and the instruction text.
    async fn call(&self, request: &OracleRequest) -> Result<String, IngestError> {
        let start = Instant::now();
        let messages = vec![ChatMessage::user_with_images(
            request.instructions.as_str(),
            vec![request.image.to_image_data()],
        )];
        let options = build_options(request);

        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| IngestError::OracleUnavailable {
                detail: e.to_string(),
            })?;

        debug!(
            "Oracle reply: {} input tokens, {} output tokens, {:?}",
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );
        Ok(response.content)
    }
}

/// [`ExtractionOracle`] that reads the reply as a stream of chunks.
///
/// The chunks are concatenated before the reply is handed on, so parsing
/// sees the same text a whole-reply call would produce. Providers that
/// cannot stream fall back to a plain `chat` call.
pub struct StreamingLlmOracle {
    provider: Arc<dyn LLMProvider>,
}

impl StreamingLlmOracle {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self { provider }
    }

    pub fn from_config(config: &IngestConfig) -> Result<Self, IngestError> {
        Ok(Self::new(resolve_provider(config)?))
    }
}

#[async_trait]
impl ExtractionOracle for StreamingLlmOracle {
    async fn call(&self, request: &OracleRequest) -> Result<String, IngestError> {
        if !self.provider.supports_tool_streaming() {
            debug!(
                "Provider {} cannot stream, using a whole-reply call",
                self.provider.name()
            );
            return LlmOracle::new(Arc::clone(&self.provider)).call(request).await;
        }

        let start = Instant::now();
        let messages = vec![ChatMessage::user_with_images(
            request.instructions.as_str(),
            vec![request.image.to_image_data()],
        )];
        let options = build_options(request);

        let chunks = self
            .provider
            .chat_with_tools_stream(&messages, &[], None, Some(&options))
            .await
            .map_err(|e| IngestError::OracleUnavailable {
                detail: e.to_string(),
            })?;
        let text = collect_stream(chunks).await?;

        debug!(
            "Streamed oracle reply: {} chars in {:?}",
            text.len(),
            start.elapsed()
        );
        Ok(text)
    }
}

/// Reassemble a streamed reply into its full text.
///
/// Content chunks are joined in arrival order; reasoning and tool-call
/// chunks are skipped. An error anywhere in the stream discards the partial
/// text and surfaces as [`IngestError::OracleUnavailable`].
pub async fn collect_stream<S>(mut chunks: S) -> Result<String, IngestError>
where
    S: Stream<Item = Result<StreamChunk, LlmError>> + Unpin,
{
    let mut text = String::new();
    while let Some(chunk) = chunks.next().await {
        match chunk {
            Ok(StreamChunk::Content(part)) => text.push_str(&part),
            Ok(StreamChunk::Finished { reason, .. }) => {
                if reason == "length" {
                    warn!("Oracle reply was cut off at the token limit");
                }
                break;
            }
            Ok(_) => {}
            Err(e) => {
                return Err(IngestError::OracleUnavailable {
                    detail: format!("stream interrupted: {e}"),
                })
            }
        }
    }
    Ok(text)
}

/// Build `CompletionOptions` for one request.
fn build_options(request: &OracleRequest) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(request.temperature),
        max_tokens: Some(request.max_tokens),
        ..Default::default()
    }
}

/// Prompt construction and timeout around an [`ExtractionOracle`].
#[derive(Clone)]
pub struct OracleClient {
    oracle: Arc<dyn ExtractionOracle>,
    max_tokens: usize,
    temperature: f32,
    timeout: Duration,
}

impl OracleClient {
    pub fn new(oracle: Arc<dyn ExtractionOracle>, config: &IngestConfig) -> Self {
        Self {
            oracle,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout: Duration::from_secs(config.api_timeout_secs),
        }
    }

    /// Ask the oracle to extract receipt data from `image`.
    ///
    /// `categories` is the allowed category list; `today` is the UTC date the
    /// model falls back to when the receipt date is illegible.
    pub async fn extract(
        &self,
        image: &EncodedImage,
        categories: &[String],
        today: &str,
    ) -> Result<String, IngestError> {
        let request = OracleRequest {
            image: image.clone(),
            instructions: receipt_instructions(categories, today),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        match timeout(self.timeout, self.oracle.call(&request)).await {
            Ok(result) => result,
            Err(_) => Err(IngestError::OracleUnavailable {
                detail: format!("call timed out after {}s", self.timeout.as_secs()),
            }),
        }
    }
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider + model** (`config.provider_name`).
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 4. **Anthropic key** (`ANTHROPIC_API_KEY`) with
///    [`DEFAULT_ANTHROPIC_MODEL`] unless a model is configured.
/// 5. **Full auto-detection** (`ProviderFactory::from_env`).
pub fn resolve_provider(config: &IngestConfig) -> Result<Arc<dyn LLMProvider>, IngestError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let default_model = if name == "anthropic" {
            DEFAULT_ANTHROPIC_MODEL
        } else {
            DEFAULT_MODEL
        };
        let model = config.model.as_deref().unwrap_or(default_model);
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
        if !key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_ANTHROPIC_MODEL);
            return create_vision_provider("anthropic", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| IngestError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set ANTHROPIC_API_KEY, OPENAI_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, IngestError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        IngestError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recording {
        seen: Mutex<Vec<OracleRequest>>,
        reply: String,
    }

    #[async_trait]
    impl ExtractionOracle for Recording {
        async fn call(&self, request: &OracleRequest) -> Result<String, IngestError> {
            self.seen.lock().unwrap().push(request.clone());
            Ok(self.reply.clone())
        }
    }

    struct Stalled;

    #[async_trait]
    impl ExtractionOracle for Stalled {
        async fn call(&self, _request: &OracleRequest) -> Result<String, IngestError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok("None".into())
        }
    }

    fn image() -> EncodedImage {
        EncodedImage {
            media_type: "image/jpeg".into(),
            data: "aGVsbG8=".into(),
        }
    }

    #[test]
    fn build_options_copies_request_limits() {
        let req = OracleRequest {
            image: image(),
            instructions: String::new(),
            max_tokens: 1000,
            temperature: 0.0,
        };
        let opts = build_options(&req);
        assert_eq!(opts.temperature, Some(0.0));
        assert_eq!(opts.max_tokens, Some(1000));
    }

    #[tokio::test]
    async fn extract_sends_image_and_rules() {
        let oracle = Arc::new(Recording {
            seen: Mutex::new(Vec::new()),
            reply: "None".into(),
        });
        let config = IngestConfig::builder().max_tokens(321).build().unwrap();
        let client = OracleClient::new(oracle.clone(), &config);

        let reply = client
            .extract(&image(), &["Food".to_string()], "2025-09-14")
            .await
            .unwrap();
        assert_eq!(reply, "None");

        let seen = oracle.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].image, image());
        assert_eq!(seen[0].max_tokens, 321);
        assert!(seen[0].instructions.contains(r#"["Food", "Other"]"#));
    }

    #[tokio::test]
    async fn collect_stream_joins_content_chunks() {
        let chunks: Vec<Result<StreamChunk, LlmError>> = vec![
            Ok(StreamChunk::ThinkingContent {
                text: "looking at the image".into(),
                tokens_used: None,
                budget_total: None,
            }),
            Ok(StreamChunk::Content(r#"{"vendor":"#.into())),
            Ok(StreamChunk::Content(r#""Mart"}"#.into())),
            Ok(StreamChunk::Finished {
                reason: "stop".into(),
                ttft_ms: None,
            }),
            Ok(StreamChunk::Content("ignored after finish".into())),
        ];
        let text = collect_stream(futures::stream::iter(chunks)).await.unwrap();
        assert_eq!(text, r#"{"vendor":"Mart"}"#);
    }

    #[tokio::test]
    async fn collect_stream_error_is_unavailable() {
        let chunks = futures::stream::iter(vec![
            Ok(StreamChunk::Content("{\"tot".into())),
            Err(LlmError::NetworkError("connection reset".into())),
        ]);
        let err = collect_stream(chunks).await.unwrap_err();
        assert!(matches!(err, IngestError::OracleUnavailable { .. }));
        assert!(err.is_retriable());
    }

    #[tokio::test]
    async fn streaming_oracle_reads_provider_stream() {
        let provider = edgequake_llm::providers::MockAgentProvider::new();
        provider.add_response_sync(r#"{"total": 3.75}"#);
        let oracle = StreamingLlmOracle::new(Arc::new(provider));
        let config = IngestConfig::builder().build().unwrap();
        let client = OracleClient::new(Arc::new(oracle), &config);

        let reply = client.extract(&image(), &[], "2025-09-14").await.unwrap();
        assert_eq!(reply, r#"{"total": 3.75}"#);
    }

    #[tokio::test]
    async fn extract_times_out_as_unavailable() {
        let config = IngestConfig::builder().api_timeout_secs(1).build().unwrap();
        let client = OracleClient::new(Arc::new(Stalled), &config);
        let err = client.extract(&image(), &[], "2025-09-14").await.unwrap_err();
        assert!(matches!(err, IngestError::OracleUnavailable { .. }));
        assert!(err.is_retriable());
    }
}
