//! Model gateway
//!
//! Unified call surface over the two external capabilities: a chat LLM
//! with function calling and an embedding service. Handles retries with
//! backoff, empty-response fallback to a secondary chat provider, embed
//! batching with zero-vector short-circuits, a query-embedding cache,
//! and per-tag token accounting.
//!
//! The backends are trait objects so the e2e suite can substitute
//! deterministic mocks.

mod chat;
mod embed;
mod usage;

pub use chat::OpenAiCompatChat;
pub use embed::VoyageEmbed;
pub use usage::{TagUsage, UsageLedger, UsageReport};

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lru::LruCache;
use serde::{Deserialize, Serialize};

/// Embedding dimension used across the store
pub const EMBEDDING_DIMENSIONS: usize = 1024;

/// Maximum texts per embed request
pub const EMBED_BATCH_SIZE: usize = 128;

/// Transient-error retry attempts per call
const RETRY_ATTEMPTS: u32 = 3;

/// Base backoff between retries; rate limits double it
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Gateway error type
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Network-level failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// Non-success API response
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
    /// 429 from the provider
    #[error("Rate limited: {0}")]
    RateLimited(String),
    /// 5xx / overloaded from the provider
    #[error("Provider overloaded: {0}")]
    Overloaded(String),
    /// Response could not be decoded
    #[error("Malformed response: {0}")]
    Decode(String),
    /// Missing credential
    #[error("Missing API key: {0}")]
    MissingKey(String),
}

impl GatewayError {
    /// Whether a retry may help
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GatewayError::Http(_) | GatewayError::RateLimited(_) | GatewayError::Overloaded(_)
        )
    }

    /// Whether backoff should be doubled
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, GatewayError::RateLimited(_))
    }
}

// ============================================================================
// CHAT WIRE TYPES
// ============================================================================

/// Role in a chat conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
            ChatRole::Tool => "tool",
        }
    }
}

/// A single message in a chat conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: Option<String>,
    /// Tool calls requested by the assistant (assistant messages only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// When role == Tool, identifies which tool call this result answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: Some(content.into()), tool_calls: vec![], tool_call_id: None }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: Some(content.into()), tool_calls: vec![], tool_call_id: None }
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: Some(content.into()), tool_calls: vec![], tool_call_id: None }
    }
    pub fn assistant_tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self { role: ChatRole::Assistant, content: None, tool_calls, tool_call_id: None }
    }
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self { role: ChatRole::Tool, content: Some(content.into()), tool_calls: vec![], tool_call_id: Some(tool_call_id.into()) }
    }
}

/// A tool call requested by the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique id for correlating the tool result
    pub id: String,
    /// Function name
    pub name: String,
    /// Arguments as a JSON text string
    pub arguments: String,
}

/// Token usage of one call
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
}

/// A chat request
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    /// Function schemas in the provider's tool format
    pub tools: Option<serde_json::Value>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    /// Accounting tag: "l1", "l2", "curate", "reconcile"
    pub tag: String,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>, tag: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            messages,
            tools: None,
            max_tokens: None,
            temperature: None,
            tag: tag.into(),
        }
    }

    pub fn with_tools(mut self, tools: serde_json::Value) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// A chat response
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<Usage>,
}

impl ChatResponse {
    /// No content and no tool calls
    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty() && self.tool_calls.is_empty()
    }
}

/// Embedding input type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    Document,
    Query,
}

impl InputType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputType::Document => "document",
            InputType::Query => "query",
        }
    }
}

// ============================================================================
// BACKEND TRAITS
// ============================================================================

/// A chat LLM with function calling
#[async_trait::async_trait]
pub trait ChatBackend: Send + Sync {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, GatewayError>;
}

/// An embedding service
#[async_trait::async_trait]
pub trait EmbedBackend: Send + Sync {
    async fn embed(
        &self,
        texts: &[String],
        input_type: InputType,
    ) -> Result<Vec<Vec<f32>>, GatewayError>;
}

// ============================================================================
// GATEWAY
// ============================================================================

/// The unified call surface used by every pipeline stage
pub struct Gateway {
    primary: Arc<dyn ChatBackend>,
    fallback: Option<Arc<dyn ChatBackend>>,
    embedder: Arc<dyn EmbedBackend>,
    /// Dimension of the vectors the embedder returns
    dimension: usize,
    usage: UsageLedger,
    /// Cache for repeated query embeddings within and across runs
    query_cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl Gateway {
    pub fn new(primary: Arc<dyn ChatBackend>, embedder: Arc<dyn EmbedBackend>) -> Self {
        Self {
            primary,
            fallback: None,
            embedder,
            dimension: EMBEDDING_DIMENSIONS,
            usage: UsageLedger::new(),
            // SAFETY: 128 is non-zero
            query_cache: Mutex::new(LruCache::new(NonZeroUsize::new(128).expect("128 is non-zero"))),
        }
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn ChatBackend>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    /// Snapshot the per-tag token ledger
    pub fn usage_report(&self) -> UsageReport {
        self.usage.report()
    }

    /// Reset the token ledger (between pipeline runs, on caller demand)
    pub fn reset_usage(&self) {
        self.usage.reset()
    }

    async fn call_with_retries(
        &self,
        backend: &Arc<dyn ChatBackend>,
        request: &ChatRequest,
    ) -> Result<ChatResponse, GatewayError> {
        let mut last_err = None;
        for attempt in 1..=RETRY_ATTEMPTS {
            match backend.chat(request).await {
                Ok(response) => {
                    self.usage.record(&request.tag, response.usage.as_ref());
                    return Ok(response);
                }
                Err(err) if err.is_transient() && attempt < RETRY_ATTEMPTS => {
                    let mut delay = RETRY_BASE_DELAY * attempt;
                    if err.is_rate_limit() {
                        delay *= 2;
                    }
                    tracing::warn!(tag = %request.tag, attempt, error = %err, "chat call failed, retrying");
                    tokio::time::sleep(delay).await;
                    last_err = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_err.unwrap_or(GatewayError::Decode("retries exhausted".into())))
    }

    /// Call the chat model. Retries transient failures; an empty response
    /// gets one extra retry and then a fallback to the secondary provider
    /// using only the system message plus concatenated user messages. If
    /// the fallback fails too, the original empty response is returned.
    pub async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, GatewayError> {
        let response = self.call_with_retries(&self.primary, &request).await?;
        if !response.is_empty() {
            return Ok(response);
        }

        tracing::warn!(tag = %request.tag, "empty chat response, retrying once");
        match self.call_with_retries(&self.primary, &request).await {
            Ok(retried) if !retried.is_empty() => return Ok(retried),
            _ => {}
        }

        let Some(fallback) = &self.fallback else {
            return Ok(response);
        };

        let system = request
            .messages
            .iter()
            .find(|m| m.role == ChatRole::System)
            .and_then(|m| m.content.clone());
        let user_text = request
            .messages
            .iter()
            .filter(|m| m.role == ChatRole::User)
            .filter_map(|m| m.content.as_deref())
            .collect::<Vec<_>>()
            .join("\n\n");
        let mut flattened = Vec::new();
        if let Some(system) = system {
            flattened.push(ChatMessage::system(system));
        }
        flattened.push(ChatMessage::user(user_text));

        let fallback_request = ChatRequest {
            messages: flattened,
            tools: None,
            ..request
        };
        tracing::warn!(tag = %fallback_request.tag, "falling back to secondary chat provider");
        match self.call_with_retries(fallback, &fallback_request).await {
            Ok(fallback_response) if !fallback_response.is_empty() => Ok(fallback_response),
            _ => Ok(response),
        }
    }

    /// Embed a batch of texts. Empty strings become zero vectors without
    /// touching the provider; output order matches input order; batches
    /// are capped at [`EMBED_BATCH_SIZE`].
    pub async fn embed(
        &self,
        texts: &[String],
        input_type: InputType,
    ) -> Result<Vec<Vec<f32>>, GatewayError> {
        let mut vectors: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut pending: Vec<(usize, String)> = Vec::new();
        for (index, text) in texts.iter().enumerate() {
            if text.trim().is_empty() {
                vectors[index] = Some(vec![0.0; self.dimension]);
            } else {
                pending.push((index, text.clone()));
            }
        }

        for chunk in pending.chunks(EMBED_BATCH_SIZE) {
            let batch: Vec<String> = chunk.iter().map(|(_, t)| t.clone()).collect();
            let embedded = self.embed_with_retries(&batch, input_type).await?;
            if embedded.len() != batch.len() {
                return Err(GatewayError::Decode(format!(
                    "embedder returned {} vectors for {} texts",
                    embedded.len(),
                    batch.len()
                )));
            }
            for ((index, _), vector) in chunk.iter().zip(embedded) {
                vectors[*index] = Some(vector);
            }
        }

        Ok(vectors.into_iter().map(|v| v.unwrap_or_default()).collect())
    }

    /// Embed a single query string, with caching
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, GatewayError> {
        if let Ok(mut cache) = self.query_cache.lock() {
            if let Some(hit) = cache.get(text) {
                return Ok(hit.clone());
            }
        }
        let mut vectors = self.embed(&[text.to_string()], InputType::Query).await?;
        let vector = vectors
            .pop()
            .ok_or_else(|| GatewayError::Decode("embedder returned no vectors".into()))?;
        if let Ok(mut cache) = self.query_cache.lock() {
            cache.put(text.to_string(), vector.clone());
        }
        Ok(vector)
    }

    /// Embed a single document string
    pub async fn embed_document(&self, text: &str) -> Result<Vec<f32>, GatewayError> {
        let mut vectors = self.embed(&[text.to_string()], InputType::Document).await?;
        vectors
            .pop()
            .ok_or_else(|| GatewayError::Decode("embedder returned no vectors".into()))
    }

    async fn embed_with_retries(
        &self,
        texts: &[String],
        input_type: InputType,
    ) -> Result<Vec<Vec<f32>>, GatewayError> {
        let mut last_err = None;
        for attempt in 1..=RETRY_ATTEMPTS {
            match self.embedder.embed(texts, input_type).await {
                Ok(vectors) => return Ok(vectors),
                Err(err) if err.is_transient() && attempt < RETRY_ATTEMPTS => {
                    let mut delay = RETRY_BASE_DELAY * attempt;
                    if err.is_rate_limit() {
                        delay *= 2;
                    }
                    tracing::warn!(attempt, error = %err, "embed call failed, retrying");
                    tokio::time::sleep(delay).await;
                    last_err = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_err.unwrap_or(GatewayError::Decode("retries exhausted".into())))
    }
}

// ============================================================================
// TESTS
// ============================================================================
