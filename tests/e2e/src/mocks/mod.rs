//! Mock model backends
//!
//! `MockEmbed` hashes words into buckets so overlapping wording produces
//! high cosine similarity, which makes the deterministic safety nets and
//! the vector-search tools behave realistically without a network.
//! `MockChat` routes each request through a test-provided handler.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use engram_core::{
    ChatBackend, ChatRequest, ChatResponse, ChatRole, EmbedBackend, GatewayError, InputType,
    ToolCall, Usage,
};

/// Dimension used by the mock embedder (small keeps scans fast)
pub const MOCK_DIMENSION: usize = 64;

// ============================================================================
// EMBEDDINGS
// ============================================================================

/// Deterministic bag-of-words embedding: each lowercased word hashes into
/// a bucket; shared words mean shared buckets mean high cosine.
pub fn bow_vector(text: &str, dimension: usize) -> Vec<f32> {
    let mut vector = vec![0.0_f32; dimension];
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 1)
    {
        let lowered = word.to_lowercase();
        let mut hash: u64 = 1469598103934665603;
        for byte in lowered.as_bytes() {
            hash ^= *byte as u64;
            hash = hash.wrapping_mul(1099511628211);
        }
        vector[(hash % dimension as u64) as usize] += 1.0;
    }
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut vector {
            *x /= norm;
        }
    }
    vector
}

/// Embedding backend producing [`bow_vector`]s
pub struct MockEmbed;

#[async_trait::async_trait]
impl EmbedBackend for MockEmbed {
    async fn embed(
        &self,
        texts: &[String],
        _input_type: InputType,
    ) -> Result<Vec<Vec<f32>>, GatewayError> {
        Ok(texts.iter().map(|t| bow_vector(t, MOCK_DIMENSION)).collect())
    }
}

// ============================================================================
// CHAT
// ============================================================================

type Handler = dyn Fn(&ChatRequest) -> Result<ChatResponse, GatewayError> + Send + Sync;

/// Chat backend that routes every request through a closure
pub struct MockChat {
    handler: Box<Handler>,
    calls: AtomicUsize,
}

impl MockChat {
    pub fn new(
        handler: impl Fn(&ChatRequest) -> Result<ChatResponse, GatewayError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self { handler: Box::new(handler), calls: AtomicUsize::new(0) })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ChatBackend for MockChat {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.handler)(request)
    }
}

// ============================================================================
// REQUEST CLASSIFICATION
// ============================================================================

fn system_text(request: &ChatRequest) -> &str {
    request
        .messages
        .iter()
        .find(|m| m.role == ChatRole::System)
        .and_then(|m| m.content.as_deref())
        .unwrap_or("")
}

/// Last user or tool message content, for handlers that react to history
pub fn last_message_text(request: &ChatRequest) -> &str {
    request
        .messages
        .iter()
        .rev()
        .find(|m| matches!(m.role, ChatRole::User | ChatRole::Tool))
        .and_then(|m| m.content.as_deref())
        .unwrap_or("")
}

/// Most recent tool-role result in the conversation
pub fn last_tool_result(request: &ChatRequest) -> Option<&str> {
    request
        .messages
        .iter()
        .rev()
        .find(|m| m.role == ChatRole::Tool)
        .and_then(|m| m.content.as_deref())
}

pub fn is_classifier(request: &ChatRequest) -> bool {
    request.tag == "l1" && system_text(request).contains("classify one sentence")
}

pub fn is_planner(request: &ChatRequest) -> bool {
    request.tag == "l1" && system_text(request).contains("plan memory retrieval")
}

pub fn is_storage_filter(request: &ChatRequest) -> bool {
    request.tag == "l1" && system_text(request).contains("saved to long-term memory")
}

pub fn is_retrieve_loop(request: &ChatRequest) -> bool {
    request.tag == "l2" && !tools_include(request, "store_memory")
}

pub fn is_store_loop(request: &ChatRequest) -> bool {
    request.tag == "l2" && tools_include(request, "store_memory")
}

pub fn is_curator(request: &ChatRequest) -> bool {
    request.tag == "curate"
}

pub fn is_reconciler(request: &ChatRequest) -> bool {
    request.tag == "reconcile"
}

fn tools_include(request: &ChatRequest, name: &str) -> bool {
    request
        .tools
        .as_ref()
        .and_then(|t| t.as_array())
        .is_some_and(|tools| {
            tools
                .iter()
                .any(|t| t["function"]["name"].as_str() == Some(name))
        })
}

// ============================================================================
// RESPONSE BUILDERS
// ============================================================================

pub fn text_response(content: impl Into<String>) -> Result<ChatResponse, GatewayError> {
    Ok(ChatResponse {
        content: content.into(),
        tool_calls: vec![],
        usage: Some(Usage { prompt_tokens: 10, completion_tokens: 5 }),
    })
}

pub fn tool_call(name: &str, args: serde_json::Value) -> ToolCall {
    ToolCall {
        id: format!("call_{name}"),
        name: name.to_string(),
        arguments: args.to_string(),
    }
}

pub fn tool_call_response(calls: Vec<ToolCall>) -> Result<ChatResponse, GatewayError> {
    Ok(ChatResponse {
        content: String::new(),
        tool_calls: calls,
        usage: Some(Usage { prompt_tokens: 10, completion_tokens: 5 }),
    })
}

/// Curator that keeps every record verbatim: echoes the text after the
/// `Records:` marker of the request
pub fn echo_curator(request: &ChatRequest) -> Result<ChatResponse, GatewayError> {
    let user = last_message_text(request);
    let records = user
        .split("Records:\n")
        .nth(1)
        .unwrap_or("NO_RELEVANT_RECORDS");
    text_response(records.to_string())
}

/// Classification JSON for a simple retrieve-only question
pub fn retrieve_classification(entities: &[&str], intents: &[&str]) -> String {
    let entity_objects: Vec<serde_json::Value> = entities
        .iter()
        .map(|name| serde_json::json!({ "name": name, "type": "person", "ambiguous": false }))
        .collect();
    serde_json::json!({
        "entities": entity_objects,
        "implied_facts": [],
        "events": [], "plans": [], "opinions": [], "concepts": [], "implied_processes": [],
        "intents": intents,
        "operations": { "retrieve": true, "store": false }
    })
    .to_string()
}

/// Classification JSON for a trivial prompt: nothing extracted, no ops
pub fn empty_classification() -> String {
    serde_json::json!({
        "entities": [], "implied_facts": [], "events": [], "plans": [],
        "opinions": [], "concepts": [], "implied_processes": [],
        "intents": [],
        "operations": { "retrieve": false, "store": false }
    })
    .to_string()
}

/// Pull the first node id out of a formatted tool result line, which
/// renders ids as `(id, salience)`
pub fn first_id_in(text: &str) -> Option<String> {
    for segment in text.split('(').skip(1) {
        let candidate = segment.split(',').next()?.trim();
        if candidate.len() == 36 && candidate.chars().filter(|c| *c == '-').count() == 4 {
            return Some(candidate.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use engram_core::cosine_similarity;

    #[test]
    fn test_bow_vector_similarity() {
        let peter = bow_vector("Peter — senior content writer at WOBS", MOCK_DIMENSION);
        let question = bow_vector("Who is Peter?", MOCK_DIMENSION);
        let unrelated = bow_vector("quarterly tax filing deadline", MOCK_DIMENSION);

        assert!(cosine_similarity(&peter, &question) > cosine_similarity(&peter, &unrelated));
    }

    #[test]
    fn test_bow_vector_normalized() {
        let vector = bow_vector("some words in a sentence", MOCK_DIMENSION);
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_first_id_in() {
        let line = "[fact] Peter writes (3f2b8e4c-9a1d-4e6f-8b2a-1c3d5e7f9a0b, 1.0) [0.82]";
        assert_eq!(
            first_id_in(line).as_deref(),
            Some("3f2b8e4c-9a1d-4e6f-8b2a-1c3d5e7f9a0b")
        );
        assert!(first_id_in("no ids here (short, 1.0)").is_none());
    }
}
