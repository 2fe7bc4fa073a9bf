//! Deterministic safety nets (post-loop, pre-assembly)
//!
//! Three non-LLM passes that backstop whatever the retrieve loop missed:
//! an instruction pre-fetch, a broad unrestricted embedding search, and a
//! global-instruction auto-inject with a score floor. Failures here are
//! logged and yield nothing; they never sink the run.

use crate::gateway::Gateway;
use crate::memory::NodeType;
use crate::search::{cosine_similarity, ScoredNode, VectorQuery};
use crate::storage::{strip_trailing_qualifiers, Store};

/// Instructions kept by the pre-fetch
const INSTRUCTION_PREFETCH_KEEP: usize = 15;

/// Over-fetch factor before content dedup
const INSTRUCTION_PREFETCH_FACTOR: usize = 10;

/// Results of the broad unrestricted fallback
const BROAD_FALLBACK_TOP_K: usize = 20;

/// Global instructions considered for auto-inject
const GLOBAL_INSTRUCTION_LIMIT: usize = 20;

/// Minimum prompt relevance for a global instruction to inject
const GLOBAL_INSTRUCTION_MIN_COSINE: f32 = 0.15;

/// Score floor that keeps injected globals alive through ranking
const GLOBAL_INSTRUCTION_SCORE_FLOOR: f32 = 0.6;

/// Normalisation used to deduplicate near-identical instruction content:
/// lowercase, collapse whitespace, strip the trailing entity qualifiers
/// that bulk-generated variants differ by.
pub fn normalize_for_dedup(content: &str) -> String {
    let collapsed = content
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    strip_trailing_qualifiers(&collapsed)
}

/// Instruction pre-fetch: embed the prompt, over-fetch instruction nodes,
/// dedupe by normalised content, keep the best few.
pub async fn instruction_prefetch(
    store: &Store,
    gateway: &Gateway,
    prompt: &str,
) -> Vec<ScoredNode> {
    let vector = match gateway.embed_query(prompt).await {
        Ok(vector) => vector,
        Err(err) => {
            tracing::warn!(error = %err, "instruction prefetch embed failed");
            return vec![];
        }
    };

    let query = VectorQuery::new(vector, INSTRUCTION_PREFETCH_KEEP * INSTRUCTION_PREFETCH_FACTOR)
        .with_types(vec![NodeType::Instruction]);
    let hits = match store.vector_search(&query) {
        Ok(hits) => hits,
        Err(err) => {
            tracing::warn!(error = %err, "instruction prefetch search failed");
            return vec![];
        }
    };

    let mut seen = std::collections::HashSet::new();
    let mut kept = Vec::new();
    for hit in hits {
        if seen.insert(normalize_for_dedup(&hit.node.content)) {
            kept.push(hit);
            if kept.len() >= INSTRUCTION_PREFETCH_KEEP {
                break;
            }
        }
    }
    kept
}

/// Broad embedding fallback: unrestricted cosine search to catch whatever
/// the agent's targeted searches missed.
pub async fn broad_fallback(store: &Store, gateway: &Gateway, prompt: &str) -> Vec<ScoredNode> {
    let vector = match gateway.embed_query(prompt).await {
        Ok(vector) => vector,
        Err(err) => {
            tracing::warn!(error = %err, "broad fallback embed failed");
            return vec![];
        }
    };
    store
        .vector_search(&VectorQuery::new(vector, BROAD_FALLBACK_TOP_K))
        .unwrap_or_else(|err| {
            tracing::warn!(error = %err, "broad fallback search failed");
            vec![]
        })
}

/// Global-instruction auto-inject: wide-scope rules with at least minimal
/// prompt relevance, floored so bulk noise cannot rank them out.
pub async fn global_instructions(
    store: &Store,
    gateway: &Gateway,
    prompt: &str,
) -> Vec<ScoredNode> {
    let vector = match gateway.embed_query(prompt).await {
        Ok(vector) => vector,
        Err(err) => {
            tracing::warn!(error = %err, "global instruction embed failed");
            return vec![];
        }
    };

    let globals = match store.get_global_instructions(GLOBAL_INSTRUCTION_LIMIT) {
        Ok(globals) => globals,
        Err(err) => {
            tracing::warn!(error = %err, "global instruction fetch failed");
            return vec![];
        }
    };

    let mut injected = Vec::new();
    for node in globals {
        let Ok(Some(stored)) = store.get_embedding(&node.id) else {
            continue;
        };
        let cosine = cosine_similarity(&vector, &stored);
        if cosine <= GLOBAL_INSTRUCTION_MIN_COSINE {
            continue;
        }
        let score = (cosine * node.salience as f32).max(GLOBAL_INSTRUCTION_SCORE_FLOOR);
        injected.push(ScoredNode { node, score, cosine });
    }
    injected
}
