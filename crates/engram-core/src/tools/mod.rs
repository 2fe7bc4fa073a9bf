//! Tool dispatcher
//!
//! The fixed tool vocabulary exposed to the two agent loops. The retrieve
//! set reads the graph; the store set writes it; `search_entity` appears in
//! both. Results are plain text at the model boundary (truncated at 4,000
//! characters with a marker) but every dispatch also carries structured
//! hits so downstream ranking never parses scores back out of text.

mod retrieve;
mod store;

use std::sync::Arc;

use serde_json::json;

use crate::gateway::Gateway;
use crate::storage::Store;

/// Maximum characters of a tool result fed back to the model
pub const MAX_RESULT_CHARS: usize = 4000;

/// Marker appended when a tool result is cut off
pub const TRUNCATION_MARKER: &str = "\n[... result truncated ...]";

/// Which tool vocabulary a loop sees
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolSet {
    Retrieve,
    Store,
}

/// A structured search hit carried alongside the text result
#[derive(Debug, Clone)]
pub struct Hit {
    pub node_id: String,
    /// cosine x salience
    pub score: f32,
    /// raw cosine
    pub cosine: f32,
}

/// Result of one tool dispatch
#[derive(Debug, Clone, Default)]
pub struct ToolOutcome {
    /// Plain-text result for the model (not yet truncated)
    pub text: String,
    /// Nodes surfaced by this call, with scores
    pub hits: Vec<Hit>,
    /// Entity ids surfaced by a `search_entity` call
    pub entity_ids: Vec<String>,
    /// Id of a node written by this call (store_memory / supersede_memory)
    pub wrote: Option<String>,
}

impl ToolOutcome {
    pub fn text_only(text: impl Into<String>) -> Self {
        Self { text: text.into(), ..Default::default() }
    }

    /// The result string as fed back to the model
    pub fn model_text(&self) -> String {
        truncate_result(&self.text)
    }
}

/// Truncate a tool result for the model boundary
pub fn truncate_result(text: &str) -> String {
    if text.chars().count() <= MAX_RESULT_CHARS {
        return text.to_string();
    }
    let kept: String = text.chars().take(MAX_RESULT_CHARS).collect();
    format!("{}{}", kept, TRUNCATION_MARKER)
}

// ============================================================================
// SCHEMAS
// ============================================================================

/// Function schemas for one tool set, in the provider's tools format
pub fn schemas(set: ToolSet) -> serde_json::Value {
    let entries: Vec<(&str, &str, serde_json::Value)> = match set {
        ToolSet::Retrieve => vec![
            (
                "search_entity",
                "Find entities (people, orgs, projects, tools) by name and list their relationships.",
                retrieve::search_entity_schema(),
            ),
            (
                "get_relationships",
                "List the relationships of an entity by id.",
                retrieve::get_relationships_schema(),
            ),
            (
                "search_facts",
                "Semantic search over stored facts and opinions, optionally scoped to one entity.",
                retrieve::search_facts_schema(),
            ),
            (
                "search_events",
                "Semantic search over events and plans, optionally scoped to an entity or a recent window.",
                retrieve::search_events_schema(),
            ),
            (
                "search_plans",
                "Semantic search over future plans with their scheduled dates.",
                retrieve::search_plans_schema(),
            ),
            (
                "search_processes",
                "Semantic search over instructions, rules, and processes.",
                retrieve::search_processes_schema(),
            ),
            (
                "get_instructions",
                "Fetch instructions by topic keywords or for one entity.",
                retrieve::get_instructions_schema(),
            ),
            (
                "done",
                "Signal that retrieval is complete.",
                json!({ "type": "object", "properties": {} }),
            ),
        ],
        ToolSet::Store => vec![
            (
                "search_entity",
                "Find entities by name to obtain their ids before storing memories about them.",
                retrieve::search_entity_schema(),
            ),
            (
                "search_facts",
                "Semantic search over stored facts and opinions; use before correcting a fact.",
                retrieve::search_facts_schema(),
            ),
            (
                "store_memory",
                "Store one memory node and link it to entities.",
                store::store_memory_schema(),
            ),
            (
                "supersede_memory",
                "Replace an outdated memory with corrected content, preserving history.",
                store::supersede_memory_schema(),
            ),
            (
                "done",
                "Signal that storage is complete.",
                json!({
                    "type": "object",
                    "properties": {
                        "stored_count": { "type": "integer", "description": "How many memories were stored" }
                    }
                }),
            ),
        ],
    };

    json!(entries
        .into_iter()
        .map(|(name, description, parameters)| {
            json!({
                "type": "function",
                "function": {
                    "name": name,
                    "description": description,
                    "parameters": parameters
                }
            })
        })
        .collect::<Vec<_>>())
}

// ============================================================================
// DISPATCHER
// ============================================================================

/// Executes tool calls against the store and gateway
pub struct ToolDispatcher {
    store: Arc<Store>,
    gateway: Arc<Gateway>,
}

impl ToolDispatcher {
    pub fn new(store: Arc<Store>, gateway: Arc<Gateway>) -> Self {
        Self { store, gateway }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Execute one tool call. Errors come back as strings so the loop can
    /// hand them to the model as tool error responses. `done` is handled
    /// by the loops and never reaches the dispatcher.
    pub async fn dispatch(
        &self,
        set: ToolSet,
        name: &str,
        args: &serde_json::Value,
    ) -> Result<ToolOutcome, String> {
        match (set, name) {
            (_, "search_entity") => {
                retrieve::search_entity(&self.store, &self.gateway, args).await
            }
            (ToolSet::Retrieve, "get_relationships") => {
                retrieve::get_relationships(&self.store, args)
            }
            (_, "search_facts") => retrieve::search_facts(&self.store, &self.gateway, args).await,
            (ToolSet::Retrieve, "search_events") => {
                retrieve::search_events(&self.store, &self.gateway, args).await
            }
            (ToolSet::Retrieve, "search_plans") => {
                retrieve::search_plans(&self.store, &self.gateway, args).await
            }
            (ToolSet::Retrieve, "search_processes") => {
                retrieve::search_processes(&self.store, &self.gateway, args).await
            }
            (ToolSet::Retrieve, "get_instructions") => {
                retrieve::get_instructions(&self.store, args)
            }
            (ToolSet::Store, "store_memory") => {
                store::store_memory(&self.store, &self.gateway, args).await
            }
            (ToolSet::Store, "supersede_memory") => {
                store::supersede_memory(&self.store, &self.gateway, args).await
            }
            _ => Err(format!("unknown tool: {name}")),
        }
    }

    /// Direct store_memory invocation used by the force-store safety net
    pub async fn force_store(
        &self,
        args: &serde_json::Value,
    ) -> Result<ToolOutcome, String> {
        store::store_memory(&self.store, &self.gateway, args).await
    }
}

// ============================================================================
// ARGUMENT HELPERS
// ============================================================================

pub(crate) fn arg_str<'a>(args: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(|v| v.as_str()).filter(|s| !s.trim().is_empty())
}

pub(crate) fn arg_f64(args: &serde_json::Value, key: &str) -> Option<f64> {
    args.get(key).and_then(|v| v.as_f64())
}

pub(crate) fn arg_i64(args: &serde_json::Value, key: &str) -> Option<i64> {
    args.get(key).and_then(|v| v.as_i64())
}

pub(crate) fn arg_str_list(args: &serde_json::Value, key: &str) -> Vec<String> {
    args.get(key)
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str())
                .filter(|s| !s.trim().is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

// ============================================================================
// TESTS
// ============================================================================
