//! Planner and storage filter (layer 1.5)
//!
//! Two independent calls that run in parallel: one turns the extraction
//! into a short search plan for the retrieve loop, the other decides what
//! (if anything) is worth storing. The distinguishing test for storage:
//! is the user telling me something new, or asking about something they
//! expect me to know?

use serde::{Deserialize, Serialize};

use super::classifier::{extract_json, Extraction};
use crate::gateway::{ChatMessage, ChatRequest, Gateway, GatewayError};

// ============================================================================
// STORE ITEMS
// ============================================================================

/// One candidate memory the store loop should materialize
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreItem {
    pub content: String,
    #[serde(rename = "type")]
    pub item_type: String,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub valid_from: Option<String>,
    #[serde(default)]
    pub scope: Option<f64>,
    #[serde(default)]
    pub salience: Option<f64>,
}

/// The storage filter's decision
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageDecision {
    #[serde(default)]
    pub items: Vec<StoreItem>,
    #[serde(default)]
    pub skip_reason: Option<String>,
}

// ============================================================================
// PROMPTS
// ============================================================================

const PLAN_SYSTEM: &str = r#"You plan memory retrieval for a personal assistant. Given the user's message and what was extracted from it, write a short reasoning chain and then a numbered search plan of 1 to 5 steps over these tools: search_entity(name), get_relationships(entity_id), search_facts(query, entity_id?), search_events(query, entity_id?, days?), search_plans(query, entity_id?), search_processes(query, entity_id?), get_instructions(topic?, entity_id?).
Look up named entities first to get their ids, then search the categories the question actually needs. Keep the plan terse."#;

const FILTER_SYSTEM: &str = r#"You decide what from a user's message should be saved to long-term memory. The test: is the user TELLING me something new, or ASKING about something they expect me to know? Questions, hypotheticals, greetings, common sense, and vague statements store nothing.
Respond with STRICT JSON only:
{"items": [{"content": "...", "type": "entity|fact|event|opinion|instruction|plan", "subtype": "...", "reason": "...", "valid_from": "YYYY-MM-DD", "scope": 0.5, "salience": 1.0}], "skip_reason": "..."}
Rules:
- Preserve exact numbers, dates, names and the user's original wording in content.
- Recognise instructions against these archetypes: process/procedure, tool usage, role assignment, threshold/constraint, exception/override, preference stated as a rule, correction to an existing rule, ban.
- Give instructions a scope: 1.0 universally applicable, 0.5 team- or tool-wide, 0.2 specific to one entity.
- Plans need valid_from (the scheduled date).
- When nothing should be stored, return {"items": [], "skip_reason": "..."}."#;

// ============================================================================
// CALLS
// ============================================================================

/// Produce the free-text search plan handed to the retrieve loop
pub async fn plan_retrieval(
    gateway: &Gateway,
    model: &str,
    prompt: &str,
    extraction: &Extraction,
) -> Result<String, GatewayError> {
    let entity_names: Vec<&str> = extraction.entities.iter().map(|e| e.name.as_str()).collect();
    let request = ChatRequest::new(
        model,
        vec![
            ChatMessage::system(PLAN_SYSTEM),
            ChatMessage::user(format!(
                "Message: {prompt}\nEntities: {:?}\nIntents: {:?}",
                entity_names, extraction.intents
            )),
        ],
        "l1",
    )
    .with_max_tokens(500);

    let response = gateway.chat(request).await?;
    Ok(response.content)
}

/// Decide what to store. Model output that fails to parse yields an empty
/// decision rather than an error; storing nothing is always safe.
pub async fn filter_for_storage(
    gateway: &Gateway,
    model: &str,
    prompt: &str,
    extraction: &Extraction,
) -> Result<StorageDecision, GatewayError> {
    let request = ChatRequest::new(
        model,
        vec![
            ChatMessage::system(FILTER_SYSTEM),
            ChatMessage::user(format!(
                "Message: {prompt}\nExtracted facts: {:?}\nExtracted plans: {:?}\nExtracted opinions: {:?}\nIntents: {:?}",
                extraction.implied_facts, extraction.plans, extraction.opinions, extraction.intents
            )),
        ],
        "l1",
    )
    .with_max_tokens(1200);

    let response = gateway.chat(request).await?;
    match extract_json::<StorageDecision>(&response.content) {
        Some(decision) => Ok(decision),
        None => {
            tracing::warn!("storage filter output failed to parse, storing nothing");
            Ok(StorageDecision {
                items: vec![],
                skip_reason: Some("filter output unparseable".to_string()),
            })
        }
    }
}
