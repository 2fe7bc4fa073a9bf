//! Retrieve-set tool implementations
//!
//! Every search tool embeds its query, runs a filtered cosine search, and
//! formats hits as `[type/subtype] content (id, salience) [score]` lines.

use std::sync::Arc;

use serde_json::json;

use super::{arg_i64, arg_str, Hit, ToolOutcome};
use crate::gateway::Gateway;
use crate::memory::NodeType;
use crate::search::{ScoredNode, VectorQuery};
use crate::storage::Store;

/// Relationships shown under an entity hit
const ENTITY_RELATIONSHIP_CAP: usize = 15;

/// Relationships returned by get_relationships
const RELATIONSHIP_CAP: usize = 25;

const ENTITY_TOP_K: usize = 5;
const FACTS_TOP_K: usize = 10;
const EVENTS_TOP_K: usize = 20;
const PLANS_TOP_K: usize = 10;
const PROCESSES_TOP_K: usize = 10;

// ============================================================================
// SCHEMAS
// ============================================================================

pub fn search_entity_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "name": { "type": "string", "description": "Entity name to look up" }
        },
        "required": ["name"]
    })
}

pub fn get_relationships_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "entity_id": { "type": "string", "description": "Id of the entity" }
        },
        "required": ["entity_id"]
    })
}

pub fn search_facts_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "query": { "type": "string", "description": "What to look for" },
            "entity_id": { "type": "string", "description": "Restrict to facts linked to this entity" }
        },
        "required": ["query"]
    })
}

pub fn search_events_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "query": { "type": "string", "description": "What to look for" },
            "entity_id": { "type": "string", "description": "Restrict to events linked to this entity" },
            "days": { "type": "integer", "description": "Only events from the last N days" }
        },
        "required": ["query"]
    })
}

pub fn search_plans_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "query": { "type": "string", "description": "What to look for" },
            "entity_id": { "type": "string", "description": "Restrict to plans linked to this entity" }
        },
        "required": ["query"]
    })
}

pub fn search_processes_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "query": { "type": "string", "description": "What to look for" },
            "entity_id": { "type": "string", "description": "Restrict to instructions linked to this entity" }
        },
        "required": ["query"]
    })
}

pub fn get_instructions_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "topic": { "type": "string", "description": "Topic keywords to match" },
            "entity_id": { "type": "string", "description": "Fetch instructions linked to this entity instead" }
        }
    })
}

// ============================================================================
// FORMATTING
// ============================================================================

/// `[type/subtype] content (id, salience) [score]`
fn format_hit(hit: &ScoredNode) -> String {
    format!(
        "[{}] {} ({}, {:.1}) [{:.2}]",
        hit.node.type_label(),
        hit.node.content,
        hit.node.id,
        hit.node.salience,
        hit.score
    )
}

fn outcome_from_hits(hits: Vec<ScoredNode>, empty_message: &str) -> ToolOutcome {
    if hits.is_empty() {
        return ToolOutcome::text_only(empty_message);
    }
    let text = hits.iter().map(format_hit).collect::<Vec<_>>().join("\n");
    let structured = hits
        .iter()
        .map(|h| Hit { node_id: h.node.id.clone(), score: h.score, cosine: h.cosine })
        .collect();
    ToolOutcome { text, hits: structured, ..Default::default() }
}

/// Dedup hits by content (bulk imports can mint near-identical rows)
fn dedup_by_content(hits: Vec<ScoredNode>) -> Vec<ScoredNode> {
    let mut seen = std::collections::HashSet::new();
    hits.into_iter()
        .filter(|h| seen.insert(h.node.content.trim().to_lowercase()))
        .collect()
}

// ============================================================================
// TOOLS
// ============================================================================

/// search_entity(name): cosine search within entity nodes, each hit
/// decorated with up to 15 relationships.
pub async fn search_entity(
    store: &Arc<Store>,
    gateway: &Arc<Gateway>,
    args: &serde_json::Value,
) -> Result<ToolOutcome, String> {
    let name = arg_str(args, "name").ok_or("search_entity requires a name")?;
    let vector = gateway
        .embed_query(name)
        .await
        .map_err(|e| format!("embedding failed: {e}"))?;

    let hits = store
        .vector_search(
            &VectorQuery::new(vector, ENTITY_TOP_K).with_types(vec![NodeType::Entity]),
        )
        .map_err(|e| e.to_string())?;
    if hits.is_empty() {
        return Ok(ToolOutcome::text_only(format!("No entities found for \"{name}\"")));
    }

    let mut lines = Vec::new();
    let mut entity_ids = Vec::new();
    for hit in &hits {
        lines.push(format_hit(hit));
        entity_ids.push(hit.node.id.clone());

        let relationships = store
            .get_relationships(&hit.node.id)
            .map_err(|e| e.to_string())?;
        for relationship in relationships.iter().take(ENTITY_RELATIONSHIP_CAP) {
            lines.push(format!(
                "  → {} → {} ({})",
                relationship.edge.edge_type,
                relationship.other.content,
                relationship.other.node_type
            ));
        }
        if relationships.len() > ENTITY_RELATIONSHIP_CAP {
            lines.push(format!(
                "  ... and {} more relationships",
                relationships.len() - ENTITY_RELATIONSHIP_CAP
            ));
        }
    }

    let structured = hits
        .iter()
        .map(|h| Hit { node_id: h.node.id.clone(), score: h.score, cosine: h.cosine })
        .collect();
    Ok(ToolOutcome {
        text: lines.join("\n"),
        hits: structured,
        entity_ids,
        wrote: None,
    })
}

/// get_relationships(entity_id): both directions, capped at 25
pub fn get_relationships(
    store: &Arc<Store>,
    args: &serde_json::Value,
) -> Result<ToolOutcome, String> {
    let entity_id = arg_str(args, "entity_id").ok_or("get_relationships requires an entity_id")?;
    let entity = store
        .get_node(entity_id)
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("no node with id {entity_id}"))?;

    let relationships = store.get_relationships(entity_id).map_err(|e| e.to_string())?;
    if relationships.is_empty() {
        return Ok(ToolOutcome::text_only(format!("{} has no relationships", entity.content)));
    }

    let mut lines = vec![format!("Relationships of {}:", entity.content)];
    let mut hits = Vec::new();
    for relationship in relationships.iter().take(RELATIONSHIP_CAP) {
        lines.push(format!(
            "→ {} → {} ({})",
            relationship.edge.edge_type,
            relationship.other.content,
            relationship.other.node_type
        ));
        hits.push(Hit { node_id: relationship.other.id.clone(), score: 0.0, cosine: 0.0 });
    }
    if relationships.len() > RELATIONSHIP_CAP {
        lines.push(format!("... and {} more", relationships.len() - RELATIONSHIP_CAP));
    }

    Ok(ToolOutcome { text: lines.join("\n"), hits, ..Default::default() })
}

/// Vector search restricted to the ids linked to an entity, when given
async fn scoped_search(
    store: &Arc<Store>,
    gateway: &Arc<Gateway>,
    query: &str,
    top_k: usize,
    node_types: Vec<NodeType>,
    candidate_ids: Option<Vec<String>>,
) -> Result<Vec<ScoredNode>, String> {
    if let Some(ids) = &candidate_ids {
        if ids.is_empty() {
            return Ok(vec![]);
        }
    }
    let vector = gateway
        .embed_query(query)
        .await
        .map_err(|e| format!("embedding failed: {e}"))?;
    let mut vq = VectorQuery::new(vector, top_k).with_types(node_types);
    if let Some(ids) = candidate_ids {
        vq = vq.with_ids(ids);
    }
    store.vector_search(&vq).map_err(|e| e.to_string())
}

/// search_facts(query, entity_id?): facts and opinions, top 10 after dedup
pub async fn search_facts(
    store: &Arc<Store>,
    gateway: &Arc<Gateway>,
    args: &serde_json::Value,
) -> Result<ToolOutcome, String> {
    let query = arg_str(args, "query").ok_or("search_facts requires a query")?;
    let candidates = match arg_str(args, "entity_id") {
        Some(entity_id) => Some(
            store
                .get_facts_by_entity(entity_id)
                .map_err(|e| e.to_string())?
                .into_iter()
                .map(|n| n.id)
                .collect(),
        ),
        None => None,
    };

    let hits = scoped_search(
        store,
        gateway,
        query,
        FACTS_TOP_K * 2,
        vec![NodeType::Fact, NodeType::Opinion],
        candidates,
    )
    .await?;
    let mut hits = dedup_by_content(hits);
    hits.truncate(FACTS_TOP_K);
    Ok(outcome_from_hits(hits, "No matching facts"))
}

/// search_events(query, entity_id?, days?): events and plans, top 20
pub async fn search_events(
    store: &Arc<Store>,
    gateway: &Arc<Gateway>,
    args: &serde_json::Value,
) -> Result<ToolOutcome, String> {
    let query = arg_str(args, "query").ok_or("search_events requires a query")?;

    let entity_ids: Option<Vec<String>> = match arg_str(args, "entity_id") {
        Some(entity_id) => Some(
            store
                .get_events_by_entity(entity_id, None)
                .map_err(|e| e.to_string())?
                .into_iter()
                .map(|n| n.id)
                .collect(),
        ),
        None => None,
    };
    let recent_ids: Option<Vec<String>> = match arg_i64(args, "days") {
        Some(days) => Some(store.get_recent_event_ids(days).map_err(|e| e.to_string())?),
        None => None,
    };
    let candidates = match (entity_ids, recent_ids) {
        (Some(a), Some(b)) => {
            let recent: std::collections::HashSet<String> = b.into_iter().collect();
            Some(a.into_iter().filter(|id| recent.contains(id)).collect())
        }
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    };

    let hits = scoped_search(
        store,
        gateway,
        query,
        EVENTS_TOP_K,
        vec![NodeType::Event, NodeType::Plan],
        candidates,
    )
    .await?;
    Ok(outcome_from_hits(hits, "No matching events"))
}

/// search_plans(query, entity_id?): plans with their scheduled dates
pub async fn search_plans(
    store: &Arc<Store>,
    gateway: &Arc<Gateway>,
    args: &serde_json::Value,
) -> Result<ToolOutcome, String> {
    let query = arg_str(args, "query").ok_or("search_plans requires a query")?;
    let candidates = match arg_str(args, "entity_id") {
        Some(entity_id) => Some(
            store
                .get_plans_by_entity(entity_id)
                .map_err(|e| e.to_string())?
                .into_iter()
                .map(|n| n.id)
                .collect(),
        ),
        None => None,
    };

    let hits = scoped_search(store, gateway, query, PLANS_TOP_K, vec![NodeType::Plan], candidates)
        .await?;
    if hits.is_empty() {
        return Ok(ToolOutcome::text_only("No matching plans"));
    }

    let text = hits
        .iter()
        .map(|hit| {
            let scheduled = hit
                .node
                .valid_from
                .map(|dt| dt.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| "unscheduled".to_string());
            format!("{} [scheduled: {}]", format_hit(hit), scheduled)
        })
        .collect::<Vec<_>>()
        .join("\n");
    let structured = hits
        .iter()
        .map(|h| Hit { node_id: h.node.id.clone(), score: h.score, cosine: h.cosine })
        .collect();
    Ok(ToolOutcome { text, hits: structured, ..Default::default() })
}

/// search_processes(query, entity_id?): instructions, top 10
pub async fn search_processes(
    store: &Arc<Store>,
    gateway: &Arc<Gateway>,
    args: &serde_json::Value,
) -> Result<ToolOutcome, String> {
    let query = arg_str(args, "query").ok_or("search_processes requires a query")?;
    let candidates = match arg_str(args, "entity_id") {
        Some(entity_id) => Some(
            store
                .get_instructions_by_entity(entity_id)
                .map_err(|e| e.to_string())?
                .into_iter()
                .map(|n| n.id)
                .collect(),
        ),
        None => None,
    };

    let hits = scoped_search(
        store,
        gateway,
        query,
        PROCESSES_TOP_K,
        vec![NodeType::Instruction],
        candidates,
    )
    .await?;
    Ok(outcome_from_hits(hits, "No matching processes"))
}

/// get_instructions(topic?, entity_id?): entity-scoped via edges, or
/// stem-matched by topic, or all instructions by salience
pub fn get_instructions(
    store: &Arc<Store>,
    args: &serde_json::Value,
) -> Result<ToolOutcome, String> {
    let instructions = match arg_str(args, "entity_id") {
        Some(entity_id) => store
            .get_instructions_by_entity(entity_id)
            .map_err(|e| e.to_string())?,
        None => store
            .get_instructions(arg_str(args, "topic"))
            .map_err(|e| e.to_string())?,
    };

    if instructions.is_empty() {
        return Ok(ToolOutcome::text_only("No matching instructions"));
    }

    let text = instructions
        .iter()
        .map(|node| {
            format!(
                "[{}] {} ({}, {:.1})",
                node.type_label(),
                node.content,
                node.id,
                node.salience
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    let hits = instructions
        .iter()
        .map(|node| Hit { node_id: node.id.clone(), score: 0.0, cosine: 0.0 })
        .collect();
    Ok(ToolOutcome { text, hits, ..Default::default() })
}

// ============================================================================
// TESTS
// ============================================================================
