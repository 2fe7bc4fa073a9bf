//! Store-set tool implementations
//!
//! `store_memory` is the only way new knowledge enters the graph: it
//! validates, creates the node, links edges, and writes the embedding.
//! `supersede_memory` replaces content while preserving history.

use std::sync::Arc;

use serde_json::json;

use super::{arg_f64, arg_str, arg_str_list, ToolOutcome};
use crate::gateway::Gateway;
use crate::memory::{
    check_content, check_scope, parse_plan_date, remap_subtype_as_type, NewNode, NodeType, Source,
};
use crate::storage::Store;

// ============================================================================
// SCHEMAS
// ============================================================================

pub fn store_memory_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "type": {
                "type": "string",
                "enum": ["entity", "fact", "event", "opinion", "instruction", "plan"],
                "description": "Kind of memory"
            },
            "content": { "type": "string", "description": "The memory, verbatim, with exact names, numbers and dates" },
            "subtype": { "type": "string", "description": "Optional refinement, e.g. person, definitional, rule, scheduled" },
            "valid_from": { "type": "string", "description": "Scheduled date for plans (YYYY-MM-DD or RFC3339); required for plans" },
            "entity_ids": { "type": "array", "items": { "type": "string" }, "description": "Entities this memory is about" },
            "edge_type": { "type": "string", "description": "Relationship label for the entity links (default: about)" },
            "salience": { "type": "number", "description": "Importance multiplier, default 1.0" },
            "scope": { "type": "number", "description": "Breadth of applicability in [0,1]" },
            "source": { "type": "string", "enum": ["user", "assistant"] },
            "related_ids": { "type": "array", "items": { "type": "string" }, "description": "Other memory ids to link with see_also" }
        },
        "required": ["type", "content"]
    })
}

pub fn supersede_memory_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "old_id": { "type": "string", "description": "Id of the outdated memory" },
            "new_content": { "type": "string", "description": "Corrected content, full sentence" }
        },
        "required": ["old_id", "new_content"]
    })
}

// ============================================================================
// TOOLS
// ============================================================================

/// store_memory: validate, create the node, link edges, write the embedding
pub async fn store_memory(
    store: &Arc<Store>,
    gateway: &Arc<Gateway>,
    args: &serde_json::Value,
) -> Result<ToolOutcome, String> {
    let type_raw = arg_str(args, "type").ok_or("store_memory requires a type")?;
    let content = arg_str(args, "content").ok_or("store_memory requires content")?;
    let mut subtype = arg_str(args, "subtype").map(String::from);

    // Callers sometimes put a subtype where the type goes; remap instead
    // of rejecting ("tool_usage" -> instruction/tool_usage, "scheduled" ->
    // plan/scheduled, ...).
    let node_type = match NodeType::parse_name(type_raw) {
        Some(node_type) => node_type,
        None => match remap_subtype_as_type(type_raw) {
            Some((node_type, implied_subtype)) => {
                if subtype.is_none() {
                    subtype = Some(implied_subtype.to_string());
                }
                node_type
            }
            None => return Err(format!("unknown memory type: {type_raw}")),
        },
    };

    check_content(content, node_type).map_err(|e| e.to_string())?;

    let scope = arg_f64(args, "scope");
    if let Some(scope) = scope {
        if !check_scope(scope) {
            return Err(format!("scope {scope} is outside [0, 1]"));
        }
    }

    let valid_from = match arg_str(args, "valid_from") {
        Some(raw) => Some(
            parse_plan_date(raw)
                .ok_or_else(|| format!("invalid valid_from date: {raw}"))?,
        ),
        None => None,
    };
    if node_type == NodeType::Plan && valid_from.is_none() {
        return Err("plans require a valid_from date".to_string());
    }

    // Embed first so a failed embedding never leaves a vectorless node
    let vector = gateway
        .embed_document(content)
        .await
        .map_err(|e| format!("embedding failed: {e}"))?;

    let node = store
        .create_node(NewNode {
            node_type,
            subtype,
            content: content.to_string(),
            salience: arg_f64(args, "salience").unwrap_or(1.0),
            confidence: 1.0,
            source: arg_str(args, "source").map(Source::parse_name).unwrap_or_default(),
            valid_from,
            valid_until: None,
            attributes: serde_json::Value::Null,
            can_summarize: node_type.summarizable(),
            scope,
        })
        .map_err(|e| e.to_string())?;
    store
        .put_embedding(&node.id, node_type, &vector)
        .map_err(|e| e.to_string())?;

    let edge_type = arg_str(args, "edge_type").unwrap_or("about");
    let mut entity_ids = arg_str_list(args, "entity_ids");
    let mut seen = std::collections::HashSet::new();
    entity_ids.retain(|id| seen.insert(id.clone()));

    let mut linked = 0usize;
    let mut skipped = Vec::new();
    for entity_id in &entity_ids {
        match store.create_edge(&node.id, entity_id, edge_type, None) {
            Ok(_) => linked += 1,
            Err(err) => {
                tracing::warn!(node_id = %node.id, %entity_id, error = %err, "entity link skipped");
                skipped.push(entity_id.clone());
            }
        }
    }
    for related_id in arg_str_list(args, "related_ids") {
        if let Err(err) = store.create_edge(&node.id, &related_id, "see_also", None) {
            tracing::warn!(node_id = %node.id, %related_id, error = %err, "see_also link skipped");
            skipped.push(related_id);
        }
    }

    let mut text = format!("Stored {} {}: {}", node_type, node.id, content);
    if linked > 0 {
        text.push_str(&format!(" (linked to {linked} entities)"));
    }
    if !skipped.is_empty() {
        text.push_str(&format!(" (skipped missing ids: {})", skipped.join(", ")));
    }

    Ok(ToolOutcome {
        text,
        hits: vec![],
        entity_ids: vec![],
        wrote: Some(node.id),
    })
}

/// supersede_memory: replace content via the store, then re-embed at the
/// node's actual type (the old id may name a promoted plan by now).
pub async fn supersede_memory(
    store: &Arc<Store>,
    gateway: &Arc<Gateway>,
    args: &serde_json::Value,
) -> Result<ToolOutcome, String> {
    let old_id = arg_str(args, "old_id").ok_or("supersede_memory requires old_id")?;
    let new_content = arg_str(args, "new_content").ok_or("supersede_memory requires new_content")?;

    let replacement = store
        .supersede_node(old_id, new_content)
        .map_err(|e| e.to_string())?;

    let vector = gateway
        .embed_document(new_content)
        .await
        .map_err(|e| format!("embedding failed: {e}"))?;
    store
        .put_embedding(&replacement.id, replacement.node_type, &vector)
        .map_err(|e| e.to_string())?;

    Ok(ToolOutcome {
        text: format!(
            "Superseded {} with {} {}: {}",
            old_id, replacement.node_type, replacement.id, new_content
        ),
        hits: vec![],
        entity_ids: vec![],
        wrote: Some(replacement.id),
    })
}
