//! Store loop (layer 2)
//!
//! Materializes the layer-1.5 StoreItem list with the store tool set,
//! then applies the force-store safety net if the model finished without
//! writing anything.

use std::time::Duration;

use serde_json::json;

use super::loop_driver::{run_tool_loop, LoopOutcome};
use super::planner::StoreItem;
use super::trace::{LoopKind, LoopTurn};
use crate::gateway::Gateway;
use crate::tools::{ToolDispatcher, ToolSet};

const STORE_SYSTEM: &str = r#"You save memories for a personal assistant using the provided tools. For each item below:
1. search_entity for every entity mentioned to obtain its id.
2. Create entities that do not exist yet with store_memory(type: "entity").
3. Store every item with store_memory, linking entity_ids, preserving exact numbers, dates, and the user's original wording.
4. For corrections, first search_facts for the outdated memory, then use supersede_memory instead of storing a duplicate.
Call done(stored_count) when every item is handled."#;

/// Default salience per item type, used by the force-store net
fn default_salience(item: &StoreItem, instruction_intent: bool) -> f64 {
    if let Some(salience) = item.salience {
        return salience;
    }
    match item.item_type.as_str() {
        "event" => 0.8,
        "opinion" => 0.6,
        "instruction" if instruction_intent => 2.0,
        _ => 1.0,
    }
}

/// Run the store loop over the item list
pub async fn run(
    gateway: &Gateway,
    dispatcher: &ToolDispatcher,
    model: &str,
    prompt: &str,
    items: &[StoreItem],
    instruction_intent: bool,
    max_tool_calls: usize,
    timeout: Duration,
) -> LoopOutcome {
    let rendered_items = items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let mut line = format!("{}. [{}] {}", index + 1, item.item_type, item.content);
            if let Some(valid_from) = &item.valid_from {
                line.push_str(&format!(" (scheduled: {valid_from})"));
            }
            if let Some(reason) = &item.reason {
                line.push_str(&format!(" — {reason}"));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n");

    let user = format!("User message:\n{prompt}\n\nItems to store:\n{rendered_items}");
    let mut outcome = run_tool_loop(
        gateway,
        dispatcher,
        ToolSet::Store,
        LoopKind::Store,
        model,
        STORE_SYSTEM.to_string(),
        user,
        max_tool_calls,
        timeout,
    )
    .await;

    // Force-store net: the loop ended without a single write but the
    // filter said there was something to keep.
    if outcome.stored_ids.is_empty() && !items.is_empty() {
        tracing::warn!("store loop wrote nothing; force-storing {} items", items.len());
        force_store(dispatcher, items, instruction_intent, &mut outcome).await;
    }

    outcome
}

/// Invoke the dispatcher directly for each item with sensible defaults,
/// linking whichever entity ids any search_entity turn discovered.
async fn force_store(
    dispatcher: &ToolDispatcher,
    items: &[StoreItem],
    instruction_intent: bool,
    outcome: &mut LoopOutcome,
) {
    for item in items {
        let mut args = json!({
            "type": item.item_type,
            "content": item.content,
            "salience": default_salience(item, instruction_intent),
            "entity_ids": outcome.entity_ids,
        });
        if let Some(subtype) = &item.subtype {
            args["subtype"] = json!(subtype);
        }
        if let Some(valid_from) = &item.valid_from {
            args["valid_from"] = json!(valid_from);
        }
        if let Some(scope) = item.scope {
            args["scope"] = json!(scope);
        }

        let (result, is_error) = match dispatcher.force_store(&args).await {
            Ok(tool_outcome) => {
                if let Some(written) = &tool_outcome.wrote {
                    outcome.stored_ids.push(written.clone());
                }
                (tool_outcome.text, false)
            }
            Err(err) => {
                tracing::warn!(error = %err, "force-store rejected an item");
                outcome.errors.push(format!("force-store: {err}"));
                (format!("error: {err}"), true)
            }
        };
        outcome.turns.push(LoopTurn {
            pipeline: LoopKind::Store,
            tool: "store_memory".to_string(),
            args,
            result,
            is_error,
            reasoning: Some("force-store safety net".to_string()),
        });
    }
}
