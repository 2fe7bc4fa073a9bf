//! Retrieve loop (layer 2)
//!
//! Executes the layer-1.5 search plan with the retrieve tool set.

use std::time::Duration;

use super::loop_driver::{run_tool_loop, LoopOutcome};
use super::trace::LoopKind;
use crate::gateway::Gateway;
use crate::tools::{ToolDispatcher, ToolSet};

const RETRIEVE_SYSTEM: &str = r#"You retrieve relevant memories for a personal assistant using the provided search tools. Follow the search plan, adapting when a step returns nothing. Look up entities first to get their ids, then run the category searches the question needs. Call done() once you have gathered what the plan asked for. Use the tools; never answer from your own knowledge."#;

/// Run the retrieve loop over the prompt and plan
pub async fn run(
    gateway: &Gateway,
    dispatcher: &ToolDispatcher,
    model: &str,
    prompt: &str,
    plan: &str,
    max_tool_calls: usize,
    timeout: Duration,
) -> LoopOutcome {
    let user = if plan.trim().is_empty() {
        format!("User message:\n{prompt}")
    } else {
        format!("User message:\n{prompt}\n\nSearch plan:\n{plan}")
    };

    run_tool_loop(
        gateway,
        dispatcher,
        ToolSet::Retrieve,
        LoopKind::Retrieve,
        model,
        RETRIEVE_SYSTEM.to_string(),
        user,
        max_tool_calls,
        timeout,
    )
    .await
}
