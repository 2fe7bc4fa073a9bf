//! Bounded tool-calling loop driver
//!
//! Shared engine of the retrieve and store loops. Termination contract:
//! the model calls `done`, the hard tool-call cap is reached, the
//! wall-clock budget elapses, three consecutive tool errors occur, or the
//! model stops calling tools after at least one success (its free text is
//! kept as supplementary context). A model that emits no tool call on its
//! very first turn gets exactly one nudge.

use std::time::{Duration, Instant};

use super::trace::{LoopKind, LoopTurn};
use crate::gateway::{ChatMessage, ChatRequest, Gateway};
use crate::tools::{Hit, ToolDispatcher, ToolSet};

/// Consecutive tool errors that force termination
const MAX_CONSECUTIVE_ERRORS: usize = 3;

/// The nudge sent when the model answers from its own knowledge instead
/// of searching
const NUDGE: &str = "You MUST use the search tools. Do not answer from your own knowledge.";

/// Accumulated results of one loop run
#[derive(Debug, Default)]
pub struct LoopOutcome {
    pub turns: Vec<LoopTurn>,
    /// Structured hits from every successful search call
    pub hits: Vec<Hit>,
    /// Entity ids surfaced by search_entity calls
    pub entity_ids: Vec<String>,
    /// Node ids written by store_memory / supersede_memory
    pub stored_ids: Vec<String>,
    /// Model free text returned instead of a tool call (after a success)
    pub supplementary: Option<String>,
    /// Whether the model terminated itself with done()
    pub done: bool,
    /// Internal errors worth recording in the trace
    pub errors: Vec<String>,
}

/// Run one bounded tool-calling loop to completion
#[allow(clippy::too_many_arguments)]
pub async fn run_tool_loop(
    gateway: &Gateway,
    dispatcher: &ToolDispatcher,
    set: ToolSet,
    kind: LoopKind,
    model: &str,
    system: String,
    user: String,
    max_tool_calls: usize,
    timeout: Duration,
) -> LoopOutcome {
    let started = Instant::now();
    let mut outcome = LoopOutcome::default();
    let mut messages = vec![ChatMessage::system(system), ChatMessage::user(user)];
    let tools = crate::tools::schemas(set);

    let mut tool_calls_made = 0usize;
    let mut consecutive_errors = 0usize;
    let mut any_success = false;
    let mut nudged = false;

    'outer: loop {
        let Some(remaining) = timeout.checked_sub(started.elapsed()) else {
            tracing::debug!(%kind, "loop wall clock exhausted");
            break;
        };

        let request = ChatRequest::new(model, messages.clone(), "l2")
            .with_tools(tools.clone());
        let response = match tokio::time::timeout(remaining, gateway.chat(request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                outcome.errors.push(format!("{kind} loop chat call failed: {err}"));
                break;
            }
            Err(_) => {
                tracing::debug!(%kind, "loop timed out mid-call");
                break;
            }
        };

        if response.tool_calls.is_empty() {
            if !any_success && !nudged {
                nudged = true;
                messages.push(ChatMessage::assistant(response.content));
                messages.push(ChatMessage::user(NUDGE));
                continue;
            }
            if any_success && !response.content.trim().is_empty() {
                outcome.supplementary = Some(response.content);
            }
            break;
        }

        let reasoning = if response.content.trim().is_empty() {
            None
        } else {
            Some(response.content.clone())
        };
        messages.push(ChatMessage::assistant_tool_calls(response.tool_calls.clone()));

        for call in &response.tool_calls {
            if call.name == "done" {
                outcome.done = true;
                outcome.turns.push(LoopTurn {
                    pipeline: kind,
                    tool: call.name.clone(),
                    args: serde_json::from_str(&call.arguments).unwrap_or(serde_json::json!({})),
                    result: "done".to_string(),
                    is_error: false,
                    reasoning: reasoning.clone(),
                });
                break 'outer;
            }

            if tool_calls_made >= max_tool_calls {
                tracing::debug!(%kind, "loop hit tool-call cap");
                break 'outer;
            }
            tool_calls_made += 1;

            let args: Result<serde_json::Value, _> = serde_json::from_str(&call.arguments);
            let (result_text, is_error) = match args {
                Err(parse_err) => {
                    consecutive_errors += 1;
                    (format!("error: invalid tool arguments: {parse_err}"), true)
                }
                Ok(args) => match dispatcher.dispatch(set, &call.name, &args).await {
                    Ok(tool_outcome) => {
                        consecutive_errors = 0;
                        any_success = true;
                        outcome.hits.extend(tool_outcome.hits.iter().cloned());
                        outcome.entity_ids.extend(tool_outcome.entity_ids.iter().cloned());
                        if let Some(written) = &tool_outcome.wrote {
                            outcome.stored_ids.push(written.clone());
                        }
                        (tool_outcome.model_text(), false)
                    }
                    Err(tool_err) => {
                        consecutive_errors += 1;
                        (format!("error: {tool_err}"), true)
                    }
                },
            };

            outcome.turns.push(LoopTurn {
                pipeline: kind,
                tool: call.name.clone(),
                args: serde_json::from_str(&call.arguments).unwrap_or(serde_json::json!({})),
                result: result_text.clone(),
                is_error,
                reasoning: reasoning.clone(),
            });
            messages.push(ChatMessage::tool_result(&call.id, result_text));

            if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                tracing::debug!(%kind, "loop stopped after consecutive tool errors");
                outcome
                    .errors
                    .push(format!("{kind} loop stopped after {consecutive_errors} consecutive tool errors"));
                break 'outer;
            }
        }
    }

    // Keep discovered entity ids unique, first-seen order
    let mut seen = std::collections::HashSet::new();
    outcome.entity_ids.retain(|id| seen.insert(id.clone()));
    outcome
}
