//! Loop termination and boundary behavior
//!
//! The bounded tool-calling loop must survive adversarial models: ones
//! that never call done, ones that send garbage arguments, and ones that
//! are simply slow. Tool results larger than the model boundary allows
//! are truncated with an explicit marker.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;

use engram_core::tools::TRUNCATION_MARKER;
use engram_core::{ChatBackend, ChatRequest, ChatResponse, GatewayError, ToolCall};
use engram_e2e_tests::harness::TestPipeline;
use engram_e2e_tests::mocks::*;

// ============================================================================
// TOOL-CALL CAP
// ============================================================================

#[tokio::test]
async fn adversarial_model_stops_at_tool_call_cap() {
    // A model that searches forever and never calls done
    let chat = MockChat::new(|request| {
        if is_classifier(request) {
            return text_response(retrieve_classification(&["Peter"], &["recall"]));
        }
        if is_planner(request) {
            return text_response("search until told to stop");
        }
        if is_retrieve_loop(request) {
            return tool_call_response(vec![tool_call(
                "search_facts",
                json!({ "query": "anything about Peter" }),
            )]);
        }
        if is_curator(request) {
            return echo_curator(request);
        }
        text_response("NO_CONFLICT")
    });

    let harness = TestPipeline::new(chat);
    harness.seed_entity("Peter");

    let outcome = harness.pipeline.process_prompt("Tell me about Peter").await;

    // Hard cap of 8 executed tool calls
    assert_eq!(outcome.trace.turns.len(), 8);
    assert!(outcome.trace.turns.iter().all(|t| t.tool == "search_facts"));
}

// ============================================================================
// CONSECUTIVE ERRORS
// ============================================================================

#[tokio::test]
async fn three_consecutive_tool_errors_terminate_the_loop() {
    // Arguments that are not JSON at all
    let chat = MockChat::new(|request| {
        if is_classifier(request) {
            return text_response(retrieve_classification(&["Peter"], &["recall"]));
        }
        if is_planner(request) {
            return text_response("search");
        }
        if is_retrieve_loop(request) {
            return Ok(ChatResponse {
                content: String::new(),
                tool_calls: vec![ToolCall {
                    id: "bad".to_string(),
                    name: "search_facts".to_string(),
                    arguments: "this is not json".to_string(),
                }],
                usage: None,
            });
        }
        if is_curator(request) {
            return echo_curator(request);
        }
        text_response("NO_CONFLICT")
    });

    let harness = TestPipeline::new(chat);
    let outcome = harness.pipeline.process_prompt("Tell me about Peter").await;

    assert_eq!(outcome.trace.turns.len(), 3);
    assert!(outcome.trace.turns.iter().all(|t| t.is_error));
    assert!(outcome
        .trace
        .errors
        .iter()
        .any(|e| e.contains("consecutive tool errors")));
}

// ============================================================================
// WALL-CLOCK TIMEOUT
// ============================================================================

/// A chat backend that answers slowly
struct SlowChat {
    inner: Arc<MockChat>,
    delay: Duration,
}

#[async_trait::async_trait]
impl ChatBackend for SlowChat {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, GatewayError> {
        if request.tag == "l2" {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.chat(request).await
    }
}

#[tokio::test]
async fn slow_adversarial_model_stops_at_wall_clock() {
    let inner = MockChat::new(|request| {
        if is_classifier(request) {
            return text_response(retrieve_classification(&["Peter"], &["recall"]));
        }
        if is_planner(request) {
            return text_response("search");
        }
        if is_retrieve_loop(request) {
            return tool_call_response(vec![tool_call(
                "search_facts",
                json!({ "query": "anything" }),
            )]);
        }
        if is_curator(request) {
            return echo_curator(request);
        }
        text_response("NO_CONFLICT")
    });
    let slow = Arc::new(SlowChat { inner, delay: Duration::from_millis(400) });

    let harness = TestPipeline::with_timeout(slow, 1_000);
    let started = Instant::now();
    let outcome = harness.pipeline.process_prompt("Tell me about Peter").await;

    // Terminated by the clock, well before the 8-call cap, returning
    // whatever partial turns were gathered
    assert!(outcome.trace.turns.len() < 8);
    assert!(started.elapsed() < Duration::from_secs(10));
}

// ============================================================================
// RESULT TRUNCATION
// ============================================================================

#[tokio::test]
async fn oversized_tool_results_are_truncated_with_marker() {
    let retrieve_step = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let chat = {
        let retrieve_step = retrieve_step.clone();
        MockChat::new(move |request| {
            if is_classifier(request) {
                return text_response(retrieve_classification(&[], &["process"]));
            }
            if is_planner(request) {
                return text_response("1. get_instructions()");
            }
            if is_retrieve_loop(request) {
                return match retrieve_step.fetch_add(1, std::sync::atomic::Ordering::SeqCst) {
                    0 => tool_call_response(vec![tool_call("get_instructions", json!({}))]),
                    _ => tool_call_response(vec![tool_call("done", json!({}))]),
                };
            }
            if is_curator(request) {
                return echo_curator(request);
            }
            text_response("NO_CONFLICT")
        })
    };

    let harness = TestPipeline::new(chat);
    // One instruction far larger than the 4,000-character model boundary
    let huge: String = (0..600)
        .map(|i| format!("escalation clause {i} requires notice "))
        .collect();
    harness.seed_instruction(&huge, 0.5);

    let outcome = harness.pipeline.process_prompt("What is the escalation process?").await;

    let instruction_turn = outcome
        .trace
        .turns
        .iter()
        .find(|t| t.tool == "get_instructions")
        .expect("get_instructions turn recorded");
    assert!(instruction_turn.result.contains(TRUNCATION_MARKER));
    // 4,000 characters plus the marker
    assert!(instruction_turn.result.chars().count() < 4_100);
}

// ============================================================================
// SUPPLEMENTARY FREE TEXT
// ============================================================================

#[tokio::test]
async fn free_text_after_a_success_never_reaches_the_context() {
    // After one successful search the model answers in prose instead of
    // calling done. That text is trace-only: with nothing assembled the
    // context must stay empty so the caller skips augmentation.
    let retrieve_step = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let chat = {
        let retrieve_step = retrieve_step.clone();
        MockChat::new(move |request| {
            if is_classifier(request) {
                return text_response(retrieve_classification(&["Peter"], &["recall"]));
            }
            if is_planner(request) {
                return text_response("1. search_facts(Peter)");
            }
            if is_retrieve_loop(request) {
                return match retrieve_step.fetch_add(1, std::sync::atomic::Ordering::SeqCst) {
                    0 => tool_call_response(vec![tool_call(
                        "search_facts",
                        json!({ "query": "anything about Peter" }),
                    )]),
                    _ => text_response("Peter is probably a famous physicist."),
                };
            }
            if is_curator(request) {
                return echo_curator(request);
            }
            text_response("NO_CONFLICT")
        })
    };

    // Empty store: the search succeeds but finds nothing, and the safety
    // nets have nothing to add
    let harness = TestPipeline::new(chat);
    let outcome = harness.pipeline.process_prompt("Who is Peter?").await;

    assert_eq!(outcome.context, "");
    assert_eq!(
        outcome.trace.supplementary.as_deref(),
        Some("Peter is probably a famous physicist.")
    );
}

// ============================================================================
// FIRST-TURN NUDGE
// ============================================================================

#[tokio::test]
async fn model_answering_from_memory_gets_one_nudge() {
    let retrieve_step = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let chat = {
        let retrieve_step = retrieve_step.clone();
        MockChat::new(move |request| {
            if is_classifier(request) {
                return text_response(retrieve_classification(&["Peter"], &["recall"]));
            }
            if is_planner(request) {
                return text_response("1. search_entity(Peter)");
            }
            if is_retrieve_loop(request) {
                return match retrieve_step.fetch_add(1, std::sync::atomic::Ordering::SeqCst) {
                    // First turn: answers from its own knowledge
                    0 => text_response("Peter is probably a common English name."),
                    // After the nudge it searches properly
                    1 => tool_call_response(vec![tool_call(
                        "search_entity",
                        json!({ "name": "Peter" }),
                    )]),
                    _ => tool_call_response(vec![tool_call("done", json!({}))]),
                };
            }
            if is_curator(request) {
                return echo_curator(request);
            }
            text_response("NO_CONFLICT")
        })
    };

    let harness = TestPipeline::new(chat);
    harness.seed_entity("Peter — senior content writer at WOBS");

    let outcome = harness.pipeline.process_prompt("Who is Peter?").await;

    // The nudge produced a real search on the second turn
    assert!(outcome.trace.turns.iter().any(|t| t.tool == "search_entity"));
    assert!(outcome.context.contains("WOBS"));
}
