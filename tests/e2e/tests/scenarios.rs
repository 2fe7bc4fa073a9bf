//! End-to-end pipeline scenarios
//!
//! Each test wires a scripted chat backend to the real pipeline, store,
//! and mock embedder, then asserts on the returned context block and the
//! state of the graph.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use serde_json::json;

use engram_core::NodeType;
use engram_e2e_tests::harness::TestPipeline;
use engram_e2e_tests::mocks::*;

// ============================================================================
// 1. ENTITY LOOKUP
// ============================================================================

#[tokio::test]
async fn entity_lookup_returns_entity_context() {
    let retrieve_step = Arc::new(AtomicUsize::new(0));
    let chat = {
        let retrieve_step = retrieve_step.clone();
        MockChat::new(move |request| {
            if is_classifier(request) {
                return text_response(retrieve_classification(&["Peter"], &["information"]));
            }
            if is_planner(request) {
                return text_response("1. search_entity(Peter)\n2. done");
            }
            if is_retrieve_loop(request) {
                return match retrieve_step.fetch_add(1, Ordering::SeqCst) {
                    0 => tool_call_response(vec![tool_call(
                        "search_entity",
                        json!({ "name": "Peter" }),
                    )]),
                    _ => tool_call_response(vec![tool_call("done", json!({}))]),
                };
            }
            if is_curator(request) {
                return echo_curator(request);
            }
            panic!("unexpected request with tag {}", request.tag);
        })
    };

    let harness = TestPipeline::new(chat);
    harness.seed_entity("Peter — senior content writer at WOBS");

    let outcome = harness.pipeline.process_prompt("Who is Peter?").await;

    assert!(outcome.context.contains("content writer"), "context: {}", outcome.context);
    assert!(outcome.context.contains("WOBS"), "context: {}", outcome.context);
    assert!(outcome.context.contains("People & things:"));
    assert!(outcome.trace.turns.iter().any(|t| t.tool == "search_entity"));
}

// ============================================================================
// 2. RULE SURFACING WITHOUT EXPLICIT NAME
// ============================================================================

#[tokio::test]
async fn rule_surfaces_through_safety_nets() {
    // The retrieve loop finds nothing itself; the instruction pre-fetch
    // and global-instruction inject must still surface the rule.
    let chat = MockChat::new(move |request| {
        if is_classifier(request) {
            return text_response(retrieve_classification(&[], &["process"]));
        }
        if is_planner(request) {
            return text_response("1. get_instructions(deadline)");
        }
        if is_retrieve_loop(request) {
            return tool_call_response(vec![tool_call("done", json!({}))]);
        }
        if is_curator(request) {
            return echo_curator(request);
        }
        panic!("unexpected request with tag {}", request.tag);
    });

    let harness = TestPipeline::new(chat);
    harness.seed_instruction(
        "When a writer misses a deadline, immediately notify the client through Lisa \
         and offer expedited delivery within 24 hours.",
        0.9,
    );

    let outcome = harness
        .pipeline
        .process_prompt("What happens when a writer misses a deadline?")
        .await;

    assert!(outcome.context.contains("Lisa"), "context: {}", outcome.context);
    assert!(outcome.context.contains("24 hours"), "context: {}", outcome.context);
    assert!(outcome.context.contains("Instructions:"));
}

// ============================================================================
// 3. CORRECTION WITH SUPERSEDE
// ============================================================================

#[tokio::test]
async fn correction_supersedes_prior_fact() {
    let correction = "Actually, Peter moved to the marketing team. He no longer works on Anderson.";
    let new_fact = "Peter moved to the marketing team. He no longer works on Anderson.";

    let store_step = Arc::new(AtomicUsize::new(0));
    let chat = {
        let store_step = store_step.clone();
        let new_fact = new_fact.to_string();
        MockChat::new(move |request| {
            if is_classifier(request) {
                if last_message_text(request).contains("What team is Peter on now") {
                    return text_response(retrieve_classification(&["Peter"], &["recall"]));
                }
                return text_response(
                    json!({
                        "entities": [
                            { "name": "Peter", "type": "person", "ambiguous": false },
                            { "name": "Anderson", "type": "org", "ambiguous": false }
                        ],
                        "implied_facts": [new_fact.clone()],
                        "events": [], "plans": [], "opinions": [], "concepts": [],
                        "implied_processes": [],
                        "intents": ["correction"],
                        "operations": { "retrieve": true, "store": true }
                    })
                    .to_string(),
                );
            }
            if is_planner(request) {
                return text_response("1. search_entity(Peter)\n2. search_facts(Peter team)");
            }
            if is_storage_filter(request) {
                return text_response(
                    json!({
                        "items": [{
                            "content": new_fact.clone(),
                            "type": "fact",
                            "subtype": "definitional",
                            "reason": "correction of a stored fact"
                        }],
                        "skip_reason": null
                    })
                    .to_string(),
                );
            }
            if is_retrieve_loop(request) {
                return tool_call_response(vec![tool_call("done", json!({}))]);
            }
            if is_store_loop(request) {
                return match store_step.fetch_add(1, Ordering::SeqCst) {
                    0 => tool_call_response(vec![tool_call(
                        "search_facts",
                        json!({ "query": "Peter writes content for WOBS clients" }),
                    )]),
                    1 => {
                        let old_id = last_tool_result(request)
                            .and_then(first_id_in)
                            .expect("search_facts result should contain the fact id");
                        tool_call_response(vec![tool_call(
                            "supersede_memory",
                            json!({ "old_id": old_id, "new_content": new_fact.clone() }),
                        )])
                    }
                    _ => tool_call_response(vec![tool_call("done", json!({ "stored_count": 1 }))]),
                };
            }
            if is_curator(request) {
                return echo_curator(request);
            }
            panic!("unexpected request with tag {}", request.tag);
        })
    };

    let harness = TestPipeline::new(chat);
    let peter = harness.seed_entity("Peter");
    let old_fact = harness.seed_fact(
        "Peter writes content for WOBS clients, primarily Anderson and Meridian Health.",
        &[&peter],
    );

    let outcome = harness.pipeline.process_prompt(correction).await;

    let old = harness.store.get_node(&old_fact.id).unwrap().unwrap();
    let replacement_id = old.superseded_by.expect("old fact should be superseded");
    let replacement = harness.store.get_node(&replacement_id).unwrap().unwrap();
    assert!(replacement.content.contains("marketing team"));
    assert_eq!(outcome.trace.stored_ids, vec![replacement_id.clone()]);

    // The replacement keeps the entity link
    let facts = harness.store.get_facts_by_entity(&peter.id).unwrap();
    assert_eq!(facts.len(), 1);
    assert_eq!(facts[0].id, replacement_id);

    // A follow-up question now retrieves the corrected fact
    let followup = harness
        .pipeline
        .process_prompt("What team is Peter on now?")
        .await;
    assert!(followup.context.contains("marketing"), "context: {}", followup.context);
}

// ============================================================================
// 4. PLAN PROMOTION
// ============================================================================

#[tokio::test]
async fn plan_promotes_to_completed_event() {
    let chat = MockChat::new(|request| {
        panic!("promotion needs no model calls, got tag {}", request.tag)
    });
    let harness = TestPipeline::new(chat);

    let scheduled = Utc.with_ymd_and_hms(2024, 3, 3, 0, 0, 0).unwrap();
    let plan = harness.seed_plan("Dave is going on holiday March 3rd", scheduled);

    let promoted = harness.store.promote_plan_to_event(&plan.id).unwrap().unwrap();
    assert_eq!(promoted.id, plan.id);
    assert_eq!(promoted.node_type, NodeType::Event);
    assert_eq!(promoted.subtype.as_deref(), Some("completed_plan"));
    assert_eq!(
        harness.store.get_embedding_type(&plan.id).unwrap().as_deref(),
        Some("event")
    );

    // Idempotent
    let again = harness.store.promote_plan_to_event(&plan.id).unwrap().unwrap();
    assert_eq!(again.id, plan.id);
    assert_eq!(again.subtype.as_deref(), Some("completed_plan"));
}

// ============================================================================
// 5. TRIVIAL INPUT SKIP
// ============================================================================

#[tokio::test]
async fn trivial_input_returns_empty_and_writes_nothing() {
    let chat = MockChat::new(|request| {
        if is_classifier(request) {
            return text_response(empty_classification());
        }
        panic!("trivial input should stop after classification, got tag {}", request.tag);
    });

    let chat_handle = chat.clone();
    let harness = TestPipeline::new(chat);

    let outcome = harness.pipeline.process_prompt("ok thanks").await;

    assert_eq!(outcome.context, "");
    assert_eq!(harness.node_count(), 0);
    // One classifier call for one sentence, nothing else
    assert_eq!(chat_handle.calls(), 1);
    let extraction = outcome.trace.extraction.unwrap();
    assert!(extraction.is_empty());
}

// ============================================================================
// 6. PARALLEL ISOLATION
// ============================================================================

#[tokio::test]
async fn concurrent_loops_join_without_visibility_assumptions() {
    // Both loops run concurrently on the shared store. The retrieve side
    // may or may not observe the store side's write within this run; the
    // contract is only that the write is visible after the join.
    let retrieve_step = Arc::new(AtomicUsize::new(0));
    let store_step = Arc::new(AtomicUsize::new(0));
    let chat = {
        let retrieve_step = retrieve_step.clone();
        let store_step = store_step.clone();
        MockChat::new(move |request| {
            if is_classifier(request) {
                return text_response(
                    json!({
                        "entities": [{ "name": "Meridian Health", "type": "org", "ambiguous": false }],
                        "implied_facts": ["Meridian Health signed a retainer for four posts a month"],
                        "events": [], "plans": [], "opinions": [], "concepts": [],
                        "implied_processes": [],
                        "intents": ["information"],
                        "operations": { "retrieve": true, "store": true }
                    })
                    .to_string(),
                );
            }
            if is_planner(request) {
                return text_response("1. search_facts(Meridian Health retainer)");
            }
            if is_storage_filter(request) {
                return text_response(
                    json!({
                        "items": [{
                            "content": "Meridian Health signed a retainer for four posts a month",
                            "type": "fact"
                        }]
                    })
                    .to_string(),
                );
            }
            if is_retrieve_loop(request) {
                return match retrieve_step.fetch_add(1, Ordering::SeqCst) {
                    0 => tool_call_response(vec![tool_call(
                        "search_facts",
                        json!({ "query": "Meridian Health retainer" }),
                    )]),
                    _ => tool_call_response(vec![tool_call("done", json!({}))]),
                };
            }
            if is_store_loop(request) {
                return match store_step.fetch_add(1, Ordering::SeqCst) {
                    0 => tool_call_response(vec![tool_call(
                        "store_memory",
                        json!({
                            "type": "fact",
                            "content": "Meridian Health signed a retainer for four posts a month"
                        }),
                    )]),
                    _ => tool_call_response(vec![tool_call("done", json!({ "stored_count": 1 }))]),
                };
            }
            if is_curator(request) {
                return echo_curator(request);
            }
            text_response("NO_CONFLICT")
        })
    };

    let harness = TestPipeline::new(chat);
    let outcome = harness
        .pipeline
        .process_prompt("Meridian Health signed a retainer for four posts a month")
        .await;

    // The write is durable after the join
    assert_eq!(outcome.trace.stored_ids.len(), 1);
    let stored = harness
        .store
        .get_node(&outcome.trace.stored_ids[0])
        .unwrap()
        .unwrap();
    assert!(stored.content.contains("retainer"));
    assert!(harness.store.get_embedding(&stored.id).unwrap().is_some());

    // Both loops recorded turns
    use engram_core::pipeline::LoopKind;
    assert!(outcome.trace.turns.iter().any(|t| t.pipeline == LoopKind::Retrieve));
    assert!(outcome.trace.turns.iter().any(|t| t.pipeline == LoopKind::Store));
}

// ============================================================================
// PER-SENTENCE CLASSIFIER FALLBACK
// ============================================================================

#[tokio::test]
async fn unparseable_sentence_falls_back_without_dropping_its_content() {
    // Sentence one classifies normally; both attempts for sentence two
    // come back as garbage. The rule-based fallback must still extract
    // sentence two's capitalised names instead of dropping the sentence.
    let chat = MockChat::new(|request| {
        if is_classifier(request) {
            let sentence = last_message_text(request)
                .split("Classify this sentence:\n")
                .nth(1)
                .unwrap_or("");
            if sentence.contains("Anderson") {
                return text_response("sorry, no JSON today");
            }
            return text_response(retrieve_classification(&["Peter"], &["information"]));
        }
        if is_planner(request) {
            return text_response("1. search_entity(Peter)");
        }
        if is_retrieve_loop(request) {
            return tool_call_response(vec![tool_call("done", json!({}))]);
        }
        if is_curator(request) {
            return echo_curator(request);
        }
        text_response("NO_CONFLICT")
    });

    let chat_handle = chat.clone();
    let harness = TestPipeline::new(chat);
    let outcome = harness
        .pipeline
        .process_prompt("Peter moved to marketing. Send the brief to Anderson Corp tomorrow.")
        .await;

    let extraction = outcome.trace.extraction.unwrap();
    let names: Vec<String> = extraction
        .entities
        .iter()
        .map(|e| e.name.to_lowercase())
        .collect();
    assert!(names.contains(&"peter".to_string()), "entities: {names:?}");
    assert!(names.contains(&"anderson".to_string()), "entities: {names:?}");
    let anderson = extraction
        .entities
        .iter()
        .find(|e| e.name.eq_ignore_ascii_case("anderson"))
        .unwrap();
    assert!(anderson.ambiguous);

    // Sentence one classified on its first attempt; sentence two burned
    // both attempts before falling back. Three classifier calls, one
    // planner call, one loop turn (done), no curator on an empty store.
    assert_eq!(chat_handle.calls(), 5);
}

#[tokio::test]
async fn force_store_net_saves_items_the_loop_dropped() {
    // The store loop searches but never writes; the net must store the
    // item anyway, linked to the entity ids the loop discovered.
    let store_step = Arc::new(AtomicUsize::new(0));
    let chat = {
        let store_step = store_step.clone();
        MockChat::new(move |request| {
            if is_classifier(request) {
                return text_response(
                    json!({
                        "entities": [{ "name": "Peter", "type": "person", "ambiguous": false }],
                        "implied_facts": ["Peter prefers morning deadlines"],
                        "events": [], "plans": [], "opinions": [], "concepts": [],
                        "implied_processes": [],
                        "intents": ["information"],
                        "operations": { "retrieve": false, "store": true }
                    })
                    .to_string(),
                );
            }
            if is_storage_filter(request) {
                return text_response(
                    json!({
                        "items": [{ "content": "Peter prefers morning deadlines", "type": "fact" }]
                    })
                    .to_string(),
                );
            }
            if is_store_loop(request) {
                return match store_step.fetch_add(1, Ordering::SeqCst) {
                    0 => tool_call_response(vec![tool_call(
                        "search_entity",
                        json!({ "name": "Peter" }),
                    )]),
                    _ => tool_call_response(vec![tool_call("done", json!({ "stored_count": 0 }))]),
                };
            }
            if is_curator(request) {
                return echo_curator(request);
            }
            text_response("NO_CONFLICT")
        })
    };

    let harness = TestPipeline::new(chat);
    let peter = harness.seed_entity("Peter");

    let outcome = harness
        .pipeline
        .process_prompt("Peter prefers morning deadlines")
        .await;

    assert_eq!(outcome.trace.stored_ids.len(), 1);
    let stored = harness
        .store
        .get_node(&outcome.trace.stored_ids[0])
        .unwrap()
        .unwrap();
    assert_eq!(stored.content, "Peter prefers morning deadlines");

    // Linked to the entity discovered by the loop's search_entity turn
    let facts = harness.store.get_facts_by_entity(&peter.id).unwrap();
    assert_eq!(facts.len(), 1);
    assert_eq!(facts[0].id, stored.id);
}

// ============================================================================
// RECONCILER
// ============================================================================

#[tokio::test]
async fn new_rule_supersedes_old_rule_via_reconciler() {
    let new_rule = "Marcus now handles all client escalations, taking over from Lisa";
    let store_step = Arc::new(AtomicUsize::new(0));
    let chat = {
        let store_step = store_step.clone();
        let new_rule = new_rule.to_string();
        MockChat::new(move |request| {
            if is_classifier(request) {
                return text_response(
                    json!({
                        "entities": [
                            { "name": "Marcus", "type": "person", "ambiguous": false },
                            { "name": "Lisa", "type": "person", "ambiguous": false }
                        ],
                        "implied_facts": [], "events": [], "plans": [], "opinions": [],
                        "concepts": [], "implied_processes": [],
                        "intents": ["instruction"],
                        "operations": { "retrieve": false, "store": true }
                    })
                    .to_string(),
                );
            }
            if is_storage_filter(request) {
                return text_response(
                    json!({
                        "items": [{
                            "content": new_rule.clone(),
                            "type": "instruction",
                            "subtype": "rule",
                            "scope": 0.5,
                            "salience": 2.0
                        }]
                    })
                    .to_string(),
                );
            }
            if is_store_loop(request) {
                return match store_step.fetch_add(1, Ordering::SeqCst) {
                    0 => tool_call_response(vec![tool_call(
                        "store_memory",
                        json!({
                            "type": "instruction",
                            "subtype": "rule",
                            "content": new_rule.clone(),
                            "scope": 0.5,
                            "salience": 2.0
                        }),
                    )]),
                    _ => tool_call_response(vec![tool_call("done", json!({ "stored_count": 1 }))]),
                };
            }
            if is_reconciler(request) {
                let pair = last_message_text(request);
                // The Lisa escalation rule is replaced; anything else is fine
                if pair.contains("Lisa handles all client escalations") {
                    return text_response("SUPERSEDES");
                }
                return text_response("NO_CONFLICT");
            }
            if is_curator(request) {
                return echo_curator(request);
            }
            text_response("NO_CONFLICT")
        })
    };

    let harness = TestPipeline::new(chat);
    let old_rule = harness.seed_instruction("Lisa handles all client escalations", 0.5);
    harness.seed_instruction("Invoices go out on the first of the month", 0.5);

    let outcome = harness.pipeline.process_prompt(new_rule).await;

    let old = harness.store.get_node(&old_rule.id).unwrap().unwrap();
    let replacement_id = old.superseded_by.expect("old rule should be superseded");
    let replacement = harness.store.get_node(&replacement_id).unwrap().unwrap();
    assert!(replacement.content.contains("Marcus"));
    assert!(harness.store.get_embedding(&replacement_id).unwrap().is_some());

    let judgement = outcome
        .trace
        .reconcile
        .iter()
        .find(|j| j.old_id == old_rule.id)
        .expect("supersede judgement recorded");
    assert_eq!(judgement.verdict, "SUPERSEDES");
    assert!(outcome.trace.contradictions().is_empty());

    // The unrelated invoice rule was left alone
    let invoice_rules = harness.store.get_instructions(Some("invoices")).unwrap();
    assert_eq!(invoice_rules.len(), 1);
    assert!(!invoice_rules[0].is_superseded());
}
