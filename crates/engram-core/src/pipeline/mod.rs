//! Memory pipeline
//!
//! Per prompt: classify, plan, run the retrieve and store loops
//! concurrently over the shared store, backstop with deterministic safety
//! nets, assemble and curate the context block, and reconcile any newly
//! stored instructions. No error escapes [`Pipeline::process_prompt`];
//! a failing stage is recorded in the trace and skipped.

pub mod assembler;
pub mod classifier;
pub mod curator;
mod loop_driver;
pub mod planner;
pub mod reconciler;
pub mod retrieve_loop;
pub mod safety_net;
pub mod store_loop;
mod trace;

pub use loop_driver::LoopOutcome;
pub use trace::{LoopKind, LoopTurn, ReconcileJudgement, Trace};

use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::gateway::Gateway;
use crate::storage::Store;
use crate::tools::ToolDispatcher;

/// What `process_prompt` hands back
#[derive(Debug)]
pub struct PromptOutcome {
    /// The curated context block; empty when nothing relevant survived
    pub context: String,
    /// Observability record; callers may discard it
    pub trace: Trace,
}

/// The memory pipeline, shared-nothing per prompt apart from the store
pub struct Pipeline {
    store: Arc<Store>,
    gateway: Arc<Gateway>,
    dispatcher: ToolDispatcher,
    config: Config,
}

impl Pipeline {
    pub fn new(store: Arc<Store>, gateway: Arc<Gateway>, config: Config) -> Self {
        let dispatcher = ToolDispatcher::new(store.clone(), gateway.clone());
        Self { store, gateway, dispatcher, config }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    /// Process one prompt: returns the curated context block and the
    /// trace. Always returns; partial failure degrades to whatever the
    /// remaining stages produced.
    pub async fn process_prompt(&self, prompt: &str) -> PromptOutcome {
        let mut trace = Trace::default();
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return PromptOutcome { context: String::new(), trace };
        }

        // L1: classification
        let extraction =
            classifier::classify(&self.gateway, &self.config.layer1_model, prompt).await;
        let operations = extraction.operations;
        trace.extraction = Some(extraction.clone());

        if !operations.retrieve && !operations.store {
            tracing::debug!("nothing to retrieve or store, skipping pipeline");
            trace.usage = Some(self.gateway.usage_report());
            return PromptOutcome { context: String::new(), trace };
        }

        // L1.5: search plan and storage filter, in parallel
        let plan_future = async {
            if operations.retrieve {
                Some(
                    planner::plan_retrieval(
                        &self.gateway,
                        &self.config.layer1_model,
                        prompt,
                        &extraction,
                    )
                    .await,
                )
            } else {
                None
            }
        };
        let filter_future = async {
            if operations.store {
                Some(
                    planner::filter_for_storage(
                        &self.gateway,
                        &self.config.layer1_model,
                        prompt,
                        &extraction,
                    )
                    .await,
                )
            } else {
                None
            }
        };
        let (plan_result, filter_result) = tokio::join!(plan_future, filter_future);

        let plan = match plan_result {
            Some(Ok(plan)) => plan,
            Some(Err(err)) => {
                trace.record_error("planner", err);
                String::new()
            }
            None => String::new(),
        };
        if !plan.is_empty() {
            trace.plan = Some(plan.clone());
        }
        let storage = match filter_result {
            Some(Ok(decision)) => decision,
            Some(Err(err)) => {
                trace.record_error("storage filter", err);
                planner::StorageDecision::default()
            }
            None => planner::StorageDecision::default(),
        };
        trace.store_items = storage.items.clone();
        trace.skip_reason = storage.skip_reason.clone();

        // L2: the two agent loops run concurrently on the shared store.
        // The retrieve loop must not assume it sees the store loop's
        // writes; fresh content surfaces on the next prompt.
        let timeout = Duration::from_millis(self.config.layer2_timeout_ms);
        let max_tool_calls = self.config.max_layer2_turns;
        let instruction_intent = extraction.has_intent("instruction");

        let retrieve_future = async {
            if operations.retrieve {
                Some(
                    retrieve_loop::run(
                        &self.gateway,
                        &self.dispatcher,
                        &self.config.layer2_model,
                        prompt,
                        &plan,
                        max_tool_calls,
                        timeout,
                    )
                    .await,
                )
            } else {
                None
            }
        };
        let store_future = async {
            if operations.store && !storage.items.is_empty() {
                Some(
                    store_loop::run(
                        &self.gateway,
                        &self.dispatcher,
                        &self.config.layer2_model,
                        prompt,
                        &storage.items,
                        instruction_intent,
                        max_tool_calls,
                        timeout,
                    )
                    .await,
                )
            } else {
                None
            }
        };
        let (retrieve_outcome, store_outcome) = tokio::join!(retrieve_future, store_future);

        let mut loop_hits = Vec::new();
        if let Some(outcome) = retrieve_outcome {
            loop_hits = outcome.hits;
            // Free text the model emitted instead of a tool call never
            // reaches the context: the return value is curator-chosen
            // record content only. Kept in the trace for observability.
            trace.supplementary = outcome.supplementary;
            trace.turns.extend(outcome.turns);
            trace.errors.extend(outcome.errors);
        }
        let mut stored_ids = Vec::new();
        if let Some(outcome) = store_outcome {
            // Store-loop searches contribute to assembly too
            loop_hits.extend(outcome.hits);
            stored_ids = outcome.stored_ids.clone();
            trace.stored_ids = outcome.stored_ids;
            trace.turns.extend(outcome.turns);
            trace.errors.extend(outcome.errors);
        }

        // Reconcile newly stored instructions against prior rules
        if !stored_ids.is_empty() {
            trace.reconcile = reconciler::reconcile(
                &self.store,
                &self.gateway,
                &self.config.layer2_model,
                &stored_ids,
            )
            .await;
        }

        // Deterministic safety nets
        let (prefetched, broad, globals) = tokio::join!(
            safety_net::instruction_prefetch(&self.store, &self.gateway, prompt),
            safety_net::broad_fallback(&self.store, &self.gateway, prompt),
            safety_net::global_instructions(&self.store, &self.gateway, prompt),
        );
        let mut net_hits = prefetched;
        net_hits.extend(broad);
        net_hits.extend(globals);

        // Assemble, then curate section by section
        let assembled = match assembler::assemble(&self.store, &loop_hits, net_hits) {
            Ok(assembled) => assembled,
            Err(err) => {
                trace.record_error("assembler", err);
                assembler::AssembledContext::default()
            }
        };

        let context = if assembled.is_empty() {
            String::new()
        } else {
            curator::curate(&self.gateway, &self.config.layer1_model, prompt, &assembled).await
        };

        trace.usage = Some(self.gateway.usage_report());
        PromptOutcome { context, trace }
    }
}
