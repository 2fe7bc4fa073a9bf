//! Pipeline trace
//!
//! Every run records what each stage saw and did. Callers may discard the
//! trace; the hook can dump it as JSON for the debug viewer.

use serde::{Deserialize, Serialize};

use super::classifier::Extraction;
use super::planner::StoreItem;
use crate::gateway::UsageReport;

/// Which agent loop a turn belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopKind {
    Retrieve,
    Store,
}

impl std::fmt::Display for LoopKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoopKind::Retrieve => write!(f, "retrieve"),
            LoopKind::Store => write!(f, "store"),
        }
    }
}

/// One captured tool-loop turn
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopTurn {
    pub pipeline: LoopKind,
    pub tool: String,
    pub args: serde_json::Value,
    /// Result text as fed back to the model, or the error string
    pub result: String,
    pub is_error: bool,
    /// Free-text reasoning the model emitted alongside the call
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

/// How the reconciler judged one instruction pair
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileJudgement {
    pub new_id: String,
    pub old_id: String,
    pub verdict: String,
    /// Replacement node id when the verdict applied a supersede
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replacement_id: Option<String>,
}

/// Full observability record of one `process_prompt` run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trace {
    /// L1 extraction record
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extraction: Option<Extraction>,
    /// L1.5 search plan, free text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<String>,
    /// L1.5 storage filter output
    pub store_items: Vec<StoreItem>,
    /// Why storage was skipped, when it was
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    /// Every tool-loop turn, both loops
    pub turns: Vec<LoopTurn>,
    /// Free text the retrieve loop returned instead of a tool call.
    /// Observability only; it never reaches the context block, which
    /// carries curator-approved record content exclusively.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supplementary: Option<String>,
    /// Nodes written this run
    pub stored_ids: Vec<String>,
    /// Reconciler verdicts; contradictions are surfaced here for review
    pub reconcile: Vec<ReconcileJudgement>,
    /// Internal errors that were swallowed (a stage skipped, not the run)
    pub errors: Vec<String>,
    /// Per-tag token accounting for this run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageReport>,
}

impl Trace {
    /// Pairs flagged as contradictions for user review
    pub fn contradictions(&self) -> Vec<&ReconcileJudgement> {
        self.reconcile
            .iter()
            .filter(|j| j.verdict == "CONTRADICTION")
            .collect()
    }

    pub(crate) fn record_error(&mut self, stage: &str, error: impl std::fmt::Display) {
        tracing::warn!(stage, %error, "pipeline stage error");
        self.errors.push(format!("{stage}: {error}"));
    }
}
