//! Reconciler
//!
//! After the store loop, each newly stored instruction is judged pairwise
//! against its embedding-nearest live peers. A pair is either compatible,
//! an explicit replacement (the old rule is superseded), or a
//! contradiction (flagged for review, nothing altered).

use super::trace::ReconcileJudgement;
use crate::gateway::{ChatMessage, ChatRequest, Gateway};
use crate::memory::NodeType;
use crate::search::VectorQuery;
use crate::storage::Store;

/// Existing instructions compared against each new one
const CANDIDATE_COUNT: usize = 5;

const RECONCILE_SYSTEM: &str = r#"You compare a NEW standing instruction against one EXISTING instruction and answer with exactly one word:
NO_CONFLICT - different topics, or compatible rules.
SUPERSEDES - the new rule replaces the existing one. Phrasings like "taking over from", "instead of", "now handles", "from now on" signal replacement.
CONTRADICTION - same topic, conflicting rules, and no sign the new one is meant as a replacement."#;

/// Judge every (new instruction, nearby existing instruction) pair and
/// apply supersedes. Returns the judgements for the trace; contradictions
/// alter nothing.
pub async fn reconcile(
    store: &Store,
    gateway: &Gateway,
    model: &str,
    stored_ids: &[String],
) -> Vec<ReconcileJudgement> {
    let mut judgements = Vec::new();

    for new_id in stored_ids {
        let Ok(Some(new_node)) = store.get_node(new_id) else {
            continue;
        };
        if new_node.node_type != NodeType::Instruction || new_node.is_superseded() {
            continue;
        }
        let Ok(Some(vector)) = store.get_embedding(new_id) else {
            continue;
        };

        let candidates = match store.vector_search(
            &VectorQuery::new(vector, CANDIDATE_COUNT + 1)
                .with_types(vec![NodeType::Instruction]),
        ) {
            Ok(candidates) => candidates,
            Err(err) => {
                tracing::warn!(error = %err, "reconciler candidate search failed");
                continue;
            }
        };

        for candidate in candidates {
            if candidate.node.id == *new_id {
                continue;
            }

            let request = ChatRequest::new(
                model,
                vec![
                    ChatMessage::system(RECONCILE_SYSTEM),
                    ChatMessage::user(format!(
                        "NEW: {}\nEXISTING: {}",
                        new_node.content, candidate.node.content
                    )),
                ],
                "reconcile",
            )
            .with_max_tokens(20);

            let verdict = match gateway.chat(request).await {
                Ok(response) => parse_verdict(&response.content),
                Err(err) => {
                    tracing::warn!(error = %err, "reconciler call failed, skipping pair");
                    continue;
                }
            };

            let mut judgement = ReconcileJudgement {
                new_id: new_id.clone(),
                old_id: candidate.node.id.clone(),
                verdict: verdict.to_string(),
                replacement_id: None,
            };

            if verdict == "SUPERSEDES" {
                match store.supersede_node(&candidate.node.id, &new_node.content) {
                    Ok(replacement) => {
                        if let Err(err) = reembed(store, gateway, &replacement.id).await {
                            tracing::warn!(error = %err, "re-embed after reconcile supersede failed");
                        }
                        judgement.replacement_id = Some(replacement.id);
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, old_id = %candidate.node.id, "reconcile supersede failed");
                        judgement.verdict = format!("SUPERSEDES (failed: {err})");
                    }
                }
            }

            if judgement.verdict != "NO_CONFLICT" {
                if judgement.verdict == "CONTRADICTION" {
                    tracing::warn!(
                        new_id = %new_id,
                        old_id = %candidate.node.id,
                        "contradictory instructions flagged for review"
                    );
                }
                judgements.push(judgement);
            }
        }
    }

    judgements
}

async fn reembed(store: &Store, gateway: &Gateway, node_id: &str) -> Result<(), String> {
    let node = store
        .get_node(node_id)
        .map_err(|e| e.to_string())?
        .ok_or("replacement node missing")?;
    let vector = gateway
        .embed_document(&node.content)
        .await
        .map_err(|e| e.to_string())?;
    store
        .put_embedding(&node.id, node.node_type, &vector)
        .map_err(|e| e.to_string())
}

fn parse_verdict(response: &str) -> &'static str {
    let upper = response.to_uppercase();
    if upper.contains("SUPERSEDES") {
        "SUPERSEDES"
    } else if upper.contains("CONTRADICTION") {
        "CONTRADICTION"
    } else {
        "NO_CONFLICT"
    }
}
