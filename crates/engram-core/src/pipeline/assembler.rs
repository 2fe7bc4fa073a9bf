//! Assembler
//!
//! Deduplicates everything the loops and safety nets surfaced, ranks by
//! salience x best-cosine-seen, and sections the survivors under per-
//! section caps. Plans whose date has passed are presented as events for
//! this turn's context.

use chrono::Utc;

use crate::memory::{Node, NodeType};
use crate::search::ScoredNode;
use crate::storage::{Relationship, Store, StoreError};
use crate::tools::Hit;

const ENTITY_CAP: usize = 15;
const RELATIONSHIPS_PER_ENTITY_CAP: usize = 8;
const INSTRUCTION_CAP: usize = 15;
const FACT_CAP: usize = 30;
const EVENT_CAP: usize = 15;
const PLAN_CAP: usize = 10;

/// A node with the best score seen for it across all sources
#[derive(Debug, Clone)]
pub struct RankedNode {
    pub node: Node,
    pub rank: f32,
}

/// An entity with its relationship lines
#[derive(Debug, Clone)]
pub struct EntityContext {
    pub entity: Node,
    pub relationships: Vec<Relationship>,
}

/// The sectioned context handed to the curator
#[derive(Debug, Clone, Default)]
pub struct AssembledContext {
    pub entities: Vec<EntityContext>,
    pub instructions: Vec<RankedNode>,
    pub facts: Vec<RankedNode>,
    pub events: Vec<RankedNode>,
    pub plans: Vec<RankedNode>,
}

impl AssembledContext {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
            && self.instructions.is_empty()
            && self.facts.is_empty()
            && self.events.is_empty()
            && self.plans.is_empty()
    }
}

/// Merge loop hits and safety-net results into the sectioned context
pub fn assemble(
    store: &Store,
    loop_hits: &[Hit],
    net_hits: Vec<ScoredNode>,
) -> Result<AssembledContext, StoreError> {
    // Best score and cosine per node id across every source
    let mut best: std::collections::HashMap<String, (f32, f32)> = std::collections::HashMap::new();
    let mut nodes: std::collections::HashMap<String, Node> = std::collections::HashMap::new();

    for hit in loop_hits {
        let entry = best.entry(hit.node_id.clone()).or_insert((0.0, 0.0));
        entry.0 = entry.0.max(hit.score);
        entry.1 = entry.1.max(hit.cosine);
    }
    for scored in net_hits {
        let entry = best.entry(scored.node.id.clone()).or_insert((0.0, 0.0));
        entry.0 = entry.0.max(scored.score);
        entry.1 = entry.1.max(scored.cosine);
        nodes.insert(scored.node.id.clone(), scored.node);
    }

    let mut ranked = Vec::new();
    for (id, (score, cosine)) in best {
        let node = match nodes.remove(&id) {
            Some(node) => node,
            None => match store.get_node(&id)? {
                Some(node) => node,
                None => continue,
            },
        };
        if node.is_superseded() {
            continue;
        }
        // Floored safety-net scores may exceed salience x cosine; the
        // higher of the two is the rank.
        let rank = (node.salience as f32 * cosine).max(score);
        ranked.push(RankedNode { node, rank });
    }

    ranked.sort_by(|a, b| b.rank.partial_cmp(&a.rank).unwrap_or(std::cmp::Ordering::Equal));

    let mut context = AssembledContext::default();
    let now = Utc::now();

    for ranked_node in ranked {
        match ranked_node.node.node_type {
            NodeType::Entity => {
                if context.entities.len() < ENTITY_CAP {
                    let mut relationships = store.get_relationships(&ranked_node.node.id)?;
                    relationships.truncate(RELATIONSHIPS_PER_ENTITY_CAP);
                    context.entities.push(EntityContext {
                        entity: ranked_node.node,
                        relationships,
                    });
                }
            }
            NodeType::Instruction => {
                if context.instructions.len() < INSTRUCTION_CAP {
                    context.instructions.push(ranked_node);
                }
            }
            NodeType::Fact | NodeType::Opinion => {
                if context.facts.len() < FACT_CAP {
                    context.facts.push(ranked_node);
                }
            }
            NodeType::Event => {
                if context.events.len() < EVENT_CAP {
                    context.events.push(ranked_node);
                }
            }
            NodeType::Plan => {
                // Past-due plans read as events in this turn's context
                let past_due = ranked_node
                    .node
                    .valid_from
                    .is_some_and(|scheduled| scheduled <= now);
                if past_due {
                    if context.events.len() < EVENT_CAP {
                        context.events.push(ranked_node);
                    }
                } else if context.plans.len() < PLAN_CAP {
                    context.plans.push(ranked_node);
                }
            }
        }
    }

    // Instructions: cosine-first ordering with scope as tiebreaker, so a
    // relevant narrow rule outranks an off-topic universal one
    context.instructions.sort_by(|a, b| {
        b.rank
            .partial_cmp(&a.rank)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(
                b.node
                    .scope
                    .unwrap_or(0.0)
                    .partial_cmp(&a.node.scope.unwrap_or(0.0))
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
    });

    // Plans surface soonest-first
    context.plans.sort_by_key(|p| p.node.valid_from);

    Ok(context)
}

// ============================================================================
// TESTS
// ============================================================================
