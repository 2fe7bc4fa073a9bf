//! Curator
//!
//! One parallel model call per non-empty section, each under a strict
//! copy-verbatim contract: keep the records that help answer the prompt
//! exactly as written, drop the rest, and emit the sentinel when nothing
//! qualifies. Per-section parallelism keeps any single pass from
//! under-weighting a category.

use super::assembler::AssembledContext;
use crate::gateway::{ChatMessage, ChatRequest, Gateway};

/// Literal sentinel a curator call emits when no record is relevant
pub const NO_RELEVANT_RECORDS: &str = "NO_RELEVANT_RECORDS";

const CURATE_SYSTEM: &str = r#"You filter memory records for relevance to a user's message. COPY the relevant records VERBATIM: preserve exact names, numbers, prices, and dates; never summarise, rephrase, or reorder words within a record. Omit whole records that do not help answer the message. Keep each kept record on its own line, without bullets. If nothing is relevant, output exactly NO_RELEVANT_RECORDS."#;

/// A section headed for curation
struct Section {
    header: &'static str,
    records: Vec<String>,
}

/// Render the assembled context into the section headers and record lines
fn sections(context: &AssembledContext) -> Vec<Section> {
    let mut sections = Vec::new();

    if !context.entities.is_empty() {
        let mut records = Vec::new();
        for entity_context in &context.entities {
            records.push(entity_context.entity.content.clone());
            for relationship in &entity_context.relationships {
                records.push(format!(
                    "{} → {} → {}",
                    entity_context.entity.content,
                    relationship.edge.edge_type,
                    relationship.other.content
                ));
            }
        }
        sections.push(Section { header: "People & things:", records });
    }
    if !context.instructions.is_empty() {
        sections.push(Section {
            header: "Instructions:",
            records: context.instructions.iter().map(|r| r.node.content.clone()).collect(),
        });
    }
    if !context.facts.is_empty() {
        sections.push(Section {
            header: "Facts:",
            records: context.facts.iter().map(|r| r.node.content.clone()).collect(),
        });
    }
    if !context.events.is_empty() {
        sections.push(Section {
            header: "Events:",
            records: context.events.iter().map(|r| r.node.content.clone()).collect(),
        });
    }
    if !context.plans.is_empty() {
        sections.push(Section {
            header: "Plans:",
            records: context
                .plans
                .iter()
                .map(|r| match r.node.valid_from {
                    Some(scheduled) => {
                        format!("{} (scheduled: {})", r.node.content, scheduled.format("%Y-%m-%d"))
                    }
                    None => r.node.content.clone(),
                })
                .collect(),
        });
    }

    sections
}

/// Curate every non-empty section in parallel and compose the final
/// context block. A curator call that fails keeps its section uncurated
/// rather than dropping it.
pub async fn curate(
    gateway: &Gateway,
    model: &str,
    prompt: &str,
    context: &AssembledContext,
) -> String {
    let sections = sections(context);
    if sections.is_empty() {
        return String::new();
    }

    let calls = sections.iter().map(|section| {
        let records = section.records.join("\n");
        let request = ChatRequest::new(
            model,
            vec![
                ChatMessage::system(CURATE_SYSTEM),
                ChatMessage::user(format!(
                    "User message:\n{prompt}\n\nRecords:\n{records}"
                )),
            ],
            "curate",
        )
        .with_max_tokens(1500);
        gateway.chat(request)
    });
    let results = futures::future::join_all(calls).await;

    let mut blocks = Vec::new();
    for (section, result) in sections.iter().zip(results) {
        let kept = match result {
            Ok(response) => {
                let content = response.content.trim().to_string();
                if content.contains(NO_RELEVANT_RECORDS) || content.is_empty() {
                    continue;
                }
                content
            }
            Err(err) => {
                tracing::warn!(section = section.header, error = %err, "curator call failed, keeping section uncurated");
                section.records.join("\n")
            }
        };

        let bulleted = kept
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| format!("- {}", line.trim().trim_start_matches("- ")))
            .collect::<Vec<_>>()
            .join("\n");
        blocks.push(format!("{}\n{}", section.header, bulleted));
    }

    blocks.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{NewNode, NodeType};
    use crate::pipeline::assembler::assemble;
    use crate::search::ScoredNode;
    use crate::storage::Store;
    use tempfile::TempDir;

    fn assembled() -> (AssembledContext, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Store::new(Some(dir.path().join("test.db"))).unwrap();
        let fact = store
            .create_node(NewNode::new(NodeType::Fact, "Peter writes content for WOBS"))
            .unwrap();
        let rule = store
            .create_node(NewNode::new(NodeType::Instruction, "Escalate late work through Lisa"))
            .unwrap();
        let context = assemble(
            &store,
            &[],
            vec![
                ScoredNode { node: fact, score: 0.9, cosine: 0.9 },
                ScoredNode { node: rule, score: 0.8, cosine: 0.8 },
            ],
        )
        .unwrap();
        (context, dir)
    }

    #[test]
    fn test_sections_render_in_order() {
        let (context, _dir) = assembled();
        let rendered = sections(&context);
        let headers: Vec<&str> = rendered.iter().map(|s| s.header).collect();
        assert_eq!(headers, vec!["Instructions:", "Facts:"]);
        assert_eq!(rendered[0].records, vec!["Escalate late work through Lisa"]);
    }

    #[test]
    fn test_empty_context_renders_nothing() {
        let context = AssembledContext::default();
        assert!(sections(&context).is_empty());
    }
}
