//! Classifier (layer 1)
//!
//! Parses a raw prompt into a typed extraction record with one model call
//! per sentence, the full prompt provided as context for pronoun
//! resolution. A sentence that fails to parse retries once warmer, then
//! falls back to rule-based extraction on its own, so the pipeline never
//! starts blind and a partial failure never drops a sentence.

use serde::{Deserialize, Serialize};

use crate::gateway::{ChatMessage, ChatRequest, Gateway};

/// The closed intent set
pub const INTENTS: [&str; 12] = [
    "action",
    "information",
    "status",
    "process",
    "recall",
    "comparison",
    "verification",
    "instruction",
    "correction",
    "opinion",
    "planning",
    "delegation",
];

/// Intents that force `retrieve = true`
const RETRIEVE_INTENTS: [&str; 10] = [
    "action",
    "information",
    "status",
    "process",
    "recall",
    "comparison",
    "verification",
    "opinion",
    "planning",
    "delegation",
];

/// Sentence-final abbreviations that must not split
const ABBREVIATIONS: [&str; 12] = [
    "e.g.", "i.e.", "etc.", "mr.", "mrs.", "ms.", "dr.", "vs.", "st.", "jr.", "sr.", "no.",
];

// ============================================================================
// EXTRACTION RECORD
// ============================================================================

/// An entity mentioned in the prompt
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityMention {
    pub name: String,
    #[serde(rename = "type", default)]
    pub entity_type: String,
    #[serde(default)]
    pub ambiguous: bool,
}

/// Which pipeline halves should run
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Operations {
    #[serde(default)]
    pub retrieve: bool,
    #[serde(default)]
    pub store: bool,
}

/// The typed record the classifier produces
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Extraction {
    #[serde(default)]
    pub entities: Vec<EntityMention>,
    #[serde(default)]
    pub implied_facts: Vec<String>,
    #[serde(default)]
    pub events: Vec<String>,
    #[serde(default)]
    pub plans: Vec<String>,
    #[serde(default)]
    pub opinions: Vec<String>,
    #[serde(default)]
    pub concepts: Vec<String>,
    #[serde(default)]
    pub implied_processes: Vec<String>,
    #[serde(default)]
    pub intents: Vec<String>,
    #[serde(default)]
    pub operations: Operations,
}

impl Extraction {
    pub fn has_intent(&self, intent: &str) -> bool {
        self.intents.iter().any(|i| i.eq_ignore_ascii_case(intent))
    }

    /// Nothing extracted at all: the trivial-input case
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
            && self.implied_facts.is_empty()
            && self.events.is_empty()
            && self.plans.is_empty()
            && self.opinions.is_empty()
            && self.concepts.is_empty()
            && self.implied_processes.is_empty()
    }
}

// ============================================================================
// JSON EXTRACTION
// ============================================================================

/// Pull the first JSON value out of a model reply: a fenced ```json block
/// first, then a bare first-'{' to last-'}' span.
pub(crate) fn extract_json<T: serde::de::DeserializeOwned>(response: &str) -> Option<T> {
    if let Some(fence_start) = response.find("```json") {
        let after_fence = &response[fence_start + "```json".len()..];
        if let Some(fence_end) = after_fence.find("```") {
            if let Ok(value) = serde_json::from_str(after_fence[..fence_end].trim()) {
                return Some(value);
            }
        }
    }

    let trimmed = response.trim();
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if end > start {
            if let Ok(value) = serde_json::from_str(&trimmed[start..=end]) {
                return Some(value);
            }
        }
    }

    None
}

// ============================================================================
// SENTENCE SPLITTING
// ============================================================================

/// Split a prompt on sentence punctuation, protecting abbreviations
pub fn split_sentences(prompt: &str) -> Vec<String> {
    // Shield abbreviation periods with a placeholder before splitting.
    // Offsets into the lowercased copy are only valid while the byte
    // lengths agree; the rare scripts where lowercasing changes length
    // just skip the shielding.
    let mut shielded = prompt.to_string();
    let lowered = prompt.to_lowercase();
    let mut replacements = Vec::new();
    let abbreviations: &[&str] = if lowered.len() == prompt.len() { &ABBREVIATIONS } else { &[] };
    for &abbreviation in abbreviations {
        let mut from = 0;
        while let Some(pos) = lowered[from..].find(abbreviation) {
            let absolute = from + pos;
            // Word boundary: "piano." must not match "no."
            let at_boundary = absolute == 0
                || lowered[..absolute]
                    .chars()
                    .next_back()
                    .is_some_and(|c| !c.is_alphanumeric());
            if at_boundary {
                replacements.push((absolute, abbreviation.len()));
            }
            from = absolute + abbreviation.len();
        }
    }
    // Apply from the end so offsets stay valid
    replacements.sort_by(|a, b| b.0.cmp(&a.0));
    for (start, len) in replacements {
        let original = &prompt[start..start + len];
        shielded.replace_range(start..start + len, &original.replace('.', "\u{1}"));
    }

    let mut sentences = Vec::new();
    let mut current = String::new();
    for c in shielded.chars() {
        current.push(c);
        if matches!(c, '.' | '!' | '?') {
            let sentence = current.trim().replace('\u{1}', ".");
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            current.clear();
        }
    }
    let tail = current.trim().replace('\u{1}', ".");
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

// ============================================================================
// CLASSIFICATION
// ============================================================================

const CLASSIFY_SYSTEM: &str = r#"You classify one sentence of a user's message for a personal memory system. Respond with STRICT JSON only, no prose, of this exact shape:
{
  "entities": [{"name": "...", "type": "person|org|project|place|tool|process|document|concept|event|account", "ambiguous": false}],
  "implied_facts": ["..."],
  "events": ["..."],
  "plans": ["..."],
  "opinions": ["..."],
  "concepts": ["..."],
  "implied_processes": ["..."],
  "intents": ["action|information|status|process|recall|comparison|verification|instruction|correction|opinion|planning|delegation"],
  "operations": {"retrieve": true, "store": false}
}
Rules:
- retrieve is true for intents action, information, status, process, recall, comparison, verification, opinion, planning, delegation, and whenever the sentence mentions an entity or asks a question.
- store is true for intents instruction and correction; correction sets BOTH retrieve and store.
- store is true when the sentence states new factual content or a dated plan.
- Greetings, acknowledgements and small talk extract nothing: empty arrays, retrieve false, store false."#;

/// Classify a full prompt: split into sentences, classify each in
/// parallel with the full prompt as context, merge, and re-enforce the
/// operation derivation rules. Each sentence whose two attempts both
/// fail to parse falls back to rule-based extraction individually, so a
/// partial failure never drops that sentence's content.
pub async fn classify(gateway: &Gateway, model: &str, prompt: &str) -> Extraction {
    let sentences = split_sentences(prompt);
    if sentences.is_empty() {
        return Extraction::default();
    }

    let calls = sentences
        .iter()
        .map(|sentence| classify_sentence(gateway, model, sentence, prompt));
    let results = futures::future::join_all(calls).await;

    let mut parsed = Vec::new();
    for (sentence, result) in sentences.iter().zip(results) {
        match result {
            Some(extraction) => parsed.push(extraction),
            None => {
                tracing::warn!(%sentence, "classifier parse failed, using rule-based fallback");
                parsed.push(fallback_extract(sentence));
            }
        }
    }

    let mut merged = merge(parsed);
    enforce_operations(&mut merged, prompt);
    merged
}

/// One sentence, one retry at higher temperature
async fn classify_sentence(
    gateway: &Gateway,
    model: &str,
    sentence: &str,
    full_prompt: &str,
) -> Option<Extraction> {
    for temperature in [0.0_f32, 0.3] {
        let request = ChatRequest::new(
            model,
            vec![
                ChatMessage::system(CLASSIFY_SYSTEM),
                ChatMessage::user(format!(
                    "Full message (context for pronouns):\n{full_prompt}\n\nClassify this sentence:\n{sentence}"
                )),
            ],
            "l1",
        )
        .with_temperature(temperature)
        .with_max_tokens(800);

        match gateway.chat(request).await {
            Ok(response) => {
                if let Some(extraction) = extract_json::<Extraction>(&response.content) {
                    return Some(extraction);
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "classifier call failed");
                return None;
            }
        }
    }
    None
}

/// Merge per-sentence records: entities deduped by lowercased name,
/// string arrays concatenated, concepts and intents set-unioned,
/// operations OR-ed.
pub fn merge(extractions: Vec<Extraction>) -> Extraction {
    let mut merged = Extraction::default();
    let mut seen_entities = std::collections::HashSet::new();
    let mut seen_concepts = std::collections::HashSet::new();
    let mut seen_intents = std::collections::HashSet::new();

    for extraction in extractions {
        for entity in extraction.entities {
            if seen_entities.insert(entity.name.to_lowercase()) {
                merged.entities.push(entity);
            }
        }
        merged.implied_facts.extend(extraction.implied_facts);
        merged.events.extend(extraction.events);
        merged.plans.extend(extraction.plans);
        merged.opinions.extend(extraction.opinions);
        merged.implied_processes.extend(extraction.implied_processes);
        for concept in extraction.concepts {
            if seen_concepts.insert(concept.to_lowercase()) {
                merged.concepts.push(concept);
            }
        }
        for intent in extraction.intents {
            if seen_intents.insert(intent.to_lowercase()) {
                merged.intents.push(intent);
            }
        }
        merged.operations.retrieve |= extraction.operations.retrieve;
        merged.operations.store |= extraction.operations.store;
    }
    merged
}

/// Re-enforce the derivation rules after the model's own answer
fn enforce_operations(extraction: &mut Extraction, prompt: &str) {
    for intent in RETRIEVE_INTENTS {
        if extraction.has_intent(intent) {
            extraction.operations.retrieve = true;
        }
    }
    if !extraction.entities.is_empty() || prompt.contains('?') {
        extraction.operations.retrieve = true;
    }
    if extraction.has_intent("instruction") {
        extraction.operations.store = true;
    }
    if extraction.has_intent("correction") {
        extraction.operations.store = true;
        extraction.operations.retrieve = true;
    }
    if !extraction.implied_facts.is_empty() || !extraction.plans.is_empty() {
        extraction.operations.store = true;
    }
}

/// Rule-based fallback when the model never yields valid JSON:
/// capitalised words that do not start a sentence become ambiguous
/// concept entities.
pub fn fallback_extract(prompt: &str) -> Extraction {
    let mut entities = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for sentence in split_sentences(prompt) {
        for (index, word) in sentence.split_whitespace().enumerate() {
            let cleaned: String = word
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_string();
            if index == 0 || cleaned.len() < 2 {
                continue;
            }
            if cleaned.chars().next().is_some_and(|c| c.is_uppercase())
                && seen.insert(cleaned.to_lowercase())
            {
                entities.push(EntityMention {
                    name: cleaned,
                    entity_type: "concept".to_string(),
                    ambiguous: true,
                });
            }
        }
    }

    Extraction {
        entities,
        intents: vec!["information".to_string()],
        operations: Operations { retrieve: true, store: false },
        ..Default::default()
    }
}

// ============================================================================
// TESTS
// ============================================================================
