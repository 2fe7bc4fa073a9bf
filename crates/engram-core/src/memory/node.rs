//! Memory node - the fundamental unit of the graph
//!
//! Each node is one remembered thing: an entity, a fact, an event, an
//! opinion, an instruction, or a plan. Nodes carry lifecycle metadata
//! (supersede chain, temporal validity) and ranking metadata (salience,
//! confidence, scope).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// NODE TYPES
// ============================================================================

/// Types of memory nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    /// A person, org, project, place, tool, or other named thing
    Entity,
    /// A discrete piece of information about an entity or the world
    #[default]
    Fact,
    /// Something that happened
    Event,
    /// A held view, preference, or judgement
    Opinion,
    /// A standing rule or process; preserved verbatim, never summarized
    Instruction,
    /// A dated intention; promoted to an event once its date passes
    Plan,
}

impl NodeType {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Entity => "entity",
            NodeType::Fact => "fact",
            NodeType::Event => "event",
            NodeType::Opinion => "opinion",
            NodeType::Instruction => "instruction",
            NodeType::Plan => "plan",
        }
    }

    /// Parse from string name
    pub fn parse_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "entity" => Some(NodeType::Entity),
            "fact" => Some(NodeType::Fact),
            "event" => Some(NodeType::Event),
            "opinion" => Some(NodeType::Opinion),
            "instruction" => Some(NodeType::Instruction),
            "plan" => Some(NodeType::Plan),
            _ => None,
        }
    }

    /// Permitted subtypes for this node type
    pub fn allowed_subtypes(&self) -> &'static [&'static str] {
        match self {
            NodeType::Entity => &[
                "person", "org", "project", "place", "tool", "process", "document", "concept",
                "event", "account",
            ],
            NodeType::Fact => &["definitional", "causal", "conditional", "comparative", "negation"],
            NodeType::Event => &[
                "action",
                "decision",
                "conversation",
                "incident",
                "outcome",
                "completed_plan",
            ],
            NodeType::Opinion => &[],
            NodeType::Instruction => &["instruction", "tool_usage", "rule", "process"],
            NodeType::Plan => &["scheduled", "intended", "requested"],
        }
    }

    /// Default scope when the caller leaves it unset
    pub fn default_scope(&self) -> Option<f64> {
        match self {
            NodeType::Instruction => Some(0.5),
            NodeType::Plan => Some(0.3),
            _ => None,
        }
    }

    /// Whether nodes of this type may ever be summarized.
    /// Instructions and plans must survive verbatim.
    pub fn summarizable(&self) -> bool {
        !matches!(self, NodeType::Instruction | NodeType::Plan)
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Resolve a `type` string that is actually a subtype the caller misrouted,
/// e.g. `tool_usage` arriving as the type of an instruction. Returns the
/// corrected (type, subtype) pair when the string names a known subtype.
pub fn remap_subtype_as_type(s: &str) -> Option<(NodeType, &'static str)> {
    let lowered = s.to_lowercase();
    for node_type in [
        NodeType::Entity,
        NodeType::Fact,
        NodeType::Event,
        NodeType::Instruction,
        NodeType::Plan,
    ] {
        if let Some(subtype) = node_type
            .allowed_subtypes()
            .iter()
            .find(|sub| **sub == lowered)
            .copied()
        {
            return Some((node_type, subtype));
        }
    }
    None
}

// ============================================================================
// SOURCE
// ============================================================================

/// Who the memory came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    #[default]
    User,
    Assistant,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::User => "user",
            Source::Assistant => "assistant",
        }
    }

    pub fn parse_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "assistant" => Source::Assistant,
            _ => Source::User,
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// NODE
// ============================================================================

/// A node in the memory graph
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Unique identifier (UUID v4)
    pub id: String,
    /// Type of memory
    pub node_type: NodeType,
    /// Optional refinement of the type
    pub subtype: Option<String>,
    /// The memory itself, human-readable
    pub content: String,
    /// Non-negative relevance multiplier applied to similarity scores
    pub salience: f64,
    /// Confidence in [0, 1]
    pub confidence: f64,
    /// Who the memory came from
    pub source: Source,
    /// When the node was created
    pub created_at: DateTime<Utc>,
    /// When this knowledge became valid (the scheduled date for plans)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_from: Option<DateTime<Utc>>,
    /// When this knowledge stops being valid
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<DateTime<Utc>>,
    /// Id of the node that replaced this one, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<String>,
    /// Small structured bag of auxiliary data (aliases, etc.)
    pub attributes: serde_json::Value,
    /// Whether this node may be summarized (always false for instruction/plan)
    pub can_summarize: bool,
    /// Breadth of applicability in [0, 1]; 1.0 universal, ≤0.3 entity-specific
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<f64>,
}

impl Node {
    /// Whether this node has been replaced by a newer version
    pub fn is_superseded(&self) -> bool {
        self.superseded_by.is_some()
    }

    /// Alias list pulled from the attributes bag
    pub fn aliases(&self) -> Vec<String> {
        self.attributes
            .get("aliases")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// A `type/subtype` label for tool-result formatting
    pub fn type_label(&self) -> String {
        match &self.subtype {
            Some(sub) => format!("{}/{}", self.node_type, sub),
            None => self.node_type.to_string(),
        }
    }
}

// ============================================================================
// INPUT TYPE
// ============================================================================

/// Input for creating a node; id and created_at are assigned by the store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewNode {
    pub node_type: NodeType,
    #[serde(default)]
    pub subtype: Option<String>,
    pub content: String,
    #[serde(default = "default_weight")]
    pub salience: f64,
    #[serde(default = "default_weight")]
    pub confidence: f64,
    #[serde(default)]
    pub source: Source,
    #[serde(default)]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub valid_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attributes: serde_json::Value,
    /// Ignored for instruction and plan nodes, which are always preserved verbatim
    #[serde(default)]
    pub can_summarize: bool,
    #[serde(default)]
    pub scope: Option<f64>,
}

fn default_weight() -> f64 {
    1.0
}

impl NewNode {
    /// A minimal input with defaults for everything but type and content
    pub fn new(node_type: NodeType, content: impl Into<String>) -> Self {
        Self {
            node_type,
            subtype: None,
            content: content.into(),
            salience: 1.0,
            confidence: 1.0,
            source: Source::User,
            valid_from: None,
            valid_until: None,
            attributes: serde_json::Value::Null,
            can_summarize: false,
            scope: None,
        }
    }

    pub fn with_subtype(mut self, subtype: impl Into<String>) -> Self {
        self.subtype = Some(subtype.into());
        self
    }

    pub fn with_salience(mut self, salience: f64) -> Self {
        self.salience = salience;
        self
    }

    pub fn with_scope(mut self, scope: f64) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn with_valid_from(mut self, valid_from: DateTime<Utc>) -> Self {
        self.valid_from = Some(valid_from);
        self
    }
}

// ============================================================================
// EDGE
// ============================================================================

/// A directed, typed link between two nodes
///
/// Edges are additive: they are never superseded individually, and
/// `see_also` links may form cycles.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    /// Unique edge id (UUID v4)
    pub id: String,
    /// Source node id
    pub source_id: String,
    /// Target node id
    pub target_id: String,
    /// Free-form relationship label (`about`, `works_for`, `see_also`, ...)
    pub edge_type: String,
    /// Optional attributes bag
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<serde_json::Value>,
    /// When the edge was created
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// TESTS
// ============================================================================
