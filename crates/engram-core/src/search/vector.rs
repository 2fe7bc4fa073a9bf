//! Brute-force vector search types and cosine math

use serde::{Deserialize, Serialize};

use crate::memory::{Node, NodeType};

// ============================================================================
// QUERY / RESULT TYPES
// ============================================================================

/// A vector search request
#[derive(Debug, Clone)]
pub struct VectorQuery {
    /// Query vector
    pub vector: Vec<f32>,
    /// Maximum results
    pub top_k: usize,
    /// Restrict to these node types
    pub node_types: Option<Vec<NodeType>>,
    /// Restrict to this candidate id set
    pub node_ids: Option<Vec<String>>,
}

impl VectorQuery {
    /// Unrestricted query
    pub fn new(vector: Vec<f32>, top_k: usize) -> Self {
        Self {
            vector,
            top_k,
            node_types: None,
            node_ids: None,
        }
    }

    pub fn with_types(mut self, node_types: Vec<NodeType>) -> Self {
        self.node_types = Some(node_types);
        self
    }

    pub fn with_ids(mut self, node_ids: Vec<String>) -> Self {
        self.node_ids = Some(node_ids);
        self
    }
}

/// A node with its search score
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredNode {
    pub node: Node,
    /// cosine x salience, the ranking score
    pub score: f32,
    /// Raw cosine similarity before the salience multiplier
    pub cosine: f32,
}

// ============================================================================
// VECTOR MATH
// ============================================================================

/// Compute cosine similarity between two vectors.
///
/// Mismatched lengths are compared over the shared prefix (real calls are
/// always same-dimension; this keeps a corrupt row from panicking the
/// search). Zero-norm vectors score 0.
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let len = a.len().min(b.len());
    if len == 0 {
        return 0.0;
    }

    let mut dot = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;

    for (x, y) in a[..len].iter().zip(b[..len].iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denominator = (norm_a * norm_b).sqrt();
    if denominator > 0.0 {
        dot / denominator
    } else {
        0.0
    }
}

/// Compute dot product between two vectors
#[inline]
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Encode a vector as a little-endian f32 blob for storage
pub fn vector_to_bytes(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Decode a little-endian f32 blob; trailing partial floats are dropped
pub fn vector_from_bytes(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================
