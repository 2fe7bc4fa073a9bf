//! Similarity search primitives
//!
//! Cosine math over f32 vectors plus the query/result types for the
//! brute-force embedding search in [`crate::storage::Store::vector_search`].
//! There is no approximate index; the store is personal-scale and a full
//! scan over the embeddings table is the whole algorithm.

mod vector;

pub use vector::{
    cosine_similarity, dot_product, vector_from_bytes, vector_to_bytes, ScoredNode, VectorQuery,
};
