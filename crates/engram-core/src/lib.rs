//! # Engram Core
//!
//! Graph-structured long-term memory engine for a conversational
//! assistant. On every user turn the pipeline:
//!
//! - **Extracts** structured knowledge from the raw prompt (typed
//!   entities, facts, events, opinions, instructions, plans)
//! - **Retrieves** a small relevance-ranked context from a persistent
//!   semantic graph through a bounded tool-calling loop, backstopped by
//!   deterministic embedding searches
//! - **Stores** new knowledge and reconciles it against what was already
//!   known, with at-most-one-live-version supersede chains
//!
//! The store is a single WAL-journaled SQLite database of typed nodes,
//! typed edges, and 1024-dimension embeddings searched brute-force by
//! cosine. The two external model services (a function-calling chat LLM
//! and an embedding service) are abstracted behind the [`gateway`]
//! traits.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use engram_core::{Config, Gateway, OpenAiCompatChat, Pipeline, Store, VoyageEmbed};
//!
//! let config = Config::from_env();
//! let store = Arc::new(Store::new(config.store_path.clone())?);
//! let gateway = Arc::new(Gateway::new(
//!     Arc::new(OpenAiCompatChat::new(&config.chat_base_url, &config.chat_api_key)),
//!     Arc::new(VoyageEmbed::new(&config.embed_api_key, &config.embedding_model)),
//! ));
//!
//! let pipeline = Pipeline::new(store, gateway, config);
//! let outcome = pipeline.process_prompt("Who is Peter?").await;
//! println!("{}", outcome.context);
//! ```

// ============================================================================
// MODULES
// ============================================================================

pub mod config;
pub mod gateway;
pub mod memory;
pub mod pipeline;
pub mod search;
pub mod storage;
pub mod tools;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

// Memory types
pub use memory::{Edge, NewNode, Node, NodeType, Source};

// Storage layer
pub use storage::{Relationship, Result, Store, StoreError};

// Search
pub use search::{cosine_similarity, ScoredNode, VectorQuery};

// Model gateway
pub use gateway::{
    ChatBackend, ChatMessage, ChatRequest, ChatResponse, ChatRole, EmbedBackend, Gateway,
    GatewayError, InputType, OpenAiCompatChat, ToolCall, Usage, UsageReport, VoyageEmbed,
    EMBEDDING_DIMENSIONS,
};

// Tools
pub use tools::{Hit, ToolDispatcher, ToolOutcome, ToolSet};

// Pipeline
pub use pipeline::{Pipeline, PromptOutcome, Trace};

// Configuration
pub use config::Config;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// PRELUDE
// ============================================================================

/// Convenient imports for common usage
pub mod prelude {
    pub use crate::{
        ChatBackend, Config, EmbedBackend, Gateway, NewNode, Node, NodeType, Pipeline,
        PromptOutcome, Result, Store, StoreError, Trace,
    };
}
