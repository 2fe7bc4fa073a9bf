//! Configuration
//!
//! Enumerated options with defaults, sourced from the environment. The
//! hook binary loads an optional dotfile into the environment before
//! calling [`Config::from_env`], so secrets never pass through here as
//! arguments.

use std::path::PathBuf;

/// Default chat model for every layer
pub const DEFAULT_CHAT_MODEL: &str = "openai/gpt-4o-mini";

/// Default embedding model
pub const DEFAULT_EMBEDDING_MODEL: &str = "voyage-4";

/// Default chat endpoint (OpenAI-compatible)
pub const DEFAULT_CHAT_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Runtime configuration for the pipeline
#[derive(Debug, Clone)]
pub struct Config {
    /// Model for classification and planning calls
    pub layer1_model: String,
    /// Model for the two tool-calling loops
    pub layer2_model: String,
    /// Fallback chat model for empty primary responses
    pub fallback_model: Option<String>,
    /// Embedding model id
    pub embedding_model: String,
    /// Embedding vector dimension
    pub embedding_dimension: usize,
    /// Hard cap on tool calls per agent loop
    pub max_layer2_turns: usize,
    /// Wall-clock cap per agent loop, in milliseconds
    pub layer2_timeout_ms: u64,
    /// On-disk database path; `None` uses the platform data directory
    pub store_path: Option<PathBuf>,
    /// Where to dump trace JSON, if anywhere
    pub debug_dir: Option<PathBuf>,
    /// Chat endpoint base URL
    pub chat_base_url: String,
    /// Chat API key
    pub chat_api_key: String,
    /// Embedding API key
    pub embed_api_key: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            layer1_model: DEFAULT_CHAT_MODEL.to_string(),
            layer2_model: DEFAULT_CHAT_MODEL.to_string(),
            fallback_model: None,
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            embedding_dimension: crate::gateway::EMBEDDING_DIMENSIONS,
            max_layer2_turns: 8,
            layer2_timeout_ms: 30_000,
            store_path: None,
            debug_dir: None,
            chat_base_url: DEFAULT_CHAT_BASE_URL.to_string(),
            chat_api_key: String::new(),
            embed_api_key: String::new(),
        }
    }
}

impl Config {
    /// Build a config from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            layer1_model: env_or("ENGRAM_LAYER1_MODEL", &defaults.layer1_model),
            layer2_model: env_or("ENGRAM_LAYER2_MODEL", &defaults.layer2_model),
            fallback_model: std::env::var("ENGRAM_FALLBACK_MODEL")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            embedding_model: env_or("ENGRAM_EMBEDDING_MODEL", &defaults.embedding_model),
            embedding_dimension: std::env::var("ENGRAM_EMBEDDING_DIMENSION")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.embedding_dimension),
            max_layer2_turns: std::env::var("ENGRAM_MAX_LAYER2_TURNS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_layer2_turns),
            layer2_timeout_ms: std::env::var("ENGRAM_LAYER2_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.layer2_timeout_ms),
            store_path: std::env::var("ENGRAM_STORE_PATH").ok().map(PathBuf::from),
            debug_dir: std::env::var("ENGRAM_DEBUG_DIR").ok().map(PathBuf::from),
            chat_base_url: env_or("ENGRAM_CHAT_BASE_URL", &defaults.chat_base_url),
            chat_api_key: std::env::var("ENGRAM_CHAT_API_KEY")
                .or_else(|_| std::env::var("OPENROUTER_API_KEY"))
                .unwrap_or_default(),
            embed_api_key: std::env::var("VOYAGE_API_KEY").unwrap_or_default(),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}
