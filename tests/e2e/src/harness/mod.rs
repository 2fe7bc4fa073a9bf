//! Test pipeline harness
//!
//! Builds an isolated pipeline over a temp-directory database and the
//! mock backends, with seeding helpers whose embeddings match what the
//! mock embedder would produce for the same text.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tempfile::TempDir;

use engram_core::{
    ChatBackend, Config, Gateway, NewNode, Node, NodeType, Pipeline, Store,
};

use crate::mocks::{bow_vector, MockEmbed, MOCK_DIMENSION};

/// An isolated pipeline plus direct store access for assertions
pub struct TestPipeline {
    pub pipeline: Pipeline,
    pub store: Arc<Store>,
    /// Kept alive so the database directory survives the test
    _temp_dir: TempDir,
}

impl TestPipeline {
    /// Build a pipeline around the given chat backend and the mock
    /// embedder. Loop budgets are tightened so failure-path tests finish
    /// quickly.
    pub fn new(chat: Arc<dyn ChatBackend>) -> Self {
        Self::with_timeout(chat, 5_000)
    }

    /// Same, with an explicit loop wall-clock budget
    pub fn with_timeout(chat: Arc<dyn ChatBackend>, layer2_timeout_ms: u64) -> Self {
        let temp_dir = TempDir::new().expect("temp dir");
        let store = Arc::new(
            Store::new(Some(temp_dir.path().join("engram-test.db"))).expect("test store"),
        );
        let gateway = Arc::new(
            Gateway::new(chat, Arc::new(MockEmbed)).with_dimension(MOCK_DIMENSION),
        );
        let config = Config {
            layer2_timeout_ms,
            embedding_dimension: MOCK_DIMENSION,
            ..Config::default()
        };
        let pipeline = Pipeline::new(store.clone(), gateway, config);
        Self { pipeline, store, _temp_dir: temp_dir }
    }

    /// Seed a node with an embedding matching the mock embedder's output
    pub fn seed(&self, input: NewNode) -> Node {
        let node_type = input.node_type;
        let content = input.content.clone();
        let node = self.store.create_node(input).expect("seed node");
        self.store
            .put_embedding(&node.id, node_type, &bow_vector(&content, MOCK_DIMENSION))
            .expect("seed embedding");
        node
    }

    pub fn seed_entity(&self, content: &str) -> Node {
        self.seed(NewNode::new(NodeType::Entity, content).with_subtype("person"))
    }

    pub fn seed_fact(&self, content: &str, about: &[&Node]) -> Node {
        let fact = self.seed(NewNode::new(NodeType::Fact, content).with_subtype("definitional"));
        for entity in about {
            self.store
                .create_edge(&fact.id, &entity.id, "about", None)
                .expect("seed edge");
        }
        fact
    }

    pub fn seed_instruction(&self, content: &str, scope: f64) -> Node {
        self.seed(NewNode::new(NodeType::Instruction, content).with_scope(scope))
    }

    pub fn seed_plan(&self, content: &str, valid_from: DateTime<Utc>) -> Node {
        self.seed(
            NewNode::new(NodeType::Plan, content)
                .with_subtype("scheduled")
                .with_valid_from(valid_from),
        )
    }

    pub fn node_count(&self) -> i64 {
        self.store.node_count().expect("node count")
    }
}
