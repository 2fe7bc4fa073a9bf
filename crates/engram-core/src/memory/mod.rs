//! Memory module - core types of the knowledge graph
//!
//! - Typed nodes with lifecycle metadata (supersede chain, temporal validity)
//! - Directed, typed edges (additive, cycle-tolerant)
//! - Content validation shared by the store path and supersede

mod node;
pub mod validate;

pub use node::{remap_subtype_as_type, Edge, NewNode, Node, NodeType, Source};
pub use validate::{check_content, check_replacement, check_scope, parse_plan_date, ContentRejection};
