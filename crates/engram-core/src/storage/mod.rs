//! Storage module
//!
//! SQLite-based graph store with:
//! - Typed nodes and edges, WAL journaling
//! - At-most-one-live-version supersede chains
//! - Embedding rows searched brute-force by the search module
//! - A lightweight stemmer for LIKE-based topic matching

mod migrations;
mod sqlite;
pub mod stem;

pub use migrations::MIGRATIONS;
pub use sqlite::{strip_trailing_qualifiers, Relationship, Result, Store, StoreError};
