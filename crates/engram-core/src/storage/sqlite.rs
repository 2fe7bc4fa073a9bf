//! SQLite storage implementation
//!
//! The persistent graph: typed nodes, typed edges, and one embedding row per
//! live node. Single-writer, WAL-journaled. Content is never edited in
//! place; it changes only through supersede (new node, old one chained) or
//! promote (plan becomes a completed_plan event).

use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::memory::{
    check_replacement, ContentRejection, Edge, NewNode, Node, NodeType, Source,
};
use crate::search::{cosine_similarity, vector_from_bytes, vector_to_bytes, ScoredNode, VectorQuery};
use crate::storage::stem::topic_stems;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Storage error type
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// Node not found
    #[error("Node not found: {0}")]
    NotFound(String),
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Rejected write (missing endpoint, garbled content, bad field)
    #[error("Validation failed: {0}")]
    Validation(String),
    /// Initialization error
    #[error("Initialization error: {0}")]
    Init(String),
}

impl From<ContentRejection> for StoreError {
    fn from(rejection: ContentRejection) -> Self {
        StoreError::Validation(rejection.to_string())
    }
}

/// Storage result type
pub type Result<T> = std::result::Result<T, StoreError>;

// ============================================================================
// READ MODELS
// ============================================================================

/// One relationship of a node: the edge plus the node at the other end
#[derive(Debug, Clone)]
pub struct Relationship {
    pub edge: Edge,
    /// The node at the other end of the edge
    pub other: Node,
    /// True when the edge points away from the queried node
    pub outgoing: bool,
}

/// Trailing qualifier words stripped before entity-name matching
const NAME_QUALIFIERS: [&str; 7] = [
    "project", "account", "client", "tool", "team", "company", "org",
];

/// Strip common trailing qualifiers from an entity name
/// ("Anderson account" -> "Anderson"). Repeats until none remain.
pub fn strip_trailing_qualifiers(name: &str) -> String {
    let mut words: Vec<&str> = name.split_whitespace().collect();
    while words.len() > 1 {
        let last = words[words.len() - 1].to_lowercase();
        if NAME_QUALIFIERS.contains(&last.as_str()) {
            words.pop();
        } else {
            break;
        }
    }
    words.join(" ")
}

// ============================================================================
// STORE
// ============================================================================

/// The persistent graph store
///
/// Uses separate reader/writer connections behind mutexes so all methods
/// take `&self` and the store can be shared as `Arc<Store>` between the
/// retrieve and store loops. Writes are serialized through the writer
/// connection; reads may or may not observe concurrent writes from the
/// other loop within the same pipeline run.
pub struct Store {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
}

impl Store {
    /// Apply PRAGMAs to a connection
    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(())
    }

    /// Open (or create) the store. `None` uses the platform data directory.
    pub fn new(db_path: Option<PathBuf>) -> Result<Self> {
        let path = match db_path {
            Some(p) => p,
            None => {
                let proj_dirs = ProjectDirs::from("dev", "engram", "engram").ok_or_else(|| {
                    StoreError::Init("Could not determine project directories".to_string())
                })?;
                let data_dir = proj_dirs.data_dir();
                std::fs::create_dir_all(data_dir)?;
                data_dir.join("engram.db")
            }
        };

        let writer_conn = Connection::open(&path)?;
        Self::configure_connection(&writer_conn)?;
        super::migrations::apply_migrations(&writer_conn)?;

        let reader_conn = Connection::open(&path)?;
        Self::configure_connection(&reader_conn)?;

        Ok(Self {
            writer: Mutex::new(writer_conn),
            reader: Mutex::new(reader_conn),
        })
    }

    fn writer(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.writer
            .lock()
            .map_err(|_| StoreError::Init("Writer lock poisoned".into()))
    }

    fn reader(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.reader
            .lock()
            .map_err(|_| StoreError::Init("Reader lock poisoned".into()))
    }

    // ========================================================================
    // NODE CRUD
    // ========================================================================

    /// Create a node. Applies defaults the caller cannot override:
    /// `can_summarize` is forced false for instructions and plans, and
    /// `scope` falls back to the per-type default when unset.
    pub fn create_node(&self, input: NewNode) -> Result<Node> {
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();

        let can_summarize = input.node_type.summarizable() && input.can_summarize;
        let scope = input.scope.or_else(|| input.node_type.default_scope());
        let salience = input.salience.max(0.0);
        let attributes_json = match &input.attributes {
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        };

        {
            let writer = self.writer()?;
            writer.execute(
                "INSERT INTO nodes (
                    id, node_type, subtype, content, salience, confidence,
                    source, created_at, valid_from, valid_until, superseded_by,
                    attributes, can_summarize, scope
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, NULL, ?11, ?12, ?13)",
                params![
                    id,
                    input.node_type.as_str(),
                    input.subtype,
                    input.content,
                    salience,
                    input.confidence,
                    input.source.as_str(),
                    now.to_rfc3339(),
                    input.valid_from.map(|dt| dt.to_rfc3339()),
                    input.valid_until.map(|dt| dt.to_rfc3339()),
                    attributes_json,
                    can_summarize as i64,
                    scope,
                ],
            )?;
        }

        self.get_node(&id)?.ok_or(StoreError::NotFound(id))
    }

    /// Create an edge. Rejected (and logged) when either endpoint is
    /// missing; nothing is written in that case.
    pub fn create_edge(
        &self,
        source_id: &str,
        target_id: &str,
        edge_type: &str,
        attributes: Option<serde_json::Value>,
    ) -> Result<Edge> {
        let writer = self.writer()?;

        let endpoints_exist: i64 = writer.query_row(
            "SELECT COUNT(*) FROM nodes WHERE id IN (?1, ?2)",
            params![source_id, target_id],
            |row| row.get(0),
        )?;
        let expected = if source_id == target_id { 1 } else { 2 };
        if endpoints_exist < expected {
            tracing::warn!(source_id, target_id, edge_type, "edge rejected: missing endpoint");
            return Err(StoreError::Validation(format!(
                "edge {} -> {} rejected: endpoint does not exist",
                source_id, target_id
            )));
        }

        let now = Utc::now();
        let id = Uuid::new_v4().to_string();
        let attributes_json = attributes.as_ref().map(|v| v.to_string());
        writer.execute(
            "INSERT INTO edges (id, source_id, target_id, edge_type, attributes, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![id, source_id, target_id, edge_type, attributes_json, now.to_rfc3339()],
        )?;

        Ok(Edge {
            id,
            source_id: source_id.to_string(),
            target_id: target_id.to_string(),
            edge_type: edge_type.to_string(),
            attributes,
            created_at: now,
        })
    }

    /// Fetch a node by id
    pub fn get_node(&self, id: &str) -> Result<Option<Node>> {
        let reader = self.reader()?;
        let node = reader
            .query_row(
                &format!("SELECT {} FROM nodes WHERE id = ?1", NODE_COLUMNS),
                params![id],
                row_to_node,
            )
            .optional()?;
        Ok(node)
    }

    /// Count all nodes (superseded included)
    pub fn node_count(&self) -> Result<i64> {
        let reader = self.reader()?;
        Ok(reader.query_row("SELECT COUNT(*) FROM nodes", [], |row| row.get(0))?)
    }

    /// Find live entity nodes by name: prefix or substring match against
    /// content and the alias list in the attributes bag, ranked by
    /// prefix-match flag then salience. Trailing qualifiers like
    /// "account" or "team" are stripped from the query first.
    pub fn find_entities_by_name(&self, name: &str) -> Result<Vec<Node>> {
        let stripped = strip_trailing_qualifiers(name).to_lowercase();
        if stripped.is_empty() {
            return Ok(vec![]);
        }
        let prefix = format!("{}%", escape_like(&stripped));
        let substring = format!("%{}%", escape_like(&stripped));

        let reader = self.reader()?;
        let mut stmt = reader.prepare(&format!(
            "SELECT {}, (CASE WHEN LOWER(content) LIKE ?1 ESCAPE '\\' THEN 1 ELSE 0 END) AS name_match
             FROM nodes
             WHERE node_type = 'entity' AND superseded_by IS NULL
               AND (LOWER(content) LIKE ?2 ESCAPE '\\'
                    OR LOWER(COALESCE(attributes, '')) LIKE ?2 ESCAPE '\\')
             ORDER BY name_match DESC, salience DESC",
            NODE_COLUMNS
        ))?;
        let nodes = stmt
            .query_map(params![prefix, substring], row_to_node)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(nodes)
    }

    // ========================================================================
    // GRAPH QUERIES
    // ========================================================================

    /// All relationships of a node, both directions, skipping superseded
    /// nodes at the other end.
    pub fn get_relationships(&self, id: &str) -> Result<Vec<Relationship>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(&format!(
            "SELECT e.id, e.source_id, e.target_id, e.edge_type, e.attributes, e.created_at,
                    {}
             FROM edges e
             JOIN nodes n ON n.id = (CASE WHEN e.source_id = ?1 THEN e.target_id ELSE e.source_id END)
             WHERE (e.source_id = ?1 OR e.target_id = ?1)
               AND n.superseded_by IS NULL
             ORDER BY n.salience DESC",
            node_columns_prefixed("n")
        ))?;

        let rows = stmt.query_map(params![id], |row| {
            let edge = Edge {
                id: row.get(0)?,
                source_id: row.get(1)?,
                target_id: row.get(2)?,
                edge_type: row.get(3)?,
                attributes: row
                    .get::<_, Option<String>>(4)?
                    .and_then(|s| serde_json::from_str(&s).ok()),
                created_at: parse_timestamp(row.get::<_, String>(5)?),
            };
            let other = row_to_node_offset(row, 6)?;
            Ok((edge, other))
        })?;

        let queried = id.to_string();
        let mut relationships = Vec::new();
        for row in rows {
            let (edge, other) = row?;
            let outgoing = edge.source_id == queried;
            relationships.push(Relationship { edge, other, outgoing });
        }
        Ok(relationships)
    }

    /// Live nodes of the given types connected to an entity by any edge,
    /// in either direction, optionally restricted to a recent window on
    /// `created_at`.
    pub fn get_linked_nodes(
        &self,
        entity_id: &str,
        node_types: &[NodeType],
        days: Option<i64>,
    ) -> Result<Vec<Node>> {
        if node_types.is_empty() {
            return Ok(vec![]);
        }
        let type_list = node_types
            .iter()
            .map(|t| format!("'{}'", t.as_str()))
            .collect::<Vec<_>>()
            .join(", ");
        let cutoff = days.map(|d| (Utc::now() - Duration::days(d)).to_rfc3339());

        let reader = self.reader()?;
        let mut stmt = reader.prepare(&format!(
            "SELECT DISTINCT {}
             FROM nodes n
             JOIN edges e ON n.id = (CASE WHEN e.source_id = ?1 THEN e.target_id ELSE e.source_id END)
             WHERE (e.source_id = ?1 OR e.target_id = ?1)
               AND n.node_type IN ({})
               AND n.superseded_by IS NULL
               AND (?2 IS NULL OR n.created_at >= ?2)
             ORDER BY n.salience DESC",
            node_columns_prefixed("n"),
            type_list
        ))?;
        let nodes = stmt
            .query_map(params![entity_id, cutoff], |row| row_to_node_offset(row, 0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(nodes)
    }

    /// Facts and opinions linked to an entity
    pub fn get_facts_by_entity(&self, entity_id: &str) -> Result<Vec<Node>> {
        self.get_linked_nodes(entity_id, &[NodeType::Fact, NodeType::Opinion], None)
    }

    /// Events and plans linked to an entity, optionally within a recent window
    pub fn get_events_by_entity(&self, entity_id: &str, days: Option<i64>) -> Result<Vec<Node>> {
        self.get_linked_nodes(entity_id, &[NodeType::Event, NodeType::Plan], days)
    }

    /// Plans linked to an entity
    pub fn get_plans_by_entity(&self, entity_id: &str) -> Result<Vec<Node>> {
        self.get_linked_nodes(entity_id, &[NodeType::Plan], None)
    }

    /// Instructions linked to an entity
    pub fn get_instructions_by_entity(&self, entity_id: &str) -> Result<Vec<Node>> {
        self.get_linked_nodes(entity_id, &[NodeType::Instruction], None)
    }

    /// Instruction nodes matching a topic. The topic is split into tokens
    /// (> 2 chars), each token stemmed, and instructions matching ANY stem
    /// are returned ranked by match count then salience. Without a topic,
    /// all live instructions ordered by salience.
    pub fn get_instructions(&self, topic: Option<&str>) -> Result<Vec<Node>> {
        let reader = self.reader()?;

        let stems = topic.map(topic_stems).unwrap_or_default();
        if stems.is_empty() {
            let mut stmt = reader.prepare(&format!(
                "SELECT {} FROM nodes
                 WHERE node_type = 'instruction' AND superseded_by IS NULL
                 ORDER BY salience DESC",
                NODE_COLUMNS
            ))?;
            let nodes = stmt
                .query_map([], row_to_node)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            return Ok(nodes);
        }

        // One LIKE term per stem; match_count ranks multi-stem hits first
        let like_cases = (1..=stems.len())
            .map(|i| format!("(CASE WHEN LOWER(content) LIKE ?{} ESCAPE '\\' THEN 1 ELSE 0 END)", i))
            .collect::<Vec<_>>()
            .join(" + ");
        let like_any = (1..=stems.len())
            .map(|i| format!("LOWER(content) LIKE ?{} ESCAPE '\\'", i))
            .collect::<Vec<_>>()
            .join(" OR ");
        let sql = format!(
            "SELECT {}, ({}) AS match_count
             FROM nodes
             WHERE node_type = 'instruction' AND superseded_by IS NULL AND ({})
             ORDER BY match_count DESC, salience DESC",
            NODE_COLUMNS, like_cases, like_any
        );

        let patterns: Vec<String> = stems
            .iter()
            .map(|s| format!("%{}%", escape_like(s)))
            .collect();
        let mut stmt = reader.prepare(&sql)?;
        let nodes = stmt
            .query_map(rusqlite::params_from_iter(patterns.iter()), row_to_node)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(nodes)
    }

    /// Broadly applicable instructions: scope >= 0.8, widest and most
    /// salient first.
    pub fn get_global_instructions(&self, limit: usize) -> Result<Vec<Node>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(&format!(
            "SELECT {} FROM nodes
             WHERE node_type = 'instruction' AND superseded_by IS NULL AND scope >= 0.8
             ORDER BY scope DESC, salience DESC
             LIMIT ?1",
            NODE_COLUMNS
        ))?;
        let nodes = stmt
            .query_map(params![limit as i64], row_to_node)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(nodes)
    }

    /// Ids of live event and plan nodes created within the last `days`
    pub fn get_recent_event_ids(&self, days: i64) -> Result<Vec<String>> {
        let cutoff = (Utc::now() - Duration::days(days)).to_rfc3339();
        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT id FROM nodes
             WHERE node_type IN ('event', 'plan') AND superseded_by IS NULL
               AND created_at >= ?1",
        )?;
        let ids = stmt
            .query_map(params![cutoff], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Replace a node's content with a new version. The replacement keeps
    /// the old node's metadata; edges are copied over deduplicated by
    /// (other endpoint, edge type); the old node is chained via
    /// `superseded_by` and loses its embedding row. The caller re-embeds
    /// the replacement.
    pub fn supersede_node(&self, old_id: &str, new_content: &str) -> Result<Node> {
        let old = self
            .get_node(old_id)?
            .ok_or_else(|| StoreError::NotFound(old_id.to_string()))?;
        if old.is_superseded() {
            return Err(StoreError::Validation(format!(
                "node {} is already superseded",
                old_id
            )));
        }
        check_replacement(new_content, old.node_type)?;

        let now = Utc::now();
        let new_id = Uuid::new_v4().to_string();

        let mut writer = self.writer()?;
        let tx = writer.transaction()?;

        tx.execute(
            "INSERT INTO nodes (
                id, node_type, subtype, content, salience, confidence,
                source, created_at, valid_from, valid_until, superseded_by,
                attributes, can_summarize, scope
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, NULL, ?11, ?12, ?13)",
            params![
                new_id,
                old.node_type.as_str(),
                old.subtype,
                new_content,
                old.salience,
                old.confidence,
                old.source.as_str(),
                now.to_rfc3339(),
                old.valid_from.map(|dt| dt.to_rfc3339()),
                old.valid_until.map(|dt| dt.to_rfc3339()),
                match &old.attributes {
                    serde_json::Value::Null => None,
                    other => Some(other.to_string()),
                },
                old.can_summarize as i64,
                old.scope,
            ],
        )?;

        // Copy edges, deduplicated by (other endpoint, edge type). The
        // originals stay attached to the old node.
        let mut seen = std::collections::HashSet::new();
        let copies: Vec<(String, String, String, Option<String>)> = {
            let mut stmt = tx.prepare(
                "SELECT source_id, target_id, edge_type, attributes FROM edges
                 WHERE source_id = ?1 OR target_id = ?1
                 ORDER BY created_at",
            )?;
            let rows = stmt
                .query_map(params![old_id], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let mut copies = Vec::new();
            for (source_id, target_id, edge_type, attrs) in rows {
                let outgoing = source_id == old_id;
                let other = if outgoing { &target_id } else { &source_id };
                let other = if other == old_id { new_id.clone() } else { other.clone() };
                if !seen.insert((other.clone(), edge_type.clone())) {
                    continue;
                }
                if outgoing {
                    copies.push((new_id.clone(), other, edge_type, attrs));
                } else {
                    copies.push((other, new_id.clone(), edge_type, attrs));
                }
            }
            copies
        };
        for (source_id, target_id, edge_type, attrs) in copies {
            tx.execute(
                "INSERT INTO edges (id, source_id, target_id, edge_type, attributes, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    Uuid::new_v4().to_string(),
                    source_id,
                    target_id,
                    edge_type,
                    attrs,
                    now.to_rfc3339()
                ],
            )?;
        }

        tx.execute(
            "UPDATE nodes SET superseded_by = ?1 WHERE id = ?2",
            params![new_id, old_id],
        )?;
        tx.execute("DELETE FROM embeddings WHERE node_id = ?1", params![old_id])?;
        tx.commit()?;
        drop(writer);

        self.get_node(&new_id)?.ok_or(StoreError::NotFound(new_id))
    }

    /// Promote a past-due plan into a completed_plan event, in place.
    /// Idempotent; returns `None` for missing nodes, non-plans, and plans
    /// whose date has not arrived.
    pub fn promote_plan_to_event(&self, id: &str) -> Result<Option<Node>> {
        let Some(node) = self.get_node(id)? else {
            return Ok(None);
        };

        // Already promoted
        if node.node_type == NodeType::Event && node.subtype.as_deref() == Some("completed_plan") {
            return Ok(Some(node));
        }
        if node.node_type != NodeType::Plan {
            return Ok(None);
        }
        match node.valid_from {
            Some(scheduled) if scheduled <= Utc::now() => {}
            _ => return Ok(None),
        }

        {
            let writer = self.writer()?;
            writer.execute(
                "UPDATE nodes SET node_type = 'event', subtype = 'completed_plan' WHERE id = ?1",
                params![id],
            )?;
            writer.execute(
                "UPDATE embeddings SET node_type = 'event' WHERE node_id = ?1",
                params![id],
            )?;
        }

        self.get_node(id)
    }

    /// Administrative delete; cascades to the node's edges and embedding
    pub fn delete_node(&self, id: &str) -> Result<bool> {
        let writer = self.writer()?;
        let deleted = writer.execute("DELETE FROM nodes WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    // ========================================================================
    // EMBEDDINGS
    // ========================================================================

    /// Store (or replace) a node's embedding
    pub fn put_embedding(&self, node_id: &str, node_type: NodeType, vector: &[f32]) -> Result<()> {
        let writer = self.writer()?;
        writer.execute(
            "INSERT OR REPLACE INTO embeddings (node_id, node_type, vector, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                node_id,
                node_type.as_str(),
                vector_to_bytes(vector),
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// Fetch a node's embedding, if any
    pub fn get_embedding(&self, node_id: &str) -> Result<Option<Vec<f32>>> {
        let reader = self.reader()?;
        let bytes: Option<Vec<u8>> = reader
            .query_row(
                "SELECT vector FROM embeddings WHERE node_id = ?1",
                params![node_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(bytes.map(|b| vector_from_bytes(&b)))
    }

    /// The recorded node_type of an embedding row (kept in sync on promote)
    pub fn get_embedding_type(&self, node_id: &str) -> Result<Option<String>> {
        let reader = self.reader()?;
        Ok(reader
            .query_row(
                "SELECT node_type FROM embeddings WHERE node_id = ?1",
                params![node_id],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Brute-force cosine search over the embeddings of live nodes.
    /// Score = cosine x salience, descending, truncated to top_k.
    pub fn vector_search(&self, query: &VectorQuery) -> Result<Vec<ScoredNode>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(&format!(
            "SELECT {}, em.vector
             FROM embeddings em
             JOIN nodes n ON n.id = em.node_id
             WHERE n.superseded_by IS NULL",
            node_columns_prefixed("n")
        ))?;

        let rows = stmt.query_map([], |row| {
            let node = row_to_node_offset(row, 0)?;
            let bytes: Vec<u8> = row.get(14)?;
            Ok((node, bytes))
        })?;

        let mut scored = Vec::new();
        for row in rows {
            let (node, bytes) = row?;
            if let Some(types) = &query.node_types {
                if !types.contains(&node.node_type) {
                    continue;
                }
            }
            if let Some(ids) = &query.node_ids {
                if !ids.contains(&node.id) {
                    continue;
                }
            }
            let stored = vector_from_bytes(&bytes);
            let cosine = cosine_similarity(&query.vector, &stored);
            let score = cosine * node.salience as f32;
            scored.push(ScoredNode { node, score, cosine });
        }

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(query.top_k);
        Ok(scored)
    }
}

// ============================================================================
// ROW MAPPING
// ============================================================================

const NODE_COLUMNS: &str = "id, node_type, subtype, content, salience, confidence, source, \
                            created_at, valid_from, valid_until, superseded_by, attributes, \
                            can_summarize, scope";

fn node_columns_prefixed(alias: &str) -> String {
    NODE_COLUMNS
        .split(", ")
        .map(|c| format!("{}.{}", alias, c))
        .collect::<Vec<_>>()
        .join(", ")
}

fn parse_timestamp(raw: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn row_to_node(row: &rusqlite::Row<'_>) -> rusqlite::Result<Node> {
    row_to_node_offset(row, 0)
}

fn row_to_node_offset(row: &rusqlite::Row<'_>, base: usize) -> rusqlite::Result<Node> {
    let type_raw: String = row.get(base + 1)?;
    let node_type = NodeType::parse_name(&type_raw).unwrap_or_default();
    let attributes = row
        .get::<_, Option<String>>(base + 11)?
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or(serde_json::Value::Null);
    Ok(Node {
        id: row.get(base)?,
        node_type,
        subtype: row.get(base + 2)?,
        content: row.get(base + 3)?,
        salience: row.get(base + 4)?,
        confidence: row.get(base + 5)?,
        source: Source::parse_name(&row.get::<_, String>(base + 6)?),
        created_at: parse_timestamp(row.get(base + 7)?),
        valid_from: row
            .get::<_, Option<String>>(base + 8)?
            .map(parse_timestamp),
        valid_until: row
            .get::<_, Option<String>>(base + 9)?
            .map(parse_timestamp),
        superseded_by: row.get(base + 10)?,
        attributes,
        can_summarize: row.get::<_, i64>(base + 12)? != 0,
        scope: row.get(base + 13)?,
    })
}

/// Escape LIKE wildcards in user-provided text
fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

// ============================================================================
// TESTS
// ============================================================================
