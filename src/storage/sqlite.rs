//! SQLite storage backend

use super::traits::{AddReport, GraphStore, OpenStore, RecordStore, StorageError, StorageResult};
use crate::graph::{
    apply_communities, CommunityAssignment, Confidence, Edge, EdgeId, EntityType, GraphSnapshot,
    Node, NodeId, Position,
};
use rusqlite::{params, params_from_iter, Connection, Row, Transaction};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Mutex;

/// Maximum number of bound parameters per `IN (...)` statement
const IN_CHUNK: usize = 500;

const NODE_COLUMNS: &str =
    "id, label, entity_type, description, aliases_json, pos_x, pos_y, metadata_json";
const EDGE_COLUMNS: &str = "id, source, target, predicate, evidence_text, source_filename, \
                            source_page, confidence, date_mentioned";

/// SQLite-backed entity graph
///
/// One database file with `nodes` and `edges` tables. Thread-safe via an
/// internal mutex on the connection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

/// Raw node columns, decoded before JSON fields are parsed
struct NodeRow {
    id: String,
    label: String,
    entity_type: String,
    description: String,
    aliases_json: String,
    pos_x: f64,
    pos_y: f64,
    metadata_json: String,
}

impl NodeRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            label: row.get(1)?,
            entity_type: row.get(2)?,
            description: row.get(3)?,
            aliases_json: row.get(4)?,
            pos_x: row.get(5)?,
            pos_y: row.get(6)?,
            metadata_json: row.get(7)?,
        })
    }

    fn into_node(self) -> StorageResult<Node> {
        let aliases: BTreeSet<String> = serde_json::from_str(&self.aliases_json)?;
        Ok(Node {
            id: NodeId::from_string(self.id),
            label: self.label,
            entity_type: self.entity_type.parse().unwrap_or(EntityType::Unknown),
            description: self.description,
            aliases,
            position: Position {
                x: self.pos_x,
                y: self.pos_y,
            },
            metadata: serde_json::from_str(&self.metadata_json)?,
        })
    }
}

fn read_edge(row: &Row<'_>) -> rusqlite::Result<Edge> {
    let confidence: String = row.get(7)?;
    Ok(Edge {
        id: EdgeId::from_string(row.get::<_, String>(0)?),
        source: NodeId::from_string(row.get::<_, String>(1)?),
        target: NodeId::from_string(row.get::<_, String>(2)?),
        predicate: row.get(3)?,
        evidence_text: row.get(4)?,
        source_filename: row.get(5)?,
        source_page: row.get(6)?,
        confidence: Confidence::parse(&confidence),
        date_mentioned: row.get(8)?,
    })
}

/// `%term%` with LIKE wildcards escaped by a backslash
fn like_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

impl SqliteStore {
    fn init_schema(conn: &Connection) -> StorageResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS nodes (
                id TEXT PRIMARY KEY,
                label TEXT NOT NULL,
                entity_type TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                aliases_json TEXT NOT NULL DEFAULT '[]',
                pos_x REAL NOT NULL DEFAULT 0,
                pos_y REAL NOT NULL DEFAULT 0,
                metadata_json TEXT NOT NULL DEFAULT '{}'
            );

            CREATE INDEX IF NOT EXISTS idx_nodes_label ON nodes(label);

            CREATE TABLE IF NOT EXISTS edges (
                id TEXT PRIMARY KEY,
                source TEXT NOT NULL,
                target TEXT NOT NULL,
                predicate TEXT NOT NULL,
                evidence_text TEXT NOT NULL DEFAULT '',
                source_filename TEXT NOT NULL DEFAULT '',
                source_page INTEGER NOT NULL DEFAULT 0,
                confidence TEXT NOT NULL DEFAULT 'STATED',
                date_mentioned TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_edges_source ON edges(source);
            CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(target);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_edges_triple ON edges(source, predicate, target);

            -- Concurrent reads while the deduplicator writes
            PRAGMA journal_mode = WAL;
            "#,
        )?;
        Ok(())
    }

    fn upsert_node(tx: &Transaction<'_>, node: &Node) -> StorageResult<()> {
        let aliases = serde_json::to_string(&node.aliases)?;
        let metadata = serde_json::to_string(&node.metadata)?;
        tx.execute(
            r#"
            INSERT INTO nodes (id, label, entity_type, description, aliases_json, pos_x, pos_y, metadata_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(id) DO UPDATE SET
                label = excluded.label,
                entity_type = excluded.entity_type,
                description = excluded.description,
                aliases_json = excluded.aliases_json,
                pos_x = excluded.pos_x,
                pos_y = excluded.pos_y,
                metadata_json = excluded.metadata_json
            "#,
            params![
                node.id.as_str(),
                node.label,
                node.entity_type.as_str(),
                node.description,
                aliases,
                node.position.x,
                node.position.y,
                metadata
            ],
        )?;
        Ok(())
    }

    /// Insert or update by id. One row per `(source, predicate, target)`:
    /// a row holding the same triple under another id is replaced.
    fn upsert_edge(tx: &Transaction<'_>, edge: &Edge) -> StorageResult<()> {
        let replaced = tx.execute(
            "DELETE FROM edges WHERE source = ?1 AND predicate = ?2 AND target = ?3 AND id <> ?4",
            params![
                edge.source.as_str(),
                edge.predicate,
                edge.target.as_str(),
                edge.id.as_str()
            ],
        )?;
        if replaced > 0 {
            tracing::debug!(edge = %edge.id, replaced, "replacing edge with same triple");
        }
        tx.execute(
            r#"
            INSERT INTO edges (id, source, target, predicate, evidence_text, source_filename,
                               source_page, confidence, date_mentioned)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(id) DO UPDATE SET
                source = excluded.source,
                target = excluded.target,
                predicate = excluded.predicate,
                evidence_text = excluded.evidence_text,
                source_filename = excluded.source_filename,
                source_page = excluded.source_page,
                confidence = excluded.confidence,
                date_mentioned = excluded.date_mentioned
            "#,
            params![
                edge.id.as_str(),
                edge.source.as_str(),
                edge.target.as_str(),
                edge.predicate,
                edge.evidence_text,
                edge.source_filename,
                edge.source_page,
                edge.confidence.as_str(),
                edge.date_mentioned
            ],
        )?;
        Ok(())
    }

    fn node_exists(tx: &Transaction<'_>, id: &NodeId) -> StorageResult<bool> {
        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM nodes WHERE id = ?1)",
            params![id.as_str()],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn query_nodes(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> StorageResult<Vec<Node>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, NodeRow::read)?;
        let mut nodes = Vec::new();
        for row in rows {
            nodes.push(row?.into_node()?);
        }
        Ok(nodes)
    }

    fn query_edges(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> StorageResult<Vec<Edge>> {
        let mut stmt = conn.prepare(sql)?;
        let edges = stmt
            .query_map(params, read_edge)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(edges)
    }
}

impl OpenStore for SqliteStore {
    fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl GraphStore for SqliteStore {
    fn load(&self) -> StorageResult<GraphSnapshot> {
        let mut snapshot = GraphSnapshot::new(self.all_nodes()?, self.all_edges()?);
        snapshot.recompute_degrees();
        Ok(snapshot)
    }

    fn add_elements(&self, nodes: &[Node], edges: &[Edge]) -> StorageResult<AddReport> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let mut report = AddReport::default();

        for node in nodes {
            Self::upsert_node(&tx, node)?;
            report.nodes_upserted += 1;
        }

        for edge in edges {
            if edge.is_self_loop()
                || !Self::node_exists(&tx, &edge.source)?
                || !Self::node_exists(&tx, &edge.target)?
            {
                tracing::debug!(edge = %edge.id, "rejecting edge");
                report.edges_rejected += 1;
                continue;
            }
            Self::upsert_edge(&tx, edge)?;
            report.edges_upserted += 1;
        }

        tx.commit()?;
        Ok(report)
    }

    fn update_node_position(&self, id: &NodeId, x: f64, y: f64) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute(
            "UPDATE nodes SET pos_x = ?2, pos_y = ?3 WHERE id = ?1",
            params![id.as_str(), x, y],
        )?;
        if rows == 0 {
            return Err(StorageError::NodeNotFound(id.to_string()));
        }
        Ok(())
    }
}

impl RecordStore for SqliteStore {
    // === Node Operations ===

    fn search_nodes(&self, term: &str, limit: usize) -> StorageResult<Vec<Node>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {NODE_COLUMNS} FROM nodes
             WHERE label LIKE ?1 ESCAPE '\\' OR aliases_json LIKE ?1 ESCAPE '\\'
             ORDER BY rowid LIMIT ?2"
        );
        Self::query_nodes(&conn, &sql, params![like_pattern(term), limit as i64])
    }

    fn nodes_by_ids(&self, ids: &[NodeId]) -> StorageResult<Vec<Node>> {
        let conn = self.conn.lock().unwrap();
        let mut nodes = Vec::new();
        for chunk in ids.chunks(IN_CHUNK) {
            let sql = format!(
                "SELECT {NODE_COLUMNS} FROM nodes WHERE id IN ({}) ORDER BY rowid",
                placeholders(chunk.len())
            );
            nodes.extend(Self::query_nodes(
                &conn,
                &sql,
                params_from_iter(chunk.iter().map(|id| id.as_str())),
            )?);
        }
        Ok(nodes)
    }

    fn all_nodes(&self) -> StorageResult<Vec<Node>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!("SELECT {NODE_COLUMNS} FROM nodes ORDER BY rowid");
        Self::query_nodes(&conn, &sql, params![])
    }

    fn upsert_nodes(&self, nodes: &[Node]) -> StorageResult<usize> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        for node in nodes {
            Self::upsert_node(&tx, node)?;
        }
        tx.commit()?;
        Ok(nodes.len())
    }

    fn delete_nodes(&self, ids: &[NodeId]) -> StorageResult<usize> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let mut deleted = 0;
        for chunk in ids.chunks(IN_CHUNK) {
            let sql = format!("DELETE FROM nodes WHERE id IN ({})", placeholders(chunk.len()));
            deleted += tx.execute(&sql, params_from_iter(chunk.iter().map(|id| id.as_str())))?;
        }
        tx.commit()?;
        Ok(deleted)
    }

    fn apply_communities(&self, assignments: &[CommunityAssignment]) -> StorageResult<usize> {
        let members: Vec<NodeId> = assignments
            .iter()
            .flat_map(|a| a.members.iter().cloned())
            .collect();
        let mut nodes = self.nodes_by_ids(&members)?;
        let changed = apply_communities(&mut nodes, assignments);
        self.upsert_nodes(&nodes)?;
        Ok(changed)
    }

    // === Edge Operations ===

    fn edges_from(&self, id: &NodeId, limit: usize) -> StorageResult<Vec<Edge>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!("SELECT {EDGE_COLUMNS} FROM edges WHERE source = ?1 ORDER BY rowid LIMIT ?2");
        Self::query_edges(&conn, &sql, params![id.as_str(), limit as i64])
    }

    fn edges_to(&self, id: &NodeId, limit: usize) -> StorageResult<Vec<Edge>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!("SELECT {EDGE_COLUMNS} FROM edges WHERE target = ?1 ORDER BY rowid LIMIT ?2");
        Self::query_edges(&conn, &sql, params![id.as_str(), limit as i64])
    }

    fn search_evidence(&self, term: &str, limit: usize) -> StorageResult<Vec<Edge>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {EDGE_COLUMNS} FROM edges WHERE evidence_text LIKE ?1 ESCAPE '\\'
             ORDER BY rowid LIMIT ?2"
        );
        Self::query_edges(&conn, &sql, params![like_pattern(term), limit as i64])
    }

    fn all_edges(&self) -> StorageResult<Vec<Edge>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!("SELECT {EDGE_COLUMNS} FROM edges ORDER BY rowid");
        Self::query_edges(&conn, &sql, params![])
    }

    fn upsert_edges(&self, edges: &[Edge]) -> StorageResult<usize> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        for edge in edges {
            Self::upsert_edge(&tx, edge)?;
        }
        tx.commit()?;
        Ok(edges.len())
    }

    fn delete_edges(&self, ids: &[EdgeId]) -> StorageResult<usize> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let mut deleted = 0;
        for chunk in ids.chunks(IN_CHUNK) {
            let sql = format!("DELETE FROM edges WHERE id IN ({})", placeholders(chunk.len()));
            deleted += tx.execute(&sql, params_from_iter(chunk.iter().map(|id| id.as_str())))?;
        }
        tx.commit()?;
        Ok(deleted)
    }
}
