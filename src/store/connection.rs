//! Transactional connection wrapper and the lazy triple result.

use std::collections::VecDeque;
use std::sync::Arc;

use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use tracing::{debug, warn};

use crate::dialect::Dialect;
use crate::error::{Result, StoreError};
use crate::model::{Node, NodeId, Triple, TripleId, TriplePattern, TripleSpec};

use super::cache::CacheManager;
use super::pool::PooledConn;
use super::schema::split_statements;

/// One transactional session against the backing store.
///
/// Statements always run inside an explicit transaction, begun lazily on the
/// first operation; auto-commit never applies for the wrapper's lifetime.
/// `commit`, `rollback` and `close` are idempotent. A wrapper is owned by one
/// logical caller; the acquirer must close it on every exit path. Dropping an
/// unclosed wrapper rolls back and returns the connection; that backstop is
/// deterministic here, but the contract is still explicit release.
pub struct StoreConnection {
    conn: PooledConn,
    dialect: Arc<dyn Dialect>,
    cache: Arc<CacheManager>,
    tx_open: bool,
    closed: bool,
}

impl StoreConnection {
    pub(crate) fn new(
        conn: PooledConn,
        dialect: Arc<dyn Dialect>,
        cache: Arc<CacheManager>,
    ) -> Self {
        Self {
            conn,
            dialect,
            cache,
            tx_open: false,
            closed: false,
        }
    }

    fn ensure_tx(&mut self) -> Result<()> {
        if self.closed {
            return Err(StoreError::InvalidState("connection already closed"));
        }
        if !self.tx_open {
            self.conn.conn().execute_batch("BEGIN DEFERRED")?;
            self.tx_open = true;
        }
        Ok(())
    }

    /// Commits the open transaction, if any.
    pub fn commit(&mut self) -> Result<()> {
        if self.closed || !self.tx_open {
            return Ok(());
        }
        self.conn.conn().execute_batch("COMMIT")?;
        self.tx_open = false;
        Ok(())
    }

    /// Rolls back the open transaction, if any.
    pub fn rollback(&mut self) -> Result<()> {
        if self.closed || !self.tx_open {
            return Ok(());
        }
        self.conn.conn().execute_batch("ROLLBACK")?;
        self.tx_open = false;
        Ok(())
    }

    /// Rolls back any uncommitted work and returns the connection to the
    /// pool.
    pub fn close(mut self) -> Result<()> {
        self.finish()
    }

    fn finish(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        let result = self.rollback();
        if result.is_err() {
            self.conn.mark_broken();
        }
        self.closed = true;
        result
    }

    // -- schema inspection ---------------------------------------------------

    /// Names of the user tables present in the backing store.
    pub fn database_tables(&mut self) -> Result<Vec<String>> {
        self.ensure_tx()?;
        let sql = self.dialect.list_tables_sql().to_string();
        let mut stmt = self.conn.conn().prepare_cached(&sql)?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut tables = Vec::new();
        for row in rows {
            tables.push(row?);
        }
        Ok(tables)
    }

    /// Installed schema version, read from the metadata table.
    pub fn database_version(&mut self) -> Result<u32> {
        let value = self
            .metadata("version")?
            .ok_or_else(|| StoreError::Schema("no schema version recorded".into()))?;
        value
            .parse::<u32>()
            .map_err(|_| StoreError::Schema(format!("unparseable schema version '{value}'")))
    }

    /// Runs a schema script, one statement at a time, inside this
    /// connection's transaction.
    pub fn execute_script(&mut self, script: &str) -> Result<()> {
        self.ensure_tx()?;
        for stmt in split_statements(script) {
            self.conn.conn().execute_batch(&stmt)?;
        }
        Ok(())
    }

    // -- metadata ------------------------------------------------------------

    /// Value stored under a metadata key.
    pub fn metadata(&mut self, key: &str) -> Result<Option<String>> {
        self.ensure_tx()?;
        let mut stmt = self
            .conn
            .conn()
            .prepare_cached("SELECT mvalue FROM metadata WHERE mkey = ?1")?;
        Ok(stmt
            .query_row(params![key], |row| row.get::<_, String>(0))
            .optional()?)
    }

    /// Stores a metadata key/value pair, replacing any previous value.
    pub fn set_metadata(&mut self, key: &str, value: &str) -> Result<()> {
        self.ensure_tx()?;
        self.conn.conn().execute(
            "INSERT OR REPLACE INTO metadata (mkey, mvalue) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    // -- nodes ---------------------------------------------------------------

    /// Loads a node by identifier, consulting the cache first.
    pub fn node_by_id(&mut self, id: NodeId) -> Result<Option<Node>> {
        if let Some(node) = self.cache.node(id) {
            return Ok(Some(node));
        }
        self.ensure_tx()?;
        let mut stmt = self
            .conn
            .conn()
            .prepare_cached("SELECT id, ntype, svalue, lang, ltype FROM nodes WHERE id = ?1")?;
        let node = stmt.query_row(params![id], row_to_node).optional()?;
        if let Some(node) = node.clone() {
            self.cache.put_node(node);
        }
        Ok(node)
    }

    /// Looks up the node interning the given IRI.
    pub fn uri_by_value(&mut self, uri: &str) -> Result<Option<Node>> {
        self.ensure_tx()?;
        let mut stmt = self.conn.conn().prepare_cached(
            "SELECT id, ntype, svalue, lang, ltype FROM nodes WHERE ntype = 'uri' AND svalue = ?1",
        )?;
        let node = stmt.query_row(params![uri], row_to_node).optional()?;
        if let Some(node) = node.clone() {
            self.cache.put_node(node);
        }
        Ok(node)
    }

    /// Interns a resource node, returning the existing row when present.
    pub fn store_uri(&mut self, uri: &str) -> Result<Node> {
        if let Some(node) = self.uri_by_value(uri)? {
            return Ok(node);
        }
        self.conn.conn().execute(
            "INSERT INTO nodes (ntype, svalue) VALUES ('uri', ?1)",
            params![uri],
        )?;
        let node = Node::Uri {
            id: self.conn.conn().last_insert_rowid(),
            uri: uri.to_string(),
        };
        self.cache.put_node(node.clone());
        Ok(node)
    }

    /// Interns a literal node, returning the existing row when present.
    pub fn store_literal(
        &mut self,
        content: &str,
        lang: Option<&str>,
        ltype: Option<NodeId>,
    ) -> Result<Node> {
        self.ensure_tx()?;
        let mut stmt = self.conn.conn().prepare_cached(
            "SELECT id, ntype, svalue, lang, ltype FROM nodes \
             WHERE ntype = 'literal' AND svalue = ?1 AND lang IS ?2 AND ltype IS ?3",
        )?;
        if let Some(node) = stmt
            .query_row(params![content, lang, ltype], row_to_node)
            .optional()?
        {
            self.cache.put_node(node.clone());
            return Ok(node);
        }
        self.conn.conn().execute(
            "INSERT INTO nodes (ntype, svalue, lang, ltype) VALUES ('literal', ?1, ?2, ?3)",
            params![content, lang, ltype],
        )?;
        let node = Node::Literal {
            id: self.conn.conn().last_insert_rowid(),
            content: content.to_string(),
            lang: lang.map(str::to_string),
            ltype,
        };
        self.cache.put_node(node.clone());
        Ok(node)
    }

    /// Interns an anonymous node by label, returning the existing row when
    /// present.
    pub fn store_anon(&mut self, label: &str) -> Result<Node> {
        self.ensure_tx()?;
        let mut stmt = self.conn.conn().prepare_cached(
            "SELECT id, ntype, svalue, lang, ltype FROM nodes \
             WHERE ntype = 'bnode' AND svalue = ?1",
        )?;
        if let Some(node) = stmt.query_row(params![label], row_to_node).optional()? {
            self.cache.put_node(node.clone());
            return Ok(node);
        }
        self.conn.conn().execute(
            "INSERT INTO nodes (ntype, svalue) VALUES ('bnode', ?1)",
            params![label],
        )?;
        let node = Node::Anon {
            id: self.conn.conn().last_insert_rowid(),
            label: label.to_string(),
        };
        self.cache.put_node(node.clone());
        Ok(node)
    }

    // -- triples -------------------------------------------------------------

    /// Stores a new triple row.
    pub fn add_triple(&mut self, spec: TripleSpec) -> Result<Triple> {
        self.ensure_tx()?;
        self.conn.conn().execute(
            "INSERT INTO triples (subject, predicate, object, context, creator, inferred, deleted) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
            params![
                spec.subject,
                spec.predicate,
                spec.object,
                spec.context,
                spec.creator,
                spec.inferred,
            ],
        )?;
        let triple = Triple {
            id: self.conn.conn().last_insert_rowid(),
            subject: spec.subject,
            predicate: spec.predicate,
            object: spec.object,
            context: spec.context,
            creator: spec.creator,
            inferred: spec.inferred,
            deleted: false,
        };
        self.cache.put_triple(triple);
        Ok(triple)
    }

    /// Loads a triple by identifier, consulting the cache first.
    pub fn triple_by_id(&mut self, id: TripleId) -> Result<Option<Triple>> {
        if let Some(triple) = self.cache.triple(id) {
            return Ok(Some(triple));
        }
        self.ensure_tx()?;
        let mut stmt = self.conn.conn().prepare_cached(
            "SELECT id, subject, predicate, object, context, creator, inferred, deleted \
             FROM triples WHERE id = ?1",
        )?;
        let triple = stmt.query_row(params![id], row_to_triple).optional()?;
        if let Some(triple) = triple {
            self.cache.put_triple(triple);
        }
        Ok(triple)
    }

    /// Soft-deletes a triple. The row stays in place, invisible to queries,
    /// until the garbage collector reclaims it. Returns whether a live row
    /// was marked.
    pub fn delete_triple(&mut self, id: TripleId) -> Result<bool> {
        self.ensure_tx()?;
        let changed = self.conn.conn().execute(
            "UPDATE triples SET deleted = 1 WHERE id = ?1 AND deleted = 0",
            params![id],
        )?;
        self.cache.evict_triple(id);
        Ok(changed > 0)
    }

    /// Fetches one id-ordered batch of triples matching `pattern`, starting
    /// strictly after `after`. Powers [`TripleResult`]; also usable directly
    /// for bounded scans.
    pub fn triples_matching(
        &mut self,
        pattern: &TriplePattern,
        after: TripleId,
        limit: usize,
    ) -> Result<Vec<Triple>> {
        self.ensure_tx()?;
        let (sql, binds) = pattern_batch_sql(pattern, after, limit);
        let mut stmt = self.conn.conn().prepare_cached(&sql)?;
        let rows = stmt.query_map(params_from_iter(binds), row_to_triple)?;
        let mut batch = Vec::new();
        for row in rows {
            let triple = row?;
            self.cache.put_triple(triple);
            batch.push(triple);
        }
        Ok(batch)
    }

    // -- namespaces ----------------------------------------------------------

    /// Stores a namespace binding, replacing any previous URI for the prefix.
    pub fn store_namespace(&mut self, prefix: &str, uri: &str) -> Result<()> {
        self.ensure_tx()?;
        self.conn.conn().execute(
            "INSERT OR REPLACE INTO namespaces (prefix, uri) VALUES (?1, ?2)",
            params![prefix, uri],
        )?;
        Ok(())
    }

    /// URI bound to a namespace prefix.
    pub fn namespace_by_prefix(&mut self, prefix: &str) -> Result<Option<String>> {
        self.ensure_tx()?;
        let mut stmt = self
            .conn
            .conn()
            .prepare_cached("SELECT uri FROM namespaces WHERE prefix = ?1")?;
        Ok(stmt
            .query_row(params![prefix], |row| row.get::<_, String>(0))
            .optional()?)
    }

    /// All namespace bindings, ordered by prefix.
    pub fn namespaces(&mut self) -> Result<Vec<(String, String)>> {
        self.ensure_tx()?;
        let mut stmt = self
            .conn
            .conn()
            .prepare_cached("SELECT prefix, uri FROM namespaces ORDER BY prefix")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

impl Drop for StoreConnection {
    fn drop(&mut self) {
        if !self.closed {
            debug!(conn_id = self.conn.id(), "connection.dropped_unclosed");
            let _ = self.finish();
        }
    }
}

fn row_to_node(row: &Row<'_>) -> rusqlite::Result<Node> {
    let id: NodeId = row.get(0)?;
    let ntype: String = row.get(1)?;
    let svalue: String = row.get(2)?;
    match ntype.as_str() {
        "uri" => Ok(Node::Uri { id, uri: svalue }),
        "literal" => Ok(Node::Literal {
            id,
            content: svalue,
            lang: row.get(3)?,
            ltype: row.get(4)?,
        }),
        "bnode" => Ok(Node::Anon { id, label: svalue }),
        other => Err(rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::other(format!("unknown node type '{other}'"))),
        )),
    }
}

fn row_to_triple(row: &Row<'_>) -> rusqlite::Result<Triple> {
    Ok(Triple {
        id: row.get(0)?,
        subject: row.get(1)?,
        predicate: row.get(2)?,
        object: row.get(3)?,
        context: row.get(4)?,
        creator: row.get(5)?,
        inferred: row.get(6)?,
        deleted: row.get(7)?,
    })
}

fn pattern_batch_sql(pattern: &TriplePattern, after: TripleId, limit: usize) -> (String, Vec<i64>) {
    let mut sql = String::from(
        "SELECT id, subject, predicate, object, context, creator, inferred, deleted \
         FROM triples WHERE deleted = 0 AND id > ?",
    );
    let mut binds: Vec<i64> = vec![after];
    for (column, value) in [
        ("subject", pattern.subject),
        ("predicate", pattern.predicate),
        ("object", pattern.object),
        ("context", pattern.context),
    ] {
        if let Some(value) = value {
            sql.push_str(" AND ");
            sql.push_str(column);
            sql.push_str(" = ?");
            binds.push(value);
        }
    }
    if !pattern.include_inferred {
        sql.push_str(" AND inferred = 0");
    }
    sql.push_str(" ORDER BY id LIMIT ?");
    binds.push(limit as i64);
    (sql, binds)
}

/// Lazily-produced, single-pass sequence of triples bound to its own
/// connection.
///
/// Rows are fetched in id-ordered batches; the connection commits and closes
/// itself when the sequence is exhausted or explicitly
/// [`close`](TripleResult::close)d. Consumers abandoning the iterator leak a
/// pooled connection until drop; the drop hook releases it and logs the leak,
/// but scoped release is the contract.
pub struct TripleResult {
    conn: Option<StoreConnection>,
    pattern: TriplePattern,
    batch_size: usize,
    buffer: VecDeque<Triple>,
    last_id: TripleId,
    finished: bool,
}

impl TripleResult {
    pub(crate) fn new(conn: StoreConnection, pattern: TriplePattern, batch_size: usize) -> Self {
        Self {
            conn: Some(conn),
            pattern,
            batch_size: batch_size.max(1),
            buffer: VecDeque::new(),
            last_id: 0,
            finished: false,
        }
    }

    /// Commits and releases the underlying connection. Idempotent; called
    /// automatically when iteration completes.
    pub fn close(&mut self) -> Result<()> {
        self.finished = true;
        if let Some(mut conn) = self.conn.take() {
            conn.commit()?;
            conn.close()?;
        }
        Ok(())
    }

    fn fetch(&mut self) -> Result<()> {
        let Some(conn) = self.conn.as_mut() else {
            self.finished = true;
            return Ok(());
        };
        let batch = conn.triples_matching(&self.pattern, self.last_id, self.batch_size)?;
        if let Some(last) = batch.last() {
            self.last_id = last.id;
        }
        let exhausted = batch.len() < self.batch_size;
        self.buffer.extend(batch);
        if exhausted {
            // everything matching is buffered; release the connection early
            self.close()?;
        }
        Ok(())
    }
}

impl Iterator for TripleResult {
    type Item = Result<Triple>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(triple) = self.buffer.pop_front() {
                return Some(Ok(triple));
            }
            if self.finished {
                return None;
            }
            if let Err(err) = self.fetch() {
                self.finished = true;
                if let Some(conn) = self.conn.take() {
                    let _ = conn.close();
                }
                return Some(Err(err));
            }
        }
    }
}

impl Drop for TripleResult {
    fn drop(&mut self) {
        if self.conn.is_some() {
            warn!("triple result dropped before exhaustion; releasing its connection");
            let _ = self.close();
        }
    }
}
