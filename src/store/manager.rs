//! Top-level persistence façade.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::dialect::{Dialect, SqliteDialect};
use crate::error::{Result, StoreError};
use crate::model::TriplePattern;

use super::cache::CacheManager;
use super::config::StoreConfig;
use super::connection::{StoreConnection, TripleResult};
use super::gc::{GarbageCollector, SweepStats};
use super::pool::{ConnectionPool, PoolStats};
use super::schema::{ensure_schema, SchemaAction};

/// Tables the zero-argument [`TripleStore::init_database`] checks for.
const BASE_TABLES: [&str; 4] = ["nodes", "triples", "namespaces", "metadata"];

/// Owns the connection pool, the cache, the dependency registry and the
/// garbage collector; issues transactional connections and runs schema
/// lifecycle operations.
///
/// Expected call order from the hosting process: [`open`](Self::open),
/// dependency registration by every storage extension, [`init_database`]
/// (or the named variant), [`initialise`], normal operation,
/// [`shutdown`], with `initialise` and `shutdown` called exactly once each.
///
/// [`init_database`]: Self::init_database
/// [`initialise`]: Self::initialise
/// [`shutdown`]: Self::shutdown
pub struct TripleStore {
    config: StoreConfig,
    dialect: Arc<dyn Dialect>,
    pool: Arc<ConnectionPool>,
    cache: Arc<CacheManager>,
    gc: GarbageCollector,
}

impl TripleStore {
    /// Opens a store on the bundled SQLite dialect.
    pub fn open(config: StoreConfig) -> Result<Self> {
        Self::open_with_dialect(config, Arc::new(SqliteDialect::new()))
    }

    /// Opens a store on an explicit dialect.
    pub fn open_with_dialect(config: StoreConfig, dialect: Arc<dyn Dialect>) -> Result<Self> {
        let pool = Arc::new(ConnectionPool::open(
            &config.path,
            config.pool.clone(),
            Arc::clone(&dialect),
        )?);
        let cache = Arc::new(CacheManager::new(&config.cache));
        let gc = GarbageCollector::new(Arc::clone(&pool), config.gc.clone());

        // every column of the core schema that can hold a node reference
        for column in ["subject", "predicate", "object", "context", "creator"] {
            gc.add_node_table_dependency("triples", column)?;
        }
        gc.add_node_table_dependency("nodes", "ltype")?;

        let store = Self {
            config,
            dialect,
            pool,
            cache,
            gc,
        };
        store.log_pool_info();
        Ok(store)
    }

    /// The dialect this store runs on.
    pub fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    /// The node/triple cache.
    pub fn cache_manager(&self) -> &CacheManager {
        &self.cache
    }

    /// Creates or upgrades the base schema (`"base"` script, the core table
    /// set).
    pub fn init_database(&self) -> Result<()> {
        self.init_database_with("base", &BASE_TABLES)
    }

    /// Creates or upgrades the schema for a named script.
    ///
    /// Lists the existing tables; if any of `required_tables` is missing the
    /// dialect's create script runs, otherwise the stored schema version is
    /// read and a migration script applied when the dialect has one for it.
    /// Commits on success. SQL failures roll back and propagate. I/O
    /// failures obtaining script text roll back, log and are swallowed, so a
    /// store whose schema is already correct can start without its optional
    /// scripts on disk.
    pub fn init_database_with(&self, script: &str, required_tables: &[&str]) -> Result<()> {
        let mut conn = self.connection()?;
        match ensure_schema(&mut conn, self.dialect.as_ref(), script, required_tables) {
            Ok(action) => {
                conn.commit()?;
                conn.close()?;
                if let SchemaAction::UpToDate { version } = action {
                    info!(version, "schema.connected");
                }
                Ok(())
            }
            Err(err) => {
                let _ = conn.rollback();
                let _ = conn.close();
                match err {
                    StoreError::Io(_) => {
                        warn!(error = %err, script, "schema.script_unreadable");
                        Ok(())
                    }
                    other => {
                        error!(error = %other, script, "schema.init_failed");
                        Err(other)
                    }
                }
            }
        }
    }

    /// Drops the base schema.
    pub fn drop_database(&self) -> Result<()> {
        self.drop_database_with("base")
    }

    /// Drops the schema for a named script.
    ///
    /// Force-closes every managed connection first so the drop is not blocked
    /// by open transactions. Weak guarantee: every failure in here is logged
    /// and swallowed, including failing to acquire the drop connection;
    /// callers must not assume the drop succeeded.
    pub fn drop_database_with(&self, script: &str) -> Result<()> {
        self.pool.force_close_all();

        let mut conn = match self.connection() {
            Ok(conn) => conn,
            Err(err) => {
                error!(error = %err, "schema.drop.connection_failed");
                return Ok(());
            }
        };
        let dropped = self
            .dialect
            .drop_script(script)
            .and_then(|text| conn.execute_script(&text));
        match dropped {
            Ok(()) => {
                let committed = conn.commit();
                let _ = conn.close();
                match committed {
                    Ok(()) => {
                        self.cache.clear();
                        info!(script, "schema.dropped");
                    }
                    Err(err) => error!(error = %err, script, "schema.drop_failed"),
                }
            }
            Err(err) => {
                let _ = conn.rollback();
                let _ = conn.close();
                error!(error = %err, script, "schema.drop_failed");
            }
        }
        Ok(())
    }

    /// Checks a connection out of the pool, wrapped in a transactional
    /// session. Blocks up to the configured acquire timeout when the pool is
    /// at capacity.
    pub fn connection(&self) -> Result<StoreConnection> {
        let leased = self.pool.checkout()?;
        Ok(StoreConnection::new(
            leased,
            Arc::clone(&self.dialect),
            Arc::clone(&self.cache),
        ))
    }

    /// Registers an external column holding node references, so the
    /// collector treats its rows as reachability roots. Normally called by
    /// extension modules before [`initialise`](Self::initialise).
    pub fn add_node_table_dependency(&self, table: &str, column: &str) -> Result<()> {
        self.gc.add_node_table_dependency(table, column)
    }

    /// Registers an external column holding triple references.
    pub fn add_triple_table_dependency(&self, table: &str, column: &str) -> Result<()> {
        self.gc.add_triple_table_dependency(table, column)
    }

    /// Lists triples matching the pattern on a dedicated connection.
    ///
    /// The returned sequence releases its connection when exhausted or
    /// closed; an abandoned result holds a pooled connection until it is
    /// dropped.
    pub fn list_triples(&self, pattern: TriplePattern) -> Result<TripleResult> {
        let conn = self.connection()?;
        Ok(TripleResult::new(
            conn,
            pattern,
            self.config.query_batch_size,
        ))
    }

    /// Starts the garbage collector's background schedule. Call exactly
    /// once, after dependency registration.
    pub fn initialise(&self) -> Result<()> {
        self.gc.start()
    }

    /// Stops the collector, shuts the cache and closes the pool. Call
    /// exactly once; further use of the store is undefined.
    pub fn shutdown(&self) {
        self.gc.shutdown();
        self.cache.shutdown();
        self.pool.close();
    }

    /// Drops every cached node and triple. In-flight transactions keep the
    /// objects they already fetched.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Runs one garbage collection sweep synchronously.
    pub fn collect_garbage(&self) -> Result<SweepStats> {
        self.gc.sweep_now()
    }

    /// Nudges the background collector to sweep soon.
    pub fn trigger_sweep(&self) {
        self.gc.trigger();
    }

    /// Statistics of the most recent completed sweep.
    pub fn last_sweep_stats(&self) -> Option<SweepStats> {
        self.gc.last_sweep_stats()
    }

    /// Current pool gauges.
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Logs the pool gauges at info level.
    pub fn log_pool_info(&self) {
        let stats = self.pool.stats();
        info!(
            open = stats.open,
            busy = stats.busy,
            idle = stats.idle,
            "pool.status"
        );
    }
}
