//! Configuration for the persistence core.

use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration handed to [`super::TripleStore::open`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Location of the backing database.
    pub path: PathBuf,
    /// Backend user name. Ignored by the bundled SQLite dialect.
    pub user: Option<String>,
    /// Backend password. Ignored by the bundled SQLite dialect.
    pub password: Option<String>,
    /// Connection pool tuning.
    pub pool: PoolConfig,
    /// Node/triple cache sizing.
    pub cache: CacheConfig,
    /// Garbage collector schedule.
    pub gc: GcConfig,
    /// Rows fetched per round trip while iterating a triple result.
    pub query_batch_size: usize,
}

impl StoreConfig {
    /// Configuration with defaults for the given database location.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            user: None,
            password: None,
            pool: PoolConfig::default(),
            cache: CacheConfig::default(),
            gc: GcConfig::default(),
            query_batch_size: 512,
        }
    }

    /// Sets backend credentials.
    pub fn credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }

    /// Replaces the pool tuning.
    pub fn pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Replaces the cache sizing.
    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Replaces the collector schedule.
    pub fn gc(mut self, gc: GcConfig) -> Self {
        self.gc = gc;
        self
    }

    /// Sets the result-iteration batch size.
    pub fn query_batch_size(mut self, rows: usize) -> Self {
        self.query_batch_size = rows.max(1);
        self
    }
}

/// Connection pool tuning.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Connections kept open even when idle.
    pub min_size: usize,
    /// Hard upper bound on open connections.
    pub max_size: usize,
    /// Connections opened per growth step when the pool runs dry.
    pub acquire_increment: usize,
    /// How long a checkout blocks before failing with pool exhaustion.
    pub acquire_timeout: Duration,
    /// Idle time after which a connection is probed before reuse.
    pub idle_test_period: Duration,
    /// Prepared statements cached per connection.
    pub max_statements: usize,
    /// Idle time after which connections above `min_size` are retired.
    pub max_idle: Duration,
    /// Wait on a locked backing store before a statement fails busy.
    pub busy_timeout: Duration,
    /// Logs connections that were held suspiciously long when returned.
    pub debug_connections: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: 5,
            max_size: 20,
            acquire_increment: 5,
            acquire_timeout: Duration::from_secs(30),
            idle_test_period: Duration::from_secs(300),
            max_statements: 100,
            max_idle: Duration::from_secs(600),
            busy_timeout: Duration::from_secs(10),
            debug_connections: false,
        }
    }
}

/// Node/triple cache sizing.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Entries in the node cache.
    pub node_capacity: usize,
    /// Entries in the triple cache.
    pub triple_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            node_capacity: 10_000,
            triple_capacity: 10_000,
        }
    }
}

/// Garbage collector schedule.
#[derive(Debug, Clone)]
pub struct GcConfig {
    /// Whether the background schedule runs at all. Manual sweeps work
    /// either way.
    pub enabled: bool,
    /// Pause between timer-driven sweeps.
    pub interval: Duration,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(300),
        }
    }
}
