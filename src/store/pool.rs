//! Bounded pool of physical connections to the backing store.
//!
//! Checkout blocks on a condition variable until a connection frees up or the
//! acquire timeout passes. Every handed-out connection is tracked in a managed
//! registry (id, interrupt handle, checkout time); the registry exists solely
//! so the emergency force-close path can enumerate stragglers; membership
//! does not keep a connection alive, and entries leave the registry exactly
//! when the owning wrapper returns the connection.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use rusqlite::{Connection, InterruptHandle};
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::dialect::Dialect;
use crate::error::{Result, StoreError};

use super::config::PoolConfig;

const UNRETURNED_WARN: Duration = Duration::from_secs(60);

struct IdleEntry {
    conn: Connection,
    id: u64,
    since: Instant,
}

struct PoolState {
    idle: Vec<IdleEntry>,
    /// Connections currently open, idle and checked out together.
    open: usize,
    next_id: u64,
    /// Bumped by force-close; connections leased under an older epoch are
    /// retired instead of re-pooled when they come back.
    epoch: u64,
    closed: bool,
}

struct ManagedEntry {
    handle: InterruptHandle,
    checked_out: Instant,
}

/// Gauges reported by [`ConnectionPool::stats`].
#[derive(Debug, Clone, Copy)]
pub struct PoolStats {
    /// Open physical connections, idle and checked out together.
    pub open: usize,
    /// Connections sitting in the idle list.
    pub idle: usize,
    /// Connections currently checked out.
    pub busy: usize,
}

pub(crate) struct ConnectionPool {
    path: PathBuf,
    cfg: PoolConfig,
    dialect: Arc<dyn Dialect>,
    state: Mutex<PoolState>,
    available: Condvar,
    managed: Mutex<FxHashMap<u64, ManagedEntry>>,
}

impl ConnectionPool {
    /// Opens the pool and pre-populates `min_size` idle connections.
    pub(crate) fn open(path: &Path, cfg: PoolConfig, dialect: Arc<dyn Dialect>) -> Result<Self> {
        if cfg.max_size == 0 || cfg.min_size > cfg.max_size {
            return Err(StoreError::Pool(format!(
                "invalid pool bounds: min {} / max {}",
                cfg.min_size, cfg.max_size
            )));
        }
        let pool = Self {
            path: path.to_path_buf(),
            cfg,
            dialect,
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                open: 0,
                next_id: 0,
                epoch: 0,
                closed: false,
            }),
            available: Condvar::new(),
            managed: Mutex::new(FxHashMap::default()),
        };
        {
            let mut state = pool.state.lock();
            for _ in 0..pool.cfg.min_size {
                let conn = pool.open_physical()?;
                let id = state.next_id;
                state.next_id += 1;
                state.open += 1;
                state.idle.push(IdleEntry {
                    conn,
                    id,
                    since: Instant::now(),
                });
            }
        }
        Ok(pool)
    }

    fn open_physical(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(self.cfg.busy_timeout)?;
        conn.set_prepared_statement_cache_capacity(self.cfg.max_statements);
        self.dialect.init_session(&conn)?;
        Ok(conn)
    }

    fn probe(conn: &Connection) -> bool {
        conn.query_row("SELECT 1", [], |_| Ok(())).is_ok()
    }

    /// Checks a connection out, blocking up to `acquire_timeout` for a free
    /// slot.
    pub(crate) fn checkout(self: &Arc<Self>) -> Result<PooledConn> {
        let deadline = Instant::now() + self.cfg.acquire_timeout;
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(StoreError::Pool("connection pool is closed".into()));
            }

            while let Some(entry) = state.idle.pop() {
                let idle_for = entry.since.elapsed();
                if idle_for >= self.cfg.max_idle && state.open > self.cfg.min_size {
                    state.open -= 1;
                    debug!(conn_id = entry.id, "pool.connection.retired_idle");
                    continue;
                }
                if idle_for >= self.cfg.idle_test_period && !Self::probe(&entry.conn) {
                    state.open -= 1;
                    warn!(conn_id = entry.id, "pool.connection.failed_probe");
                    continue;
                }
                let epoch = state.epoch;
                return Ok(self.lease(entry.conn, entry.id, epoch));
            }

            if state.open < self.cfg.max_size {
                return self.grow(state);
            }

            if self.available.wait_until(&mut state, deadline).timed_out() {
                return Err(StoreError::PoolExhausted(self.cfg.acquire_timeout));
            }
        }
    }

    /// Opens up to `acquire_increment` fresh connections; the first is leased
    /// to the caller, the rest go idle.
    fn grow(
        self: &Arc<Self>,
        mut state: parking_lot::MutexGuard<'_, PoolState>,
    ) -> Result<PooledConn> {
        let want = self
            .cfg
            .acquire_increment
            .clamp(1, self.cfg.max_size - state.open);
        state.open += want;
        drop(state);

        let first = match self.open_physical() {
            Ok(conn) => conn,
            Err(err) => {
                let mut state = self.state.lock();
                state.open -= want;
                self.available.notify_all();
                return Err(err);
            }
        };
        let mut extras = Vec::with_capacity(want - 1);
        for _ in 1..want {
            match self.open_physical() {
                Ok(conn) => extras.push(conn),
                Err(err) => {
                    warn!(error = %err, "pool.grow.partial");
                    break;
                }
            }
        }

        let mut state = self.state.lock();
        let opened = 1 + extras.len();
        state.open -= want - opened;
        let id = state.next_id;
        state.next_id += 1;
        for conn in extras {
            let extra_id = state.next_id;
            state.next_id += 1;
            state.idle.push(IdleEntry {
                conn,
                id: extra_id,
                since: Instant::now(),
            });
            self.available.notify_one();
        }
        // a force-close may have bumped the epoch while the lock was down;
        // these connections were opened after the interrupt, so the current
        // epoch is the right one to lease under
        let lease_epoch = state.epoch;
        drop(state);
        Ok(self.lease(first, id, lease_epoch))
    }

    fn lease(self: &Arc<Self>, conn: Connection, id: u64, epoch: u64) -> PooledConn {
        let now = Instant::now();
        self.managed.lock().insert(
            id,
            ManagedEntry {
                handle: conn.get_interrupt_handle(),
                checked_out: now,
            },
        );
        PooledConn {
            conn: Some(conn),
            id,
            epoch,
            broken: false,
            pool: Arc::clone(self),
        }
    }

    fn checkin(&self, conn: Option<Connection>, id: u64, epoch: u64, broken: bool) {
        let held = self
            .managed
            .lock()
            .remove(&id)
            .map(|entry| entry.checked_out.elapsed());
        if self.cfg.debug_connections {
            if let Some(held) = held.filter(|held| *held >= UNRETURNED_WARN) {
                warn!(conn_id = id, held_ms = held.as_millis() as u64, "pool.connection.slow_return");
            }
        }

        let mut state = self.state.lock();
        match conn {
            Some(conn) if !broken && !state.closed && epoch == state.epoch => {
                state.idle.push(IdleEntry {
                    conn,
                    id,
                    since: Instant::now(),
                });
            }
            _ => {
                state.open -= 1;
            }
        }
        self.available.notify_one();
    }

    /// Interrupts every checked-out connection and retires the idle list.
    ///
    /// Outstanding wrappers keep their (interrupted) connection until they
    /// return it; the epoch bump makes the return retire the connection
    /// rather than re-pool it.
    pub(crate) fn force_close_all(&self) {
        {
            let mut state = self.state.lock();
            state.epoch += 1;
            let drained = state.idle.len();
            state.idle.clear();
            state.open -= drained;
        }
        let mut managed = self.managed.lock();
        for (id, entry) in managed.drain() {
            warn!(conn_id = id, "pool.connection.force_close");
            entry.handle.interrupt();
        }
        drop(managed);
        self.available.notify_all();
    }

    /// Closes the pool: drops idle connections and fails future checkouts.
    /// Checked-out connections are retired as their wrappers return them.
    pub(crate) fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        let drained = state.idle.len();
        state.idle.clear();
        state.open -= drained;
        drop(state);
        self.available.notify_all();
        debug!("pool.closed");
    }

    pub(crate) fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            open: state.open,
            idle: state.idle.len(),
            busy: state.open - state.idle.len(),
        }
    }
}

/// A checked-out physical connection; returns itself to the pool on drop.
pub(crate) struct PooledConn {
    conn: Option<Connection>,
    id: u64,
    epoch: u64,
    broken: bool,
    pool: Arc<ConnectionPool>,
}

impl PooledConn {
    // conn is Some from lease until drop
    pub(crate) fn conn(&self) -> &Connection {
        self.conn.as_ref().expect("pooled connection present")
    }

    pub(crate) fn conn_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("pooled connection present")
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Marks the connection unfit for re-pooling; it is dropped at return.
    pub(crate) fn mark_broken(&mut self) {
        self.broken = true;
    }
}

impl Drop for PooledConn {
    fn drop(&mut self) {
        self.pool
            .checkin(self.conn.take(), self.id, self.epoch, self.broken);
    }
}
