//! Dependency-driven garbage collection of unreferenced nodes and triples.
//!
//! Deleting a triple only soft-marks its row: the nodes it references are
//! shared with other triples and with extension tables registered by
//! collaborating modules. The collector computes reachability across every
//! registered dependency and physically removes rows nothing references any
//! more. One sweep is one transaction; partial reclamation is never
//! committed.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Instant, SystemTime};

use parking_lot::{Mutex, RwLock};
use rusqlite::TransactionBehavior;
use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};

use super::config::GcConfig;
use super::pool::ConnectionPool;

/// A column in an external table holding foreign references to node or
/// triple identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableDependency {
    /// Referencing table name.
    pub table: String,
    /// Referencing column name.
    pub column: String,
}

impl TableDependency {
    fn new(table: &str, column: &str) -> Result<Self> {
        for name in [table, column] {
            if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                // these names are spliced into sweep SQL verbatim
                return Err(StoreError::InvalidArgument(format!(
                    "'{name}' is not a plain identifier"
                )));
            }
        }
        Ok(Self {
            table: table.to_string(),
            column: column.to_string(),
        })
    }
}

#[derive(Default)]
struct DependencyRegistry {
    node: Vec<TableDependency>,
    triple: Vec<TableDependency>,
}

/// What started a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepTrigger {
    /// The interval schedule fired.
    Timer,
    /// An explicit request, either a caller's synchronous sweep or a nudge
    /// sent to the background worker.
    Manual,
}

/// Statistics of one completed sweep.
#[derive(Debug, Clone)]
pub struct SweepStats {
    /// What started the sweep.
    pub trigger: SweepTrigger,
    /// Soft-deleted triple rows physically removed.
    pub triples_removed: usize,
    /// Unreferenced node rows physically removed.
    pub nodes_removed: usize,
    /// Wall-clock duration of the sweep.
    pub run_millis: u64,
    /// When the sweep began.
    pub started_at: SystemTime,
    /// When the sweep committed.
    pub finished_at: SystemTime,
}

enum GcMessage {
    Trigger,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GcState {
    Stopped,
    Running,
    Terminated,
}

struct GcLifecycle {
    state: GcState,
    sender: Option<Sender<GcMessage>>,
    worker: Option<thread::JoinHandle<()>>,
}

pub(crate) struct GcShared {
    pool: Arc<ConnectionPool>,
    cfg: GcConfig,
    registry: RwLock<DependencyRegistry>,
    last_sweep: Mutex<Option<SweepStats>>,
}

/// Background collector with a `Stopped → Running → Terminated` lifecycle.
///
/// Dependencies are normally registered during setup, before
/// [`start`](GarbageCollector::start); late registration is accepted and
/// takes effect from the next sweep, since every sweep snapshots the
/// registry when it begins.
pub struct GarbageCollector {
    shared: Arc<GcShared>,
    lifecycle: Mutex<GcLifecycle>,
}

impl GarbageCollector {
    pub(crate) fn new(pool: Arc<ConnectionPool>, cfg: GcConfig) -> Self {
        Self {
            shared: Arc::new(GcShared {
                pool,
                cfg,
                registry: RwLock::new(DependencyRegistry::default()),
                last_sweep: Mutex::new(None),
            }),
            lifecycle: Mutex::new(GcLifecycle {
                state: GcState::Stopped,
                sender: None,
                worker: None,
            }),
        }
    }

    /// Registers a column holding foreign references into the `nodes` table.
    pub fn add_node_table_dependency(&self, table: &str, column: &str) -> Result<()> {
        let dep = TableDependency::new(table, column)?;
        let mut registry = self.shared.registry.write();
        if !registry.node.contains(&dep) {
            registry.node.push(dep);
        }
        Ok(())
    }

    /// Registers a column holding foreign references into the `triples`
    /// table.
    pub fn add_triple_table_dependency(&self, table: &str, column: &str) -> Result<()> {
        let dep = TableDependency::new(table, column)?;
        let mut registry = self.shared.registry.write();
        if !registry.triple.contains(&dep) {
            registry.triple.push(dep);
        }
        Ok(())
    }

    /// Starts the background schedule. Valid exactly once; a collector that
    /// was shut down cannot be restarted.
    pub(crate) fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        match lifecycle.state {
            GcState::Running => return Err(StoreError::InvalidState("collector already running")),
            GcState::Terminated => {
                return Err(StoreError::InvalidState("collector cannot be restarted"))
            }
            GcState::Stopped => {}
        }
        if !self.shared.cfg.enabled {
            debug!("gc.schedule.disabled");
            lifecycle.state = GcState::Running;
            return Ok(());
        }
        let (sender, receiver) = mpsc::channel();
        let shared = Arc::clone(&self.shared);
        let worker = thread::Builder::new()
            .name("store-gc".into())
            .spawn(move || collector_loop(shared, receiver))?;
        lifecycle.sender = Some(sender);
        lifecycle.worker = Some(worker);
        lifecycle.state = GcState::Running;
        info!(interval_ms = self.shared.cfg.interval.as_millis() as u64, "gc.schedule.started");
        Ok(())
    }

    /// Stops the background schedule and waits for the worker to exit.
    pub(crate) fn shutdown(&self) {
        let mut lifecycle = self.lifecycle.lock();
        let was_running = lifecycle.state == GcState::Running;
        lifecycle.state = GcState::Terminated;
        if let Some(sender) = lifecycle.sender.take() {
            let _ = sender.send(GcMessage::Shutdown);
        }
        let worker = lifecycle.worker.take();
        drop(lifecycle);
        if let Some(worker) = worker {
            if worker.join().is_err() {
                warn!("gc.worker.panicked");
            }
        }
        if was_running {
            debug!("gc.schedule.stopped");
        }
    }

    /// Asks the background worker for an immediate sweep. A no-op when the
    /// schedule is not running.
    pub fn trigger(&self) {
        let lifecycle = self.lifecycle.lock();
        if let Some(sender) = lifecycle.sender.as_ref() {
            let _ = sender.send(GcMessage::Trigger);
        }
    }

    /// Runs one sweep on the caller's thread and returns its statistics.
    pub fn sweep_now(&self) -> Result<SweepStats> {
        self.shared.sweep(SweepTrigger::Manual)
    }

    /// Statistics of the most recent completed sweep.
    pub fn last_sweep_stats(&self) -> Option<SweepStats> {
        self.shared.last_sweep.lock().clone()
    }
}

fn collector_loop(shared: Arc<GcShared>, receiver: Receiver<GcMessage>) {
    loop {
        match receiver.recv_timeout(shared.cfg.interval) {
            Ok(GcMessage::Trigger) => shared.sweep_logged(SweepTrigger::Manual),
            Ok(GcMessage::Shutdown) => break,
            Err(RecvTimeoutError::Timeout) => shared.sweep_logged(SweepTrigger::Timer),
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

impl GcShared {
    /// Background entry point: failures are logged and the cycle skipped,
    /// never propagated.
    fn sweep_logged(&self, trigger: SweepTrigger) {
        if let Err(err) = self.sweep(trigger) {
            warn!(error = %err, "gc.sweep.failed");
        }
    }

    fn sweep(&self, trigger: SweepTrigger) -> Result<SweepStats> {
        let started_at = SystemTime::now();
        let started = Instant::now();

        // snapshot the registry; registrations landing mid-sweep take
        // effect next cycle
        let (triple_sql, node_sql) = {
            let registry = self.registry.read();
            (
                triple_sweep_sql(&registry.triple),
                node_sweep_sql(&registry.node),
            )
        };

        let mut leased = self.pool.checkout()?;
        let tx = leased
            .conn_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        // triples go first: node reachability below sees only the rows that
        // survived this statement
        let triples_removed = tx.execute(&triple_sql, [])?;
        let nodes_removed = tx.execute(&node_sql, [])?;
        tx.commit()?;

        let stats = SweepStats {
            trigger,
            triples_removed,
            nodes_removed,
            run_millis: started.elapsed().as_millis() as u64,
            started_at,
            finished_at: SystemTime::now(),
        };
        *self.last_sweep.lock() = Some(stats.clone());

        if stats.triples_removed > 0 || stats.nodes_removed > 0 {
            info!(
                trigger = ?stats.trigger,
                triples = stats.triples_removed,
                nodes = stats.nodes_removed,
                run_millis = stats.run_millis,
                "gc.sweep.completed"
            );
        } else {
            debug!(trigger = ?stats.trigger, run_millis = stats.run_millis, "gc.sweep.noop");
        }
        Ok(stats)
    }
}

fn not_exists_clause(dep: &TableDependency, alias_idx: usize, owner_id: &str) -> String {
    format!(
        " AND NOT EXISTS (SELECT 1 FROM \"{table}\" dep{alias_idx} \
         WHERE dep{alias_idx}.\"{column}\" = {owner_id})",
        table = dep.table,
        column = dep.column,
    )
}

fn triple_sweep_sql(deps: &[TableDependency]) -> String {
    let mut sql = String::from("DELETE FROM triples WHERE deleted = 1");
    for (idx, dep) in deps.iter().enumerate() {
        sql.push_str(&not_exists_clause(dep, idx, "triples.id"));
    }
    sql
}

fn node_sweep_sql(deps: &[TableDependency]) -> String {
    let mut sql = String::from("DELETE FROM nodes WHERE 1 = 1");
    for (idx, dep) in deps.iter().enumerate() {
        sql.push_str(&not_exists_clause(dep, idx, "nodes.id"));
    }
    sql
}
