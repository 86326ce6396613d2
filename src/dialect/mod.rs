//! SQL dialect abstraction.
//!
//! The persistence core treats schema scripts as opaque data: a dialect hands
//! out create/drop/migration script text and a handful of backend-specific
//! queries, and the core only splits scripts into statements and executes
//! them. The bundled [`SqliteDialect`] ships its scripts compiled in; a
//! dialect loading scripts from disk reports read failures through the
//! `Result`, which the schema-init path treats as non-fatal.

mod sqlite;

pub use sqlite::SqliteDialect;

use rusqlite::Connection;

use crate::error::Result;

/// Backend-specific behavior required by the persistence core.
pub trait Dialect: Send + Sync {
    /// Short backend name, used in logs.
    fn name(&self) -> &'static str;

    /// Schema version the dialect's create scripts produce.
    fn schema_version(&self) -> u32;

    /// Full text of the create script with the given name (e.g. `"base"`).
    fn create_script(&self, script: &str) -> Result<String>;

    /// Full text of the drop script with the given name.
    fn drop_script(&self, script: &str) -> Result<String>;

    /// Migration script from `from_version` to the current version, or `None`
    /// if the installed schema needs no upgrade.
    fn migration_script(&self, from_version: u32, script: &str) -> Result<Option<String>>;

    /// Query returning the names of all user tables, one per row.
    fn list_tables_sql(&self) -> &str;

    /// Per-connection session setup run on every freshly opened physical
    /// connection, before it enters the pool.
    fn init_session(&self, conn: &Connection) -> Result<()>;
}
