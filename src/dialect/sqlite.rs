//! Bundled SQLite dialect.

use rusqlite::Connection;

use crate::error::{Result, StoreError};

use super::Dialect;

const CREATE_BASE: &str = include_str!("scripts/create_base.sql");
const DROP_BASE: &str = include_str!("scripts/drop_base.sql");
const UPGRADE_BASE_1_2: &str = include_str!("scripts/upgrade_base_1_2.sql");

/// SQLite backend dialect with compiled-in schema scripts.
///
/// Sessions run in WAL mode, which gives every transaction a stable read
/// snapshot; that is the isolation the sweep's reachability argument relies
/// on. Backends with weaker defaults set their isolation level in
/// [`Dialect::init_session`].
#[derive(Debug, Default)]
pub struct SqliteDialect;

impl SqliteDialect {
    /// Creates the dialect.
    pub fn new() -> Self {
        Self
    }
}

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn schema_version(&self) -> u32 {
        2
    }

    fn create_script(&self, script: &str) -> Result<String> {
        match script {
            "base" => Ok(CREATE_BASE.to_string()),
            other => Err(StoreError::Schema(format!(
                "no create script named '{other}' for dialect sqlite"
            ))),
        }
    }

    fn drop_script(&self, script: &str) -> Result<String> {
        match script {
            "base" => Ok(DROP_BASE.to_string()),
            other => Err(StoreError::Schema(format!(
                "no drop script named '{other}' for dialect sqlite"
            ))),
        }
    }

    fn migration_script(&self, from_version: u32, script: &str) -> Result<Option<String>> {
        match (from_version, script) {
            (1, "base") => Ok(Some(UPGRADE_BASE_1_2.to_string())),
            _ => Ok(None),
        }
    }

    fn list_tables_sql(&self) -> &str {
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'"
    }

    fn init_session(&self, conn: &Connection) -> Result<()> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Ok(())
    }
}
