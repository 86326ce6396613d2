//! Schema creation, inspection and migration.
//!
//! Script text is opaque data from the dialect; this module only splits it
//! into statements and executes them on the caller's connection. Nothing here
//! commits or rolls back; the facade owns that policy.

use tracing::{debug, info};

use crate::dialect::Dialect;
use crate::error::Result;

use super::connection::StoreConnection;

/// What [`ensure_schema`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SchemaAction {
    /// Required tables were missing; the create script ran.
    Created,
    /// All tables present; a migration script ran.
    Migrated {
        /// Version found in the store.
        from: u32,
        /// Version after the migration.
        to: u32,
    },
    /// All tables present and no migration path applies.
    UpToDate {
        /// Version found in the store.
        version: u32,
    },
}

/// Brings the schema up to the dialect's current version on the given
/// connection, without committing.
pub(crate) fn ensure_schema(
    conn: &mut StoreConnection,
    dialect: &dyn Dialect,
    script: &str,
    required_tables: &[&str],
) -> Result<SchemaAction> {
    let tables = conn.database_tables()?;
    debug!(?tables, "schema.tables");

    let create_needed = required_tables
        .iter()
        .any(|required| !tables.iter().any(|present| present == required));

    if create_needed {
        info!(script, dialect = dialect.name(), "schema.create");
        let text = dialect.create_script(script)?;
        conn.execute_script(&text)?;
        return Ok(SchemaAction::Created);
    }

    let version = conn.database_version()?;
    match dialect.migration_script(version, script)? {
        Some(text) => {
            let to = dialect.schema_version();
            info!(from = version, to, script, "schema.migrate");
            conn.execute_script(&text)?;
            Ok(SchemaAction::Migrated { from: version, to })
        }
        None => {
            debug!(version, "schema.up_to_date");
            Ok(SchemaAction::UpToDate { version })
        }
    }
}

/// Splits a schema script into executable statements.
///
/// Statements end at `;` outside string literals; `--` line comments are
/// stripped. No further SQL awareness.
pub(crate) fn split_statements(script: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut chars = script.chars().peekable();
    let mut in_string = false;
    while let Some(c) = chars.next() {
        if in_string {
            current.push(c);
            if c == '\'' {
                if chars.peek() == Some(&'\'') {
                    // escaped quote
                    if let Some(next) = chars.next() {
                        current.push(next);
                    }
                } else {
                    in_string = false;
                }
            }
            continue;
        }
        match c {
            '\'' => {
                in_string = true;
                current.push(c);
            }
            '-' if chars.peek() == Some(&'-') => {
                for skipped in chars.by_ref() {
                    if skipped == '\n' {
                        break;
                    }
                }
                current.push('\n');
            }
            ';' => {
                let stmt = current.trim();
                if !stmt.is_empty() {
                    out.push(stmt.to_string());
                }
                current.clear();
            }
            _ => current.push(c),
        }
    }
    let tail = current.trim();
    if !tail.is_empty() {
        out.push(tail.to_string());
    }
    out
}
