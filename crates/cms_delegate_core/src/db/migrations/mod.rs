//! Embedded schema steps for the entity store.
//!
//! Each step is one SQL file compiled into the binary. `PRAGMA user_version`
//! records the last applied step; pending steps run in one transaction, so a
//! store is either fully upgraded or left at its previous version.
//!
//! Steps:
//! 1. `entities` rows keyed by `(database_id, target, id)`.
//! 2. `entities_fts` full-text index.

use crate::db::{DbError, DbResult};
use log::{debug, info};
use rusqlite::Connection;

/// Ordered `(version, sql)` steps; versions start at 1 and increase by one.
const STEPS: [(u32, &str); 2] = [
    (1, include_str!("0001_entities.sql")),
    (2, include_str!("0002_entities_fts.sql")),
];

/// Schema version a fully migrated store reports.
pub fn latest_version() -> u32 {
    STEPS.last().map_or(0, |(version, _)| *version)
}

/// Brings `conn` up to `latest_version()`.
///
/// Stores already at the latest version are not touched. Stores from a newer
/// build fail with `DbError::SchemaTooNew`.
pub fn apply_migrations(conn: &mut Connection) -> DbResult<()> {
    let found: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    let supported = latest_version();
    if found > supported {
        return Err(DbError::SchemaTooNew { found, supported });
    }

    let pending = STEPS
        .iter()
        .filter(|(version, _)| *version > found)
        .collect::<Vec<_>>();
    if pending.is_empty() {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for (version, sql) in pending {
        debug!("event=db_migrate module=db status=apply version={version}");
        tx.execute_batch(sql)?;
        // PRAGMA does not accept bound parameters.
        tx.execute_batch(&format!("PRAGMA user_version = {version};"))?;
    }
    tx.commit()?;

    info!(
        "event=db_migrate module=db status=ok from_version={} to_version={}",
        found, supported
    );
    Ok(())
}
