//! Ordered fleet schema steps.
//!
//! Each step is one SQL file applied at most once; the file set only grows.

use crate::db::{DbError, DbResult};
use log::info;
use rusqlite::Connection;

struct Step {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const STEPS: &[Step] = &[
    Step {
        version: 1,
        name: "fleet",
        sql: include_str!("0001_fleet.sql"),
    },
    Step {
        version: 2,
        name: "stock",
        sql: include_str!("0002_stock.sql"),
    },
    Step {
        version: 3,
        name: "blanks_waybills",
        sql: include_str!("0003_blanks_waybills.sql"),
    },
];

/// Outcome of one `upgrade` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpgradeReport {
    pub from: u32,
    pub to: u32,
}

impl UpgradeReport {
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

/// Schema version this build writes.
pub fn latest_version() -> u32 {
    STEPS.last().map_or(0, |step| step.version)
}

/// Schema version recorded in the database file.
pub fn schema_version(conn: &Connection) -> DbResult<u32> {
    Ok(conn.query_row("PRAGMA user_version;", [], |row| row.get::<_, u32>(0))?)
}

/// Runs every step above the recorded version in a single transaction.
///
/// # Errors
/// - `DbError::SchemaTooNew` when the file comes from a newer build.
/// - `DbError::Migration` naming the failing step; nothing is kept.
pub fn upgrade(conn: &mut Connection) -> DbResult<UpgradeReport> {
    let from = schema_version(conn)?;
    let supported = latest_version();
    if from > supported {
        return Err(DbError::SchemaTooNew {
            found: from,
            supported,
        });
    }

    let pending = STEPS.iter().filter(|step| step.version > from);
    let tx = conn.transaction()?;
    for step in pending {
        let applied = tx.execute_batch(step.sql).and_then(|()| {
            tx.pragma_update(None, "user_version", step.version)
        });
        applied.map_err(|source| DbError::Migration {
            version: step.version,
            name: step.name,
            source,
        })?;
        info!(
            "event=db_migrate module=db status=ok version={} name={}",
            step.version, step.name
        );
    }
    tx.commit()?;

    Ok(UpgradeReport {
        from,
        to: supported,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_are_strictly_increasing() {
        let versions = STEPS.iter().map(|step| step.version).collect::<Vec<_>>();
        assert!(versions.windows(2).all(|pair| pair[0] < pair[1]));
        assert_eq!(versions.first(), Some(&1));
    }

    #[test]
    fn upgrade_runs_once() {
        let mut conn = Connection::open_in_memory().unwrap();
        let first = upgrade(&mut conn).unwrap();
        assert_eq!(first, UpgradeReport { from: 0, to: latest_version() });
        assert!(first.changed());

        let second = upgrade(&mut conn).unwrap();
        assert!(!second.changed());
        assert_eq!(schema_version(&conn).unwrap(), latest_version());
    }
}
