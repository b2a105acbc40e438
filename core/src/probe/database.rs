//! SQLite connectivity check.

use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::ProbeStatus;

/// Outcome of the storage health check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageHealth {
    pub status: ProbeStatus,
    /// Tables reported by `sqlite_master`.
    pub table_count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StorageHealth {
    pub fn is_connected(&self) -> bool {
        self.status == ProbeStatus::Succeeded
    }
}

/// Open the database read-only, run a liveness query and count tables.
///
/// A missing file is `Unavailable`; an unreadable or corrupt one is `Failed`.
pub fn check(path: &Path) -> StorageHealth {
    if !path.exists() {
        return StorageHealth {
            status: ProbeStatus::Unavailable,
            table_count: None,
            error: Some(format!("{} does not exist", path.display())),
        };
    }

    match query(path) {
        Ok(count) => StorageHealth {
            status: ProbeStatus::Succeeded,
            table_count: Some(count),
            error: None,
        },
        Err(err) => StorageHealth {
            status: ProbeStatus::Failed,
            table_count: None,
            error: Some(err.to_string()),
        },
    }
}

fn query(path: &Path) -> rusqlite::Result<i64> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
    conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'",
        [],
        |row| row.get(0),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn missing_database_is_unavailable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let health = check(&dir.path().join("absent.db"));
        assert_eq!(health.status, ProbeStatus::Unavailable);
        assert!(!health.is_connected());
    }

    #[test]
    fn counts_tables_in_live_database() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("live.db");
        let conn = Connection::open(&path).expect("open");
        conn.execute_batch("CREATE TABLE a (x INTEGER); CREATE TABLE b (y TEXT);")
            .expect("schema");
        drop(conn);

        let health = check(&path);
        assert!(health.is_connected());
        assert_eq!(health.table_count, Some(2));
    }

    #[test]
    fn garbage_file_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("garbage.db");
        std::fs::write(&path, b"this is not a sqlite database at all, not even close")
            .expect("write");

        let health = check(&path);
        assert_eq!(health.status, ProbeStatus::Failed);
        assert!(health.error.is_some());
    }
}
