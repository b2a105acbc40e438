//! SQLite history layer.

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::{Path, PathBuf};

use super::{LayerError, LayerSink, LayerTier, WriteDiscipline};
use crate::evidence::SourceKind;
use crate::snapshot::StateSnapshot;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS snapshots (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id  TEXT NOT NULL,
    captured_at TEXT NOT NULL,
    phase       TEXT NOT NULL,
    progress    REAL NOT NULL,
    payload     TEXT NOT NULL,
    written_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_snapshots_session ON snapshots(session_id);
";

/// Keeps every stored snapshot as a JSON row; reads return the latest.
#[derive(Debug, Clone)]
pub struct SqliteLayer {
    path: PathBuf,
}

impl SqliteLayer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(path: &Path) -> Result<Connection, LayerError> {
        let db_err = |source| LayerError::Database {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| LayerError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(conn)
    }
}

#[async_trait]
impl LayerSink for SqliteLayer {
    fn id(&self) -> &str {
        "database"
    }

    fn tier(&self) -> LayerTier {
        LayerTier::Secondary
    }

    fn discipline(&self) -> WriteDiscipline {
        WriteDiscipline::Append
    }

    fn source_kind(&self) -> SourceKind {
        SourceKind::Database
    }

    async fn write(&self, snapshot: &StateSnapshot) -> Result<(), LayerError> {
        let payload = serde_json::to_string(snapshot)?;
        let session_id = snapshot.id().to_string();
        let captured_at = snapshot.captured_at.to_rfc3339();
        let phase = snapshot.phase.clone();
        let progress = snapshot.progress;
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || {
            let conn = Self::open(&path)?;
            conn.execute(
                "INSERT INTO snapshots (session_id, captured_at, phase, progress, payload, written_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    session_id,
                    captured_at,
                    phase,
                    progress,
                    payload,
                    chrono::Utc::now().to_rfc3339()
                ],
            )
            .map_err(|source| LayerError::Database {
                path: path.clone(),
                source,
            })?;
            Ok(())
        })
        .await?
    }

    async fn read(&self) -> Result<Option<String>, LayerError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            if !path.exists() {
                return Ok(None);
            }
            let conn = Self::open(&path)?;
            conn.query_row(
                "SELECT payload FROM snapshots ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(|source| LayerError::Database {
                path: path.clone(),
                source,
            })
        })
        .await?
    }
}
