//! Storage layers a snapshot is replicated to.
//!
//! Each layer is an independent sink behind [`LayerSink`]. File layers are
//! table-driven from [`render::LAYER_TEMPLATES`]; the SQLite layer keeps a
//! structured history.

pub mod file;
pub mod render;
pub mod sqlite;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::ContinuityConfig;
use crate::evidence::SourceKind;
use crate::snapshot::StateSnapshot;

pub use file::FileLayer;
pub use render::{LAYER_TEMPLATES, LayerTemplate};
pub use sqlite::SqliteLayer;

/// Reliability tier of a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerTier {
    Primary,
    Secondary,
    Tertiary,
    Quaternary,
}

impl fmt::Display for LayerTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
            Self::Tertiary => "tertiary",
            Self::Quaternary => "quaternary",
        })
    }
}

/// How a layer treats existing content on write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteDiscipline {
    /// Replace the whole content; reads see only the latest snapshot.
    Overwrite,
    /// Add an entry; reads see the full history.
    Append,
}

/// Errors from layer I/O.
#[derive(Debug, thiserror::Error)]
pub enum LayerError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Database error on {path}: {source}")]
    Database {
        path: PathBuf,
        source: rusqlite::Error,
    },

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Render error: {0}")]
    Render(#[from] std::fmt::Error),

    #[error("Layer task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for LayerError {
    fn from(err: tokio::task::JoinError) -> Self {
        LayerError::Task(err.to_string())
    }
}

/// A named sink with a reliability tier and write discipline.
#[async_trait]
pub trait LayerSink: Send + Sync {
    fn id(&self) -> &str;

    fn tier(&self) -> LayerTier;

    fn discipline(&self) -> WriteDiscipline;

    /// Evidence kind this layer yields when read back.
    fn source_kind(&self) -> SourceKind;

    async fn write(&self, snapshot: &StateSnapshot) -> Result<(), LayerError>;

    /// Whole content, or `None` when the layer has never been written.
    async fn read(&self) -> Result<Option<String>, LayerError>;
}

/// Every file template plus the SQLite layer, rooted at the configured
/// storage directory.
pub fn default_layers(config: &ContinuityConfig) -> Vec<Arc<dyn LayerSink>> {
    let dir = config.storage_dir();
    let mut layers: Vec<Arc<dyn LayerSink>> = LAYER_TEMPLATES
        .iter()
        .map(|template| Arc::new(FileLayer::from_template(template, &dir)) as Arc<dyn LayerSink>)
        .collect();
    layers.push(Arc::new(SqliteLayer::new(config.database_path())));
    layers
}
