//! File-backed layers.
//!
//! Overwrite layers use the temp-file + fsync + rename pattern so a reader
//! never sees a half-written snapshot. Append layers hold an advisory lock
//! on a sibling `.lock` file while writing.

use async_trait::async_trait;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::render::{LayerTemplate, RenderFn};
use super::{LayerError, LayerSink, LayerTier, WriteDiscipline};
use crate::evidence::SourceKind;
use crate::snapshot::StateSnapshot;

#[derive(Debug, Clone)]
pub struct FileLayer {
    id: String,
    path: PathBuf,
    tier: LayerTier,
    discipline: WriteDiscipline,
    kind: SourceKind,
    render: RenderFn,
}

impl FileLayer {
    pub fn from_template(template: &LayerTemplate, dir: &Path) -> Self {
        Self {
            id: template.id.to_string(),
            path: dir.join(template.file_name),
            tier: template.tier,
            discipline: template.discipline,
            kind: template.kind,
            render: template.render,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl LayerSink for FileLayer {
    fn id(&self) -> &str {
        &self.id
    }

    fn tier(&self) -> LayerTier {
        self.tier
    }

    fn discipline(&self) -> WriteDiscipline {
        self.discipline
    }

    fn source_kind(&self) -> SourceKind {
        self.kind
    }

    async fn write(&self, snapshot: &StateSnapshot) -> Result<(), LayerError> {
        let content = (self.render)(snapshot)?;
        let path = self.path.clone();
        let discipline = self.discipline;
        tokio::task::spawn_blocking(move || match discipline {
            WriteDiscipline::Overwrite => write_atomic(&path, &content),
            WriteDiscipline::Append => append_locked(&path, &content),
        })
        .await?
    }

    async fn read(&self) -> Result<Option<String>, LayerError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(LayerError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> LayerError + '_ {
    move |source| LayerError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn ensure_parent(path: &Path) -> Result<(), LayerError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err(parent))?;
    }
    Ok(())
}

/// Write `content` to `path` atomically.
pub fn write_atomic(path: &Path, content: &str) -> Result<(), LayerError> {
    ensure_parent(path)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    // Unique per write: a timed-out write may still be running.
    let temp_path = path.with_file_name(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));

    let written = std::fs::File::create(&temp_path)
        .and_then(|mut file| {
            file.write_all(content.as_bytes())?;
            file.sync_all()
        })
        .map_err(io_err(&temp_path))
        .and_then(|()| std::fs::rename(&temp_path, path).map_err(io_err(path)));
    if written.is_err() {
        let _ = std::fs::remove_file(&temp_path);
    }
    written
}

/// Append `content` to `path` while holding an exclusive lock.
pub fn append_locked(path: &Path, content: &str) -> Result<(), LayerError> {
    use fs2::FileExt;

    ensure_parent(path)?;

    let lock_path = path.with_extension("lock");
    let lock_file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)
        .map_err(io_err(&lock_path))?;
    lock_file.lock_exclusive().map_err(io_err(&lock_path))?;

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(io_err(path))?;
    file.write_all(content.as_bytes()).map_err(io_err(path))?;
    file.sync_all().map_err(io_err(path))?;

    // Lock released when lock_file drops
    Ok(())
}
