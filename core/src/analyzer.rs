//! Source analyzer.
//!
//! Probes every storage layer plus external signals (commit history,
//! filesystem topology, project README) concurrently. Each probe runs under
//! its own deadline and the caller's cancellation token. A probe that errors
//! or times out yields `available = false` evidence; a cancelled probe yields
//! nothing.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use continuity_async_utils::{BoundErr, BoundedExt};

use crate::config::{ContinuityConfig, ProbeTimeouts, SourcePriors};
use crate::evidence::{
    ContextField, DataQuality, SourceEvidence, SourceKind, extract_fields, snapshot_fields,
};
use crate::layers::{LayerError, LayerSink};
use crate::snapshot::{SessionId, StateSnapshot};

/// Raw material returned by a probe.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceReading {
    /// Content the quality assessment is based on.
    pub content: String,
    pub fields: BTreeMap<ContextField, String>,
}

impl SourceReading {
    /// Structured snapshot JSON is parsed directly; anything else goes
    /// through the text extraction patterns.
    pub fn from_content(content: String) -> Self {
        let fields = match serde_json::from_str::<StateSnapshot>(&content) {
            Ok(snapshot) => snapshot_fields(&snapshot),
            Err(_) => extract_fields(&content),
        };
        Self { content, fields }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("source has no content")]
    Empty,

    #[error(transparent)]
    Layer(#[from] LayerError),

    #[error("{0}")]
    Failed(String),
}

/// One independent evidence source.
#[async_trait]
pub trait SourceProbe: Send + Sync {
    fn source_id(&self) -> &str;

    fn kind(&self) -> SourceKind;

    async fn probe(&self, session_id: &SessionId) -> Result<SourceReading, SourceError>;
}

/// Reads a storage layer back.
pub struct LayerSource {
    layer: Arc<dyn LayerSink>,
}

impl LayerSource {
    pub fn new(layer: Arc<dyn LayerSink>) -> Self {
        Self { layer }
    }
}

#[async_trait]
impl SourceProbe for LayerSource {
    fn source_id(&self) -> &str {
        self.layer.id()
    }

    fn kind(&self) -> SourceKind {
        self.layer.source_kind()
    }

    async fn probe(&self, _session_id: &SessionId) -> Result<SourceReading, SourceError> {
        match self.layer.read().await? {
            Some(content) if !content.trim().is_empty() => Ok(SourceReading::from_content(content)),
            _ => Err(SourceError::Empty),
        }
    }
}

/// A plain document outside the layer set, such as the project README.
pub struct DocumentSource {
    id: String,
    path: PathBuf,
    kind: SourceKind,
}

impl DocumentSource {
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>, kind: SourceKind) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            kind,
        }
    }
}

#[async_trait]
impl SourceProbe for DocumentSource {
    fn source_id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn probe(&self, _session_id: &SessionId) -> Result<SourceReading, SourceError> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|err| SourceError::Failed(format!("{}: {err}", self.path.display())))?;
        if content.trim().is_empty() {
            return Err(SourceError::Empty);
        }
        Ok(SourceReading::from_content(content))
    }
}

/// Recent commits from `git log --oneline -10`.
pub struct CommitHistorySource {
    root: PathBuf,
}

impl CommitHistorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl SourceProbe for CommitHistorySource {
    fn source_id(&self) -> &str {
        "commit_history"
    }

    fn kind(&self) -> SourceKind {
        SourceKind::CommitHistory
    }

    async fn probe(&self, _session_id: &SessionId) -> Result<SourceReading, SourceError> {
        let output = tokio::process::Command::new("git")
            .args(["log", "--oneline", "-10"])
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| SourceError::Failed(format!("failed to execute git log: {err}")))?;

        if !output.status.success() {
            return Err(SourceError::Failed(format!(
                "git log failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let content = String::from_utf8_lossy(&output.stdout).into_owned();
        Ok(commit_reading(content))
    }
}

fn commit_reading(content: String) -> SourceReading {
    let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
    // `--oneline` puts the hash first; labels start the subject.
    let subjects = lines
        .iter()
        .map(|line| line.split_once(' ').map_or(*line, |(_, subject)| subject))
        .collect::<Vec<_>>()
        .join("\n");
    let mut fields = extract_fields(&subjects);
    if let Some(latest) = lines.first() {
        fields.insert(ContextField::LatestCommit, (*latest).to_string());
    }
    fields.insert(ContextField::CommitCount, lines.len().to_string());
    SourceReading { content, fields }
}

/// Project shape from a shallow directory walk.
pub struct FilesystemSource {
    root: PathBuf,
    max_depth: usize,
}

impl FilesystemSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_depth: 3,
        }
    }
}

const SKIPPED_DIRS: &[&str] = &[".git", "target", "node_modules", ".continuity"];
const MANIFESTS: &[&str] = &["Cargo.toml", "package.json", "pom.xml", "go.mod", "pyproject.toml"];

#[async_trait]
impl SourceProbe for FilesystemSource {
    fn source_id(&self) -> &str {
        "filesystem_topology"
    }

    fn kind(&self) -> SourceKind {
        SourceKind::FilesystemTopology
    }

    async fn probe(&self, _session_id: &SessionId) -> Result<SourceReading, SourceError> {
        let root = self.root.clone();
        let max_depth = self.max_depth;
        tokio::task::spawn_blocking(move || walk_layout(&root, max_depth))
            .await
            .map_err(|err| SourceError::Failed(err.to_string()))?
    }
}

fn walk_layout(root: &Path, max_depth: usize) -> Result<SourceReading, SourceError> {
    if !root.is_dir() {
        return Err(SourceError::Failed(format!(
            "{} is not a directory",
            root.display()
        )));
    }

    let mut files = 0usize;
    let mut dirs = 0usize;
    let mut manifests = Vec::new();
    let mut listing = String::new();
    let walker = WalkDir::new(root)
        .min_depth(1)
        .max_depth(max_depth)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            !(e.file_type().is_dir()
                && SKIPPED_DIRS
                    .iter()
                    .any(|skip| e.file_name().to_string_lossy() == *skip))
        });

    for entry in walker.filter_map(std::result::Result::ok) {
        let rel = entry
            .path()
            .strip_prefix(root)
            .unwrap_or_else(|_| entry.path())
            .display()
            .to_string();
        if entry.file_type().is_dir() {
            dirs += 1;
        } else {
            files += 1;
            let name = entry.file_name().to_string_lossy();
            if MANIFESTS.iter().any(|m| name == *m) {
                manifests.push(rel.clone());
            }
        }
        listing.push_str(&rel);
        listing.push('\n');
    }

    if files == 0 && dirs == 0 {
        return Err(SourceError::Empty);
    }

    let mut layout = format!("{files} files, {dirs} directories");
    if !manifests.is_empty() {
        layout.push_str("; manifests: ");
        layout.push_str(&manifests.join(", "));
    }
    let mut fields = BTreeMap::new();
    fields.insert(ContextField::ProjectLayout, layout);
    Ok(SourceReading {
        content: listing,
        fields,
    })
}

/// Runs every probe concurrently and scores the results.
pub struct SourceAnalyzer {
    probes: Vec<Arc<dyn SourceProbe>>,
    timeouts: ProbeTimeouts,
    priors: SourcePriors,
    workers: usize,
}

impl SourceAnalyzer {
    pub fn new(probes: Vec<Arc<dyn SourceProbe>>) -> Self {
        Self {
            probes,
            timeouts: ProbeTimeouts::default(),
            priors: SourcePriors::default(),
            workers: 4,
        }
    }

    /// Layer sources for `layers`, plus README, commit history and
    /// filesystem probes rooted at the project root.
    pub fn from_config(config: &ContinuityConfig, layers: &[Arc<dyn LayerSink>]) -> Self {
        let root = &config.probe.project_root;
        let mut probes: Vec<Arc<dyn SourceProbe>> = layers
            .iter()
            .map(|layer| Arc::new(LayerSource::new(Arc::clone(layer))) as Arc<dyn SourceProbe>)
            .collect();
        probes.push(Arc::new(DocumentSource::new(
            "readme",
            root.join("README.md"),
            SourceKind::Readme,
        )));
        probes.push(Arc::new(CommitHistorySource::new(root)));
        probes.push(Arc::new(FilesystemSource::new(root)));

        Self {
            probes,
            timeouts: config.recovery.probe_timeouts.clone(),
            priors: config.recovery.priors.clone(),
            workers: config.recovery.source_workers.max(1),
        }
    }

    pub fn with_timeouts(mut self, timeouts: ProbeTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_priors(mut self, priors: SourcePriors) -> Self {
        self.priors = priors;
        self
    }

    pub fn source_count(&self) -> usize {
        self.probes.len()
    }

    /// Probe every source. Evidence comes back sorted by source id.
    #[tracing::instrument(skip(self, cancel), fields(sources = self.probes.len()))]
    pub async fn analyze_sources(
        &self,
        session_id: &SessionId,
        cancel: &CancellationToken,
    ) -> Vec<SourceEvidence> {
        let pool = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();

        for probe in &self.probes {
            let probe = Arc::clone(probe);
            let pool = Arc::clone(&pool);
            let session_id = session_id.clone();
            let token = cancel.clone();
            let kind = probe.kind();
            let limit = self.timeouts.for_kind(kind);
            let prior = self.priors.for_kind(kind);

            tasks.spawn(async move {
                let source_id = probe.source_id().to_string();
                // The deadline starts once a worker is free, not while queued.
                let permit = tokio::select! {
                    biased;
                    _ = token.cancelled() => return None,
                    permit = pool.acquire_owned() => permit,
                };
                let Ok(_permit) = permit else {
                    return Some(SourceEvidence::unavailable(
                        source_id,
                        kind,
                        prior,
                        "probe pool closed".to_string(),
                    ));
                };
                match probe.probe(&session_id).bounded(limit, &token).await {
                    Ok(Ok(reading)) => {
                        let quality = DataQuality::assess(&reading.content, Utc::now().date_naive());
                        tracing::debug!(source = %source_id, fields = reading.fields.len(), "Source probed");
                        Some(SourceEvidence::available(
                            source_id,
                            kind,
                            prior,
                            quality,
                            reading.fields,
                        ))
                    }
                    Ok(Err(err)) => {
                        tracing::debug!(source = %source_id, error = %err, "Source unavailable");
                        Some(SourceEvidence::unavailable(source_id, kind, prior, err.to_string()))
                    }
                    Err(BoundErr::TimedOut(_)) => {
                        tracing::warn!(source = %source_id, timeout_ms = limit.as_millis() as u64, "Source probe timed out");
                        Some(SourceEvidence::unavailable(
                            source_id,
                            kind,
                            prior,
                            BoundErr::TimedOut(limit).to_string(),
                        ))
                    }
                    Err(BoundErr::Cancelled) => None,
                }
            });
        }

        let mut evidence = Vec::with_capacity(self.probes.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Some(item)) => evidence.push(item),
                Ok(None) => {}
                Err(err) => tracing::warn!(error = %err, "Source probe task aborted"),
            }
        }

        if cancel.is_cancelled() {
            tracing::info!(
                collected = evidence.len(),
                "Source analysis cancelled; keeping completed probes only"
            );
        }

        evidence.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        evidence
    }
}
