//! Test doubles shared by the integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;

use continuity_core::analyzer::{SourceError, SourceProbe, SourceReading};
use continuity_core::config::ProbeTimeouts;
use continuity_core::evidence::SourceKind;
use continuity_core::layers::{LayerError, LayerSink, LayerTier, WriteDiscipline};
use continuity_core::snapshot::{
    BuildStatus, EnvironmentSummary, Priority, SessionId, StateSnapshot, TaskStatus,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    Ok,
    Fail,
    Hang,
}

/// In-memory layer holding the last snapshot as JSON.
pub struct MemoryLayer {
    id: String,
    tier: LayerTier,
    behaviour: Behaviour,
    content: Mutex<Option<String>>,
}

impl MemoryLayer {
    pub fn new(id: &str, behaviour: Behaviour) -> Self {
        Self {
            id: id.to_string(),
            tier: LayerTier::Secondary,
            behaviour,
            content: Mutex::new(None),
        }
    }

    pub fn written(&self) -> bool {
        self.content.lock().unwrap().is_some()
    }
}

#[async_trait]
impl LayerSink for MemoryLayer {
    fn id(&self) -> &str {
        &self.id
    }

    fn tier(&self) -> LayerTier {
        self.tier
    }

    fn discipline(&self) -> WriteDiscipline {
        WriteDiscipline::Overwrite
    }

    fn source_kind(&self) -> SourceKind {
        SourceKind::SessionBrief
    }

    async fn write(&self, snapshot: &StateSnapshot) -> Result<(), LayerError> {
        match self.behaviour {
            Behaviour::Ok => {
                *self.content.lock().unwrap() = Some(serde_json::to_string(snapshot)?);
                Ok(())
            }
            Behaviour::Fail => Err(LayerError::Task("disk full".to_string())),
            Behaviour::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            }
        }
    }

    async fn read(&self) -> Result<Option<String>, LayerError> {
        Ok(self.content.lock().unwrap().clone())
    }
}

/// Source that returns fixed text, errors, or never answers.
pub struct ScriptedSource {
    id: String,
    kind: SourceKind,
    content: String,
    behaviour: Behaviour,
    delay: Duration,
}

impl ScriptedSource {
    pub fn text(id: &str, kind: SourceKind, content: &str) -> Self {
        Self {
            id: id.to_string(),
            kind,
            content: content.to_string(),
            behaviour: Behaviour::Ok,
            delay: Duration::ZERO,
        }
    }

    /// Answer only after `delay`.
    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn hanging(id: &str, kind: SourceKind) -> Self {
        Self {
            id: id.to_string(),
            kind,
            content: String::new(),
            behaviour: Behaviour::Hang,
            delay: Duration::ZERO,
        }
    }

    pub fn failing(id: &str, kind: SourceKind) -> Self {
        Self {
            id: id.to_string(),
            kind,
            content: String::new(),
            behaviour: Behaviour::Fail,
            delay: Duration::ZERO,
        }
    }
}

#[async_trait]
impl SourceProbe for ScriptedSource {
    fn source_id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn probe(&self, _session_id: &SessionId) -> Result<SourceReading, SourceError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.behaviour {
            Behaviour::Ok => Ok(SourceReading::from_content(self.content.clone())),
            Behaviour::Fail => Err(SourceError::Failed("permission denied".to_string())),
            Behaviour::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Err(SourceError::Empty)
            }
        }
    }
}

pub fn short_timeouts(ms: u64) -> ProbeTimeouts {
    ProbeTimeouts {
        document_ms: ms,
        database_ms: ms,
        commit_history_ms: ms,
        filesystem_ms: ms,
    }
}

pub fn sample_snapshot(id: &str) -> StateSnapshot {
    StateSnapshot::new(SessionId::new(id), "implementation", 40.0)
        .with_task("t1", "layer writer", TaskStatus::Completed)
        .with_task("t2", "source analyzer", TaskStatus::InProgress)
        .with_next_action("finish the reconciler", Priority::High)
        .with_success_criterion("recovery under 30s")
        .with_environment(EnvironmentSummary {
            build: BuildStatus::Succeeded,
            ..EnvironmentSummary::default()
        })
}
