//! The point-in-time record every layer protects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::error::{ContinuityError, Result};

/// Opaque session identifier.
///
/// Generated ids are `session_<32 hex>` so they survive the text extraction
/// patterns used when reading document layers back.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(format!("session_{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Ids must be non-blank and limited to `[A-Za-z0-9_.-]`.
    pub fn is_well_formed(&self) -> bool {
        !self.0.is_empty()
            && self
                .0
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    NotStarted,
    InProgress,
    Completed,
    Blocked,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub description: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub phase: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    Succeeded,
    Failed,
    #[default]
    Unknown,
}

impl BuildStatus {
    /// Label used by every text layer and by the extraction patterns.
    pub fn label(self) -> &'static str {
        match self {
            Self::Succeeded => "SUCCESS",
            Self::Failed => "FAILED",
            Self::Unknown => "UNKNOWN",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityStatus {
    Connected,
    Disconnected,
    #[default]
    Unknown,
}

/// Environment state carried inside a snapshot.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EnvironmentSummary {
    pub build: BuildStatus,
    pub connectivity: ConnectivityStatus,
    #[serde(default)]
    pub runtime_versions: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
    Renamed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileTouched {
    pub path: String,
    pub change_kind: ChangeKind,
    #[serde(default)]
    pub lines_changed: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NextAction {
    pub description: String,
    pub priority: Priority,
    #[serde(default)]
    pub estimated_minutes: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    Open,
    InProgress,
    Resolved,
    WontFix,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnownIssue {
    pub title: String,
    pub severity: IssueSeverity,
    pub status: IssueStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resolution_steps: Vec<String>,
}

impl KnownIssue {
    pub fn is_open(&self) -> bool {
        matches!(self.status, IssueStatus::Open | IssueStatus::InProgress)
    }
}

/// Result of the completeness check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotValidation {
    pub valid: bool,
    pub score: f64,
    pub issues: Vec<String>,
}

/// Versioned record of project state.
///
/// The id is fixed at construction and only readable afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    id: SessionId,
    pub captured_at: DateTime<Utc>,
    pub phase: String,
    pub progress: f64,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub environment: EnvironmentSummary,
    #[serde(default)]
    pub files_touched: Vec<FileTouched>,
    #[serde(default)]
    pub next_actions: Vec<NextAction>,
    #[serde(default)]
    pub known_issues: Vec<KnownIssue>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub success_criteria: Vec<String>,
}

impl StateSnapshot {
    pub fn new(id: SessionId, phase: impl Into<String>, progress: f64) -> Self {
        Self {
            id,
            captured_at: Utc::now(),
            phase: phase.into(),
            progress,
            tasks: Vec::new(),
            environment: EnvironmentSummary::default(),
            files_touched: Vec::new(),
            next_actions: Vec::new(),
            known_issues: Vec::new(),
            dependencies: Vec::new(),
            success_criteria: Vec::new(),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn with_task(mut self, id: &str, description: &str, status: TaskStatus) -> Self {
        let phase = self.phase.clone();
        self.tasks.push(Task {
            id: id.to_string(),
            description: description.to_string(),
            status,
            phase,
        });
        self
    }

    pub fn with_next_action(mut self, description: &str, priority: Priority) -> Self {
        self.next_actions.push(NextAction {
            description: description.to_string(),
            priority,
            estimated_minutes: 0,
        });
        self
    }

    pub fn with_known_issue(mut self, issue: KnownIssue) -> Self {
        self.known_issues.push(issue);
        self
    }

    pub fn with_environment(mut self, environment: EnvironmentSummary) -> Self {
        self.environment = environment;
        self
    }

    pub fn with_success_criterion(mut self, criterion: &str) -> Self {
        self.success_criteria.push(criterion.to_string());
        self
    }

    pub fn completed_tasks(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .count()
    }

    /// Highest-priority next action, first listed wins ties.
    pub fn top_next_action(&self) -> Option<&NextAction> {
        self.next_actions
            .iter()
            .enumerate()
            .min_by_key(|(idx, action)| (action.priority, *idx))
            .map(|(_, action)| action)
    }

    pub fn open_critical_issues(&self) -> impl Iterator<Item = &KnownIssue> {
        self.known_issues
            .iter()
            .filter(|i| i.severity == IssueSeverity::Critical && i.is_open())
    }

    pub fn progress_in_range(&self) -> bool {
        self.progress.is_finite() && (0.0..=100.0).contains(&self.progress)
    }

    /// Checks required before a store.
    pub fn validate(&self) -> Result<()> {
        if !self.id.is_well_formed() {
            return Err(ContinuityError::InvalidSnapshot {
                session_id: self.id.to_string(),
                reason: "session id must be non-empty and use only [A-Za-z0-9_.-]".to_string(),
            });
        }
        if !self.progress_in_range() {
            return Err(ContinuityError::InvalidSnapshot {
                session_id: self.id.to_string(),
                reason: format!("progress {} is outside 0-100", self.progress),
            });
        }
        Ok(())
    }

    /// Softer completeness review, 10 points per finding.
    pub fn completeness(&self) -> SnapshotValidation {
        let mut issues = Vec::new();
        if !self.id.is_well_formed() {
            issues.push("Session ID is missing or malformed".to_string());
        }
        if self.phase.trim().is_empty() {
            issues.push("Current phase is missing".to_string());
        }
        if !self.progress_in_range() {
            issues.push("Progress percentage is invalid".to_string());
        }
        if self.next_actions.is_empty() {
            issues.push("No next actions defined".to_string());
        }
        if self.success_criteria.is_empty() {
            issues.push("No success criteria defined".to_string());
        }
        if self.environment.build == BuildStatus::Unknown {
            issues.push("Build status has not been captured".to_string());
        }

        let score = (100.0 - 10.0 * issues.len() as f64).max(0.0);
        SnapshotValidation {
            valid: issues.is_empty(),
            score,
            issues,
        }
    }
}
