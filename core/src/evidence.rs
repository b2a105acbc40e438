//! Evidence vocabulary shared by the analyzer, reconciler and validator.

use chrono::{DateTime, NaiveDate, Utc};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use crate::snapshot::{BuildStatus, StateSnapshot};

/// A piece of context that can be recovered from a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextField {
    SessionId,
    Phase,
    Progress,
    CompilationStatus,
    NextActions,
    Timestamp,
    CommitCount,
    LatestCommit,
    ProjectLayout,
}

impl ContextField {
    /// Fields a reconstruction must resolve to be usable without help.
    pub const ESSENTIAL: [ContextField; 5] = [
        ContextField::SessionId,
        ContextField::Phase,
        ContextField::Progress,
        ContextField::CompilationStatus,
        ContextField::NextActions,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SessionId => "session_id",
            Self::Phase => "phase",
            Self::Progress => "progress",
            Self::CompilationStatus => "compilation_status",
            Self::NextActions => "next_actions",
            Self::Timestamp => "timestamp",
            Self::CommitCount => "commit_count",
            Self::LatestCommit => "latest_commit",
            Self::ProjectLayout => "project_layout",
        }
    }

    pub fn is_essential(self) -> bool {
        Self::ESSENTIAL.contains(&self)
    }
}

impl fmt::Display for ContextField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a piece of evidence came from. Drives the reliability prior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    PrimaryStatus,
    SessionBrief,
    ConversationLog,
    ScratchPad,
    ArchivalDoc,
    Readme,
    Database,
    CommitHistory,
    FilesystemTopology,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PrimaryStatus => "primary_status",
            Self::SessionBrief => "session_brief",
            Self::ConversationLog => "conversation_log",
            Self::ScratchPad => "scratch_pad",
            Self::ArchivalDoc => "archival_doc",
            Self::Readme => "readme",
            Self::Database => "database",
            Self::CommitHistory => "commit_history",
            Self::FilesystemTopology => "filesystem_topology",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityLevel {
    Unavailable,
    Low,
    Medium,
    High,
}

/// Content quality of a source, from size and freshness.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataQuality {
    pub level: QualityLevel,
    /// Content mentions today's date.
    pub fresh: bool,
    /// 0-100 summary of level and freshness.
    pub score: f64,
}

impl DataQuality {
    pub fn unavailable() -> Self {
        Self {
            level: QualityLevel::Unavailable,
            fresh: false,
            score: 0.0,
        }
    }

    /// Under 100 chars is Low, under 500 Medium, otherwise High; +10 when
    /// the content carries `today` in ISO form.
    pub fn assess(content: &str, today: NaiveDate) -> Self {
        let len = content.chars().count();
        let (level, base) = if len < 100 {
            (QualityLevel::Low, 40.0)
        } else if len < 500 {
            (QualityLevel::Medium, 70.0)
        } else {
            (QualityLevel::High, 90.0)
        };
        let fresh = content.contains(&today.format("%Y-%m-%d").to_string());
        let score: f64 = if fresh { base + 10.0 } else { base };
        Self {
            level,
            fresh,
            score: score.min(100.0),
        }
    }
}

/// Result of probing one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceEvidence {
    pub source_id: String,
    pub kind: SourceKind,
    pub available: bool,
    pub reliability_score: f64,
    pub data_quality: DataQuality,
    pub extracted_fields: BTreeMap<ContextField, String>,
    pub probed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SourceEvidence {
    pub fn available(
        source_id: impl Into<String>,
        kind: SourceKind,
        reliability_score: f64,
        data_quality: DataQuality,
        extracted_fields: BTreeMap<ContextField, String>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            kind,
            available: true,
            reliability_score,
            data_quality,
            extracted_fields,
            probed_at: Utc::now(),
            error: None,
        }
    }

    pub fn unavailable(
        source_id: impl Into<String>,
        kind: SourceKind,
        reliability_score: f64,
        error: impl Into<String>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            kind,
            available: false,
            reliability_score,
            data_quality: DataQuality::unavailable(),
            extracted_fields: BTreeMap::new(),
            probed_at: Utc::now(),
            error: Some(error.into()),
        }
    }

    pub fn probed_at(mut self, at: DateTime<Utc>) -> Self {
        self.probed_at = at;
        self
    }
}

/// One candidate value for a field, as seen by one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextElement {
    pub field: ContextField,
    pub value: String,
    pub source_id: String,
    pub confidence: f64,
    pub extracted_at: DateTime<Utc>,
}

static SESSION_RE: LazyLock<Regex> =
    LazyLock::new(|| header(r"Session(?: ID)?", r"([A-Za-z0-9_.-]+)"));
static PROGRESS_RE: LazyLock<Regex> =
    LazyLock::new(|| header("Progress", r"(\d+(?:\.\d+)?)%"));
static PHASE_RE: LazyLock<Regex> = LazyLock::new(|| header("Phase", r"([^\r\n]+)"));
static BUILD_RE: LazyLock<Regex> =
    LazyLock::new(|| header("Compilation|Build", r"([A-Za-z]+)"));
static NEXT_RE: LazyLock<Regex> =
    LazyLock::new(|| header(r"Next(?: Action)?", r"([^\r\n]+)"));
static TIMESTAMP_RE: LazyLock<Regex> = LazyLock::new(|| {
    header(
        "Captured|Updated|Timestamp",
        r"(\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2})",
    )
});

/// A labelled line: `Label: value` or `- **Label**: value`, starting the line.
#[allow(clippy::expect_used)]
fn header(label: &str, value: &str) -> Regex {
    Regex::new(&format!(
        r"(?m)^[ \t]*(?:[-*+][ \t]+)?\**(?:{label})\**:\**[ \t]*{value}"
    ))
    .expect("extraction patterns are literals")
}

/// Pull labelled fields out of text.
///
/// Only lines that start with a label count, so list items and free text
/// never override the header. Appended history (entries split by `---`
/// lines) resolves each field from the newest entry that carries it; within
/// one entry the first labelled line wins. Fields that do not match are
/// absent.
pub fn extract_fields(content: &str) -> BTreeMap<ContextField, String> {
    let mut fields = BTreeMap::new();
    let patterns: [(ContextField, &Regex); 6] = [
        (ContextField::SessionId, &*SESSION_RE),
        (ContextField::Progress, &*PROGRESS_RE),
        (ContextField::Phase, &*PHASE_RE),
        (ContextField::CompilationStatus, &*BUILD_RE),
        (ContextField::NextActions, &*NEXT_RE),
        (ContextField::Timestamp, &*TIMESTAMP_RE),
    ];
    let entries: Vec<&str> = content.split("\n---\n").collect();
    for (field, re) in patterns {
        let Some(value) = entries.iter().rev().find_map(|entry| first_value(re, entry)) else {
            continue;
        };
        let value = match field {
            ContextField::CompilationStatus => match normalize_build_label(value) {
                Some(label) => label.to_string(),
                None => continue,
            },
            _ => value.to_string(),
        };
        fields.insert(field, value);
    }
    fields
}

fn first_value<'a>(re: &Regex, entry: &'a str) -> Option<&'a str> {
    re.captures_iter(entry)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .find(|v| !v.is_empty())
}

/// Canonical form used when comparing values across sources.
///
/// Progress compares numerically, timestamps ignore a trailing `Z`, and
/// everything else compares trimmed.
pub fn normalize_value(field: ContextField, raw: &str) -> String {
    let trimmed = raw.trim();
    match field {
        ContextField::Progress => trimmed
            .trim_end_matches('%')
            .parse::<f64>()
            .map_or_else(|_| trimmed.to_string(), |p| p.to_string()),
        ContextField::Timestamp => trimmed.trim_end_matches('Z').replace(' ', "T"),
        // Text layers store free text on one line.
        _ => trimmed.split_whitespace().collect::<Vec<_>>().join(" "),
    }
}

/// Fields read straight from a structured snapshot.
pub fn snapshot_fields(snapshot: &StateSnapshot) -> BTreeMap<ContextField, String> {
    let mut fields = BTreeMap::new();
    fields.insert(ContextField::SessionId, snapshot.id().to_string());
    if !snapshot.phase.trim().is_empty() {
        fields.insert(ContextField::Phase, snapshot.phase.clone());
    }
    fields.insert(ContextField::Progress, snapshot.progress.to_string());
    if snapshot.environment.build != BuildStatus::Unknown {
        fields.insert(
            ContextField::CompilationStatus,
            snapshot.environment.build.label().to_string(),
        );
    }
    if let Some(action) = snapshot.top_next_action() {
        fields.insert(ContextField::NextActions, action.description.clone());
    }
    fields.insert(
        ContextField::Timestamp,
        snapshot.captured_at.format("%Y-%m-%dT%H:%M:%S").to_string(),
    );
    fields
}

fn normalize_build_label(raw: &str) -> Option<&'static str> {
    match raw.to_ascii_uppercase().as_str() {
        "SUCCESS" | "SUCCEEDED" | "PASSED" | "OK" => Some("SUCCESS"),
        "FAILED" | "FAILURE" | "ERROR" => Some("FAILED"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn extracts_labelled_fields() {
        let content = "\
# Current Status
- **Session**: session_abc
- **Phase**: implementation
- **Progress**: 42.5%
- **Build**: PASSED
- **Next**: wire the sqlite layer
- **Updated**: 2026-10-19T08:30:00Z
";
        let fields = extract_fields(content);
        assert_eq!(fields[&ContextField::SessionId], "session_abc");
        assert_eq!(fields[&ContextField::Phase], "implementation");
        assert_eq!(fields[&ContextField::Progress], "42.5");
        assert_eq!(fields[&ContextField::CompilationStatus], "SUCCESS");
        assert_eq!(fields[&ContextField::NextActions], "wire the sqlite layer");
        assert_eq!(fields[&ContextField::Timestamp], "2026-10-19T08:30:00");
    }

    #[test]
    fn appended_history_resolves_to_latest_entry() {
        let content = "\
Session: s1
Progress: 10%
---
Session: s1
Progress: 25%
";
        assert_eq!(extract_fields(content)[&ContextField::Progress], "25");
    }

    #[test]
    fn list_items_do_not_override_header() {
        let content = "\
- **Session**: s1
- **Phase**: build **core** layer
- **Progress**: 40%

## Tasks

- [ ] t9 Progress: 90% target for docs
- [Low] Phase: review prep
";
        let fields = extract_fields(content);
        assert_eq!(fields[&ContextField::Progress], "40");
        assert_eq!(fields[&ContextField::Phase], "build **core** layer");
    }

    #[test]
    fn unmatched_fields_are_absent() {
        let fields = extract_fields("nothing useful here, Build: maybe");
        assert!(fields.is_empty());
    }

    #[test]
    fn structured_fields_match_text_extraction() {
        use crate::snapshot::{Priority, SessionId};

        let snapshot = StateSnapshot::new(SessionId::new("session_json"), "review", 40.0)
            .with_next_action("merge", Priority::High);
        let fields = snapshot_fields(&snapshot);
        assert_eq!(fields[&ContextField::Progress], "40");
        assert_eq!(fields[&ContextField::NextActions], "merge");
        assert!(!fields.contains_key(&ContextField::CompilationStatus));

        let text = format!("Progress: {}%", snapshot.progress);
        assert_eq!(
            extract_fields(&text)[&ContextField::Progress],
            fields[&ContextField::Progress]
        );
    }

    #[test]
    fn normalization_compares_progress_numerically() {
        assert_eq!(normalize_value(ContextField::Progress, "40.0"), "40");
        assert_eq!(normalize_value(ContextField::Progress, " 40% "), "40");
        assert_eq!(
            normalize_value(ContextField::Timestamp, "2026-10-19 08:00:00Z"),
            "2026-10-19T08:00:00"
        );
        assert_eq!(normalize_value(ContextField::Phase, " build "), "build");
        assert_eq!(
            normalize_value(ContextField::NextActions, "recheck the\n  figure"),
            "recheck the figure"
        );
    }

    #[test]
    fn quality_tracks_length_and_freshness() {
        let today = NaiveDate::from_ymd_opt(2026, 10, 19).expect("date");
        let short = DataQuality::assess("tiny", today);
        assert_eq!(short.level, QualityLevel::Low);
        assert_eq!(short.score, 40.0);

        let medium = "x".repeat(200);
        assert_eq!(DataQuality::assess(&medium, today).level, QualityLevel::Medium);

        let long_fresh = format!("{} 2026-10-19", "y".repeat(600));
        let quality = DataQuality::assess(&long_fresh, today);
        assert_eq!(quality.level, QualityLevel::High);
        assert!(quality.fresh);
        assert_eq!(quality.score, 100.0);
    }

    #[test]
    fn unavailable_evidence_carries_reason() {
        let evidence =
            SourceEvidence::unavailable("readme", SourceKind::Readme, 60.0, "timed out after 10ms");
        assert!(!evidence.available);
        assert!(evidence.extracted_fields.is_empty());
        assert_eq!(evidence.error.as_deref(), Some("timed out after 10ms"));
        assert_eq!(evidence.data_quality.level, QualityLevel::Unavailable);
    }
}
