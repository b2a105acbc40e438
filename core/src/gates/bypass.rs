//! Emergency bypass with an append-only audit ledger.
//!
//! A bypass lets work continue past a failed gate. It never changes the
//! gate's result; it only records who asked, why, and what must happen next.
//! Each grant is bound to one session and to the exact failure it was
//! granted against: once the gate fails differently, the bypass no longer
//! covers it and the gate has to be re-validated.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use super::{GateKind, GateResult, QualityGateResults};
use crate::config::ContinuityConfig;
use crate::error::{ContinuityError, Result};
use crate::layers::LayerError;
use crate::layers::file::append_locked;
use crate::snapshot::SessionId;

#[derive(Debug, thiserror::Error)]
pub enum BypassError {
    #[error("Bypass of {gate} gate rejected: {reason}")]
    Rejected { gate: GateKind, reason: String },

    /// The grant was refused because it could not be recorded.
    #[error("Bypass of {gate} gate not granted: audit ledger {path} is not writable: {source}")]
    AuditWrite {
        gate: GateKind,
        path: PathBuf,
        source: LayerError,
    },
}

impl BypassError {
    fn rejected(gate: GateKind, reason: impl Into<String>) -> Self {
        Self::Rejected {
            gate,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BypassRequest {
    pub session_id: SessionId,
    pub gate: GateKind,
    pub justification: String,
    pub remediation_plan: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_by: Option<String>,
}

impl BypassRequest {
    pub fn new(
        session_id: SessionId,
        gate: GateKind,
        justification: impl Into<String>,
        remediation_plan: impl Into<String>,
    ) -> Self {
        Self {
            session_id,
            gate,
            justification: justification.into(),
            remediation_plan: remediation_plan.into(),
            requested_by: None,
        }
    }

    pub fn requested_by(mut self, who: impl Into<String>) -> Self {
        self.requested_by = Some(who.into());
        self
    }

    /// The failed result this request may bypass.
    fn check<'a>(
        &self,
        results: &'a QualityGateResults,
    ) -> std::result::Result<&'a GateResult, BypassError> {
        if self.justification.trim().is_empty() {
            return Err(BypassError::rejected(self.gate, "justification is required"));
        }
        if self.remediation_plan.trim().is_empty() {
            return Err(BypassError::rejected(self.gate, "remediation plan is required"));
        }
        if results.session_id != self.session_id {
            return Err(BypassError::rejected(
                self.gate,
                format!("gate results belong to session {}", results.session_id),
            ));
        }
        match results.result(self.gate) {
            None => Err(BypassError::rejected(self.gate, "gate was not evaluated")),
            Some(result) if result.passed => {
                Err(BypassError::rejected(self.gate, "gate already passes"))
            }
            Some(result) => Ok(result),
        }
    }
}

/// Obligations attached to every granted bypass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BypassConditions {
    pub remediation_deadline: DateTime<Utc>,
    /// The gate must be re-run before the next irreversible action.
    pub revalidate_before_irreversible: bool,
    /// Changes made while bypassed must be documented.
    pub document_changes: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BypassRecord {
    pub id: String,
    pub session_id: SessionId,
    pub gate: GateKind,
    pub justification: String,
    pub remediation_plan: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_by: Option<String>,
    pub granted_at: DateTime<Utc>,
    pub conditions: BypassConditions,
    /// Score of the gate at the time of the bypass.
    pub gate_score: f64,
    /// Issues of the failure that was bypassed.
    pub gate_issues: Vec<String>,
}

impl BypassRecord {
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        now > self.conditions.remediation_deadline
    }

    /// True when this grant still stands for `result` in `session_id`: same
    /// gate, same failure, remediation window still open.
    pub fn covers(&self, session_id: &SessionId, result: &GateResult, now: DateTime<Utc>) -> bool {
        self.session_id == *session_id
            && self.gate == result.gate
            && !result.passed
            && self.gate_issues == result.issues
            && !self.is_overdue(now)
    }
}

/// Granted bypasses, in memory and optionally mirrored to a JSONL file.
#[derive(Debug)]
pub struct BypassLedger {
    window: Duration,
    path: Option<PathBuf>,
    records: Mutex<Vec<BypassRecord>>,
}

impl BypassLedger {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            path: None,
            records: Mutex::new(Vec::new()),
        }
    }

    /// File-backed ledger at the configured path, seeded with the grants
    /// already recorded there.
    pub fn from_config(config: &ContinuityConfig) -> Self {
        Self::new(Duration::hours(config.gates.bypass_window_hours)).with_file(config.ledger_path())
    }

    /// Mirror grants to `path`. Records already in the file are loaded; an
    /// unreadable file is logged and treated as empty.
    pub fn with_file(mut self, path: PathBuf) -> Self {
        match read_ledger(&path) {
            Ok(existing) => {
                *self.records.get_mut().unwrap_or_else(PoisonError::into_inner) = existing;
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), "Ignoring unreadable bypass ledger: {err}");
            }
        }
        self.path = Some(path);
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Grant a bypass of `request.gate` against its failed result in
    /// `results`.
    ///
    /// Rejected when the justification or remediation plan is blank, when
    /// the results belong to another session, or when the gate did not
    /// fail. A file-backed ledger that cannot record the grant refuses it.
    pub fn request_bypass(
        &self,
        request: BypassRequest,
        results: &QualityGateResults,
    ) -> Result<BypassRecord> {
        let result = match request.check(results) {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!(
                    gate = %request.gate,
                    session = %request.session_id,
                    "Bypass rejected: {err}"
                );
                return Err(err.into());
            }
        };

        let granted_at = Utc::now();
        let record = BypassRecord {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: request.session_id,
            gate: request.gate,
            justification: request.justification.trim().to_string(),
            remediation_plan: request.remediation_plan.trim().to_string(),
            requested_by: request.requested_by,
            granted_at,
            conditions: BypassConditions {
                remediation_deadline: granted_at + self.window,
                revalidate_before_irreversible: true,
                document_changes: true,
            },
            gate_score: result.score,
            gate_issues: result.issues.clone(),
        };

        if let Some(path) = &self.path {
            let line = serde_json::to_string(&record).map_err(LayerError::from);
            if let Err(source) = line.and_then(|line| append_locked(path, &format!("{line}\n"))) {
                tracing::error!(
                    gate = %record.gate,
                    path = %path.display(),
                    "Bypass refused; audit write failed: {source}"
                );
                return Err(BypassError::AuditWrite {
                    gate: record.gate,
                    path: path.clone(),
                    source,
                }
                .into());
            }
        }

        tracing::warn!(
            gate = %record.gate,
            session = %record.session_id,
            id = %record.id,
            deadline = %record.conditions.remediation_deadline,
            "Gate bypass granted"
        );
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
        Ok(record)
    }

    /// Every known grant, oldest first.
    pub fn records(&self) -> Vec<BypassRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Bypasses whose remediation deadline has passed.
    pub fn overdue(&self, now: DateTime<Utc>) -> Vec<BypassRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.is_overdue(now))
            .collect()
    }
}

/// Every record in a ledger file. A missing file means no bypasses; lines
/// that do not parse are skipped with a warning.
pub fn read_ledger(path: &Path) -> Result<Vec<BypassRecord>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(ContinuityError::FileRead {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    let records = content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(index, line)| match serde_json::from_str(line) {
            Ok(record) => Some(record),
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    line = index + 1,
                    "Skipping unparsable bypass ledger line: {err}"
                );
                None
            }
        })
        .collect();
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn failed(gate: GateKind, score: f64, issues: &[&str]) -> GateResult {
        GateResult {
            gate,
            passed: false,
            score,
            issues: issues.iter().map(|i| (*i).to_string()).collect(),
            recommendations: Vec::new(),
        }
    }

    /// Every gate failing for session `s1`.
    fn results() -> QualityGateResults {
        QualityGateResults::new(
            SessionId::new("s1"),
            GateKind::all()
                .into_iter()
                .map(|gate| failed(gate, 40.0, &["broken"]))
                .collect(),
        )
    }

    fn request(gate: GateKind, justification: &str, plan: &str) -> BypassRequest {
        BypassRequest::new(SessionId::new("s1"), gate, justification, plan)
    }

    #[test]
    fn blank_justification_is_rejected_for_every_gate() {
        let ledger = BypassLedger::new(Duration::hours(24));
        for gate in GateKind::all() {
            let err = ledger
                .request_bypass(request(gate, "   ", "fix tomorrow"), &results())
                .unwrap_err();
            assert!(matches!(
                err,
                ContinuityError::Bypass(BypassError::Rejected { .. })
            ));
            assert!(err.is_rejected_input());
        }
        assert!(ledger.records().is_empty());
    }

    #[test]
    fn blank_remediation_is_rejected() {
        let ledger = BypassLedger::new(Duration::hours(24));
        let err = ledger
            .request_bypass(request(GateKind::Quality, "release blocker", ""), &results())
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Bypass of quality gate rejected: remediation plan is required"
        );
    }

    #[test]
    fn passing_gate_cannot_be_bypassed() {
        let ledger = BypassLedger::new(Duration::hours(24));
        let mut results = results();
        results.results[0].passed = true;
        let err = ledger
            .request_bypass(request(GateKind::Compile, "why", "plan"), &results)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Bypass of compile gate rejected: gate already passes"
        );
    }

    #[test]
    fn results_from_another_session_are_rejected() {
        let ledger = BypassLedger::new(Duration::hours(24));
        let other = BypassRequest::new(SessionId::new("s2"), GateKind::Progress, "why", "plan");
        let err = ledger.request_bypass(other, &results()).unwrap_err();
        assert!(err.is_rejected_input());
        assert!(ledger.records().is_empty());
    }

    #[test]
    fn granted_bypass_carries_conditions() {
        let ledger = BypassLedger::new(Duration::hours(24));
        let before = Utc::now();
        let record = ledger
            .request_bypass(
                request(GateKind::Compile, "hotfix", "restore build").requested_by("oncall"),
                &results(),
            )
            .unwrap();

        assert!(record.conditions.revalidate_before_irreversible);
        assert!(record.conditions.document_changes);
        assert!(record.conditions.remediation_deadline >= before + Duration::hours(24));
        assert!(!record.is_overdue(Utc::now()));
        assert!(record.is_overdue(Utc::now() + Duration::hours(25)));
        assert_eq!(ledger.records().len(), 1);
    }

    #[test]
    fn bypass_does_not_touch_gate_result() {
        let ledger = BypassLedger::new(Duration::hours(1));
        let results = results();
        let before = results.clone();
        let record = ledger
            .request_bypass(request(GateKind::Progress, "demo", "add actions"), &results)
            .unwrap();

        assert_eq!(results, before);
        assert_eq!(record.gate_score, 40.0);
        assert_eq!(record.gate_issues, vec!["broken".to_string()]);
    }

    #[test]
    fn grant_covers_only_the_failure_it_was_granted_for() {
        let ledger = BypassLedger::new(Duration::hours(1));
        let record = ledger
            .request_bypass(request(GateKind::Progress, "demo", "add actions"), &results())
            .unwrap();
        let now = Utc::now();
        let s1 = SessionId::new("s1");

        let same = failed(GateKind::Progress, 40.0, &["broken"]);
        let worse = failed(GateKind::Progress, 20.0, &["broken", "worse"]);
        let other_gate = failed(GateKind::Quality, 40.0, &["broken"]);

        assert!(record.covers(&s1, &same, now));
        assert!(!record.covers(&SessionId::new("s2"), &same, now));
        assert!(!record.covers(&s1, &worse, now));
        assert!(!record.covers(&s1, &other_gate, now));
        assert!(!record.covers(&s1, &same, now + Duration::hours(2)));
    }

    #[test]
    fn ledger_file_keeps_every_grant() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("audit").join("bypass-ledger.jsonl");
        let ledger = BypassLedger::new(Duration::hours(24)).with_file(path.clone());

        ledger
            .request_bypass(request(GateKind::Compile, "a", "b"), &results())
            .unwrap();
        ledger
            .request_bypass(request(GateKind::DocSync, "c", "d"), &results())
            .unwrap();

        let records = read_ledger(&path).unwrap();
        let gates: Vec<GateKind> = records.iter().map(|r| r.gate).collect();
        assert_eq!(gates, vec![GateKind::Compile, GateKind::DocSync]);

        let reopened = BypassLedger::new(Duration::hours(24)).with_file(path);
        assert_eq!(reopened.records(), records);
    }

    #[test]
    fn unwritable_ledger_refuses_the_grant() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "not a directory").unwrap();
        let ledger =
            BypassLedger::new(Duration::hours(24)).with_file(blocker.join("bypass-ledger.jsonl"));

        let err = ledger
            .request_bypass(request(GateKind::Quality, "why", "plan"), &results())
            .unwrap_err();

        assert!(matches!(
            err,
            ContinuityError::Bypass(BypassError::AuditWrite { .. })
        ));
        assert!(!err.is_rejected_input());
        assert!(ledger.records().is_empty());
    }

    #[test]
    fn corrupt_ledger_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bypass-ledger.jsonl");
        let ledger = BypassLedger::new(Duration::hours(24)).with_file(path.clone());
        let first = ledger
            .request_bypass(request(GateKind::Compile, "a", "b"), &results())
            .unwrap();
        append_locked(&path, "{\"id\": truncated\n").unwrap();
        let second = ledger
            .request_bypass(request(GateKind::Quality, "c", "d"), &results())
            .unwrap();

        let reopened = BypassLedger::new(Duration::hours(24)).with_file(path);
        assert_eq!(reopened.records(), vec![first, second]);
    }

    #[test]
    fn missing_ledger_reads_empty() {
        let dir = TempDir::new().unwrap();
        assert!(read_ledger(&dir.path().join("none.jsonl")).unwrap().is_empty());
    }
}
