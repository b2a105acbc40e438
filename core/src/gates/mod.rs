//! Gate pipeline.
//!
//! Four ordered gates evaluated over a [`GateContext`]: compile, doc-sync,
//! progress, quality. Gates are pure functions of the context. A failed gate
//! can only be passed over through an audited bypass (see [`bypass`]), and a
//! bypass never rewrites the gate's own result.

pub mod bypass;
pub mod checks;
pub mod phase;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::config::{GateConfig, ThresholdConfig};
use crate::error::ContinuityError;
use crate::probe::EnvironmentFacts;
use crate::snapshot::{SessionId, StateSnapshot};
use crate::validator::ConsistencyReport;
use crate::writer::StorageResult;

pub use bypass::{BypassConditions, BypassError, BypassLedger, BypassRecord, BypassRequest};
pub use phase::{
    NextPhase, NextPhaseRecommendation, PhaseDefinition, PhasePlan, PhaseProgress, PhaseValidation,
};

// ============================================================================
// Gate vocabulary
// ============================================================================

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateKind {
    Compile,
    DocSync,
    Progress,
    Quality,
}

impl GateKind {
    /// All gates in evaluation order
    pub fn all() -> [Self; 4] {
        [Self::Compile, Self::DocSync, Self::Progress, Self::Quality]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compile => "compile",
            Self::DocSync => "doc_sync",
            Self::Progress => "progress",
            Self::Quality => "quality",
        }
    }
}

impl fmt::Display for GateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GateKind {
    type Err = ContinuityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "compile" => Ok(Self::Compile),
            "doc_sync" | "docsync" => Ok(Self::DocSync),
            "progress" => Ok(Self::Progress),
            "quality" => Ok(Self::Quality),
            _ => Err(ContinuityError::UnknownGate(s.to_string())),
        }
    }
}

// ============================================================================
// Inputs and results
// ============================================================================

/// What the gates look at. Missing facts are judged conservatively.
#[derive(Debug, Clone)]
pub struct GateContext<'a> {
    pub snapshot: &'a StateSnapshot,
    pub environment: Option<&'a EnvironmentFacts>,
    pub last_storage: Option<&'a StorageResult>,
    pub consistency: Option<&'a ConsistencyReport>,
}

impl<'a> GateContext<'a> {
    pub fn new(snapshot: &'a StateSnapshot) -> Self {
        Self {
            snapshot,
            environment: None,
            last_storage: None,
            consistency: None,
        }
    }

    pub fn with_environment(mut self, environment: &'a EnvironmentFacts) -> Self {
        self.environment = Some(environment);
        self
    }

    pub fn with_storage(mut self, storage: &'a StorageResult) -> Self {
        self.last_storage = Some(storage);
        self
    }

    pub fn with_consistency(mut self, report: &'a ConsistencyReport) -> Self {
        self.consistency = Some(report);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateResult {
    pub gate: GateKind,
    pub passed: bool,
    pub score: f64,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
}

/// Ordered gate results for one session plus any bypasses that cover its
/// failed gates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityGateResults {
    pub session_id: SessionId,
    pub results: Vec<GateResult>,
    #[serde(default)]
    pub bypasses: Vec<BypassRecord>,
}

impl QualityGateResults {
    pub fn new(session_id: SessionId, results: Vec<GateResult>) -> Self {
        Self {
            session_id,
            results,
            bypasses: Vec::new(),
        }
    }

    pub fn all_gates_passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }

    /// Every gate passed on its own or carries a granted bypass.
    pub fn overall_passed(&self) -> bool {
        self.results
            .iter()
            .all(|r| r.passed || self.bypasses.iter().any(|b| b.gate == r.gate))
    }

    pub fn failed_gates(&self) -> impl Iterator<Item = &GateResult> {
        self.results.iter().filter(|r| !r.passed)
    }

    pub fn result(&self, gate: GateKind) -> Option<&GateResult> {
        self.results.iter().find(|r| r.gate == gate)
    }

    /// Attach, per failed gate, the newest grant that still covers it. The
    /// gate results are left untouched.
    pub fn attach_bypasses(&mut self, records: &[BypassRecord], now: DateTime<Utc>) {
        let covering: Vec<BypassRecord> = self
            .failed_gates()
            .filter_map(|failed| {
                records
                    .iter()
                    .rev()
                    .find(|record| record.covers(&self.session_id, failed, now))
                    .cloned()
            })
            .collect();
        self.bypasses.extend(covering);
    }
}

// ============================================================================
// Pipeline
// ============================================================================

#[derive(Debug, Clone)]
pub struct GatePipeline {
    gates: GateConfig,
    redundancy_ratio: f64,
    plan: PhasePlan,
}

impl GatePipeline {
    pub fn new(gates: GateConfig, thresholds: &ThresholdConfig) -> Self {
        let plan = PhasePlan::default().with_completion_score(gates.phase_completion_score);
        Self {
            gates,
            redundancy_ratio: thresholds.redundancy_ratio,
            plan,
        }
    }

    /// Replace the built-in phase plan, keeping the configured completion score.
    pub fn with_plan(mut self, plan: PhasePlan) -> Self {
        self.plan = plan.with_completion_score(self.gates.phase_completion_score);
        self
    }

    pub fn plan(&self) -> &PhasePlan {
        &self.plan
    }

    pub fn evaluate(&self, gate: GateKind, ctx: &GateContext<'_>) -> GateResult {
        match gate {
            GateKind::Compile => checks::compile_gate(ctx, self.gates.warning_penalty),
            GateKind::DocSync => checks::doc_sync_gate(ctx, self.redundancy_ratio),
            GateKind::Progress => checks::progress_gate(ctx, &self.plan),
            GateKind::Quality => checks::quality_gate(ctx),
        }
    }

    /// Run every gate in order. Later gates run even when earlier ones fail.
    #[tracing::instrument(skip_all, fields(session = %ctx.snapshot.id()))]
    pub fn run(&self, ctx: &GateContext<'_>) -> QualityGateResults {
        let results: Vec<GateResult> = GateKind::all()
            .into_iter()
            .map(|gate| {
                let result = self.evaluate(gate, ctx);
                if result.passed {
                    tracing::debug!(gate = %gate, score = result.score, "Gate passed");
                } else {
                    tracing::warn!(
                        gate = %gate,
                        score = result.score,
                        issues = result.issues.len(),
                        "Gate failed"
                    );
                }
                result
            })
            .collect();

        let out = QualityGateResults::new(ctx.snapshot.id().clone(), results);
        tracing::info!(passed = out.all_gates_passed(), "Quality gates evaluated");
        out
    }
}

impl Default for GatePipeline {
    fn default() -> Self {
        Self::new(GateConfig::default(), &ThresholdConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::Priority;
    use pretty_assertions::assert_eq;

    #[test]
    fn gate_names_parse() {
        assert_eq!("doc-sync".parse::<GateKind>().ok(), Some(GateKind::DocSync));
        assert_eq!("Compile".parse::<GateKind>().ok(), Some(GateKind::Compile));
        assert!(matches!(
            "lint".parse::<GateKind>(),
            Err(ContinuityError::UnknownGate(_))
        ));
    }

    #[test]
    fn pipeline_runs_every_gate_in_order() {
        let snapshot = StateSnapshot::new(SessionId::new("s1"), "build", 10.0)
            .with_next_action("write tests", Priority::High);
        let results = GatePipeline::default().run(&GateContext::new(&snapshot));

        let order: Vec<GateKind> = results.results.iter().map(|r| r.gate).collect();
        assert_eq!(order, GateKind::all().to_vec());
        // No environment facts and no storage result.
        assert!(!results.all_gates_passed());
        assert!(results.result(GateKind::Progress).is_some_and(|r| r.passed));
    }
}
