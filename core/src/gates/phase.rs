//! Phase plan.
//!
//! An ordered list of phases, each with deliverables, an estimate and success
//! criteria. A snapshot's `phase` names its current phase. From there the plan
//! tracks progress (deliverables matched against completed tasks), validates
//! whether the phase is done, and recommends what comes next.
//!
//! A plan file is a JSON array of [`PhaseDefinition`]s.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use super::{GateKind, QualityGateResults};
use crate::error::{ContinuityError, Result};
use crate::snapshot::{BuildStatus, ConnectivityStatus, StateSnapshot, TaskStatus};

/// Next actions listed per tracked phase.
const MAX_NEXT_ACTIONS: usize = 3;

const DELIVERABLE_PENALTY: f64 = 15.0;
const CRITERION_PENALTY: f64 = 10.0;
const BUILD_PENALTY: f64 = 20.0;
const GATES_PENALTY: f64 = 15.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub deliverables: Vec<String>,
    pub estimated_minutes: u32,
    #[serde(default)]
    pub success_criteria: Vec<String>,
}

impl PhaseDefinition {
    pub fn new(id: &str, name: &str, estimated_minutes: u32) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: String::new(),
            deliverables: Vec::new(),
            estimated_minutes,
            success_criteria: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_deliverables(mut self, deliverables: &[&str]) -> Self {
        self.deliverables
            .extend(deliverables.iter().map(|d| (*d).to_string()));
        self
    }

    pub fn with_criteria(mut self, criteria: &[&str]) -> Self {
        self.success_criteria
            .extend(criteria.iter().map(|c| (*c).to_string()));
        self
    }

    /// Matches the phase id or name, ignoring case and surrounding space.
    pub fn matches(&self, phase: &str) -> bool {
        let phase = phase.trim();
        phase.eq_ignore_ascii_case(&self.id) || phase.eq_ignore_ascii_case(&self.name)
    }

    fn completed_deliverables<'a>(&'a self, snapshot: &StateSnapshot) -> Vec<&'a str> {
        self.deliverables
            .iter()
            .filter(|d| deliverable_done(d, snapshot))
            .map(String::as_str)
            .collect()
    }
}

/// A deliverable is done once a completed task mentions it.
fn deliverable_done(deliverable: &str, snapshot: &StateSnapshot) -> bool {
    let needle = deliverable.to_lowercase();
    snapshot
        .tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Completed)
        .any(|t| t.description.to_lowercase().contains(&needle))
}

/// Build and storage criteria are checked against the snapshot; any other
/// criterion is taken as met.
fn criterion_met(criterion: &str, snapshot: &StateSnapshot, build_ok: bool) -> bool {
    let criterion = criterion.to_lowercase();
    if criterion.contains("compil") || criterion.contains("build") {
        return build_ok;
    }
    if criterion.contains("database") || criterion.contains("storage") {
        return snapshot.environment.connectivity == ConnectivityStatus::Connected;
    }
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseProgress {
    pub phase_id: String,
    pub phase_name: String,
    /// Share of this phase's deliverables done, 0-100.
    pub phase_progress: f64,
    /// Finished phases plus the current phase's share, over the whole plan.
    pub overall_progress: f64,
    pub completed_deliverables: usize,
    pub total_deliverables: usize,
    pub remaining_minutes: u32,
    pub next_actions: Vec<String>,
    pub deliverables_complete: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NextPhase {
    Phase {
        id: String,
        name: String,
        estimated_minutes: u32,
    },
    /// The current phase is the last one in the plan.
    ProjectComplete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NextPhaseRecommendation {
    pub current_phase_id: String,
    pub next: NextPhase,
    pub preparation_steps: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseValidation {
    pub phase_id: String,
    pub phase_name: String,
    pub score: f64,
    pub complete: bool,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
    /// Present only once the phase is complete.
    pub next: Option<NextPhaseRecommendation>,
    pub validated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PhasePlan {
    phases: Vec<PhaseDefinition>,
    completion_score: f64,
}

impl PhasePlan {
    /// Rejects an empty plan, duplicate ids and phases without deliverables.
    pub fn new(phases: Vec<PhaseDefinition>) -> Result<Self> {
        if phases.is_empty() {
            return Err(ContinuityError::InvalidPhasePlan(
                "plan has no phases".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for phase in &phases {
            if phase.id.trim().is_empty() {
                return Err(ContinuityError::InvalidPhasePlan(
                    "phase id is empty".to_string(),
                ));
            }
            if !seen.insert(phase.id.to_lowercase()) {
                return Err(ContinuityError::InvalidPhasePlan(format!(
                    "duplicate phase id {}",
                    phase.id
                )));
            }
            if phase.deliverables.is_empty() {
                return Err(ContinuityError::InvalidPhasePlan(format!(
                    "phase {} has no deliverables",
                    phase.id
                )));
            }
        }
        Ok(Self {
            phases,
            completion_score: 80.0,
        })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ContinuityError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        let phases: Vec<PhaseDefinition> = serde_json::from_str(&content)
            .map_err(|source| ContinuityError::JsonDeserialize { source })?;
        Self::new(phases)
    }

    pub fn with_completion_score(mut self, score: f64) -> Self {
        self.completion_score = score;
        self
    }

    pub fn phases(&self) -> &[PhaseDefinition] {
        &self.phases
    }

    pub fn total_minutes(&self) -> u32 {
        self.phases.iter().map(|p| p.estimated_minutes).sum()
    }

    pub fn find(&self, phase: &str) -> Option<(usize, &PhaseDefinition)> {
        self.phases.iter().enumerate().find(|(_, p)| p.matches(phase))
    }

    /// Progress of the snapshot's current phase, or `None` when the plan
    /// does not know it.
    pub fn track(&self, snapshot: &StateSnapshot) -> Option<PhaseProgress> {
        let (index, phase) = self.find(&snapshot.phase)?;
        let done = phase.completed_deliverables(snapshot);
        let total = phase.deliverables.len();
        let phase_progress = done.len() as f64 / total as f64 * 100.0;
        let overall_progress =
            (index as f64 + phase_progress / 100.0) / self.phases.len() as f64 * 100.0;

        let current_remaining =
            phase.estimated_minutes * (total - done.len()) as u32 / total as u32;
        let later: u32 = self.phases[index + 1..]
            .iter()
            .map(|p| p.estimated_minutes)
            .sum();

        let mut next_actions: Vec<String> = phase
            .deliverables
            .iter()
            .filter(|d| !done.contains(&d.as_str()))
            .take(MAX_NEXT_ACTIONS)
            .map(|d| format!("Complete: {d}"))
            .collect();
        if next_actions.is_empty() {
            next_actions.push("Validate phase completion and prepare for the next phase".to_string());
        }

        tracing::debug!(
            phase = %phase.id,
            phase_progress,
            overall_progress,
            "Phase progress tracked"
        );

        Some(PhaseProgress {
            phase_id: phase.id.clone(),
            phase_name: phase.name.clone(),
            phase_progress,
            overall_progress,
            completed_deliverables: done.len(),
            total_deliverables: total,
            remaining_minutes: current_remaining + later,
            next_actions,
            deliverables_complete: done.len() == total,
        })
    }

    /// Score `phase` against the snapshot and, when given, the session's gate
    /// results. The gates' compile result takes precedence over the build
    /// status recorded in the snapshot.
    pub fn validate(
        &self,
        phase: &PhaseDefinition,
        snapshot: &StateSnapshot,
        gates: Option<&QualityGateResults>,
    ) -> PhaseValidation {
        let mut issues = Vec::new();
        let mut recommendations = Vec::new();
        let mut score: f64 = 100.0;

        for deliverable in &phase.deliverables {
            if !deliverable_done(deliverable, snapshot) {
                issues.push(format!("Incomplete deliverable: {deliverable}"));
                recommendations.push(format!("Complete {deliverable} before proceeding"));
                score -= DELIVERABLE_PENALTY;
            }
        }

        let build_ok = match gates.and_then(|g| g.result(GateKind::Compile)) {
            Some(compile) => compile.passed,
            None => snapshot.environment.build == BuildStatus::Succeeded,
        };
        for criterion in &phase.success_criteria {
            if !criterion_met(criterion, snapshot, build_ok) {
                issues.push(format!("Success criterion not met: {criterion}"));
                recommendations.push(format!("Make sure {criterion} holds"));
                score -= CRITERION_PENALTY;
            }
        }

        if !build_ok {
            issues.push("Build is not passing".to_string());
            recommendations.push("Resolve all build errors".to_string());
            score -= BUILD_PENALTY;
        }

        if let Some(results) = gates.filter(|g| !g.overall_passed()) {
            let failed = results
                .failed_gates()
                .filter(|r| !results.bypasses.iter().any(|b| b.gate == r.gate))
                .count();
            issues.push(format!("Quality gates not passing: {failed} failed"));
            recommendations.push("Address gate failures before proceeding".to_string());
            score -= GATES_PENALTY;
        }

        let score = score.max(0.0);
        let complete = score >= self.completion_score;
        let next = if complete {
            self.recommend_next(&phase.id)
        } else {
            None
        };

        tracing::info!(phase = %phase.id, score, complete, "Phase validated");

        PhaseValidation {
            phase_id: phase.id.clone(),
            phase_name: phase.name.clone(),
            score,
            complete,
            issues,
            recommendations,
            next,
            validated_at: Utc::now(),
        }
    }

    /// What follows `phase_id`; `None` when the plan does not know it.
    pub fn recommend_next(&self, phase_id: &str) -> Option<NextPhaseRecommendation> {
        let (index, current) = self.find(phase_id)?;
        let recommendation = match self.phases.get(index + 1) {
            Some(next) => NextPhaseRecommendation {
                current_phase_id: current.id.clone(),
                next: NextPhase::Phase {
                    id: next.id.clone(),
                    name: next.name.clone(),
                    estimated_minutes: next.estimated_minutes,
                },
                preparation_steps: vec![
                    format!("Review the {} deliverables", next.name),
                    format!("Confirm nothing from {} is left open", current.name),
                    format!("Check the environment is ready for {}", next.name),
                    format!("Set aside about {} minutes", next.estimated_minutes),
                ],
            },
            None => NextPhaseRecommendation {
                current_phase_id: current.id.clone(),
                next: NextPhase::ProjectComplete,
                preparation_steps: vec![
                    "Run a final validation of every layer and gate".to_string(),
                    "Bring the project documentation up to date".to_string(),
                    "Review outstanding bypasses and known issues".to_string(),
                ],
            },
        };
        Some(recommendation)
    }
}

impl Default for PhasePlan {
    fn default() -> Self {
        Self {
            phases: vec![
                PhaseDefinition::new("planning", "Planning", 60)
                    .with_description("Agree on scope and shape before building")
                    .with_deliverables(&["requirements", "design"])
                    .with_criteria(&["Success criteria recorded"]),
                PhaseDefinition::new("foundation", "Foundation", 120)
                    .with_description("Project skeleton, storage and configuration")
                    .with_deliverables(&["project scaffold", "storage schema", "configuration"])
                    .with_criteria(&["Build successful", "Database connected"]),
                PhaseDefinition::new("implementation", "Implementation", 240)
                    .with_description("Core behavior and its operator surface")
                    .with_deliverables(&["core features", "command line", "error handling"])
                    .with_criteria(&["Build successful"]),
                PhaseDefinition::new("verification", "Verification", 150)
                    .with_description("Tests and performance checks")
                    .with_deliverables(&["unit tests", "integration tests", "performance checks"])
                    .with_criteria(&["Build successful", "Quality gates passing"]),
                PhaseDefinition::new("release", "Release", 60)
                    .with_description("Documentation and release")
                    .with_deliverables(&["documentation", "release notes"])
                    .with_criteria(&["Build successful"]),
            ],
            completion_score: 80.0,
        }
    }
}
