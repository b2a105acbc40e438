//! The four gate checks.

use super::phase::PhasePlan;
use super::{GateContext, GateKind, GateResult};
use crate::snapshot::BuildStatus;
use crate::writer::meets_redundancy_threshold;

const COMPILE_SCORE_FLOOR: f64 = 50.0;

/// Progress above this with nothing completed is suspicious.
const ADVISORY_PROGRESS: f64 = 10.0;

/// Passes iff the build succeeded with zero located errors.
///
/// Without probe output the snapshot's recorded build status is used.
pub fn compile_gate(ctx: &GateContext<'_>, warning_penalty: f64) -> GateResult {
    let mut issues = Vec::new();
    let mut recommendations = Vec::new();

    let (succeeded, warnings) = match ctx.environment {
        Some(facts) => {
            for diag in facts.build.errors() {
                issues.push(format!("{}:{}: {}", diag.file, diag.line, diag.message));
            }
            if !facts.build.succeeded() && issues.is_empty() {
                issues.push(match &facts.build.command.error {
                    Some(err) => format!("Build did not succeed: {err}"),
                    None => "Build did not succeed".to_string(),
                });
            }
            (facts.build.succeeded() && issues.is_empty(), facts.build.warning_count)
        }
        None => {
            let build = ctx.snapshot.environment.build;
            if build != BuildStatus::Succeeded {
                issues.push(format!("Recorded build status is {}", build.label()));
            }
            (build == BuildStatus::Succeeded, 0)
        }
    };

    let score = if succeeded {
        (100.0 - warning_penalty * warnings as f64).max(COMPILE_SCORE_FLOOR)
    } else {
        recommendations.push("Fix the reported build errors and re-run the probe".to_string());
        0.0
    };
    if warnings > 0 {
        recommendations.push(format!("Address {warnings} build warning(s)"));
    }

    GateResult {
        gate: GateKind::Compile,
        passed: succeeded,
        score,
        issues,
        recommendations,
    }
}

/// Passes iff the last store met the redundancy ratio and the layers agree.
pub fn doc_sync_gate(ctx: &GateContext<'_>, redundancy_ratio: f64) -> GateResult {
    let mut issues = Vec::new();
    let mut recommendations = Vec::new();
    let mut score: f64 = 100.0;

    match ctx.last_storage {
        Some(storage) => {
            if !meets_redundancy_threshold(
                storage.successful_layers,
                storage.total_layers,
                redundancy_ratio,
            ) {
                issues.push(format!(
                    "Only {}/{} layers written on the last store",
                    storage.successful_layers, storage.total_layers
                ));
                for (id, outcome) in storage.failed_layers() {
                    recommendations.push(format!(
                        "Repair layer {id}: {}",
                        outcome.error.as_deref().unwrap_or("write failed")
                    ));
                }
                score -= 50.0;
            }
        }
        None => {
            issues.push("No snapshot has been stored in this session".to_string());
            recommendations.push("Store the current snapshot before advancing".to_string());
            score -= 50.0;
        }
    }

    if let Some(report) = ctx.consistency {
        for issue in &report.issues {
            issues.push(issue.description.clone());
        }
        if !report.issues.is_empty() {
            recommendations
                .push("Store a fresh snapshot to bring the layers back in line".to_string());
            score -= 100.0 - report.consistency_score;
        }
    }

    GateResult {
        gate: GateKind::DocSync,
        passed: issues.is_empty(),
        score: score.max(0.0),
        issues,
        recommendations,
    }
}

/// Passes iff progress is in range, the phase is set and next actions are
/// present. The score and the phase plan advice never change the outcome.
pub fn progress_gate(ctx: &GateContext<'_>, plan: &PhasePlan) -> GateResult {
    let snapshot = ctx.snapshot;
    let mut issues = Vec::new();
    let mut recommendations = Vec::new();
    let mut score: f64 = 100.0;
    let mut hard_failure = false;

    if !snapshot.progress_in_range() {
        issues.push(format!("Progress {} is outside 0-100", snapshot.progress));
        score -= 25.0;
        hard_failure = true;
    }
    if snapshot.phase.trim().is_empty() {
        issues.push("Phase is empty".to_string());
        recommendations.push("Record the current phase".to_string());
        score -= 15.0;
        hard_failure = true;
    }
    if snapshot.next_actions.is_empty() {
        issues.push("No next actions recorded".to_string());
        recommendations.push("Add at least one next action".to_string());
        score -= 10.0;
        hard_failure = true;
    }

    // Advisory only.
    if snapshot.progress > ADVISORY_PROGRESS && snapshot.completed_tasks() == 0 {
        recommendations.push(format!(
            "Progress is {}% but no task is completed; check the task list",
            snapshot.progress
        ));
        score -= 20.0;
    }
    if snapshot.success_criteria.is_empty() {
        recommendations.push("Define success criteria for this phase".to_string());
        score -= 10.0;
    }
    if !snapshot.phase.trim().is_empty() {
        match plan.track(snapshot) {
            Some(progress) => recommendations.extend(progress.next_actions),
            None => recommendations.push(format!(
                "Phase {:?} is not in the phase plan",
                snapshot.phase.trim()
            )),
        }
    }

    GateResult {
        gate: GateKind::Progress,
        passed: !hard_failure,
        score: score.max(0.0),
        issues,
        recommendations,
    }
}

/// Passes iff the build succeeded, storage is reachable and no critical issue
/// is open. Snapshot completeness only lowers the score.
pub fn quality_gate(ctx: &GateContext<'_>) -> GateResult {
    let snapshot = ctx.snapshot;
    let mut issues = Vec::new();
    let mut recommendations = Vec::new();
    let mut score: f64 = 100.0;
    let mut hard_failure = false;

    let compiled = match ctx.environment {
        Some(facts) => facts.build.succeeded() && facts.build.error_count() == 0,
        None => snapshot.environment.build == BuildStatus::Succeeded,
    };
    if !compiled {
        issues.push("Build is not passing".to_string());
        score -= 30.0;
        hard_failure = true;
    }

    match ctx.environment {
        Some(facts) if facts.storage.is_connected() => {}
        Some(facts) => {
            issues.push(match &facts.storage.error {
                Some(err) => format!("Storage unreachable: {err}"),
                None => "Storage unreachable".to_string(),
            });
            recommendations.push("Check the state database".to_string());
            score -= 20.0;
            hard_failure = true;
        }
        None => {
            issues.push("Storage connectivity was not probed".to_string());
            recommendations.push("Run the environment probe".to_string());
            score -= 20.0;
            hard_failure = true;
        }
    }

    for issue in snapshot.open_critical_issues() {
        issues.push(format!("Open critical issue: {}", issue.title));
        score -= 10.0;
        hard_failure = true;
    }

    let completeness = snapshot.completeness();
    if !completeness.valid {
        recommendations.extend(completeness.issues);
        score -= 15.0;
    }

    GateResult {
        gate: GateKind::Quality,
        passed: !hard_failure,
        score: score.max(0.0),
        issues,
        recommendations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{
        BuildReport, CommandReport, EnvironmentFacts, ProbeStatus, StorageHealth,
        parse_diagnostics,
    };
    use crate::snapshot::{
        EnvironmentSummary, IssueSeverity, IssueStatus, KnownIssue, Priority, SessionId,
        StateSnapshot, TaskStatus,
    };
    use crate::evidence::ContextField;
    use crate::validator::{ConsistencyValidator, LayerSnapshot};
    use crate::writer::StorageResult;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    fn command(status: ProbeStatus) -> CommandReport {
        CommandReport {
            status,
            exit_code: Some(if status == ProbeStatus::Succeeded { 0 } else { 101 }),
            elapsed_ms: 5,
            error: None,
        }
    }

    fn facts(build_status: ProbeStatus, output: &str) -> EnvironmentFacts {
        let diagnostics = parse_diagnostics(output);
        let warning_count = diagnostics
            .iter()
            .filter(|d| d.level == crate::probe::DiagnosticLevel::Warning)
            .count();
        EnvironmentFacts {
            captured_at: Utc::now(),
            build: BuildReport {
                command: command(build_status),
                diagnostics,
                warning_count,
            },
            dependencies: command(ProbeStatus::Succeeded),
            storage: StorageHealth {
                status: ProbeStatus::Succeeded,
                table_count: Some(2),
                error: None,
            },
            runtime_versions: BTreeMap::new(),
        }
    }

    fn snapshot() -> StateSnapshot {
        StateSnapshot::new(SessionId::new("s1"), "implementation", 40.0)
            .with_task("t1", "scaffold", TaskStatus::Completed)
            .with_next_action("wire the CLI", Priority::High)
            .with_success_criterion("all gates green")
            .with_environment(EnvironmentSummary {
                build: BuildStatus::Succeeded,
                ..EnvironmentSummary::default()
            })
    }

    fn storage(successful: usize, total: usize) -> StorageResult {
        StorageResult {
            session_id: SessionId::new("s1"),
            layers: BTreeMap::new(),
            successful_layers: successful,
            total_layers: total,
            overall_success: successful * 5 >= total * 4,
            completed_at: Utc::now(),
        }
    }

    #[test]
    fn two_build_errors_fail_compile_gate() {
        let output = "src/lib.rs:10:5: error[E0425]: cannot find value `x`\n\
                      src/main.rs:3:1: error: expected item, found `}`\n";
        let facts = facts(ProbeStatus::Failed, output);
        let snap = snapshot();
        let result = compile_gate(&GateContext::new(&snap).with_environment(&facts), 2.0);

        assert!(!result.passed);
        assert_eq!(result.score, 0.0);
        assert_eq!(result.issues.len(), 2);
    }

    #[test]
    fn warnings_lower_compile_score_with_floor() {
        let output = "src/lib.rs:1:1: warning: unused import\n".repeat(40);
        let facts = facts(ProbeStatus::Succeeded, &output);
        let snap = snapshot();
        let result = compile_gate(&GateContext::new(&snap).with_environment(&facts), 2.0);

        assert!(result.passed);
        assert_eq!(result.score, 50.0);
    }

    #[test]
    fn doc_sync_needs_ratio_and_agreement() {
        let snap = snapshot();
        let good = storage(4, 5);
        let bad = storage(3, 5);

        assert!(doc_sync_gate(&GateContext::new(&snap).with_storage(&good), 0.8).passed);
        assert!(!doc_sync_gate(&GateContext::new(&snap).with_storage(&bad), 0.8).passed);
        assert!(!doc_sync_gate(&GateContext::new(&snap), 0.8).passed);

        let report = ConsistencyValidator::default().cross_validate(&[
            LayerSnapshot::new("a", 90.0).with_field(ContextField::Phase, "build"),
            LayerSnapshot::new("b", 70.0).with_field(ContextField::Phase, "test"),
        ]);
        let ctx = GateContext::new(&snap)
            .with_storage(&good)
            .with_consistency(&report);
        let result = doc_sync_gate(&ctx, 0.8);
        assert!(!result.passed);
        assert_eq!(result.issues.len(), 1);
    }

    #[test]
    fn progress_gate_hard_rules() {
        let snap = StateSnapshot::new(SessionId::new("s1"), "", 40.0);
        let result = progress_gate(&GateContext::new(&snap), &PhasePlan::default());
        assert!(!result.passed);
        assert_eq!(result.issues.len(), 2);
    }

    #[test]
    fn progress_advisory_only_lowers_score() {
        let snap = StateSnapshot::new(SessionId::new("s1"), "build", 40.0)
            .with_next_action("continue", Priority::Medium);
        let result = progress_gate(&GateContext::new(&snap), &PhasePlan::default());
        assert!(result.passed);
        assert_eq!(result.score, 70.0);
        assert!(result.issues.is_empty());
        assert!(
            result
                .recommendations
                .contains(&"Phase \"build\" is not in the phase plan".to_string())
        );
    }

    #[test]
    fn progress_gate_lists_open_deliverables() {
        let snap = snapshot();
        let result = progress_gate(&GateContext::new(&snap), &PhasePlan::default());
        assert!(result.passed);
        assert_eq!(
            result.recommendations,
            vec![
                "Complete: core features",
                "Complete: command line",
                "Complete: error handling",
            ]
        );
    }

    #[test]
    fn quality_gate_blocks_on_open_critical_issue() {
        let facts = facts(ProbeStatus::Succeeded, "");
        let clean = snapshot();
        let ctx = GateContext::new(&clean).with_environment(&facts);
        assert!(quality_gate(&ctx).passed);

        let blocked = snapshot().with_known_issue(KnownIssue {
            title: "data loss on restart".to_string(),
            severity: IssueSeverity::Critical,
            status: IssueStatus::Open,
            description: None,
            resolution_steps: Vec::new(),
        });
        let ctx = GateContext::new(&blocked).with_environment(&facts);
        let result = quality_gate(&ctx);
        assert!(!result.passed);
        assert_eq!(result.score, 90.0);
    }

    #[test]
    fn incomplete_snapshot_still_passes_quality() {
        let facts = facts(ProbeStatus::Succeeded, "");
        let sparse = StateSnapshot::new(SessionId::new("s1"), "implementation", 40.0)
            .with_environment(EnvironmentSummary {
                build: BuildStatus::Succeeded,
                ..EnvironmentSummary::default()
            });
        let ctx = GateContext::new(&sparse).with_environment(&facts);
        let result = quality_gate(&ctx);

        assert!(result.passed);
        assert!(result.score < 100.0);
        assert!(result.issues.is_empty());
    }
}
