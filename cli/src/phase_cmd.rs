//! `continuity phase`

use clap::Parser;
use continuity_core::gates::{PhasePlan, PhaseProgress, PhaseValidation};
use continuity_core::{ContinuityError, ContinuityService};
use serde::Serialize;
use std::path::PathBuf;

use crate::gates_cmd::GateRunArgs;
use crate::{EXIT_FAILED, EXIT_INVALID, EXIT_OK, print_json, read_snapshot};

#[derive(Debug, Parser)]
pub struct PhaseArgs {
    /// Phase plan JSON file; the built-in plan is used otherwise
    #[arg(long, value_name = "FILE")]
    pub plan: Option<PathBuf>,

    #[command(flatten)]
    pub run: GateRunArgs,
}

#[derive(Debug, Serialize)]
struct PhaseOutput {
    progress: PhaseProgress,
    validation: PhaseValidation,
}

/// Exit 0 when the snapshot's phase is complete, 1 when it is not.
pub async fn run(service: ContinuityService, args: PhaseArgs) -> i32 {
    let service = match args.plan.as_deref().map(PhasePlan::from_file) {
        Some(Ok(plan)) => service.with_phase_plan(plan),
        Some(Err(err)) => {
            eprintln!("error: {err}");
            return EXIT_INVALID;
        }
        None => service,
    };

    let snapshot = match read_snapshot(&args.run.snapshot) {
        Ok(snapshot) => snapshot,
        Err(err) => {
            eprintln!("error: {err:#}");
            return EXIT_INVALID;
        }
    };
    let progress = match service.phase_progress(&snapshot) {
        Ok(progress) => progress,
        Err(err) => return report_error(&err),
    };

    if !args.run.no_store {
        if let Err(err) = service.store(&snapshot).await {
            return report_error(&err);
        }
    }
    let facts = if args.run.skip_probe {
        None
    } else {
        Some(service.probe().await)
    };
    let validation = match service.validate_phase(&snapshot, facts.as_ref()).await {
        Ok(validation) => validation,
        Err(err) => return report_error(&err),
    };

    let complete = validation.complete;
    print_json(&PhaseOutput {
        progress,
        validation,
    });
    if complete { EXIT_OK } else { EXIT_FAILED }
}

fn report_error(err: &ContinuityError) -> i32 {
    eprintln!("error: {err}");
    if err.is_rejected_input() {
        EXIT_INVALID
    } else {
        EXIT_FAILED
    }
}
