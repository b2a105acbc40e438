//! `continuity gates` and `continuity bypass`

use clap::{Args, Parser};
use continuity_core::gates::{BypassRequest, GateKind, QualityGateResults};
use continuity_core::snapshot::StateSnapshot;
use continuity_core::{ContinuityService, ContinuityError};
use std::path::PathBuf;

use crate::{EXIT_FAILED, EXIT_INVALID, EXIT_OK, print_json, read_snapshot};

/// How a snapshot is put in front of the gates.
#[derive(Debug, Args)]
pub struct GateRunArgs {
    /// Snapshot JSON file to gate
    #[arg(long, value_name = "FILE")]
    pub snapshot: PathBuf,

    /// Gate against the layers as they are instead of storing the snapshot first
    #[arg(long)]
    pub no_store: bool,

    /// Skip the environment probe; compile and quality gates then use the
    /// snapshot's recorded build status
    #[arg(long)]
    pub skip_probe: bool,
}

/// Read, store and gate the snapshot. `Err` carries the exit code.
pub(crate) async fn gate_snapshot(
    service: &ContinuityService,
    args: &GateRunArgs,
) -> Result<(StateSnapshot, QualityGateResults), i32> {
    let snapshot = read_snapshot(&args.snapshot).map_err(|err| {
        eprintln!("error: {err:#}");
        EXIT_INVALID
    })?;

    if !args.no_store {
        match service.store(&snapshot).await {
            Ok(result) if !result.overall_success => {
                tracing::warn!(
                    successful = result.successful_layers,
                    total = result.total_layers,
                    "Snapshot stored below the redundancy threshold"
                );
            }
            Ok(_) => {}
            Err(err) => {
                eprintln!("error: {err}");
                return Err(EXIT_INVALID);
            }
        }
    }

    let facts = if args.skip_probe {
        None
    } else {
        Some(service.probe().await)
    };
    let results = service.run_gates(&snapshot, facts.as_ref()).await;
    Ok((snapshot, results))
}

#[derive(Debug, Parser)]
pub struct GatesArgs {
    #[command(flatten)]
    pub run: GateRunArgs,
}

pub async fn run_gates(service: &ContinuityService, args: GatesArgs) -> i32 {
    let results = match gate_snapshot(service, &args.run).await {
        Ok((_, results)) => results,
        Err(code) => return code,
    };
    print_json(&results);

    if results.overall_passed() {
        EXIT_OK
    } else {
        EXIT_FAILED
    }
}

#[derive(Debug, Parser)]
pub struct BypassArgs {
    /// Gate to bypass: compile, doc-sync, progress or quality
    #[arg(long)]
    pub gate: String,

    /// Why the gate cannot be satisfied right now
    #[arg(long, default_value = "")]
    pub justification: String,

    /// How and when the failure will be fixed
    #[arg(long, default_value = "")]
    pub remediation: String,

    /// Who is asking
    #[arg(long)]
    pub requested_by: Option<String>,

    #[command(flatten)]
    pub run: GateRunArgs,
}

/// Gate the snapshot, then request a bypass of one of its failed gates.
pub async fn run_bypass(service: &ContinuityService, args: BypassArgs) -> i32 {
    let gate: GateKind = match args.gate.parse() {
        Ok(gate) => gate,
        Err(err) => {
            eprintln!("error: {err}");
            return EXIT_INVALID;
        }
    };

    let (snapshot, results) = match gate_snapshot(service, &args.run).await {
        Ok(gated) => gated,
        Err(code) => return code,
    };

    let mut request = BypassRequest::new(
        snapshot.id().clone(),
        gate,
        args.justification,
        args.remediation,
    );
    if let Some(who) = args.requested_by {
        request = request.requested_by(who);
    }

    match service.request_bypass(request, &results) {
        Ok(record) => {
            print_json(&record);
            EXIT_OK
        }
        Err(err) => {
            eprintln!("error: {err}");
            exit_code_for(&err)
        }
    }
}

fn exit_code_for(err: &ContinuityError) -> i32 {
    if err.is_rejected_input() {
        EXIT_INVALID
    } else {
        EXIT_FAILED
    }
}
