//! `continuity validate`

use clap::Parser;
use continuity_core::ContinuityService;
use continuity_core::snapshot::SessionId;
use serde::Serialize;

use continuity_core::validator::{ConsistencyAnalysis, ConsistencyReport};

use crate::{EXIT_FAILED, EXIT_OK, print_json};

#[derive(Debug, Parser)]
pub struct ValidateArgs {
    /// Session the layers are expected to hold
    #[arg(long, value_name = "SESSION_ID", default_value = "current")]
    pub session: String,
}

#[derive(Debug, Serialize)]
struct ValidateOutput {
    report: ConsistencyReport,
    analysis: ConsistencyAnalysis,
}

pub async fn run(service: &ContinuityService, args: ValidateArgs) -> i32 {
    let session = SessionId::new(args.session);
    let report = service.cross_validate(&session).await;
    let analysis = service.analyze_consistency(&session).await;
    let consistent = report.overall_consistent;
    print_json(&ValidateOutput { report, analysis });

    if consistent { EXIT_OK } else { EXIT_FAILED }
}
