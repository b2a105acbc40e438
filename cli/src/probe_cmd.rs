//! `continuity probe`

use clap::Parser;
use continuity_core::ContinuityService;

use crate::{EXIT_FAILED, EXIT_OK, print_json};

#[derive(Debug, Parser)]
pub struct ProbeArgs {
    /// Exit 1 when the build did not succeed
    #[arg(long)]
    pub strict: bool,
}

pub async fn run(service: &ContinuityService, args: ProbeArgs) -> i32 {
    let facts = service.probe().await;
    print_json(&facts);

    if args.strict && !facts.build.succeeded() {
        EXIT_FAILED
    } else {
        EXIT_OK
    }
}
