//! `continuity store --snapshot <file>`

use clap::Parser;
use continuity_core::ContinuityService;
use std::path::PathBuf;

use crate::{EXIT_FAILED, EXIT_INVALID, EXIT_OK, print_json, read_snapshot};

#[derive(Debug, Parser)]
pub struct StoreArgs {
    /// Snapshot JSON file
    #[arg(long, value_name = "FILE")]
    pub snapshot: PathBuf,
}

pub async fn run(service: &ContinuityService, args: StoreArgs) -> i32 {
    let snapshot = match read_snapshot(&args.snapshot) {
        Ok(snapshot) => snapshot,
        Err(err) => {
            eprintln!("error: {err:#}");
            return EXIT_INVALID;
        }
    };

    match service.store(&snapshot).await {
        Ok(result) => {
            print_json(&result);
            if result.overall_success {
                EXIT_OK
            } else {
                EXIT_FAILED
            }
        }
        Err(err) => {
            eprintln!("error: {err}");
            EXIT_INVALID
        }
    }
}
