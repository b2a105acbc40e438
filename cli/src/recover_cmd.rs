//! `continuity recover --session <id>`

use clap::Parser;
use continuity_core::ContinuityService;
use continuity_core::snapshot::SessionId;
use tokio_util::sync::CancellationToken;

use crate::{EXIT_FAILED, EXIT_INVALID, EXIT_OK, print_json};

#[derive(Debug, Parser)]
pub struct RecoverArgs {
    /// Session to reconstruct
    #[arg(long, value_name = "SESSION_ID")]
    pub session: String,

    /// Print the per-source evidence as well
    #[arg(long)]
    pub evidence: bool,
}

pub async fn run(service: &ContinuityService, args: RecoverArgs) -> i32 {
    let session = SessionId::new(args.session);
    if !session.is_well_formed() {
        eprintln!("error: invalid session id: {session}");
        return EXIT_INVALID;
    }

    // Ctrl+C stops outstanding probes; finished ones are still reconciled.
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let mut report = service.recover(&session, &cancel).await;
    if !args.evidence {
        report.evidence.clear();
    }
    print_json(&report);

    if report.validation.valid {
        EXIT_OK
    } else {
        EXIT_FAILED
    }
}
