//! Operator CLI for the continuity engine.
//!
//! ## Exit codes
//!
//! - 0: success
//! - 1: the check ran and failed (gate failure, inconsistent layers,
//!   non-durable store, unusable recovery, incomplete phase, unwritable
//!   bypass ledger)
//! - 2: invalid input (bad snapshot file, rejected bypass, unknown phase,
//!   bad config or phase plan)

pub mod gates_cmd;
pub mod phase_cmd;
pub mod probe_cmd;
pub mod recover_cmd;
pub mod store_cmd;
pub mod validate_cmd;

use anyhow::Context;
use clap::{Parser, Subcommand};
use continuity_core::snapshot::StateSnapshot;
use continuity_core::{ConfigLoader, ContinuityConfig, ContinuityService};
use serde::Serialize;
use std::path::{Path, PathBuf};

pub const EXIT_OK: i32 = 0;
pub const EXIT_FAILED: i32 = 1;
pub const EXIT_INVALID: i32 = 2;

/// Session continuity: redundant state, recovery and quality gates
#[derive(Debug, Parser)]
#[command(name = "continuity", version)]
pub struct Cli {
    /// Configuration file (defaults to continuity.toml lookup)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Project root; overrides `probe.project_root`
    #[arg(long, global = true, value_name = "DIR")]
    pub root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Capture build, dependency, storage and toolchain facts
    Probe(probe_cmd::ProbeArgs),

    /// Write a snapshot to every storage layer
    Store(store_cmd::StoreArgs),

    /// Reconstruct a session from whatever sources survive
    Recover(recover_cmd::RecoverArgs),

    /// Compare the storage layers against each other
    Validate(validate_cmd::ValidateArgs),

    /// Run the compile, doc-sync, progress and quality gates
    Gates(gates_cmd::GatesArgs),

    /// Gate a snapshot and record an audited bypass of one failed gate
    Bypass(gates_cmd::BypassArgs),

    /// Track the snapshot's phase and check whether it is complete
    Phase(phase_cmd::PhaseArgs),
}

impl Cli {
    pub async fn run(self) -> i32 {
        let config = match load_config(self.config.as_deref(), self.root.as_deref()) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("error: {err:#}");
                return EXIT_INVALID;
            }
        };
        let service = ContinuityService::from_config(config);

        match self.command {
            Command::Probe(args) => probe_cmd::run(&service, args).await,
            Command::Store(args) => store_cmd::run(&service, args).await,
            Command::Recover(args) => recover_cmd::run(&service, args).await,
            Command::Validate(args) => validate_cmd::run(&service, args).await,
            Command::Gates(args) => gates_cmd::run_gates(&service, args).await,
            Command::Bypass(args) => gates_cmd::run_bypass(&service, args).await,
            Command::Phase(args) => phase_cmd::run(service, args).await,
        }
    }
}

/// Explicit file, then `<root>/continuity.toml`, then the default lookup.
fn load_config(path: Option<&Path>, root: Option<&Path>) -> anyhow::Result<ContinuityConfig> {
    let root_file = root
        .map(|root| root.join("continuity.toml"))
        .filter(|file| file.exists());
    let mut config = match path.map(Path::to_path_buf).or(root_file) {
        Some(file) => ConfigLoader::new()
            .with_file(&file)
            .load()
            .with_context(|| format!("loading {}", file.display()))?,
        None => ConfigLoader::load_default().context("loading configuration")?,
    };
    if let Some(root) = root {
        config.probe.project_root = root.to_path_buf();
    }
    Ok(config)
}

pub(crate) fn read_snapshot(path: &Path) -> anyhow::Result<StateSnapshot> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}

pub(crate) fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(err) => eprintln!("error: failed to render output: {err}"),
    }
}
