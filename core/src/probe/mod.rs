//! Environment probe.
//!
//! Captures build health, dependency resolution, storage connectivity and
//! toolchain versions. Every sub-check degrades to a status value; `capture`
//! itself never fails.

pub mod build;
pub mod database;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;

use crate::config::ContinuityConfig;
use crate::measure_time_async;
use crate::snapshot::{BuildStatus, ConnectivityStatus, EnvironmentSummary, KnownIssue};

pub use build::{Diagnostic, DiagnosticLevel, RootCause, document_issues, parse_diagnostics};
pub use database::StorageHealth;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeStatus {
    Succeeded,
    Failed,
    /// The check could not run at all (missing tool, missing file, timeout).
    Unavailable,
}

/// Outcome of one external command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandReport {
    pub status: ProbeStatus,
    pub exit_code: Option<i32>,
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Build outcome with located diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildReport {
    pub command: CommandReport,
    pub diagnostics: Vec<Diagnostic>,
    pub warning_count: usize,
}

impl BuildReport {
    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.level == DiagnosticLevel::Error)
    }

    pub fn error_count(&self) -> usize {
        self.errors().count()
    }

    pub fn succeeded(&self) -> bool {
        self.command.status == ProbeStatus::Succeeded
    }
}

/// Everything the probe learned in one pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentFacts {
    pub captured_at: DateTime<Utc>,
    pub build: BuildReport,
    pub dependencies: CommandReport,
    pub storage: StorageHealth,
    pub runtime_versions: BTreeMap<String, String>,
}

impl EnvironmentFacts {
    /// The condensed form stored inside a snapshot.
    pub fn summary(&self) -> EnvironmentSummary {
        let build = match self.build.command.status {
            ProbeStatus::Succeeded => BuildStatus::Succeeded,
            ProbeStatus::Failed => BuildStatus::Failed,
            ProbeStatus::Unavailable => BuildStatus::Unknown,
        };
        let connectivity = match self.storage.status {
            ProbeStatus::Succeeded => ConnectivityStatus::Connected,
            ProbeStatus::Failed => ConnectivityStatus::Disconnected,
            ProbeStatus::Unavailable => ConnectivityStatus::Unknown,
        };
        EnvironmentSummary {
            build,
            connectivity,
            runtime_versions: self.runtime_versions.clone(),
        }
    }

    /// Known issues derived from the build errors.
    pub fn documented_issues(&self) -> Vec<KnownIssue> {
        document_issues(&self.build.diagnostics)
    }
}

/// Runs the configured checks against a project root.
#[derive(Debug, Clone)]
pub struct EnvironmentProbe {
    project_root: PathBuf,
    build_command: Vec<String>,
    dependency_command: Vec<String>,
    version_commands: Vec<(String, Vec<String>)>,
    database_path: PathBuf,
    timeout: Duration,
}

impl EnvironmentProbe {
    pub fn from_config(config: &ContinuityConfig) -> Self {
        Self {
            project_root: config.probe.project_root.clone(),
            build_command: config.probe.build_command.clone(),
            dependency_command: config.probe.dependency_command.clone(),
            version_commands: vec![
                ("rustc".to_string(), vec!["rustc".to_string(), "--version".to_string()]),
                ("cargo".to_string(), vec!["cargo".to_string(), "--version".to_string()]),
            ],
            database_path: config.database_path(),
            timeout: config.probe.command_timeout(),
        }
    }

    /// Replace the toolchain version commands (label, program + args).
    pub fn with_version_commands(mut self, commands: Vec<(String, Vec<String>)>) -> Self {
        self.version_commands = commands;
        self
    }

    #[tracing::instrument(skip(self), fields(root = %self.project_root.display()))]
    pub async fn capture(&self) -> EnvironmentFacts {
        let build = measure_time_async!("probe_build", self.probe_build());
        let dependencies = measure_time_async!(
            "probe_dependencies",
            self.run(&self.dependency_command)
        )
        .0;

        let database_path = self.database_path.clone();
        let storage = tokio::task::spawn_blocking(move || database::check(&database_path))
            .await
            .unwrap_or_else(|err| StorageHealth {
                status: ProbeStatus::Failed,
                table_count: None,
                error: Some(format!("storage check panicked: {err}")),
            });

        let mut runtime_versions = BTreeMap::new();
        for (label, command) in &self.version_commands {
            let (report, stdout) = self.run(command).await;
            if report.status == ProbeStatus::Succeeded {
                runtime_versions.insert(label.clone(), stdout.trim().to_string());
            }
        }

        tracing::info!(
            build = ?build.command.status,
            errors = build.error_count(),
            warnings = build.warning_count,
            storage = ?storage.status,
            "Environment captured"
        );

        EnvironmentFacts {
            captured_at: Utc::now(),
            build,
            dependencies,
            storage,
            runtime_versions,
        }
    }

    async fn probe_build(&self) -> BuildReport {
        let (command, output) = self.run(&self.build_command).await;
        let diagnostics = parse_diagnostics(&output);
        let warning_count = diagnostics
            .iter()
            .filter(|d| d.level == DiagnosticLevel::Warning)
            .count();
        BuildReport {
            command,
            diagnostics,
            warning_count,
        }
    }

    /// Run a command in the project root. Returns the report and the
    /// combined stdout and stderr.
    async fn run(&self, command: &[String]) -> (CommandReport, String) {
        let started = Instant::now();
        let Some((program, args)) = command.split_first() else {
            return (
                CommandReport {
                    status: ProbeStatus::Unavailable,
                    exit_code: None,
                    elapsed_ms: 0,
                    error: Some("empty command".to_string()),
                },
                String::new(),
            );
        };

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(&self.project_root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let elapsed_ms = |start: Instant| start.elapsed().as_millis() as u64;
        match tokio::time::timeout(self.timeout, cmd.output()).await {
            Err(_) => {
                tracing::warn!(program = %program, timeout_ms = self.timeout.as_millis() as u64, "Probe command timed out");
                (
                    CommandReport {
                        status: ProbeStatus::Unavailable,
                        exit_code: None,
                        elapsed_ms: elapsed_ms(started),
                        error: Some(format!(
                            "timed out after {}ms",
                            self.timeout.as_millis()
                        )),
                    },
                    String::new(),
                )
            }
            Ok(Err(err)) => {
                tracing::debug!(program = %program, error = %err, "Probe command could not start");
                (
                    CommandReport {
                        status: ProbeStatus::Unavailable,
                        exit_code: None,
                        elapsed_ms: elapsed_ms(started),
                        error: Some(format!("failed to execute {program}: {err}")),
                    },
                    String::new(),
                )
            }
            Ok(Ok(output)) => {
                let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
                combined.push_str(&String::from_utf8_lossy(&output.stderr));
                let (status, error) = if output.status.success() {
                    (ProbeStatus::Succeeded, None)
                } else {
                    (
                        ProbeStatus::Failed,
                        Some(format!("{program} exited with {}", output.status)),
                    )
                };
                (
                    CommandReport {
                        status,
                        exit_code: output.status.code(),
                        elapsed_ms: elapsed_ms(started),
                        error,
                    },
                    combined,
                )
            }
        }
    }
}
