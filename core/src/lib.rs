//! Session continuity engine.
//!
//! Replicates a project's working state across independent storage layers,
//! reconstructs it from whatever survives, checks the layers against each
//! other, and gates progress on compile, documentation, progress and quality
//! checks. A phase plan tracks deliverables per phase, and a monitor turns
//! operation outcomes into health status and alerts.
//!
//! Most callers go through [`ContinuityService`]; the individual components
//! are public for embedding and testing.

#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod analyzer;
pub mod cache;
pub mod config;
pub mod error;
pub mod evidence;
pub mod gates;
pub mod layers;
pub mod monitor;
pub mod probe;
pub mod reconciler;
pub mod recovery;
pub mod service;
pub mod snapshot;
pub mod timing;
pub mod validator;
pub mod writer;

pub use analyzer::{SourceAnalyzer, SourceProbe, SourceReading};
pub use cache::RecoveryCache;
pub use config::{ConfigLoader, ContinuityConfig};
pub use error::{ContinuityError, Result};
pub use evidence::{ContextElement, ContextField, SourceEvidence, SourceKind};
pub use gates::{GateKind, GatePipeline, GateResult, PhasePlan, QualityGateResults};
pub use layers::{LayerSink, LayerTier};
pub use monitor::{ContinuityMonitor, HealthReport, HealthStatus};
pub use probe::{EnvironmentFacts, EnvironmentProbe};
pub use reconciler::{ReconstructedState, Reconciler};
pub use recovery::{RecoveryEngine, RecoveryReport};
pub use service::ContinuityService;
pub use snapshot::{SessionId, StateSnapshot};
pub use validator::{ConsistencyReport, ConsistencyValidator, LayerSnapshot};
pub use writer::{RedundancyWriter, StorageResult};

/// Engine version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
