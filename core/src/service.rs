//! One handle over the whole engine: probe, store, recover, validate, gate.

use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::analyzer::{LayerSource, SourceAnalyzer, SourceProbe};
use crate::cache::RecoveryCache;
use crate::config::ContinuityConfig;
use crate::error::{ContinuityError, Result};
use crate::gates::{
    BypassLedger, BypassRecord, BypassRequest, GateContext, GatePipeline, PhasePlan,
    PhaseProgress, PhaseValidation, QualityGateResults,
};
use crate::layers::{LayerSink, default_layers};
use crate::monitor::{ContinuityMonitor, HealthReport};
use crate::probe::{EnvironmentFacts, EnvironmentProbe};
use crate::recovery::{RecoveryEngine, RecoveryReport};
use crate::snapshot::{SessionId, StateSnapshot};
use crate::validator::{ConsistencyAnalysis, ConsistencyReport, ConsistencyValidator, LayerSnapshot};
use crate::writer::{RedundancyWriter, StorageResult};

pub struct ContinuityService {
    config: ContinuityConfig,
    probe: EnvironmentProbe,
    writer: RedundancyWriter,
    recovery: RecoveryEngine,
    layer_reader: SourceAnalyzer,
    validator: ConsistencyValidator,
    gates: GatePipeline,
    ledger: BypassLedger,
    monitor: ContinuityMonitor,
}

impl ContinuityService {
    /// Service over the default layer set.
    pub fn from_config(config: ContinuityConfig) -> Self {
        let layers = default_layers(&config);
        Self::with_layers(config, layers)
    }

    pub fn with_layers(config: ContinuityConfig, layers: Vec<Arc<dyn LayerSink>>) -> Self {
        let cache = Arc::new(RecoveryCache::new(
            config.recovery.cache_ttl(),
            config.recovery.cache_capacity,
        ));
        let analyzer = SourceAnalyzer::from_config(&config, &layers);
        let layer_probes: Vec<Arc<dyn SourceProbe>> = layers
            .iter()
            .map(|layer| Arc::new(LayerSource::new(Arc::clone(layer))) as Arc<dyn SourceProbe>)
            .collect();
        let layer_reader = SourceAnalyzer::new(layer_probes)
            .with_timeouts(config.recovery.probe_timeouts.clone())
            .with_priors(config.recovery.priors.clone());

        Self {
            probe: EnvironmentProbe::from_config(&config),
            writer: RedundancyWriter::new(layers)
                .with_workers(config.storage.workers)
                .with_layer_timeout(config.storage.layer_timeout())
                .with_redundancy_ratio(config.thresholds.redundancy_ratio),
            recovery: RecoveryEngine::from_config(&config, analyzer, cache),
            layer_reader,
            validator: ConsistencyValidator::new(config.thresholds.consistency_penalty),
            gates: GatePipeline::new(config.gates.clone(), &config.thresholds),
            ledger: BypassLedger::from_config(&config),
            monitor: ContinuityMonitor::new(&config.monitor),
            config,
        }
    }

    /// Gate progress against `plan` instead of the built-in phase plan.
    pub fn with_phase_plan(mut self, plan: PhasePlan) -> Self {
        self.gates = self.gates.with_plan(plan);
        self
    }

    pub fn config(&self) -> &ContinuityConfig {
        &self.config
    }

    pub fn monitor(&self) -> &ContinuityMonitor {
        &self.monitor
    }

    pub fn health_report(&self) -> HealthReport {
        self.monitor.health_report()
    }

    pub fn writer(&self) -> &RedundancyWriter {
        &self.writer
    }

    pub fn ledger(&self) -> &BypassLedger {
        &self.ledger
    }

    pub async fn probe(&self) -> EnvironmentFacts {
        self.probe.capture().await
    }

    /// Store to every layer and drop any cached reconstruction of the session.
    pub async fn store(&self, snapshot: &StateSnapshot) -> Result<StorageResult> {
        let result = self.writer.store(snapshot).await?;
        self.recovery.cache().invalidate(snapshot.id());
        self.monitor.observe_store(&result);
        Ok(result)
    }

    pub async fn recover(
        &self,
        session_id: &SessionId,
        cancel: &CancellationToken,
    ) -> RecoveryReport {
        let report = self.recovery.recover(session_id, cancel).await;
        self.monitor.observe_recovery(&report);
        report
    }

    /// Read every layer back and compare the tracked fields.
    pub async fn cross_validate(&self, session_id: &SessionId) -> ConsistencyReport {
        let layers = self.layer_snapshots(session_id).await;
        let report = self.validator.cross_validate(&layers);
        self.monitor.observe_consistency(&report);
        report
    }

    pub async fn analyze_consistency(&self, session_id: &SessionId) -> ConsistencyAnalysis {
        let layers = self.layer_snapshots(session_id).await;
        self.validator.analyze_consistency(&layers)
    }

    async fn layer_snapshots(&self, session_id: &SessionId) -> Vec<LayerSnapshot> {
        let evidence = self
            .layer_reader
            .analyze_sources(session_id, &CancellationToken::new())
            .await;
        evidence.iter().filter_map(LayerSnapshot::from_evidence).collect()
    }

    /// Run every gate against `snapshot`, with the session's last store
    /// result and a fresh layer comparison. Bypasses granted for this
    /// session's current failures, still inside their remediation window, are
    /// attached for the gates that failed.
    pub async fn run_gates(
        &self,
        snapshot: &StateSnapshot,
        environment: Option<&EnvironmentFacts>,
    ) -> QualityGateResults {
        let consistency = self.cross_validate(snapshot.id()).await;
        let storage = self
            .writer
            .last_result()
            .filter(|result| result.session_id == *snapshot.id());

        let mut ctx = GateContext::new(snapshot).with_consistency(&consistency);
        if let Some(facts) = environment {
            ctx = ctx.with_environment(facts);
        }
        if let Some(storage) = storage.as_ref() {
            ctx = ctx.with_storage(storage);
        }

        let mut results = self.gates.run(&ctx);
        results.attach_bypasses(&self.ledger.records(), Utc::now());
        self.monitor.observe_gates(&results);
        results
    }

    /// Where the snapshot's phase stands in the phase plan.
    pub fn phase_progress(&self, snapshot: &StateSnapshot) -> Result<PhaseProgress> {
        self.gates
            .plan()
            .track(snapshot)
            .ok_or_else(|| ContinuityError::UnknownPhase(snapshot.phase.clone()))
    }

    /// Run the gates, then judge whether the snapshot's phase is complete.
    pub async fn validate_phase(
        &self,
        snapshot: &StateSnapshot,
        environment: Option<&EnvironmentFacts>,
    ) -> Result<PhaseValidation> {
        let plan = self.gates.plan();
        let (_, phase) = plan
            .find(&snapshot.phase)
            .ok_or_else(|| ContinuityError::UnknownPhase(snapshot.phase.clone()))?;
        let results = self.run_gates(snapshot, environment).await;
        Ok(plan.validate(phase, snapshot, Some(&results)))
    }

    /// Bypass a gate that failed in `results`.
    pub fn request_bypass(
        &self,
        request: BypassRequest,
        results: &QualityGateResults,
    ) -> Result<BypassRecord> {
        self.ledger.request_bypass(request, results)
    }
}
