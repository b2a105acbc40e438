//! Recovery engine: cache, source analysis and reconciliation in one call.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::analyzer::SourceAnalyzer;
use crate::cache::RecoveryCache;
use crate::config::ContinuityConfig;
use crate::evidence::SourceEvidence;
use crate::reconciler::{Reconciler, ReconstructedState, ReconstructionValidation};
use crate::snapshot::SessionId;
use crate::timing::Timer;

/// Everything one recovery produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryReport {
    pub state: ReconstructedState,
    pub validation: ReconstructionValidation,
    /// Evidence gathered by this call; empty on a cache hit.
    pub evidence: Vec<SourceEvidence>,
    pub from_cache: bool,
    pub cancelled: bool,
    pub elapsed_ms: u64,
    pub slo_exceeded: bool,
}

pub struct RecoveryEngine {
    analyzer: SourceAnalyzer,
    reconciler: Reconciler,
    cache: Arc<RecoveryCache>,
    slo: Duration,
}

impl RecoveryEngine {
    pub fn new(analyzer: SourceAnalyzer, reconciler: Reconciler, cache: Arc<RecoveryCache>) -> Self {
        Self {
            analyzer,
            reconciler,
            cache,
            slo: Duration::from_secs(30),
        }
    }

    pub fn from_config(
        config: &ContinuityConfig,
        analyzer: SourceAnalyzer,
        cache: Arc<RecoveryCache>,
    ) -> Self {
        Self::new(
            analyzer,
            Reconciler::from_thresholds(&config.thresholds),
            cache,
        )
        .with_slo(config.recovery.slo())
    }

    pub fn with_slo(mut self, slo: Duration) -> Self {
        self.slo = slo;
        self
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn cache(&self) -> &RecoveryCache {
        &self.cache
    }

    /// Reconstruct `session_id`, serving a fresh cached result when present.
    ///
    /// Cancelled runs reconcile whatever completed and are not cached.
    #[tracing::instrument(skip(self, cancel), fields(session = %session_id))]
    pub async fn recover(
        &self,
        session_id: &SessionId,
        cancel: &CancellationToken,
    ) -> RecoveryReport {
        let timer = Timer::with_budget("recover_session", self.slo);

        if let Some(state) = self.cache.get(session_id) {
            tracing::debug!("Serving cached reconstruction");
            let validation = self.reconciler.validate_reconstruction(&state);
            return RecoveryReport {
                state,
                validation,
                evidence: Vec::new(),
                from_cache: true,
                cancelled: false,
                elapsed_ms: timer.elapsed().as_millis() as u64,
                slo_exceeded: false,
            };
        }

        let evidence = self.analyzer.analyze_sources(session_id, cancel).await;
        let state = self.reconciler.reconstruct(session_id, &evidence);
        let validation = self.reconciler.validate_reconstruction(&state);
        let cancelled = cancel.is_cancelled();

        if !cancelled {
            self.cache.insert(state.clone());
        }

        tracing::info!(
            confidence = state.confidence,
            available = state.sources_available,
            total = state.sources_total,
            missing = state.missing_fields.len(),
            valid = validation.valid,
            "Recovery completed"
        );

        RecoveryReport {
            state,
            validation,
            evidence,
            from_cache: false,
            cancelled,
            elapsed_ms: timer.elapsed().as_millis() as u64,
            slo_exceeded: timer.over_budget(),
        }
    }
}
