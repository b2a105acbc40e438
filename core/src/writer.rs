//! Redundancy writer.
//!
//! Fans one snapshot out to every layer through a bounded worker pool. Each
//! layer write is independent and time-boxed; a failed or slow layer only
//! costs its own outcome. Outcomes are merged after the join.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::ContinuityConfig;
use crate::error::Result;
use crate::layers::{LayerSink, LayerTier, default_layers};
use crate::snapshot::{SessionId, StateSnapshot};
use crate::timing::Timer;

/// Outcome of writing one layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerWriteOutcome {
    pub tier: LayerTier,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

/// Aggregate outcome of one store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageResult {
    pub session_id: SessionId,
    /// Per-layer outcome keyed by layer id.
    pub layers: BTreeMap<String, LayerWriteOutcome>,
    pub successful_layers: usize,
    pub total_layers: usize,
    pub overall_success: bool,
    pub completed_at: DateTime<Utc>,
}

impl StorageResult {
    pub fn success_rate(&self) -> f64 {
        if self.total_layers == 0 {
            0.0
        } else {
            self.successful_layers as f64 / self.total_layers as f64
        }
    }

    pub fn failed_layers(&self) -> impl Iterator<Item = (&str, &LayerWriteOutcome)> {
        self.layers
            .iter()
            .filter(|(_, outcome)| !outcome.success)
            .map(|(id, outcome)| (id.as_str(), outcome))
    }
}

/// `successful >= ceil(ratio * total)`; zero layers never meet it.
pub fn meets_redundancy_threshold(successful: usize, total: usize, ratio: f64) -> bool {
    if total == 0 {
        return false;
    }
    // Epsilon keeps 0.8 * 5 from rounding up to 5.
    let required = (ratio * total as f64 - 1e-9).ceil().max(0.0) as usize;
    successful >= required
}

#[derive(Debug, Default)]
struct WriterState {
    last_written: HashMap<String, DateTime<Utc>>,
    last_result: Option<StorageResult>,
}

pub struct RedundancyWriter {
    layers: Vec<Arc<dyn LayerSink>>,
    workers: usize,
    layer_timeout: Duration,
    redundancy_ratio: f64,
    state: Mutex<WriterState>,
}

impl RedundancyWriter {
    pub fn new(layers: Vec<Arc<dyn LayerSink>>) -> Self {
        Self {
            layers,
            workers: 4,
            layer_timeout: Duration::from_secs(8),
            redundancy_ratio: 0.8,
            state: Mutex::new(WriterState::default()),
        }
    }

    pub fn from_config(config: &ContinuityConfig) -> Self {
        Self::new(default_layers(config))
            .with_workers(config.storage.workers)
            .with_layer_timeout(config.storage.layer_timeout())
            .with_redundancy_ratio(config.thresholds.redundancy_ratio)
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_layer_timeout(mut self, timeout: Duration) -> Self {
        self.layer_timeout = timeout;
        self
    }

    pub fn with_redundancy_ratio(mut self, ratio: f64) -> Self {
        self.redundancy_ratio = ratio;
        self
    }

    pub fn layers(&self) -> &[Arc<dyn LayerSink>] {
        &self.layers
    }

    /// Validate the snapshot and write it to every layer.
    ///
    /// Only an invalid snapshot is an error; layer failures are reported in
    /// the returned [`StorageResult`].
    #[tracing::instrument(skip_all, fields(session = %snapshot.id(), layers = self.layers.len()))]
    pub async fn store(&self, snapshot: &StateSnapshot) -> Result<StorageResult> {
        snapshot.validate()?;
        let _timer = Timer::new("store_snapshot");

        let shared = Arc::new(snapshot.clone());
        let pool = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();

        for layer in &self.layers {
            let layer = Arc::clone(layer);
            let snapshot = Arc::clone(&shared);
            let pool = Arc::clone(&pool);
            let limit = self.layer_timeout;
            tasks.spawn(async move {
                let id = layer.id().to_string();
                let tier = layer.tier();
                let Ok(_permit) = pool.acquire_owned().await else {
                    return (id, failed(tier, "worker pool closed".to_string(), 0));
                };
                let started = Instant::now();
                let result = tokio::time::timeout(limit, layer.write(&snapshot)).await;
                let elapsed_ms = started.elapsed().as_millis() as u64;
                let outcome = match result {
                    Ok(Ok(())) => LayerWriteOutcome {
                        tier,
                        success: true,
                        error: None,
                        elapsed_ms,
                    },
                    Ok(Err(err)) => failed(tier, err.to_string(), elapsed_ms),
                    Err(_) => failed(
                        tier,
                        format!("timed out after {}ms", limit.as_millis()),
                        elapsed_ms,
                    ),
                };
                (id, outcome)
            });
        }

        let mut outcomes = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((id, outcome)) => {
                    outcomes.insert(id, outcome);
                }
                Err(err) => tracing::warn!(error = %err, "Layer write task aborted"),
            }
        }
        // A panicked task never reported back; count its layer as failed.
        for layer in &self.layers {
            outcomes
                .entry(layer.id().to_string())
                .or_insert_with(|| failed(layer.tier(), "write task aborted".to_string(), 0));
        }

        for (id, outcome) in outcomes.iter().filter(|(_, o)| !o.success) {
            tracing::warn!(
                layer = %id,
                tier = %outcome.tier,
                error = outcome.error.as_deref().unwrap_or_default(),
                "Layer write failed"
            );
        }

        let successful_layers = outcomes.values().filter(|o| o.success).count();
        let total_layers = self.layers.len();
        let result = StorageResult {
            session_id: snapshot.id().clone(),
            overall_success: meets_redundancy_threshold(
                successful_layers,
                total_layers,
                self.redundancy_ratio,
            ),
            layers: outcomes,
            successful_layers,
            total_layers,
            completed_at: Utc::now(),
        };

        tracing::info!(
            successful = successful_layers,
            total = total_layers,
            overall_success = result.overall_success,
            "Snapshot stored"
        );

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        for (id, outcome) in &result.layers {
            if outcome.success {
                state.last_written.insert(id.clone(), result.completed_at);
            }
        }
        state.last_result = Some(result.clone());
        Ok(result)
    }

    /// Most recent store outcome, if any.
    pub fn last_result(&self) -> Option<StorageResult> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last_result
            .clone()
    }

    /// When `layer_id` last accepted a write.
    pub fn last_written(&self, layer_id: &str) -> Option<DateTime<Utc>> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last_written
            .get(layer_id)
            .copied()
    }

    /// Layers never written, or not written within `max_age`.
    pub fn stale_layers(&self, max_age: Duration) -> Vec<String> {
        let now = Utc::now();
        let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        self.layers
            .iter()
            .map(|layer| layer.id())
            .filter(|id| {
                state
                    .last_written
                    .get(*id)
                    .is_none_or(|at| now.signed_duration_since(*at) > max_age)
            })
            .map(str::to_string)
            .collect()
    }
}

fn failed(tier: LayerTier, error: String, elapsed_ms: u64) -> LayerWriteOutcome {
    LayerWriteOutcome {
        tier,
        success: false,
        error: Some(error),
        elapsed_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_is_ceiling_of_ratio() {
        assert!(meets_redundancy_threshold(4, 5, 0.8));
        assert!(!meets_redundancy_threshold(3, 5, 0.8));
        assert!(meets_redundancy_threshold(5, 6, 0.8));
        assert!(!meets_redundancy_threshold(4, 6, 0.8));
        assert!(meets_redundancy_threshold(1, 1, 0.8));
        assert!(!meets_redundancy_threshold(0, 0, 0.8));
    }

    #[test]
    fn success_rate_of_empty_result_is_zero() {
        let result = StorageResult {
            session_id: SessionId::new("s"),
            layers: BTreeMap::new(),
            successful_layers: 0,
            total_layers: 0,
            overall_success: false,
            completed_at: Utc::now(),
        };
        assert_eq!(result.success_rate(), 0.0);
    }
}
