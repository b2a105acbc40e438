//! Operation counters, component health and alerts.
//!
//! The service reports every store, layer comparison, gate run and recovery
//! here. Each observation updates a per-operation success counter and the
//! component's last known health. Alerts are emitted as `tracing` events
//! (`warn!` for warnings, `error!` for critical) and the most recent ones are
//! kept for the health report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::config::MonitorConfig;
use crate::gates::QualityGateResults;
use crate::recovery::RecoveryReport;
use crate::validator::ConsistencyReport;
use crate::writer::StorageResult;

/// Alerts kept for the health report.
const RECENT_ALERTS: usize = 100;

/// Recoveries at or above this confidence count as healthy.
const CONFIDENT_RECOVERY: f64 = 80.0;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Store,
    LayerSync,
    Gates,
    Recovery,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Store => "store",
            Self::LayerSync => "layer_sync",
            Self::Gates => "gates",
            Self::Recovery => "recovery",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered from best to worst, so the overall status is the maximum.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub level: AlertLevel,
    pub operation: Operation,
    pub title: String,
    pub message: String,
    pub raised_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationStats {
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
}

impl OperationStats {
    /// `None` until the operation has been observed.
    pub fn success_rate(&self) -> Option<f64> {
        (self.total > 0).then(|| self.succeeded as f64 / self.total as f64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: HealthStatus,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub generated_at: DateTime<Utc>,
    /// Worst component status; healthy when nothing has been observed.
    pub overall: HealthStatus,
    pub components: BTreeMap<Operation, ComponentHealth>,
    pub stats: BTreeMap<Operation, OperationStats>,
    pub alerts_raised: u64,
    pub recent_alerts: Vec<Alert>,
}

#[derive(Debug, Default)]
struct MonitorState {
    stats: BTreeMap<Operation, OperationStats>,
    health: BTreeMap<Operation, ComponentHealth>,
    failures: VecDeque<Instant>,
    alerts: VecDeque<Alert>,
    alerts_raised: u64,
}

#[derive(Debug)]
pub struct ContinuityMonitor {
    minimum_success_rate: f64,
    failure_pattern_threshold: usize,
    failure_window: Duration,
    state: Mutex<MonitorState>,
}

impl ContinuityMonitor {
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            minimum_success_rate: config.minimum_success_rate,
            failure_pattern_threshold: config.failure_pattern_threshold.max(1),
            failure_window: config.failure_window(),
            state: Mutex::new(MonitorState::default()),
        }
    }

    pub fn observe_store(&self, result: &StorageResult) {
        let health = if result.successful_layers == result.total_layers {
            ComponentHealth {
                status: HealthStatus::Healthy,
                message: format!("All {} layers written", result.total_layers),
            }
        } else if result.overall_success {
            ComponentHealth {
                status: HealthStatus::Degraded,
                message: format!(
                    "{}/{} layers written",
                    result.successful_layers, result.total_layers
                ),
            }
        } else {
            ComponentHealth {
                status: HealthStatus::Unhealthy,
                message: format!(
                    "Only {}/{} layers written, below the redundancy threshold",
                    result.successful_layers, result.total_layers
                ),
            }
        };
        self.record(Operation::Store, result.overall_success, health, "Redundant store failed");
    }

    pub fn observe_consistency(&self, report: &ConsistencyReport) {
        let score = report.consistency_score;
        let status = if score >= 95.0 {
            HealthStatus::Healthy
        } else if score >= 80.0 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        };
        let health = ComponentHealth {
            status,
            message: format!(
                "Consistency {score:.1} across {} layers, {} issue(s)",
                report.layers_checked,
                report.issues.len()
            ),
        };
        self.record(
            Operation::LayerSync,
            report.overall_consistent,
            health,
            "Layer consistency critical",
        );
    }

    pub fn observe_gates(&self, results: &QualityGateResults) {
        let total = results.results.len();
        let passed = results.results.iter().filter(|r| r.passed).count();
        let pass_rate = if total == 0 {
            1.0
        } else {
            passed as f64 / total as f64
        };
        let status = if pass_rate >= 0.9 {
            HealthStatus::Healthy
        } else if pass_rate >= 0.7 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        };
        let health = ComponentHealth {
            status,
            message: format!(
                "{passed}/{total} gates passed, {} bypassed",
                results.bypasses.len()
            ),
        };
        self.record(
            Operation::Gates,
            results.overall_passed(),
            health,
            "Quality gates failing",
        );
    }

    pub fn observe_recovery(&self, report: &RecoveryReport) {
        let state = &report.state;
        let status = if !report.validation.valid || state.sources_available == 0 {
            HealthStatus::Unhealthy
        } else if state.confidence >= CONFIDENT_RECOVERY && !report.cancelled {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };
        let health = ComponentHealth {
            status,
            message: format!(
                "Confidence {:.1} from {}/{} sources",
                state.confidence, state.sources_available, state.sources_total
            ),
        };
        let succeeded = report.validation.valid && !report.cancelled;
        self.record(Operation::Recovery, succeeded, health, "Context recovery failed");

        if report.slo_exceeded {
            self.raise(
                AlertLevel::Warning,
                Operation::Recovery,
                "Recovery exceeded its latency objective",
                format!("Recovery of {} took {} ms", state.session_id, report.elapsed_ms),
            );
        }
    }

    pub fn stats(&self, operation: Operation) -> OperationStats {
        self.lock().stats.get(&operation).copied().unwrap_or_default()
    }

    pub fn recent_alerts(&self) -> Vec<Alert> {
        self.lock().alerts.iter().cloned().collect()
    }

    pub fn health_report(&self) -> HealthReport {
        let state = self.lock();
        let overall = state
            .health
            .values()
            .map(|h| h.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);
        HealthReport {
            generated_at: Utc::now(),
            overall,
            components: state.health.clone(),
            stats: state.stats.clone(),
            alerts_raised: state.alerts_raised,
            recent_alerts: state.alerts.iter().cloned().collect(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(
        &self,
        operation: Operation,
        succeeded: bool,
        health: ComponentHealth,
        unhealthy_title: &str,
    ) {
        let (rate, recent_failures) = {
            let mut state = self.lock();
            let stats = state.stats.entry(operation).or_default();
            stats.total += 1;
            if succeeded {
                stats.succeeded += 1;
            } else {
                stats.failed += 1;
            }
            let rate = stats.success_rate();

            let now = Instant::now();
            if !succeeded {
                state.failures.push_back(now);
            }
            while state
                .failures
                .front()
                .is_some_and(|at| now.duration_since(*at) > self.failure_window)
            {
                state.failures.pop_front();
            }
            state.health.insert(operation, health.clone());
            (rate, if succeeded { 0 } else { state.failures.len() })
        };

        tracing::debug!(
            operation = %operation,
            succeeded,
            status = ?health.status,
            "Operation observed"
        );

        if health.status == HealthStatus::Unhealthy {
            self.raise(AlertLevel::Critical, operation, unhealthy_title, health.message);
        }
        if let Some(rate) = rate.filter(|rate| *rate < self.minimum_success_rate) {
            self.raise(
                AlertLevel::Warning,
                operation,
                "Low success rate",
                format!("{operation} success rate is {:.0}%", rate * 100.0),
            );
        }
        if recent_failures >= self.failure_pattern_threshold {
            self.raise(
                AlertLevel::Critical,
                operation,
                "Failure pattern detected",
                format!(
                    "{recent_failures} failures in the last {} s",
                    self.failure_window.as_secs()
                ),
            );
        }
    }

    fn raise(&self, level: AlertLevel, operation: Operation, title: &str, message: String) {
        match level {
            AlertLevel::Warning => {
                tracing::warn!(operation = %operation, title, message = %message, "Alert raised");
            }
            AlertLevel::Critical => {
                tracing::error!(operation = %operation, title, message = %message, "Alert raised");
            }
        }

        let mut state = self.lock();
        state.alerts_raised += 1;
        state.alerts.push_back(Alert {
            level,
            operation,
            title: title.to_string(),
            message,
            raised_at: Utc::now(),
        });
        if state.alerts.len() > RECENT_ALERTS {
            state.alerts.pop_front();
        }
    }
}

impl Default for ContinuityMonitor {
    fn default() -> Self {
        Self::new(&MonitorConfig::default())
    }
}
